//! TL CLI - command-line entry point for the TL tensor/Datalog language

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::time::Instant;
use tl_core::parser::parse_program;
use tl_core::Vm;

#[derive(Parser)]
#[command(name = "tl")]
#[command(about = "TL - a tensor/Datalog language interpreter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose (debug-level) tracing output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a TL program, printing one line per query statement
    Run {
        /// Path to a .tl source file
        file: String,
    },

    /// Parse a TL program without running it
    Check {
        /// Path to a .tl source file
        file: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose || std::env::var("TL_DEBUG").is_ok() {
        tracing_subscriber::fmt().with_env_filter("tl=debug").init();
    }

    match cli.command {
        Commands::Run { file } => run_command(file),
        Commands::Check { file } => check_command(file),
    }
}

fn run_command(file: String) -> Result<()> {
    let start = Instant::now();
    let source = fs::read_to_string(&file).with_context(|| format!("failed to read file: {file}"))?;

    let program = parse_program(&source).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut vm = Vm::new();
    let output = vm.run(&program).map_err(|e| anyhow::anyhow!("{e}"))?;

    for line in &output {
        println!("{line}");
    }

    tracing::debug!(elapsed = ?start.elapsed(), queries = output.len(), "run complete");
    Ok(())
}

fn check_command(file: String) -> Result<()> {
    let source = fs::read_to_string(&file).with_context(|| format!("failed to read file: {file}"))?;

    match parse_program(&source) {
        Ok(program) => {
            println!("{} {} is valid", "✓".green(), file);
            println!("  statements: {}", program.statements.len());
            Ok(())
        }
        Err(e) => {
            println!("{} {} is invalid:", "✗".red(), file);
            println!("  {e}");
            std::process::exit(1);
        }
    }
}
