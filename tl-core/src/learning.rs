//! Learning driver (§4.4.13): identifies learnable parameters, runs a
//! forward/backward epoch loop for `@minimize`/`@maximize`, and draws
//! categorical samples for `@sample`.
//!
//! A tensor counts as a learnable parameter if it is assigned exactly
//! once in the program, via a bare list-literal equation, under a
//! lowercase-leading name (`w = [...]`). Everything else — including a
//! once-assigned list literal under an uppercase name, which reads as
//! fixed data rather than a weight — is a derived or constant value,
//! recomputed every forward pass.

use crate::ast::{DirectiveArg, DirectiveName, Expr, LearningDirective, Program, Projection, Statement, TensorRef};
use crate::env::Environment;
use crate::error::TLError;
use crate::executor::Registry;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;
use std::collections::HashSet;

/// Number of evenly spaced progress lines to emit across an epoch loop.
const PROGRESS_POINTS: u32 = 10;

/// Identify every tensor assigned exactly once by a bare list literal,
/// under a lowercase-leading name — the program's learnable parameters.
///
/// A bare list-literal assignment alone doesn't distinguish a weight
/// from a fixed constant: `x = [0.0]` and `Target = [2.0]` are both
/// single list-literal assigns, but only `x` should move under
/// `@minimize`. Tensor names follow the same lowercase/uppercase split
/// as index and relation names elsewhere in the language (lowercase =
/// variable-like, uppercase = a fixed, named entity), so the uppercase
/// ones are excluded here even when otherwise list-literal-shaped.
fn learnable_parameters(program: &Program) -> Vec<String> {
    let mut assign_counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut list_literal_targets: HashSet<String> = HashSet::new();
    for stmt in &program.statements {
        if let Statement::TensorEquation(eq) = stmt {
            let name = eq.lhs.name.as_str().to_string();
            *assign_counts.entry(name.clone()).or_insert(0) += 1;
            if eq.projection == Projection::Assign
                && eq.clauses.len() == 1
                && eq.clauses[0].guard.is_none()
                && eq.lhs.indices.is_empty()
                && !eq.lhs.name.is_uppercase()
                && matches!(eq.clauses[0].expr, Expr::List(..))
            {
                list_literal_targets.insert(name);
            }
        }
    }
    list_literal_targets
        .into_iter()
        .filter(|name| assign_counts.get(name) == Some(&1))
        .collect()
}

fn arg_f64_alias(directive: &LearningDirective, keys: &[&str], default: f64) -> f64 {
    for key in keys {
        match directive.arg(key) {
            Some(DirectiveArg::Float(f)) => return *f,
            Some(DirectiveArg::Int(i)) => return *i as f64,
            _ => {}
        }
    }
    default
}

fn arg_i64_alias(directive: &LearningDirective, keys: &[&str], default: i64) -> i64 {
    for key in keys {
        match directive.arg(key) {
            Some(DirectiveArg::Int(i)) => return *i,
            Some(DirectiveArg::Float(f)) => return *f as i64,
            _ => {}
        }
    }
    default
}

fn arg_bool(directive: &LearningDirective, key: &str, default: bool) -> bool {
    match directive.arg(key) {
        Some(DirectiveArg::Bool(b)) => *b,
        _ => default,
    }
}

/// Run a single forward pass over `program`'s tensor equations, via the
/// ordinary executor registry. List-literal parameter statements are
/// skipped (they were already materialized once, before training began,
/// and re-running them would reset the learned weights every epoch).
fn forward_pass(
    program: &Program,
    env: &mut Environment,
    backend: &dyn TensorBackend,
    registry: &Registry,
    params: &HashSet<String>,
) -> Result<()> {
    for stmt in &program.statements {
        if let Statement::TensorEquation(eq) = stmt {
            if params.contains(eq.lhs.name.as_str()) {
                continue;
            }
            registry.run(eq, env, backend)?;
        }
    }
    Ok(())
}

/// Run `@minimize`/`@maximize` on the tensor named by `target`: identify
/// parameters, enable gradient tracking, then iterate forward/backward
/// for `epochs` steps, logging ten evenly spaced progress lines.
pub fn run_optimization(
    program: &Program,
    target: &TensorRef,
    directive: &LearningDirective,
    env: &mut Environment,
    backend: &dyn TensorBackend,
) -> Result<()> {
    let maximize = directive.name == DirectiveName::Maximize;
    let lr = arg_f64_alias(directive, &["lr", "learning_rate"], 0.01);
    let epochs = arg_i64_alias(directive, &["epochs"], 100).max(1);
    let verbose = arg_bool(directive, "verbose", false);

    let param_names = learnable_parameters(program);
    if param_names.is_empty() {
        return Err(TLError::Learning(
            "no learnable parameters found (no tensor is assigned exactly once via a list literal)".to_string(),
        ));
    }
    let param_set: HashSet<String> = param_names.iter().cloned().collect();

    let registry = Registry::standard();
    let progress_every = (epochs / PROGRESS_POINTS as i64).max(1);

    for epoch in 0..epochs {
        tracing::trace!(epoch, epochs, "learning driver epoch");
        // Each epoch rebuilds its own tape: forward_pass re-derives every
        // non-parameter tensor from scratch, so last epoch's nodes would
        // only grow the tape without ever being read again.
        backend.reset_tape();
        for name in &param_names {
            let t = env.lookup_mut(name.as_str())?;
            t.node = None;
            backend.requires_grad(t);
        }
        forward_pass(program, env, backend, &registry, &param_set)?;

        let loss_tensor = env.lookup(target.name.as_str())?.clone();
        let scalar_loss = if loss_tensor.len() == 1 {
            loss_tensor
        } else {
            backend.sum(&loss_tensor)
        };
        let stepped = if maximize {
            backend.neg(&scalar_loss)
        } else {
            scalar_loss.clone()
        };
        backend.backward(&stepped)?;

        let mut param_tensors: Vec<Tensor> = Vec::with_capacity(param_names.len());
        for name in &param_names {
            param_tensors.push(env.lookup(name.as_str())?.clone());
        }
        {
            let mut refs: Vec<&mut Tensor> = param_tensors.iter_mut().collect();
            backend.sgd_step(&mut refs, lr);
        }
        for (name, tensor) in param_names.iter().zip(param_tensors) {
            env.bind(name.as_str(), tensor);
        }

        if verbose && (epoch % progress_every == 0 || epoch == epochs - 1) {
            let display_loss = scalar_loss.data.first().copied().unwrap_or(0.0);
            tracing::info!(epoch, loss = display_loss, "training progress");
        }
    }

    Ok(())
}

/// Run `@sample`: draw `n` categorical samples from the (already
/// normalized) probability tensor named by `target`.
pub fn run_sampling(
    target: &TensorRef,
    directive: &LearningDirective,
    env: &Environment,
    backend: &dyn TensorBackend,
) -> Result<Vec<usize>> {
    let n = arg_i64_alias(directive, &["n", "samples"], 1000).max(0) as usize;
    let probs = env.lookup(target.name.as_str())?;
    Ok(backend.multinomial(probs, n, true))
}
