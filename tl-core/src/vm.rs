//! The VM: walks a program's statements in order, routing tensor
//! equations through the preprocessor and executor registry, facts and
//! rules into the Datalog engine, and queries to whichever evaluator
//! their target kind calls for (§2, §5).

use crate::ast::{
    FileOperation, Program, Query, QueryTarget, Statement,
};
use crate::datalog::{DatalogEngine, DatalogQueryResult};
use crate::env::Environment;
use crate::error::TLError;
use crate::executor::eval::resolve_tensor_ref;
use crate::executor::Registry;
use crate::learning;
use crate::preprocessor;
use crate::tensor::{DenseBackend, Tensor};
use crate::Result;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;

/// Bundles the environment, Datalog engine, executor registry, and
/// tensor backend a program runs against.
pub struct Vm {
    env: Environment,
    engine: DatalogEngine,
    registry: Registry,
    backend: DenseBackend,
    /// Tensor equations seen so far this run, in order. A learning
    /// directive re-derives its loss by replaying this fragment every
    /// epoch, so the VM keeps it around rather than the original
    /// (pre-expansion) program.
    recorded: Vec<Statement>,
}

impl Vm {
    /// A fresh VM with an empty environment and the default dense backend.
    pub fn new() -> Self {
        Vm {
            env: Environment::new(),
            engine: DatalogEngine::new(),
            registry: Registry::standard(),
            backend: DenseBackend::new(),
            recorded: Vec::new(),
        }
    }

    /// Borrow the environment (for tests and host-side inspection).
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Run a whole program, returning one output line per query
    /// statement encountered, in order.
    pub fn run(&mut self, program: &Program) -> Result<Vec<String>> {
        let expanded = preprocessor::expand(program, &mut self.env, &self.backend)?;
        let mut output = Vec::new();
        for (index, stmt) in expanded.statements.iter().enumerate() {
            tracing::debug!(statement = index, total = expanded.statements.len(), "running statement");
            if let Some(line) = self.run_statement(stmt)? {
                output.push(line);
            }
        }
        Ok(output)
    }

    fn run_statement(&mut self, stmt: &Statement) -> Result<Option<String>> {
        match stmt {
            Statement::TensorEquation(eq) => {
                self.registry.run(eq, &mut self.env, &self.backend)?;
                self.recorded.push(stmt.clone());
                Ok(None)
            }
            Statement::DatalogFact(atom) => {
                self.engine.add_fact(atom, &mut self.env)?;
                Ok(None)
            }
            Statement::DatalogRule(rule) => {
                self.engine.add_rule(rule.clone(), &mut self.env);
                Ok(None)
            }
            Statement::FileOperation(op) => {
                self.run_file_operation(op)?;
                Ok(None)
            }
            Statement::Query(query) => self.run_query(query).map(Some),
        }
    }

    fn run_file_operation(&mut self, op: &FileOperation) -> Result<()> {
        match op {
            FileOperation::Read { target, path } => {
                let contents = fs::read_to_string(&path.path.text)?;
                let tensor = parse_tensor_dump(&contents)?;
                self.env.bind(target.name.as_str(), tensor);
                Ok(())
            }
            FileOperation::Write { path, source } => {
                let tensor = self.env.lookup(source.name.as_str())?;
                fs::write(&path.path.text, format_tensor_dump(tensor))?;
                Ok(())
            }
        }
    }

    fn run_query(&mut self, query: &Query) -> Result<String> {
        if let Some(directive) = &query.directive {
            let target = match &query.target {
                QueryTarget::Tensor(tref) => tref,
                QueryTarget::Datalog(_) => {
                    return Err(TLError::Learning(
                        "learning directives apply only to tensor queries".to_string(),
                    ))
                }
            };
            match directive.name {
                crate::ast::DirectiveName::Minimize | crate::ast::DirectiveName::Maximize => {
                    let fragment = Program {
                        statements: self.recorded.clone(),
                    };
                    learning::run_optimization(&fragment, target, directive, &mut self.env, &self.backend)?;
                }
                crate::ast::DirectiveName::Sample => {
                    let picks = learning::run_sampling(target, directive, &self.env, &self.backend)?;
                    return Ok(format!(
                        "{} = [{}]",
                        target.name,
                        picks.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
                    ));
                }
            }
        }

        match &query.target {
            QueryTarget::Tensor(tref) => self.format_tensor_query(tref),
            QueryTarget::Datalog(_) => {
                if self.env.is_dirty() {
                    self.engine.saturate(&mut self.env)?;
                }
                let result = self.engine.evaluate_query(query, &self.env)?;
                Ok(format_datalog_result(&result))
            }
        }
    }

    fn format_tensor_query(&mut self, tref: &crate::ast::TensorRef) -> Result<String> {
        if tref.indices.is_empty() {
            let tensor = self.env.lookup(tref.name.as_str())?;
            return Ok(format!("{} =\n{}", tref.name, tensor));
        }
        let bindings = HashMap::new();
        let value = resolve_tensor_ref(tref, &mut self.env, &bindings, false)?;
        Ok(format!("{} = {}", tref, value))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

fn format_datalog_result(result: &DatalogQueryResult) -> String {
    match result {
        DatalogQueryResult::Ground(true) => "True".to_string(),
        DatalogQueryResult::Ground(false) => "False".to_string(),
        DatalogQueryResult::Bindings { rows, .. } if rows.is_empty() => "None".to_string(),
        DatalogQueryResult::Bindings { rows, .. } => rows
            .iter()
            .map(|row| row.join(", "))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Flat-file tensor dump (§6.3): 1-D tensors get one float per line; 2-D
/// tensors get one comma-separated row per line; higher-rank tensors are
/// flattened to one value per line, same as 1-D (shape beyond rank 2 does
/// not round-trip through this format).
fn format_tensor_dump(tensor: &Tensor) -> String {
    let mut out = String::new();
    if tensor.shape.len() == 2 {
        let cols = tensor.shape[1];
        for row in tensor.data.chunks(cols.max(1)) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "{}", cells.join(","));
        }
    } else {
        for v in &tensor.data {
            let _ = writeln!(out, "{v}");
        }
    }
    out
}

/// Auto-detects 1-D vs 2-D by the presence of a comma on the first
/// non-empty line, per §6.3.
fn parse_tensor_dump(contents: &str) -> Result<Tensor> {
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return Tensor::try_from_flat(Vec::new(), vec![0]);
    }
    if lines[0].contains(',') {
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(lines.len());
        for line in &lines {
            let row: Vec<f64> = line
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| TLError::Shape(format!("invalid data component '{s}'")))
                })
                .collect::<Result<_>>()?;
            rows.push(row);
        }
        let ncols = rows[0].len();
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(TLError::Shape("non-rectangular 2-D tensor dump".to_string()));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Tensor::try_from_flat(flat, vec![lines.len(), ncols])
    } else {
        let data: Vec<f64> = lines
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| TLError::Shape(format!("invalid data component '{s}'")))
            })
            .collect::<Result<_>>()?;
        let len = data.len();
        Tensor::try_from_flat(data, vec![len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    #[test]
    fn runs_a_scalar_assignment_and_queries_it() {
        let mut vm = Vm::new();
        let program = parse_program("X = 2 + 3\nX?").unwrap();
        let out = vm.run(&program).unwrap();
        assert_eq!(out, vec!["X =\n5".to_string()]);
    }

    #[test]
    fn datalog_fact_and_query_round_trip() {
        let mut vm = Vm::new();
        let program = parse_program("Parent(Alice, Bob)\nParent(Alice, Bob)?").unwrap();
        let out = vm.run(&program).unwrap();
        assert_eq!(out, vec!["True".to_string()]);
    }

    #[test]
    fn recursive_rule_saturates_before_query() {
        let mut vm = Vm::new();
        let program = parse_program(
            "Parent(Alice, Bob)\nParent(Bob, Carol)\nAncestor(x, y) <- Parent(x, y)\nAncestor(x, z) <- Parent(x, y), Ancestor(y, z)\nAncestor(Alice, Carol)?",
        )
        .unwrap();
        let out = vm.run(&program).unwrap();
        assert_eq!(out, vec!["True".to_string()]);
    }

    #[test]
    fn tensor_dump_round_trips_through_format_and_parse() {
        let t = Tensor::from_flat(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let dump = format_tensor_dump(&t);
        let parsed = parse_tensor_dump(&dump).unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn indexed_tensor_query_prints_scalar_value() {
        let mut vm = Vm::new();
        let program = parse_program("A = [10, 20, 30]\nA[1]?").unwrap();
        let out = vm.run(&program).unwrap();
        assert_eq!(out, vec!["A[1] = 20".to_string()]);
    }
}
