//! Priority 50: multiple guarded clauses, e.g.
//! `Y[i] = 1 : X[i] > 0 | -1 : X[i] <= 0`.
//!
//! An indexed LHS drives an explicit per-position loop, using the first
//! clause whose guard is true at that position. A scalar LHS has no
//! natural driving index, so clauses instead combine as an additive
//! superposition: each clause contributes `expr * mask * (1 - prior_mask)`,
//! where `prior_mask` is the product of `(1 - guard)` over every earlier
//! clause — equivalent to "first match wins" when guards are mutually
//! exclusive 0/1 masks, and generalizes gracefully otherwise.

use super::eval::{eval_expr, eval_guard_scalar, Bindings};
use super::Executor;
use crate::ast::{Expr, Identifier, IndexKind, IndexOrSlice, TensorEquation, TensorRef};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct GuardedClauseExecutor;

impl Executor for GuardedClauseExecutor {
    fn name(&self) -> &'static str {
        "guarded_clause"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        eq.projection == crate::ast::Projection::Assign
            && (eq.clauses.len() > 1 || eq.clauses.first().is_some_and(|c| c.guard.is_some()))
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        if eq.lhs.indices.is_empty() {
            execute_scalar(eq, env, backend)
        } else {
            execute_indexed(eq, env, backend)
        }
    }
}

fn execute_scalar(
    eq: &TensorEquation,
    env: &mut Environment,
    backend: &dyn TensorBackend,
) -> Result<Tensor> {
    let bindings = Bindings::new();
    let mut result = Tensor::scalar(0.0);
    let mut prior_complement = Tensor::scalar(1.0);
    for clause in &eq.clauses {
        let value = eval_expr(&clause.expr, env, backend, &bindings)?;
        let mask = match &clause.guard {
            Some(g) => eval_expr(g, env, backend, &bindings)?,
            None => Tensor::scalar(1.0),
        };
        let contribution = backend.mul(&backend.mul(&value, &mask)?, &prior_complement)?;
        result = backend.add(&result, &contribution)?;
        let complement = backend.sub(&Tensor::scalar(1.0), &mask)?;
        prior_complement = backend.mul(&prior_complement, &complement)?;
    }
    Ok(result)
}

fn named_lhs_index(pos: &IndexOrSlice) -> Result<&Identifier> {
    match pos {
        IndexOrSlice::Index(idx) => match &idx.kind {
            IndexKind::Named { name, .. } => Ok(name),
            _ => Err(TLError::Shape(
                "guarded clause LHS indices must be named".to_string(),
            )),
        },
        IndexOrSlice::Slice(_) => Err(TLError::Shape(
            "guarded clause LHS does not support slices".to_string(),
        )),
    }
}

fn driving_size_for_name(name: &str, eq: &TensorEquation, env: &Environment) -> usize {
    let mut max = 0usize;
    for clause in &eq.clauses {
        scan_expr_for_name(&clause.expr, name, env, &mut max);
        if let Some(g) = &clause.guard {
            scan_expr_for_name(g, name, env, &mut max);
        }
    }
    max.max(1)
}

fn scan_expr_for_name(expr: &Expr, name: &str, env: &Environment, max: &mut usize) {
    match expr {
        Expr::TensorRef(tref) => {
            if let Ok(tensor) = env.lookup(tref.name.as_str()) {
                for (axis, pos) in tref.indices.iter().enumerate() {
                    if let IndexOrSlice::Index(idx) = pos {
                        if let IndexKind::Named { name: n, .. } = &idx.kind {
                            if n.as_str() == name && axis < tensor.rank() {
                                *max = (*max).max(tensor.shape[axis]);
                            }
                        }
                    }
                }
            }
        }
        Expr::List(items, _) => {
            for item in items {
                scan_expr_for_name(item, name, env, max);
            }
        }
        Expr::Call { args, .. } => {
            for a in args {
                scan_expr_for_name(a, name, env, max);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            scan_expr_for_name(lhs, name, env, max);
            scan_expr_for_name(rhs, name, env, max);
        }
        Expr::Unary { expr, .. } => scan_expr_for_name(expr, name, env, max),
        Expr::Number(_) | Expr::Str(_) => {}
    }
}

fn execute_indexed(
    eq: &TensorEquation,
    env: &mut Environment,
    backend: &dyn TensorBackend,
) -> Result<Tensor> {
    let names: Vec<Identifier> = eq
        .lhs
        .indices
        .iter()
        .map(named_lhs_index)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .cloned()
        .collect();
    let sizes: Vec<usize> = names
        .iter()
        .map(|n| driving_size_for_name(n.as_str(), eq, env))
        .collect();

    let mut out = Tensor::zeros(sizes.clone());
    let total: usize = sizes.iter().product::<usize>().max(1);
    let mut coord = vec![0usize; sizes.len()];
    for _ in 0..total {
        let mut bindings = Bindings::new();
        for (name, &c) in names.iter().zip(&coord) {
            bindings.insert(name.as_str().to_string(), c as i64);
        }

        let mut chosen = None;
        for clause in &eq.clauses {
            let truthy = match &clause.guard {
                Some(g) => eval_guard_scalar(g, env, backend, &bindings)?,
                None => true,
            };
            if truthy {
                chosen = Some(clause);
                break;
            }
        }
        if let Some(clause) = chosen {
            let v = eval_expr(&clause.expr, env, backend, &bindings)?;
            let scalar = v.data.first().copied().unwrap_or(0.0);
            out.set(&coord, scalar)?;
        }

        for axis in (0..sizes.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < sizes[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, GuardedClause, Index, NumberLiteral, Projection, SourceLocation};

    fn named(name: &str) -> IndexOrSlice {
        IndexOrSlice::Index(Index {
            kind: IndexKind::Named {
                name: Identifier::from(name),
                divisor: None,
            },
            normalized: false,
            loc: SourceLocation::default(),
        })
    }

    #[test]
    fn indexed_guard_picks_first_truthy_clause() {
        let mut env = Environment::new();
        env.bind("X", Tensor::from_flat(vec![-1.0, 0.0, 2.0], vec![3]));
        let backend = crate::tensor::DenseBackend::new();
        let gt_zero = Expr::Binary {
            op: BinaryOp::Gt,
            lhs: Box::new(Expr::TensorRef(TensorRef {
                name: Identifier::from("X"),
                indices: vec![named("i")],
                loc: SourceLocation::default(),
            })),
            rhs: Box::new(Expr::Number(NumberLiteral::new("0"))),
            loc: SourceLocation::default(),
        };
        let eq = TensorEquation {
            lhs: TensorRef {
                name: Identifier::from("Y"),
                indices: vec![named("i")],
                loc: SourceLocation::default(),
            },
            projection: Projection::Assign,
            clauses: vec![
                GuardedClause {
                    expr: Expr::Number(NumberLiteral::new("1")),
                    guard: Some(gt_zero),
                },
                GuardedClause {
                    expr: Expr::Number(NumberLiteral::new("-1")),
                    guard: None,
                },
            ],
            loc: SourceLocation::default(),
        };
        let exec = GuardedClauseExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![-1.0, -1.0, 1.0]);
    }

    #[test]
    fn scalar_guard_is_additive_superposition() {
        let mut env = Environment::new();
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef::scalar(Identifier::from("Z"), SourceLocation::default()),
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::Number(NumberLiteral::new("5")),
                guard: Some(Expr::Number(NumberLiteral::new("1"))),
            }],
            loc: SourceLocation::default(),
        };
        let exec = GuardedClauseExecutor;
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![5.0]);
    }
}
