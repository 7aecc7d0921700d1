//! Priority 10: `W[Alice] = 1.0`, `X[0] = 3.5` — write one scalar cell,
//! growing the destination tensor and interning any new labels.

use super::Executor;
use crate::ast::{Expr, IndexKind, IndexOrSlice, TensorEquation};
use crate::env::Environment;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct ScalarAssignExecutor;

impl Executor for ScalarAssignExecutor {
    fn name(&self) -> &'static str {
        "scalar_assign"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        eq.projection == crate::ast::Projection::Assign
            && eq.clauses.len() == 1
            && eq.clauses[0].guard.is_none()
            && matches!(eq.clauses[0].expr, Expr::Number(_))
            && !eq.lhs.indices.is_empty()
            && eq.lhs.indices.iter().all(|pos| match pos {
                IndexOrSlice::Index(idx) => {
                    matches!(idx.kind, IndexKind::Numeric(_) | IndexKind::Named { .. })
                }
                IndexOrSlice::Slice(_) => false,
            })
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        _backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let mut positions = Vec::with_capacity(eq.lhs.indices.len());
        for pos in &eq.lhs.indices {
            let IndexOrSlice::Index(idx) = pos else {
                unreachable!("applicable() rejects slices")
            };
            let p = match &idx.kind {
                IndexKind::Numeric(n) => *n as usize,
                IndexKind::Named { name, .. } => env.intern_label(name.as_str()),
                IndexKind::Virtual { .. } => unreachable!("applicable() rejects virtual indices"),
            };
            positions.push(p);
        }

        let Expr::Number(n) = &eq.clauses[0].expr else {
            unreachable!("applicable() rejects non-numeric RHS")
        };
        let scalar = n
            .as_f64()
            .ok_or_else(|| crate::error::TLError::Shape(format!("invalid numeric literal '{}'", n.text)))?;

        let mut tensor = env
            .try_lookup(eq.lhs.name.as_str())
            .cloned()
            .unwrap_or_else(|| Tensor::zeros(vec![0; positions.len()]));
        let target_shape: Vec<usize> = positions.iter().map(|p| p + 1).collect();
        tensor.grow_to(&target_shape);
        tensor.set(&positions, scalar)?;
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GuardedClause, Identifier, NumberLiteral, Projection, SourceLocation, TensorRef};
    use crate::tensor::DenseBackend;

    fn numeric_index(n: i64) -> IndexOrSlice {
        IndexOrSlice::Index(crate::ast::Index {
            kind: IndexKind::Numeric(n),
            normalized: false,
            loc: SourceLocation::default(),
        })
    }

    #[test]
    fn grows_and_writes_new_cell() {
        let mut env = Environment::new();
        let backend = DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef {
                name: Identifier::from("X"),
                indices: vec![numeric_index(2)],
                loc: SourceLocation::default(),
            },
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::Number(NumberLiteral::new("7.0")),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = ScalarAssignExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.shape, vec![3]);
        assert_eq!(t.data, vec![0.0, 0.0, 7.0]);
    }

    #[test]
    fn interns_label_index() {
        let mut env = Environment::new();
        let backend = DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef {
                name: Identifier::from("W"),
                indices: vec![IndexOrSlice::Index(crate::ast::Index {
                    kind: IndexKind::Named {
                        name: Identifier::from("Alice"),
                        divisor: None,
                    },
                    normalized: false,
                    loc: SourceLocation::default(),
                })],
                loc: SourceLocation::default(),
            },
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::Number(NumberLiteral::new("1.0")),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = ScalarAssignExecutor;
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(env.get_label_index("Alice"), Some(0));
        assert_eq!(t.data, vec![1.0]);
    }
}
