//! Priority 40: `Total = X[i]` — a scalar LHS consuming a strictly
//! indexed RHS tensor reference contracts every free axis by summation.

use super::eval::{resolve_tensor_ref, Bindings};
use super::Executor;
use crate::ast::{Expr, Projection, TensorEquation};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct ReductionExecutor;

impl Executor for ReductionExecutor {
    fn name(&self) -> &'static str {
        "reduction"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        eq.projection == Projection::Assign
            && eq.clauses.len() == 1
            && eq.clauses[0].guard.is_none()
            && eq.lhs.indices.is_empty()
            && matches!(&eq.clauses[0].expr, Expr::TensorRef(t) if !t.indices.is_empty())
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let Expr::TensorRef(tref) = &eq.clauses[0].expr else {
            return Err(TLError::Shape("malformed reduction".to_string()));
        };
        let resolved = resolve_tensor_ref(tref, env, &Bindings::new(), false)?;
        Ok(backend.sum(&resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GuardedClause, Identifier, IndexOrSlice, SourceLocation, TensorRef};

    fn named(name: &str) -> IndexOrSlice {
        IndexOrSlice::Index(crate::ast::Index {
            kind: crate::ast::IndexKind::Named {
                name: Identifier::from(name),
                divisor: None,
            },
            normalized: false,
            loc: SourceLocation::default(),
        })
    }

    #[test]
    fn sums_free_axis() {
        let mut env = Environment::new();
        env.bind("X", Tensor::from_flat(vec![1.0, 2.0, 3.0], vec![3]));
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef::scalar(Identifier::from("Total"), SourceLocation::default()),
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::TensorRef(TensorRef {
                    name: Identifier::from("X"),
                    indices: vec![named("i")],
                    loc: SourceLocation::default(),
                }),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = ReductionExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![6.0]);
    }
}
