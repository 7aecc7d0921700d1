//! Priority 80: `B = A`, `Row = Matrix[i]` — a bare reference to an
//! existing tensor, copied (with any requested element selection/slicing
//! applied) rather than contracted.

use super::eval::{resolve_tensor_ref, Bindings};
use super::Executor;
use crate::ast::{Expr, Projection, TensorEquation};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct IdentityExecutor;

impl Executor for IdentityExecutor {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn applicable(&self, eq: &TensorEquation, env: &Environment) -> bool {
        eq.projection == Projection::Assign
            && eq.clauses.len() == 1
            && eq.clauses[0].guard.is_none()
            && matches!(&eq.clauses[0].expr, Expr::TensorRef(t) if env.has(t.name.as_str()))
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        _backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let Expr::TensorRef(tref) = &eq.clauses[0].expr else {
            return Err(TLError::Shape("malformed identity equation".to_string()));
        };
        resolve_tensor_ref(tref, env, &Bindings::new(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GuardedClause, Identifier, SourceLocation, TensorRef};

    #[test]
    fn copies_existing_tensor() {
        let mut env = Environment::new();
        env.bind("A", Tensor::from_flat(vec![1.0, 2.0], vec![2]));
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef::scalar(Identifier::from("B"), SourceLocation::default()),
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::TensorRef(TensorRef::scalar(Identifier::from("A"), SourceLocation::default())),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = IdentityExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![1.0, 2.0]);
    }
}
