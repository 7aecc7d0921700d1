//! Priority 20: `Weights = [0.1, 0.2, 0.3]` — materialize a rectangular
//! list literal as a fresh (learnable-shaped) tensor.

use super::eval::{build_list_tensor, eval_expr, Bindings};
use super::Executor;
use crate::ast::{Expr, Projection, TensorEquation};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct ListLiteralExecutor;

impl Executor for ListLiteralExecutor {
    fn name(&self) -> &'static str {
        "list_literal"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        eq.projection == Projection::Assign
            && eq.clauses.len() == 1
            && eq.clauses[0].guard.is_none()
            && eq.lhs.indices.is_empty()
            && matches!(eq.clauses[0].expr, Expr::List(..))
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let bindings = Bindings::new();
        let mut eval_leaf = |e: &Expr| -> Result<f64> {
            let t = eval_expr(e, env, backend, &bindings)?;
            if t.len() != 1 {
                return Err(TLError::Shape(
                    "list literal leaves must be scalar expressions".to_string(),
                ));
            }
            Ok(t.data[0])
        };
        build_list_tensor(&eq.clauses[0].expr, &mut eval_leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GuardedClause, Identifier, NumberLiteral, SourceLocation, TensorRef};
    use crate::tensor::DenseBackend;

    #[test]
    fn materializes_flat_list() {
        let mut env = Environment::new();
        let backend = DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef::scalar(Identifier::from("Weights"), SourceLocation::default()),
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::List(
                    vec![
                        Expr::Number(NumberLiteral::new("0.1")),
                        Expr::Number(NumberLiteral::new("0.2")),
                        Expr::Number(NumberLiteral::new("0.3")),
                    ],
                    SourceLocation::default(),
                ),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = ListLiteralExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.shape, vec![3]);
        assert_eq!(t.data, vec![0.1, 0.2, 0.3]);
    }
}
