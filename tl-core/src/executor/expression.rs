//! Priority 90: catch-all. Recursively evaluates the single clause's
//! expression and reduces to a scalar by summation if the LHS is scalar
//! but the evaluated value is not.
//!
//! The `*` special-case described for indexed products (§4.4.4) is
//! already claimed, at the equation-RHS-pattern level, by
//! [`IndexedProductExecutor`](super::IndexedProductExecutor) whenever the
//! RHS is literally `TensorRef * TensorRef`; by the time a multiplication
//! reaches this executor it is necessarily nested inside a larger
//! expression, where plain elementwise multiplication (what
//! [`eval_expr`](super::eval::eval_expr) already does) is correct.

use super::eval::{eval_expr, Bindings};
use super::Executor;
use crate::ast::TensorEquation;
use crate::env::Environment;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct ExpressionExecutor;

impl Executor for ExpressionExecutor {
    fn name(&self) -> &'static str {
        "expression"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn applicable(&self, _eq: &TensorEquation, _env: &Environment) -> bool {
        true
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let bindings = Bindings::new();
        let value = eval_expr(&eq.clauses[0].expr, env, backend, &bindings)?;
        if eq.lhs.indices.is_empty() && value.len() > 1 {
            Ok(backend.sum(&value))
        } else {
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, GuardedClause, Identifier, NumberLiteral, Projection, SourceLocation, TensorRef};

    #[test]
    fn evaluates_arithmetic_expression() {
        let mut env = Environment::new();
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef::scalar(Identifier::from("Z"), SourceLocation::default()),
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(Expr::Number(NumberLiteral::new("2"))),
                    rhs: Box::new(Expr::Number(NumberLiteral::new("3"))),
                    loc: SourceLocation::default(),
                },
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = ExpressionExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![5.0]);
    }

    #[test]
    fn reduces_vector_result_for_scalar_lhs() {
        let mut env = Environment::new();
        env.bind("X", Tensor::from_flat(vec![1.0, 2.0, 3.0], vec![3]));
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef::scalar(Identifier::from("Total"), SourceLocation::default()),
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::Unary {
                    op: crate::ast::UnaryOp::Neg,
                    expr: Box::new(Expr::TensorRef(TensorRef::scalar(
                        Identifier::from("X"),
                        SourceLocation::default(),
                    ))),
                    loc: SourceLocation::default(),
                },
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = ExpressionExecutor;
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![-6.0]);
    }
}
