//! Priority 40: `A[q,k.] = Scores[q,k]` — a trailing-dot index on the
//! LHS requests softmax normalization along that axis.

use super::eval::{eval_expr, Bindings};
use super::Executor;
use crate::ast::{Expr, IndexOrSlice, Projection, TensorEquation};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct NormalizationExecutor;

fn normalized_axis(eq: &TensorEquation) -> Option<usize> {
    eq.lhs.indices.iter().position(|pos| match pos {
        IndexOrSlice::Index(idx) => idx.normalized,
        IndexOrSlice::Slice(_) => false,
    })
}

impl Executor for NormalizationExecutor {
    fn name(&self) -> &'static str {
        "normalization"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        eq.projection == Projection::Assign
            && eq.clauses.len() == 1
            && eq.clauses[0].guard.is_none()
            && normalized_axis(eq).is_some()
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let axis = normalized_axis(eq)
            .ok_or_else(|| TLError::Shape("normalization requires a trailing-dot index".to_string()))?;
        let bindings = Bindings::new();

        if let Expr::Call { name, .. } = &eq.clauses[0].expr {
            if name.as_str() == "softmax" {
                return eval_expr(&eq.clauses[0].expr, env, backend, &bindings);
            }
        }

        let raw = eval_expr(&eq.clauses[0].expr, env, backend, &bindings)?;
        backend.softmax(&raw, axis as isize)
    }
}
