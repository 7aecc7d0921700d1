//! Priority 30: `Out[i,k] = einsum("ij,jk->ik", A, B)` — explicit
//! Einstein-summation call over existing tensors.

use super::eval::{resolve_tensor_ref, Bindings};
use super::Executor;
use crate::ast::{Expr, Projection, TensorEquation, TensorRef};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct EinsumExecutor;

fn einsum_call(eq: &TensorEquation) -> Option<(&str, &[Expr])> {
    if eq.clauses.len() != 1 || eq.clauses[0].guard.is_some() {
        return None;
    }
    match &eq.clauses[0].expr {
        Expr::Call { name, args, .. } if name.as_str() == "einsum" => {
            let Some(Expr::Str(spec)) = args.first() else {
                return None;
            };
            Some((spec.text.as_str(), &args[1..]))
        }
        _ => None,
    }
}

impl Executor for EinsumExecutor {
    fn name(&self) -> &'static str {
        "einsum_call"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        match einsum_call(eq) {
            Some((_, operand_exprs)) => {
                eq.projection == Projection::Assign
                    && !operand_exprs.is_empty()
                    && operand_exprs.iter().all(|a| matches!(a, Expr::TensorRef(_)))
            }
            None => false,
        }
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let (spec, operand_exprs) = einsum_call(eq)
            .ok_or_else(|| TLError::Shape("malformed einsum() call".to_string()))?;
        let bindings = Bindings::new();
        let refs: Vec<&TensorRef> = operand_exprs
            .iter()
            .map(|e| match e {
                Expr::TensorRef(t) => t,
                _ => unreachable!("applicable() requires tensor-ref arguments"),
            })
            .collect();
        let mut operands = Vec::with_capacity(refs.len());
        for tref in &refs {
            operands.push(resolve_tensor_ref(tref, env, &bindings, false)?);
        }
        let borrowed: Vec<&Tensor> = operands.iter().collect();
        backend.einsum(spec, &borrowed)
    }
}
