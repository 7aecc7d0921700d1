//! Executor framework: a priority-ordered chain-of-responsibility over
//! tensor equations. Each [`Executor`] fully decides the semantics for
//! the equation shapes it claims; the [`Registry`] dispatches to the
//! first applicable one.

pub mod eval;
pub mod einsum;
mod expression;
mod guarded_clause;
mod identity;
mod indexed_product;
mod einsum_call;
mod list_literal;
mod normalization;
mod pooling;
mod reduction;
mod scalar_assign;

use crate::ast::TensorEquation;
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;

pub use einsum_call::EinsumExecutor;
pub use expression::ExpressionExecutor;
pub use guarded_clause::GuardedClauseExecutor;
pub use identity::IdentityExecutor;
pub use indexed_product::IndexedProductExecutor;
pub use list_literal::ListLiteralExecutor;
pub use normalization::NormalizationExecutor;
pub use pooling::PoolingExecutor;
pub use reduction::ReductionExecutor;
pub use scalar_assign::ScalarAssignExecutor;

/// One tensor-equation execution strategy.
pub trait Executor {
    /// Human-readable name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Dispatch priority; lower runs earlier. Ties broken by registration
    /// order.
    fn priority(&self) -> i32;

    /// Whether this strategy claims `eq`. May inspect `env` (e.g. whether
    /// a referenced tensor already exists).
    fn applicable(&self, eq: &TensorEquation, env: &Environment) -> bool;

    /// Compute the full new value to bind at `eq.lhs.name`.
    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor>;
}

/// Priority-ordered dispatch table over the nine tensor-equation
/// strategies.
pub struct Registry {
    executors: Vec<Box<dyn Executor>>,
}

impl Registry {
    /// The standard registry, in the priorities given by the component
    /// design (scalar assign, list literal, einsum, indexed product,
    /// reduction, normalization, guarded clause, pooling, identity,
    /// expression catch-all).
    pub fn standard() -> Self {
        let mut executors: Vec<Box<dyn Executor>> = vec![
            Box::new(ScalarAssignExecutor),
            Box::new(ListLiteralExecutor),
            Box::new(EinsumExecutor),
            Box::new(IndexedProductExecutor),
            Box::new(ReductionExecutor),
            Box::new(NormalizationExecutor),
            Box::new(GuardedClauseExecutor),
            Box::new(PoolingExecutor),
            Box::new(IdentityExecutor),
            Box::new(ExpressionExecutor),
        ];
        executors.sort_by_key(|e| e.priority());
        Registry { executors }
    }

    /// Run the first applicable executor against `eq`, binding its result
    /// at `eq.lhs.name` in `env`. Fails with `NoExecutor` if none claims
    /// the equation — an internal dispatch error, not a data error.
    pub fn run(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<()> {
        let chosen = self
            .executors
            .iter()
            .find(|e| e.applicable(eq, env))
            .ok_or_else(|| TLError::NoExecutor(eq.to_string()))?;
        tracing::trace!(executor = chosen.name(), equation = %eq, "dispatching tensor equation");
        let value = chosen.execute(eq, env, backend)?;
        env.bind(eq.lhs.name.as_str(), value);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_sorts_by_priority() {
        let reg = Registry::standard();
        let priorities: Vec<i32> = reg.executors.iter().map(|e| e.priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }
}
