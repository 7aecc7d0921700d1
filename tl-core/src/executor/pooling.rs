//! Priority 50: `Pool[i/2] += Source[i]` and friends — pooling over a
//! source tensor with a stride given by the LHS index's `/divisor` form.

use super::Executor;
use crate::ast::{Expr, IndexKind, IndexOrSlice, Projection, TensorEquation};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{iterate_indices, Tensor, TensorBackend};
use crate::Result;

/// See module docs.
pub struct PoolingExecutor;

fn source_ref(eq: &TensorEquation) -> Option<&crate::ast::TensorRef> {
    if eq.projection == Projection::Assign || eq.clauses.len() != 1 || eq.clauses[0].guard.is_some() {
        return None;
    }
    match &eq.clauses[0].expr {
        Expr::TensorRef(t) => Some(t),
        _ => None,
    }
}

fn divisors(eq: &TensorEquation) -> Option<Vec<i64>> {
    eq.lhs
        .indices
        .iter()
        .map(|pos| match pos {
            IndexOrSlice::Index(idx) => match &idx.kind {
                IndexKind::Named { divisor, .. } => Some(divisor.unwrap_or(1)),
                _ => None,
            },
            IndexOrSlice::Slice(_) => None,
        })
        .collect()
}

impl Executor for PoolingExecutor {
    fn name(&self) -> &'static str {
        "pooling"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn applicable(&self, eq: &TensorEquation, env: &Environment) -> bool {
        match source_ref(eq) {
            Some(t) => env.has(t.name.as_str()) && divisors(eq).is_some(),
            None => false,
        }
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        _backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let src_ref = source_ref(eq)
            .ok_or_else(|| TLError::Shape("malformed pooling equation".to_string()))?;
        let source = env.lookup(src_ref.name.as_str())?.clone();
        let divs = divisors(eq)
            .ok_or_else(|| TLError::Shape("pooling LHS indices must be named".to_string()))?;
        if divs.len() != source.rank() {
            return Err(TLError::Shape(format!(
                "pooling LHS has {} indices but source has rank {}",
                divs.len(),
                source.rank()
            )));
        }

        let out_shape: Vec<usize> = source
            .shape
            .iter()
            .zip(&divs)
            .map(|(&dim, &d)| (dim + d as usize - 1) / d as usize)
            .collect();
        let init = match eq.projection {
            Projection::Max => f64::NEG_INFINITY,
            Projection::Min => f64::INFINITY,
            _ => 0.0,
        };
        let mut out = Tensor::from_flat(vec![init; out_shape.iter().product::<usize>().max(1)], out_shape.clone());
        let mut counts = vec![0u32; out.data.len()];
        let out_strides = out.strides();
        let src_strides = source.strides();

        iterate_indices(&source.shape, |idx| {
            let mut target = Vec::with_capacity(idx.len());
            for (axis, &i) in idx.iter().enumerate() {
                target.push(i / divs[axis] as usize);
            }
            let out_off: usize = target.iter().zip(&out_strides).map(|(i, s)| i * s).sum();
            let src_off: usize = idx.iter().zip(&src_strides).map(|(i, s)| i * s).sum();
            let v = source.data[src_off];
            match eq.projection {
                Projection::Add | Projection::Avg => out.data[out_off] += v,
                Projection::Max => out.data[out_off] = out.data[out_off].max(v),
                Projection::Min => out.data[out_off] = out.data[out_off].min(v),
                Projection::Assign => unreachable!("applicable() rejects Assign"),
            }
            counts[out_off] += 1;
        });

        if eq.projection == Projection::Avg {
            for (v, &c) in out.data.iter_mut().zip(&counts) {
                if c > 0 {
                    *v /= c as f64;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GuardedClause, Identifier, Index, SourceLocation, TensorRef};

    fn named_div(name: &str, divisor: i64) -> IndexOrSlice {
        IndexOrSlice::Index(Index {
            kind: IndexKind::Named {
                name: Identifier::from(name),
                divisor: Some(divisor),
            },
            normalized: false,
            loc: SourceLocation::default(),
        })
    }

    #[test]
    fn max_pools_pairs() {
        let mut env = Environment::new();
        env.bind("Source", Tensor::from_flat(vec![1.0, 5.0, 3.0, 2.0], vec![4]));
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef {
                name: Identifier::from("Pool"),
                indices: vec![named_div("i", 2)],
                loc: SourceLocation::default(),
            },
            projection: Projection::Max,
            clauses: vec![GuardedClause {
                expr: Expr::TensorRef(TensorRef {
                    name: Identifier::from("Source"),
                    indices: vec![IndexOrSlice::Index(Index {
                        kind: IndexKind::Named {
                            name: Identifier::from("i"),
                            divisor: None,
                        },
                        normalized: false,
                        loc: SourceLocation::default(),
                    })],
                    loc: SourceLocation::default(),
                }),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = PoolingExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.data, vec![5.0, 3.0]);
    }

    #[test]
    fn stride_one_pooling_is_a_no_op() {
        let mut env = Environment::new();
        env.bind("Source", Tensor::from_flat(vec![1.0, 5.0, 3.0, 2.0], vec![4]));
        let backend = crate::tensor::DenseBackend::new();
        let eq = TensorEquation {
            lhs: TensorRef {
                name: Identifier::from("Pool"),
                indices: vec![named_div("i", 1)],
                loc: SourceLocation::default(),
            },
            projection: Projection::Max,
            clauses: vec![GuardedClause {
                expr: Expr::TensorRef(TensorRef {
                    name: Identifier::from("Source"),
                    indices: vec![IndexOrSlice::Index(Index {
                        kind: IndexKind::Named {
                            name: Identifier::from("i"),
                            divisor: None,
                        },
                        normalized: false,
                        loc: SourceLocation::default(),
                    })],
                    loc: SourceLocation::default(),
                }),
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = PoolingExecutor;
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        let source = env.lookup("Source").unwrap();
        assert_eq!(t.shape, source.shape);
        assert_eq!(t.data, source.data);
    }
}
