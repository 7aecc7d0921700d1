//! Priority 35: `Out[i,k] = A[i,j] * B[j,k]` — an implicit Einstein
//! summation spelled as a plain multiplication of two indexed tensor
//! references. Lowers to the shared [`einsum`](super::einsum) evaluator.

use super::Executor;
use crate::ast::{BinaryOp, Expr, Index, IndexKind, IndexOrSlice, Projection, TensorEquation, TensorRef};
use crate::env::Environment;
use crate::error::TLError;
use crate::tensor::{Tensor, TensorBackend};
use crate::Result;
use std::collections::HashMap;

/// Default extent used when an operand tensor referenced by an indexed
/// product does not yet exist and must be allocated as a placeholder.
const DEFAULT_EXTENT: usize = 4;

/// See module docs.
pub struct IndexedProductExecutor;

fn product_operands(eq: &TensorEquation) -> Option<(&TensorRef, &TensorRef)> {
    if eq.clauses.len() != 1 || eq.clauses[0].guard.is_some() {
        return None;
    }
    match &eq.clauses[0].expr {
        Expr::Binary {
            op: BinaryOp::Mul,
            lhs,
            rhs,
            ..
        } => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::TensorRef(a), Expr::TensorRef(b)) => Some((a, b)),
            _ => None,
        },
        _ => None,
    }
}

fn named_axis_names(tref: &TensorRef) -> Vec<String> {
    tref.indices
        .iter()
        .filter_map(|pos| match pos {
            IndexOrSlice::Index(Index {
                kind: IndexKind::Named { name, .. },
                ..
            }) => Some(name.as_str().to_string()),
            _ => None,
        })
        .collect()
}

fn default_tensor_for_ref(tref: &TensorRef) -> Tensor {
    let shape: Vec<usize> = tref
        .indices
        .iter()
        .map(|pos| match pos {
            IndexOrSlice::Index(Index {
                kind: IndexKind::Numeric(n),
                ..
            }) => (*n as usize) + 1,
            _ => DEFAULT_EXTENT,
        })
        .collect();
    Tensor::zeros(shape)
}

/// Resolve an operand ref against `env`, squeezing numeric axes and
/// returning the retained axes' named-index labels in order.
fn prepare_operand(tref: &TensorRef, env: &mut Environment) -> Result<(Tensor, Vec<String>)> {
    if !env.has(tref.name.as_str()) {
        env.bind(tref.name.as_str(), default_tensor_for_ref(tref));
    }
    let tensor = env.lookup(tref.name.as_str())?.clone();
    if tref.indices.is_empty() {
        return Ok((tensor, Vec::new()));
    }
    if tref.indices.len() != tensor.rank() {
        return Err(TLError::Shape(format!(
            "{} indices given for tensor {} of rank {}",
            tref.indices.len(),
            tref.name,
            tensor.rank()
        )));
    }
    let mut ranges = Vec::with_capacity(tref.indices.len());
    let mut squeeze = Vec::with_capacity(tref.indices.len());
    for pos in &tref.indices {
        match pos {
            IndexOrSlice::Slice(s) => {
                ranges.push((s.start, s.end, s.step));
                squeeze.push(None);
            }
            IndexOrSlice::Index(idx) => match &idx.kind {
                IndexKind::Numeric(n) => {
                    ranges.push((Some(*n), Some(*n + 1), None));
                    squeeze.push(Some(0));
                }
                IndexKind::Named { .. } => {
                    ranges.push((None, None, None));
                    squeeze.push(None);
                }
                IndexKind::Virtual { .. } => {
                    return Err(TLError::Shape(
                        "virtual index survived into executor dispatch (preprocessor bug)"
                            .to_string(),
                    ))
                }
            },
        }
    }
    let sliced = tensor.slice(&ranges)?.select(&squeeze)?;
    Ok((sliced, named_axis_names(tref)))
}

fn assign_letters(names: &[&str]) -> HashMap<String, char> {
    let mut map = HashMap::new();
    let mut next = b'a';
    for &n in names {
        if !map.contains_key(n) {
            map.insert(n.to_string(), next as char);
            next += 1;
        }
    }
    map
}

impl Executor for IndexedProductExecutor {
    fn name(&self) -> &'static str {
        "indexed_product"
    }

    fn priority(&self) -> i32 {
        35
    }

    fn applicable(&self, eq: &TensorEquation, _env: &Environment) -> bool {
        eq.projection == Projection::Assign && product_operands(eq).is_some()
    }

    fn execute(
        &self,
        eq: &TensorEquation,
        env: &mut Environment,
        backend: &dyn TensorBackend,
    ) -> Result<Tensor> {
        let (left_ref, right_ref) = product_operands(eq)
            .ok_or_else(|| TLError::Shape("malformed indexed product".to_string()))?;
        let (left, left_names) = prepare_operand(left_ref, env)?;
        let (right, right_names) = prepare_operand(right_ref, env)?;

        let out_names = named_axis_names(&eq.lhs);
        let all_names: Vec<&str> = left_names
            .iter()
            .chain(right_names.iter())
            .chain(out_names.iter())
            .map(|s| s.as_str())
            .collect();
        let letters = assign_letters(&all_names);

        let spec_for = |names: &[String]| -> String {
            names.iter().map(|n| letters[n]).collect()
        };
        let lhs_spec = spec_for(&left_names);
        let rhs_spec = spec_for(&right_names);
        let out_spec = spec_for(&out_names);

        backend.einsum(&format!("{lhs_spec},{rhs_spec}->{out_spec}"), &[&left, &right])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GuardedClause, Identifier, SourceLocation};

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
    fn matrix_product_via_named_indices() {
        let mut env = Environment::new();
        env.bind("A", Tensor::from_flat(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]));
        env.bind("B", Tensor::from_flat(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]));
        let backend = crate::tensor::DenseBackend::new();
        let a_ref = TensorRef {
            name: Identifier::from("A"),
            indices: vec![named("i"), named("j")],
            loc: SourceLocation::default(),
        };
        let b_ref = TensorRef {
            name: Identifier::from("B"),
            indices: vec![named("j"), named("k")],
            loc: SourceLocation::default(),
        };
        let eq = TensorEquation {
            lhs: TensorRef {
                name: Identifier::from("C"),
                indices: vec![named("i"), named("k")],
                loc: SourceLocation::default(),
            },
            projection: Projection::Assign,
            clauses: vec![GuardedClause {
                expr: Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(Expr::TensorRef(a_ref)),
                    rhs: Box::new(Expr::TensorRef(b_ref)),
                    loc: SourceLocation::default(),
                },
                guard: None,
            }],
            loc: SourceLocation::default(),
        };
        let exec = IndexedProductExecutor;
        assert!(exec.applicable(&eq, &env));
        let t = exec.execute(&eq, &mut env, &backend).unwrap();
        assert_eq!(t.shape, vec![2, 2]);
        assert_eq!(t.data, vec![19.0, 22.0, 43.0, 50.0]);
    }
}
