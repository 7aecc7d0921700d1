//! Shared evaluation helpers used by most executors: index resolution
//! against the environment (labels, bound loop variables, slices), and a
//! general recursive expression evaluator for the catch-all case.

use crate::ast::{BinaryOp, Expr, Index, IndexKind, IndexOrSlice, TensorRef, UnaryOp};
use crate::env::Environment;
use crate::error::{NameKind, TLError};
use crate::tensor::{Tensor, TensorBackend, UnaryFn};
use crate::Result;
use std::collections::HashMap;

/// Loop-variable bindings currently in scope (set by
/// [`GuardedClauseExecutor`](super::GuardedClauseExecutor) while it
/// iterates a driving index).
pub type Bindings = HashMap<String, i64>;

/// Resolve a tensor reference to a concrete value: numeric/bound/label
/// indices select and drop an axis; free named indices and slices keep
/// their axis (sliced as requested).
///
/// `create_labels` controls whether an unseen uppercase index name is
/// interned fresh (assignment targets) or must already exist (reads).
pub fn resolve_tensor_ref(
    tref: &TensorRef,
    env: &mut Environment,
    bindings: &Bindings,
    create_labels: bool,
) -> Result<Tensor> {
    let tensor = env.lookup(tref.name.as_str())?.clone();
    if tref.indices.is_empty() {
        return Ok(tensor);
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
            IndexOrSlice::Index(idx) => {
                let (range, drop) = resolve_index(idx, env, bindings, create_labels)?;
                ranges.push(range);
                squeeze.push(drop);
            }
        }
    }

    let sliced = tensor.slice(&ranges)?;
    sliced.select(&squeeze)
}

fn resolve_index(
    idx: &Index,
    env: &mut Environment,
    bindings: &Bindings,
    create_labels: bool,
) -> Result<((Option<i64>, Option<i64>, Option<i64>), Option<usize>)> {
    match &idx.kind {
        IndexKind::Numeric(n) => Ok(((Some(*n), Some(*n + 1), None), Some(0))),
        IndexKind::Virtual { .. } => Err(TLError::Shape(
            "virtual index survived into executor dispatch (preprocessor bug)".to_string(),
        )),
        IndexKind::Named { name, .. } => {
            if let Some(&bound) = bindings.get(name.as_str()) {
                return Ok(((Some(bound), Some(bound + 1), None), Some(0)));
            }
            if name.is_uppercase() {
                let label = if create_labels {
                    env.intern_label(name.as_str())
                } else {
                    env.get_label_index(name.as_str())
                        .ok_or_else(|| TLError::missing(NameKind::Label, name.as_str()))?
                };
                let label = label as i64;
                return Ok(((Some(label), Some(label + 1), None), Some(0)));
            }
            Ok(((None, None, None), None))
        }
    }
}

/// Build a flat tensor from a (possibly nested) list literal, requiring
/// rectangularity at every depth. `eval_leaf` evaluates a non-list leaf
/// expression to a single scalar.
pub fn build_list_tensor(
    expr: &Expr,
    eval_leaf: &mut impl FnMut(&Expr) -> Result<f64>,
) -> Result<Tensor> {
    fn collect(
        expr: &Expr,
        depth: usize,
        shapes_at_depth: &mut Vec<Option<usize>>,
        out: &mut Vec<f64>,
        eval_leaf: &mut impl FnMut(&Expr) -> Result<f64>,
    ) -> Result<()> {
        match expr {
            Expr::List(items, _) => {
                if shapes_at_depth.len() == depth {
                    shapes_at_depth.push(Some(items.len()));
                } else if shapes_at_depth[depth] != Some(items.len()) {
                    return Err(TLError::Shape(format!(
                        "non-rectangular list literal at depth {depth}"
                    )));
                }
                for item in items {
                    collect(item, depth + 1, shapes_at_depth, out, eval_leaf)?;
                }
                Ok(())
            }
            leaf => {
                if shapes_at_depth.len() == depth {
                    shapes_at_depth.push(None);
                }
                out.push(eval_leaf(leaf)?);
                Ok(())
            }
        }
    }

    let mut shapes_at_depth = Vec::new();
    let mut flat = Vec::new();
    collect(expr, 0, &mut shapes_at_depth, &mut flat, eval_leaf)?;
    let shape: Vec<usize> = shapes_at_depth.into_iter().flatten().collect();
    Tensor::try_from_flat(flat, shape)
}

/// Fully recursive expression evaluator used by the catch-all executor
/// and by guard/clause evaluation elsewhere.
pub fn eval_expr(
    expr: &Expr,
    env: &mut Environment,
    backend: &dyn TensorBackend,
    bindings: &Bindings,
) -> Result<Tensor> {
    match expr {
        Expr::Number(n) => {
            let v = n
                .as_f64()
                .ok_or_else(|| TLError::Shape(format!("invalid numeric literal '{}'", n.text)))?;
            Ok(Tensor::scalar(v))
        }
        Expr::Str(s) => Err(TLError::Shape(format!(
            "string literal \"{}\" used in a numeric expression",
            s.text
        ))),
        Expr::List(..) => {
            let mut eval_leaf = |e: &Expr| -> Result<f64> {
                let t = eval_expr(e, env, backend, bindings)?;
                if t.len() != 1 {
                    return Err(TLError::Shape(
                        "list literal leaves must be scalar expressions".to_string(),
                    ));
                }
                Ok(t.data[0])
            };
            build_list_tensor(expr, &mut eval_leaf)
        }
        Expr::TensorRef(tref) => resolve_tensor_ref(tref, env, bindings, false),
        Expr::Call { name, args, .. } => eval_call(name.as_str(), args, env, backend, bindings),
        Expr::Binary { op, lhs, rhs, .. } => {
            let a = eval_expr(lhs, env, backend, bindings)?;
            let b = eval_expr(rhs, env, backend, bindings)?;
            eval_binary(*op, &a, &b, backend)
        }
        Expr::Unary { op, expr, .. } => {
            let v = eval_expr(expr, env, backend, bindings)?;
            Ok(match op {
                UnaryOp::Neg => backend.neg(&v),
                UnaryOp::Not => backend.not(&v)?,
            })
        }
    }
}

fn eval_call(
    name: &str,
    args: &[Expr],
    env: &mut Environment,
    backend: &dyn TensorBackend,
    bindings: &Bindings,
) -> Result<Tensor> {
    if name == "softmax" {
        let arg = args
            .first()
            .ok_or_else(|| TLError::Shape("softmax() requires one argument".to_string()))?;
        let t = eval_expr(arg, env, backend, bindings)?;
        return backend.softmax(&t, -1);
    }
    if let Some(f) = UnaryFn::from_name(name) {
        let arg = args
            .first()
            .ok_or_else(|| TLError::Shape(format!("{name}() requires one argument")))?;
        let t = eval_expr(arg, env, backend, bindings)?;
        return Ok(backend.unary(f, &t));
    }
    Err(TLError::NoExecutor(format!("unknown function '{name}'")))
}

fn eval_binary(op: BinaryOp, a: &Tensor, b: &Tensor, backend: &dyn TensorBackend) -> Result<Tensor> {
    match op {
        BinaryOp::Add => backend.add(a, b),
        BinaryOp::Sub => backend.sub(a, b),
        BinaryOp::Mul => backend.mul(a, b),
        BinaryOp::Div => backend.div(a, b),
        BinaryOp::Mod => backend.rem(a, b),
        BinaryOp::Pow => backend.pow(a, b),
        BinaryOp::Lt => backend.lt(a, b),
        BinaryOp::Le => backend.le(a, b),
        BinaryOp::Gt => backend.gt(a, b),
        BinaryOp::Ge => backend.ge(a, b),
        BinaryOp::Eq => backend.eq_elem(a, b),
        BinaryOp::Ne => backend.ne_elem(a, b),
        BinaryOp::And => backend.and(a, b),
        BinaryOp::Or => backend.or(a, b),
    }
}

/// Evaluate a guard expression's truthiness at a scalar position: any
/// nonzero value is "true", matching the elementwise-mask contract
/// guards use throughout the executor framework.
pub fn eval_guard_scalar(
    guard: &Expr,
    env: &mut Environment,
    backend: &dyn TensorBackend,
    bindings: &Bindings,
) -> Result<bool> {
    let t = eval_expr(guard, env, backend, bindings)?;
    Ok(t.data.first().copied().unwrap_or(0.0) != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NumberLiteral, SourceLocation};
    use crate::tensor::DenseBackend;

    #[test]
    fn eval_numeric_literal() {
        let mut env = Environment::new();
        let backend = DenseBackend::new();
        let expr = Expr::Number(NumberLiteral::new("3.5"));
        let t = eval_expr(&expr, &mut env, &backend, &Bindings::new()).unwrap();
        assert_eq!(t.data, vec![3.5]);
    }

    #[test]
    fn resolve_named_free_index_keeps_axis() {
        let mut env = Environment::new();
        env.bind("A", Tensor::from_flat(vec![1.0, 2.0, 3.0], vec![3]));
        let tref = TensorRef {
            name: "A".into(),
            indices: vec![IndexOrSlice::Index(Index {
                kind: IndexKind::Named {
                    name: "i".into(),
                    divisor: None,
                },
                normalized: false,
                loc: SourceLocation::default(),
            })],
            loc: SourceLocation::default(),
        };
        let t = resolve_tensor_ref(&tref, &mut env, &Bindings::new(), false).unwrap();
        assert_eq!(t.shape, vec![3]);
    }

    #[test]
    fn resolve_bound_index_selects_scalar() {
        let mut env = Environment::new();
        env.bind("A", Tensor::from_flat(vec![10.0, 20.0, 30.0], vec![3]));
        let tref = TensorRef {
            name: "A".into(),
            indices: vec![IndexOrSlice::Index(Index {
                kind: IndexKind::Named {
                    name: "i".into(),
                    divisor: None,
                },
                normalized: false,
                loc: SourceLocation::default(),
            })],
            loc: SourceLocation::default(),
        };
        let mut bindings = Bindings::new();
        bindings.insert("i".to_string(), 1);
        let t = resolve_tensor_ref(&tref, &mut env, &bindings, false).unwrap();
        assert_eq!(t.shape, Vec::<usize>::new());
        assert_eq!(t.data, vec![20.0]);
    }
}
