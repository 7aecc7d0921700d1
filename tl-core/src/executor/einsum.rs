//! Shared Einstein-summation evaluator, used directly by
//! [`EinsumExecutor`](super::einsum_call::EinsumExecutor) and by
//! [`IndexedProductExecutor`](super::indexed_product::IndexedProductExecutor)
//! after it lowers a tensor-times-tensor product to a spec string.

use crate::error::TLError;
use crate::tensor::Tensor;
use crate::Result;
use std::collections::HashMap;

struct ParsedSpec {
    operand_specs: Vec<Vec<char>>,
    output_spec: Vec<char>,
}

fn parse_spec(spec: &str) -> Result<ParsedSpec> {
    let (lhs, rhs) = spec
        .split_once("->")
        .ok_or_else(|| TLError::Shape(format!("einsum spec missing '->': {spec}")))?;
    let operand_specs: Vec<Vec<char>> = lhs
        .split(',')
        .map(|s| s.trim().chars().filter(|c| !c.is_whitespace()).collect())
        .collect();
    let output_spec: Vec<char> = rhs.trim().chars().filter(|c| !c.is_whitespace()).collect();
    Ok(ParsedSpec {
        operand_specs,
        output_spec,
    })
}

/// Evaluate an einsum spec such as `"ij,jk->ik"` over `operands`.
pub fn evaluate(spec: &str, operands: &[&Tensor]) -> Result<Tensor> {
    let parsed = parse_spec(spec)?;
    if parsed.operand_specs.len() != operands.len() {
        return Err(TLError::Shape(format!(
            "einsum spec {spec} names {} operands but {} were given",
            parsed.operand_specs.len(),
            operands.len()
        )));
    }

    let mut dims: HashMap<char, usize> = HashMap::new();
    let mut letters: Vec<char> = Vec::new();
    for (op_spec, tensor) in parsed.operand_specs.iter().zip(operands) {
        if op_spec.len() != tensor.rank() {
            return Err(TLError::Shape(format!(
                "einsum operand spec {:?} has {} letters but operand has rank {}",
                op_spec,
                op_spec.len(),
                tensor.rank()
            )));
        }
        for (&letter, &dim) in op_spec.iter().zip(&tensor.shape) {
            match dims.get(&letter) {
                Some(&existing) if existing != dim => {
                    return Err(TLError::Shape(format!(
                        "einsum index '{letter}' has inconsistent extents {existing} and {dim}"
                    )));
                }
                Some(_) => {}
                None => {
                    dims.insert(letter, dim);
                    letters.push(letter);
                }
            }
        }
    }
    for letter in &parsed.output_spec {
        if !dims.contains_key(letter) {
            return Err(TLError::Shape(format!(
                "einsum output index '{letter}' does not appear in any operand"
            )));
        }
    }

    let operand_strides: Vec<Vec<usize>> = operands.iter().map(|t| t.strides()).collect();
    let out_shape: Vec<usize> = parsed.output_spec.iter().map(|l| dims[l]).collect();
    let out_len: usize = if out_shape.is_empty() {
        1
    } else {
        out_shape.iter().product()
    };
    let mut out = vec![0.0; out_len];
    let out_strides = strides_for(&out_shape);

    let full_dims: Vec<usize> = letters.iter().map(|l| dims[l]).collect();
    let letter_pos: HashMap<char, usize> =
        letters.iter().enumerate().map(|(i, &l)| (l, i)).collect();

    each_index(&full_dims, |combo| {
        let mut product = 1.0;
        for (op_spec, (tensor, strides)) in parsed
            .operand_specs
            .iter()
            .zip(operands.iter().zip(&operand_strides))
        {
            let mut offset = 0usize;
            for (axis, letter) in op_spec.iter().enumerate() {
                let pos = letter_pos[letter];
                offset += combo[pos] * strides[axis];
            }
            product *= tensor.data[offset];
        }
        let mut out_offset = 0usize;
        for (axis, letter) in parsed.output_spec.iter().enumerate() {
            let pos = letter_pos[letter];
            out_offset += combo[pos] * out_strides[axis];
        }
        out[out_offset] += product;
    });

    Tensor::try_from_flat(out, out_shape)
}

fn strides_for(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn each_index(dims: &[usize], mut visit: impl FnMut(&[usize])) {
    if dims.is_empty() {
        visit(&[]);
        return;
    }
    let total: usize = dims.iter().product();
    let mut idx = vec![0usize; dims.len()];
    for _ in 0..total {
        visit(&idx);
        for axis in (0..dims.len()).rev() {
            idx[axis] += 1;
            if idx[axis] < dims[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_multiply() {
        let a = Tensor::from_flat(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::from_flat(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = evaluate("ij,jk->ik", &[&a, &b]).unwrap();
        assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn inconsistent_extents_are_rejected() {
        let a = Tensor::from_flat(vec![1.0, 2.0], vec![2]);
        let b = Tensor::from_flat(vec![1.0, 2.0, 3.0], vec![3]);
        assert!(evaluate("i,i->i", &[&a, &b]).is_err());
    }
}
