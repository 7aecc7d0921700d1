//! Dense tensor value type, the [`TensorBackend`] contract the core
//! consumes, and a default in-process implementation (`DenseBackend`)
//! with a minimal reverse-mode autodiff tape.
//!
//! The core treats the backend as an external collaborator (einsum,
//! elementwise primitives, autodiff, and numeric precision are explicitly
//! out of scope for the interpreter itself); `DenseBackend` exists so the
//! crate is runnable and testable end to end without a real numerics
//! dependency.

use crate::error::TLError;
use crate::Result;
use std::cell::RefCell;
use std::fmt;

/// A dense, row-major, `f64`-backed tensor value.
#[derive(Debug, Clone)]
pub struct Tensor {
    /// Axis extents, outermost first. Empty shape denotes a scalar.
    pub shape: Vec<usize>,
    /// Flat row-major backing storage.
    pub data: Vec<f64>,
    /// Node index into the owning backend's autodiff tape, if tracked.
    pub(crate) node: Option<usize>,
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl Tensor {
    /// A rank-0 tensor holding a single value.
    pub fn scalar(value: f64) -> Self {
        Tensor {
            shape: Vec::new(),
            data: vec![value],
            node: None,
        }
    }

    /// Build from a flat buffer and shape; panics-free length check is
    /// the caller's responsibility via [`Tensor::try_from_flat`].
    pub fn from_flat(data: Vec<f64>, shape: Vec<usize>) -> Self {
        Tensor {
            shape,
            data,
            node: None,
        }
    }

    /// Build from a flat buffer and shape, validating the element count.
    pub fn try_from_flat(data: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = if shape.is_empty() { 1 } else { shape.iter().product() };
        if data.len() != expected {
            return Err(TLError::Shape(format!(
                "expected {expected} elements for shape {shape:?}, got {}",
                data.len()
            )));
        }
        Ok(Tensor::from_flat(data, shape))
    }

    /// Tensor of zeros with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Tensor::from_flat(vec![0.0; n], shape)
    }

    /// Tensor of ones with the given shape.
    pub fn ones(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Tensor::from_flat(vec![1.0; n], shape)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if this tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rank (number of axes); `0` for a scalar.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Row-major strides for the current shape.
    pub fn strides(&self) -> Vec<usize> {
        strides_for(&self.shape)
    }

    /// Read a single element by multi-index.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        let strides = self.strides();
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0usize;
        for (i, &idx) in index.iter().enumerate() {
            if idx >= self.shape[i] {
                return None;
            }
            offset += idx * strides[i];
        }
        self.data.get(offset).copied()
    }

    /// Write a single element by multi-index (`index_put`).
    pub fn set(&mut self, index: &[usize], value: f64) -> Result<()> {
        let strides = self.strides();
        if index.len() != self.shape.len() {
            return Err(TLError::Shape(format!(
                "index rank {} does not match tensor rank {}",
                index.len(),
                self.shape.len()
            )));
        }
        let mut offset = 0usize;
        for (i, &idx) in index.iter().enumerate() {
            if idx >= self.shape[i] {
                return Err(TLError::Shape(format!(
                    "index {idx} out of range for axis {i} of size {}",
                    self.shape[i]
                )));
            }
            offset += idx * strides[i];
        }
        self.data[offset] = value;
        Ok(())
    }

    /// Grow this tensor so axis `i` has at least `min_len` slots,
    /// zero-initializing new cells and preserving existing data.
    pub fn grow_to(&mut self, target_shape: &[usize]) {
        if target_shape == self.shape.as_slice() {
            return;
        }
        let mut new_shape = self.shape.clone();
        while new_shape.len() < target_shape.len() {
            new_shape.push(1);
        }
        for (i, &t) in target_shape.iter().enumerate() {
            if t > new_shape[i] {
                new_shape[i] = t;
            }
        }
        let new_strides = strides_for(&new_shape);
        let new_len: usize = new_shape.iter().product();
        let mut new_data = vec![0.0; new_len.max(1)];
        if !self.shape.is_empty() || !self.data.is_empty() {
            copy_into(&self.data, &self.shape, &mut new_data, &new_strides);
        }
        self.shape = new_shape;
        self.data = new_data;
    }

    /// Extract a sub-tensor by per-axis numeric selection (`Some(i)`) or
    /// full-axis pass-through (`None`), dropping selected axes from the
    /// result shape (numpy-style basic indexing).
    pub fn select(&self, selectors: &[Option<usize>]) -> Result<Tensor> {
        if selectors.len() != self.shape.len() {
            return Err(TLError::Shape(
                "selector rank does not match tensor rank".to_string(),
            ));
        }
        let out_shape: Vec<usize> = selectors
            .iter()
            .zip(&self.shape)
            .filter_map(|(sel, &dim)| if sel.is_none() { Some(dim) } else { None })
            .collect();
        let out_len: usize = if out_shape.is_empty() { 1 } else { out_shape.iter().product() };
        let mut out = vec![0.0; out_len];
        let strides = self.strides();
        let mut counter = 0usize;
        iterate_indices(&self.shape, |full_idx| {
            for (axis, sel) in selectors.iter().enumerate() {
                if let Some(want) = sel {
                    if full_idx[axis] != *want {
                        return;
                    }
                }
            }
            let offset: usize = full_idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
            out[counter] = self.data[offset];
            counter += 1;
        });
        Tensor::try_from_flat(out, out_shape)
    }

    /// Half-open Python-style slicing along each axis; `None` bounds mean
    /// the whole axis.
    pub fn slice(&self, ranges: &[(Option<i64>, Option<i64>, Option<i64>)]) -> Result<Tensor> {
        if ranges.len() != self.shape.len() {
            return Err(TLError::Shape(
                "slice rank does not match tensor rank".to_string(),
            ));
        }
        let resolved: Vec<Vec<usize>> = ranges
            .iter()
            .zip(&self.shape)
            .map(|(&(start, end, step), &dim)| resolve_slice(start, end, step, dim))
            .collect();
        let out_shape: Vec<usize> = resolved.iter().map(|v| v.len()).collect();
        let out_len: usize = if out_shape.is_empty() { 1 } else { out_shape.iter().product() };
        let mut out = Vec::with_capacity(out_len);
        let strides = self.strides();
        iterate_indices(&out_shape, |out_idx| {
            let mut offset = 0usize;
            for (axis, &oi) in out_idx.iter().enumerate() {
                offset += resolved[axis][oi] * strides[axis];
            }
            out.push(self.data[offset]);
        });
        Tensor::try_from_flat(out, out_shape)
    }

    /// Sum every element to a scalar.
    pub fn sum_all(&self) -> Tensor {
        Tensor::scalar(self.data.iter().sum())
    }

    /// Sum along one axis, dropping it from the result shape.
    pub fn sum_axis(&self, axis: usize) -> Result<Tensor> {
        if axis >= self.shape.len() {
            return Err(TLError::Shape(format!(
                "axis {axis} out of range for rank {}",
                self.shape.len()
            )));
        }
        let out_shape: Vec<usize> = self
            .shape
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| if i == axis { None } else { Some(d) })
            .collect();
        let out_len = if out_shape.is_empty() { 1 } else { out_shape.iter().product() };
        let mut out = vec![0.0; out_len];
        let out_strides = strides_for(&out_shape);
        let strides = self.strides();
        iterate_indices(&self.shape, |idx| {
            let mut out_idx = Vec::with_capacity(out_shape.len());
            for (i, &v) in idx.iter().enumerate() {
                if i != axis {
                    out_idx.push(v);
                }
            }
            let out_offset: usize = out_idx.iter().zip(&out_strides).map(|(i, s)| i * s).sum();
            let in_offset: usize = idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
            out[out_offset] += self.data[in_offset];
        });
        Ok(Tensor::from_flat(out, out_shape))
    }

    /// Broadcast to `target_shape` (right-aligned, numpy-style).
    pub fn broadcast_to(&self, target_shape: &[usize]) -> Result<Tensor> {
        let padded = pad_shape_left(&self.shape, target_shape.len());
        for (a, b) in padded.iter().zip(target_shape) {
            if *a != *b && *a != 1 {
                return Err(TLError::Shape(format!(
                    "cannot broadcast shape {:?} to {:?}",
                    self.shape, target_shape
                )));
            }
        }
        let out_len = if target_shape.is_empty() { 1 } else { target_shape.iter().product() };
        let mut out = Vec::with_capacity(out_len);
        let in_strides = strides_for(&padded);
        iterate_indices(target_shape, |idx| {
            let mut offset = 0usize;
            for (axis, &i) in idx.iter().enumerate() {
                let src_i = if padded[axis] == 1 { 0 } else { i };
                offset += src_i * in_strides[axis];
            }
            out.push(self.data[offset]);
        });
        Ok(Tensor::from_flat(out, target_shape.to_vec()))
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_rec(f: &mut fmt::Formatter<'_>, shape: &[usize], data: &[f64]) -> fmt::Result {
            match shape.first() {
                None => write!(f, "{}", data[0]),
                Some(&dim) => {
                    write!(f, "[")?;
                    let chunk = data.len() / dim.max(1);
                    for i in 0..dim {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write_rec(f, &shape[1..], &data[i * chunk..(i + 1) * chunk])?;
                    }
                    write!(f, "]")
                }
            }
        }
        write_rec(f, &self.shape, &self.data)
    }
}

fn strides_for(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn pad_shape_left(shape: &[usize], rank: usize) -> Vec<usize> {
    let mut padded = vec![1usize; rank.saturating_sub(shape.len())];
    padded.extend_from_slice(shape);
    padded
}

pub(crate) fn iterate_indices(shape: &[usize], mut visit: impl FnMut(&[usize])) {
    if shape.is_empty() {
        visit(&[]);
        return;
    }
    let total: usize = shape.iter().product();
    let mut idx = vec![0usize; shape.len()];
    for _ in 0..total {
        visit(&idx);
        for axis in (0..shape.len()).rev() {
            idx[axis] += 1;
            if idx[axis] < shape[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}

fn copy_into(src: &[f64], src_shape: &[usize], dst: &mut [f64], dst_strides: &[usize]) {
    if src_shape.iter().product::<usize>() == 0 && !src_shape.is_empty() {
        return;
    }
    let src_strides = strides_for(src_shape);
    iterate_indices(src_shape, |idx| {
        let src_offset: usize = idx.iter().zip(&src_strides).map(|(i, s)| i * s).sum();
        let dst_offset: usize = idx.iter().zip(dst_strides).map(|(i, s)| i * s).sum();
        dst[dst_offset] = src[src_offset];
    });
}

fn resolve_slice(
    start: Option<i64>,
    end: Option<i64>,
    step: Option<i64>,
    dim: usize,
) -> Vec<usize> {
    let step = step.unwrap_or(1);
    let dim_i = dim as i64;
    let norm = |v: i64| -> i64 {
        if v < 0 {
            (v + dim_i).max(0)
        } else {
            v.min(dim_i)
        }
    };
    let mut indices = Vec::new();
    if step > 0 {
        let s = start.map(norm).unwrap_or(0);
        let e = end.map(norm).unwrap_or(dim_i);
        let mut i = s;
        while i < e {
            if i >= 0 && (i as usize) < dim {
                indices.push(i as usize);
            }
            i += step;
        }
    } else if step < 0 {
        let s = start.map(norm).unwrap_or(dim_i - 1);
        let e = end.map(norm).unwrap_or(-1);
        let mut i = s;
        while i > e {
            if i >= 0 && (i as usize) < dim {
                indices.push(i as usize);
            }
            i += step;
        }
    }
    indices
}

/// Element-wise binary operator kinds, used both by [`TensorBackend`]
/// dispatch and by autodiff-tape replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

/// Unary elementwise math function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    /// `relu`
    Relu,
    /// `sigmoid`
    Sigmoid,
    /// `tanh`
    Tanh,
    /// `step` (Heaviside)
    Step,
    /// `sqrt`
    Sqrt,
    /// `abs`
    Abs,
    /// `exp`
    Exp,
    /// `sin`
    Sin,
    /// `cos`
    Cos,
    /// `tan`
    Tan,
    /// `asin`
    Asin,
    /// `acos`
    Acos,
    /// `atan`
    Atan,
    /// `log`
    Log,
}

impl UnaryFn {
    /// Look up a unary function by its TL source spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "relu" => UnaryFn::Relu,
            "sigmoid" => UnaryFn::Sigmoid,
            "tanh" => UnaryFn::Tanh,
            "step" => UnaryFn::Step,
            "sqrt" => UnaryFn::Sqrt,
            "abs" => UnaryFn::Abs,
            "exp" => UnaryFn::Exp,
            "sin" => UnaryFn::Sin,
            "cos" => UnaryFn::Cos,
            "tan" => UnaryFn::Tan,
            "asin" => UnaryFn::Asin,
            "acos" => UnaryFn::Acos,
            "atan" => UnaryFn::Atan,
            "log" => UnaryFn::Log,
            _ => return None,
        })
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryFn::Relu => x.max(0.0),
            UnaryFn::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryFn::Tanh => x.tanh(),
            UnaryFn::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            UnaryFn::Sqrt => x.sqrt(),
            UnaryFn::Abs => x.abs(),
            UnaryFn::Exp => x.exp(),
            UnaryFn::Sin => x.sin(),
            UnaryFn::Cos => x.cos(),
            UnaryFn::Tan => x.tan(),
            UnaryFn::Asin => x.asin(),
            UnaryFn::Acos => x.acos(),
            UnaryFn::Atan => x.atan(),
            UnaryFn::Log => x.ln(),
        }
    }

    fn derivative(self, x: f64) -> f64 {
        match self {
            UnaryFn::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            UnaryFn::Sigmoid => {
                let s = 1.0 / (1.0 + (-x).exp());
                s * (1.0 - s)
            }
            UnaryFn::Tanh => 1.0 - x.tanh().powi(2),
            UnaryFn::Step => 0.0,
            UnaryFn::Sqrt => 0.5 / x.sqrt(),
            UnaryFn::Abs => x.signum(),
            UnaryFn::Exp => x.exp(),
            UnaryFn::Sin => x.cos(),
            UnaryFn::Cos => -x.sin(),
            UnaryFn::Tan => 1.0 / x.cos().powi(2),
            UnaryFn::Asin => 1.0 / (1.0 - x * x).sqrt(),
            UnaryFn::Acos => -1.0 / (1.0 - x * x).sqrt(),
            UnaryFn::Atan => 1.0 / (1.0 + x * x),
            UnaryFn::Log => 1.0 / x,
        }
    }
}

/// The numeric backend contract the core consumes. `DenseBackend` is the
/// default, in-process implementation; the interpreter itself never
/// assumes anything beyond this trait.
pub trait TensorBackend {
    /// Elementwise `+`.
    fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise `-`.
    fn sub(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise `*`.
    fn mul(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise `/`.
    fn div(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise `%`.
    fn rem(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise `^` (power).
    fn pow(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;

    /// Elementwise comparisons, producing 0.0/1.0 tensors.
    fn lt(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// `<=`
    fn le(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// `>`
    fn gt(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// `>=`
    fn ge(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// `==` (bit-exact, per design notes).
    fn eq_elem(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// `!=`
    fn ne_elem(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise logical `and`.
    fn and(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise logical `or`.
    fn or(&self, a: &Tensor, b: &Tensor) -> Result<Tensor>;
    /// Elementwise logical `not`.
    fn not(&self, a: &Tensor) -> Result<Tensor>;

    /// Apply a unary math function elementwise.
    fn unary(&self, f: UnaryFn, a: &Tensor) -> Tensor;
    /// Arithmetic negation.
    fn neg(&self, a: &Tensor) -> Tensor;
    /// Softmax along `axis` (negative axes count from the end).
    fn softmax(&self, a: &Tensor, axis: isize) -> Result<Tensor>;

    /// Einstein-summation contraction, e.g. `"ij,jk->ik"`.
    fn einsum(&self, spec: &str, operands: &[&Tensor]) -> Result<Tensor>;

    /// Broadcast `a` to `shape`.
    fn broadcast_to(&self, a: &Tensor, shape: &[usize]) -> Result<Tensor>;
    /// Sum every element to a scalar.
    fn sum(&self, a: &Tensor) -> Tensor;

    /// Mark a tensor as requiring gradient tracking from this point on.
    fn requires_grad(&self, a: &mut Tensor);
    /// Run backward from a scalar tensor, accumulating `.grad` on every
    /// tracked ancestor.
    fn backward(&self, loss: &Tensor) -> Result<()>;
    /// Read back the accumulated gradient for a tracked tensor.
    fn grad_of(&self, a: &Tensor) -> Option<Vec<f64>>;
    /// Zero every accumulated gradient on the tape.
    fn zero_grad(&self);
    /// One SGD step: `param -= lr * grad` for every listed parameter.
    fn sgd_step(&self, params: &mut [&mut Tensor], lr: f64);

    /// Draw `n` categorical samples (indices) from a normalized
    /// probability tensor.
    fn multinomial(&self, probs: &Tensor, n: usize, replace: bool) -> Vec<usize>;
}

#[derive(Clone)]
struct TapeNode {
    shape: Vec<usize>,
    inputs: Vec<usize>,
    // Given upstream gradient (flat, shape of this node), returns one
    // gradient contribution per input (flat, shape of that input).
    backward: std::rc::Rc<dyn Fn(&[f64]) -> Vec<Vec<f64>>>,
    grad: Vec<f64>,
}

/// Default dense-array backend with a minimal reverse-mode autodiff tape.
///
/// Gradient tracking covers the elementwise arithmetic family (`+ - * /
/// %` and `^`), unary math functions, and full-sum reduction — enough to
/// support scalar-loss SGD over elementwise expressions. Tracking through
/// `einsum` is not implemented; learning directives on einsum-derived
/// targets are out of scope for this backend.
#[derive(Default)]
pub struct DenseBackend {
    tape: RefCell<Vec<TapeNode>>,
}

impl DenseBackend {
    /// A fresh backend with an empty tape.
    pub fn new() -> Self {
        DenseBackend::default()
    }

    /// Drop all recorded tape nodes, e.g. between learning epochs.
    pub fn reset_tape(&self) {
        self.tape.borrow_mut().clear();
    }

    fn push_node(
        &self,
        shape: Vec<usize>,
        inputs: Vec<usize>,
        backward: impl Fn(&[f64]) -> Vec<Vec<f64>> + 'static,
    ) -> usize {
        let mut tape = self.tape.borrow_mut();
        let id = tape.len();
        tape.push(TapeNode {
            shape: shape.clone(),
            inputs,
            backward: std::rc::Rc::new(backward),
            grad: vec![0.0; shape.iter().product::<usize>().max(if shape.is_empty() { 1 } else { 0 })],
        });
        id
    }

    fn track_binary(
        &self,
        out: Tensor,
        a: &Tensor,
        b: &Tensor,
        local: impl Fn(&[f64]) -> (Vec<f64>, Vec<f64>) + 'static,
    ) -> Tensor {
        match (a.node, b.node) {
            (None, None) => out,
            _ => {
                let a_node = a.node;
                let b_node = b.node;
                let a_shape = a.shape.clone();
                let b_shape = b.shape.clone();
                let mut inputs = Vec::new();
                if let Some(n) = a_node {
                    inputs.push(n);
                }
                if let Some(n) = b_node {
                    inputs.push(n);
                }
                let id = self.push_node(out.shape.clone(), inputs.clone(), move |upstream| {
                    let (ga, gb) = local(upstream);
                    let ga = reduce_to_shape(&ga, &a_shape);
                    let gb = reduce_to_shape(&gb, &b_shape);
                    let mut result = Vec::new();
                    if a_node.is_some() {
                        result.push(ga);
                    }
                    if b_node.is_some() {
                        result.push(gb);
                    }
                    result
                });
                let mut t = out;
                t.node = Some(id);
                t
            }
        }
    }

    fn track_unary(
        &self,
        out: Tensor,
        a: &Tensor,
        local: impl Fn(&[f64]) -> Vec<f64> + 'static,
    ) -> Tensor {
        match a.node {
            None => out,
            Some(n) => {
                let id = self.push_node(out.shape.clone(), vec![n], move |upstream| vec![local(upstream)]);
                let mut t = out;
                t.node = Some(id);
                t
            }
        }
    }

    fn binary_elementwise(&self, a: &Tensor, b: &Tensor, op: BinOp) -> Result<Tensor> {
        let shape = broadcast_shape(&a.shape, &b.shape)?;
        let ab = a.broadcast_to(&shape)?;
        let bb = b.broadcast_to(&shape)?;
        let data: Vec<f64> = ab
            .data
            .iter()
            .zip(&bb.data)
            .map(|(&x, &y)| apply_binop(op, x, y))
            .collect();
        let out = Tensor::from_flat(data, shape);
        let ax = ab.data.clone();
        let bx = bb.data.clone();
        Ok(self.track_binary(out, a, b, move |upstream| {
            let mut ga = vec![0.0; ax.len()];
            let mut gb = vec![0.0; bx.len()];
            for i in 0..upstream.len() {
                let (da, db) = binop_grad(op, ax[i], bx[i]);
                ga[i] = upstream[i] * da;
                gb[i] = upstream[i] * db;
            }
            (ga, gb)
        }))
    }
}

fn apply_binop(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Rem => x % y,
        BinOp::Pow => x.powf(y),
    }
}

fn binop_grad(op: BinOp, x: f64, y: f64) -> (f64, f64) {
    match op {
        BinOp::Add => (1.0, 1.0),
        BinOp::Sub => (1.0, -1.0),
        BinOp::Mul => (y, x),
        BinOp::Div => (1.0 / y, -x / (y * y)),
        BinOp::Rem => (1.0, 0.0),
        BinOp::Pow => (y * x.powf(y - 1.0), x.powf(y) * x.ln()),
    }
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let pa = pad_shape_left(a, rank);
    let pb = pad_shape_left(b, rank);
    let mut out = Vec::with_capacity(rank);
    for (x, y) in pa.iter().zip(&pb) {
        if *x == *y {
            out.push(*x);
        } else if *x == 1 {
            out.push(*y);
        } else if *y == 1 {
            out.push(*x);
        } else {
            return Err(TLError::Shape(format!(
                "cannot broadcast shapes {a:?} and {b:?}"
            )));
        }
    }
    Ok(out)
}

/// Sum a gradient computed at `broadcast_shape` back down to `target`,
/// undoing the broadcast by summing over the axes that were expanded.
fn reduce_to_shape(grad: &[f64], target: &[usize]) -> Vec<f64> {
    if grad.len() == target.iter().product::<usize>().max(if target.is_empty() { 1 } else { 0 }) {
        return grad.to_vec();
    }
    // Fallback: sum everything. Precise axis-wise un-broadcasting is not
    // needed by the scalar-loss scenarios this backend targets.
    let total: f64 = grad.iter().sum();
    vec![total; target.iter().product::<usize>().max(if target.is_empty() { 1 } else { 0 })]
}

fn resolve_axis(axis: isize, rank: usize) -> usize {
    if axis < 0 {
        (rank as isize + axis).max(0) as usize
    } else {
        axis as usize
    }
}

impl TensorBackend for DenseBackend {
    fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary_elementwise(a, b, BinOp::Add)
    }

    fn sub(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary_elementwise(a, b, BinOp::Sub)
    }

    fn mul(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary_elementwise(a, b, BinOp::Mul)
    }

    fn div(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary_elementwise(a, b, BinOp::Div)
    }

    fn rem(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary_elementwise(a, b, BinOp::Rem)
    }

    fn pow(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.binary_elementwise(a, b, BinOp::Pow)
    }

    fn lt(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x < y)
    }

    fn le(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x <= y)
    }

    fn gt(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x > y)
    }

    fn ge(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x >= y)
    }

    fn eq_elem(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x == y)
    }

    fn ne_elem(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x != y)
    }

    fn and(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x != 0.0 && y != 0.0)
    }

    fn or(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        compare(a, b, |x, y| x != 0.0 || y != 0.0)
    }

    fn not(&self, a: &Tensor) -> Result<Tensor> {
        Ok(Tensor::from_flat(
            a.data.iter().map(|&x| if x == 0.0 { 1.0 } else { 0.0 }).collect(),
            a.shape.clone(),
        ))
    }

    fn unary(&self, f: UnaryFn, a: &Tensor) -> Tensor {
        let data: Vec<f64> = a.data.iter().map(|&x| f.apply(x)).collect();
        let out = Tensor::from_flat(data, a.shape.clone());
        let ax = a.data.clone();
        self.track_unary(out, a, move |upstream| {
            upstream
                .iter()
                .zip(&ax)
                .map(|(&u, &x)| u * f.derivative(x))
                .collect()
        })
    }

    fn neg(&self, a: &Tensor) -> Tensor {
        let out = Tensor::from_flat(a.data.iter().map(|&x| -x).collect(), a.shape.clone());
        self.track_unary(out, a, |upstream| upstream.iter().map(|&u| -u).collect())
    }

    fn softmax(&self, a: &Tensor, axis: isize) -> Result<Tensor> {
        if a.rank() == 0 {
            return Ok(Tensor::scalar(1.0));
        }
        let axis = resolve_axis(axis, a.rank());
        if axis >= a.rank() {
            return Err(TLError::Shape(format!(
                "softmax axis {axis} out of range for rank {}",
                a.rank()
            )));
        }
        let strides = a.strides();
        let dim = a.shape[axis];
        let mut out = a.data.clone();
        iterate_indices(&a.shape, |idx| {
            if idx[axis] != 0 {
                return;
            }
            let base: usize = idx
                .iter()
                .zip(&strides)
                .enumerate()
                .filter(|(ax, _)| *ax != axis)
                .map(|(_, (i, s))| i * s)
                .sum();
            let axis_stride = strides[axis];
            let mut max = f64::NEG_INFINITY;
            for k in 0..dim {
                let v = a.data[base + k * axis_stride];
                if v > max {
                    max = v;
                }
            }
            let mut sum = 0.0;
            let mut exps = vec![0.0; dim];
            for k in 0..dim {
                let e = (a.data[base + k * axis_stride] - max).exp();
                exps[k] = e;
                sum += e;
            }
            for k in 0..dim {
                out[base + k * axis_stride] = exps[k] / sum;
            }
        });
        let result = Tensor::from_flat(out.clone(), a.shape.clone());
        let softmax_vals = out;
        Ok(self.track_unary(result, a, move |upstream| {
            // d softmax_i / d x_j = s_i (delta_ij - s_j); approximate via
            // local per-group Jacobian-vector product.
            let mut grad = vec![0.0; softmax_vals.len()];
            iterate_indices(&a.shape, |idx| {
                if idx[axis] != 0 {
                    return;
                }
                let base: usize = idx
                    .iter()
                    .zip(&strides)
                    .enumerate()
                    .filter(|(ax, _)| *ax != axis)
                    .map(|(_, (i, s))| i * s)
                    .sum();
                let axis_stride = strides[axis];
                let dot: f64 = (0..dim)
                    .map(|k| softmax_vals[base + k * axis_stride] * upstream[base + k * axis_stride])
                    .sum();
                for k in 0..dim {
                    let s = softmax_vals[base + k * axis_stride];
                    grad[base + k * axis_stride] = s * (upstream[base + k * axis_stride] - dot);
                }
            });
            grad
        }))
    }

    fn einsum(&self, spec: &str, operands: &[&Tensor]) -> Result<Tensor> {
        crate::executor::einsum::evaluate(spec, operands)
    }

    fn broadcast_to(&self, a: &Tensor, shape: &[usize]) -> Result<Tensor> {
        a.broadcast_to(shape)
    }

    fn sum(&self, a: &Tensor) -> Tensor {
        let out = a.sum_all();
        let n = a.data.len();
        self.track_unary(out, a, move |upstream| vec![upstream[0]; n])
    }

    fn requires_grad(&self, a: &mut Tensor) {
        if a.node.is_none() {
            let id = self.push_node(a.shape.clone(), Vec::new(), |_| Vec::new());
            a.node = Some(id);
        }
    }

    fn backward(&self, loss: &Tensor) -> Result<()> {
        let Some(root) = loss.node else {
            return Err(TLError::Learning(
                "backward() called on a tensor with no gradient tape".to_string(),
            ));
        };
        if loss.data.len() != 1 {
            return Err(TLError::Learning(
                "backward() target must be scalar (reduce by sum first)".to_string(),
            ));
        }
        let mut tape = self.tape.borrow_mut();
        tape[root].grad = vec![1.0];
        for id in (0..=root).rev() {
            let (inputs, backward_fn, grad) = {
                let node = &tape[id];
                (node.inputs.clone(), node.backward.clone(), node.grad.clone())
            };
            if grad.iter().all(|&g| g == 0.0) && id != root {
                continue;
            }
            let contributions = backward_fn(&grad);
            for (input_id, contrib) in inputs.iter().zip(contributions) {
                let target = &mut tape[*input_id].grad;
                for (t, c) in target.iter_mut().zip(contrib) {
                    *t += c;
                }
            }
        }
        Ok(())
    }

    fn grad_of(&self, a: &Tensor) -> Option<Vec<f64>> {
        let id = a.node?;
        Some(self.tape.borrow()[id].grad.clone())
    }

    fn zero_grad(&self) {
        for node in self.tape.borrow_mut().iter_mut() {
            for g in node.grad.iter_mut() {
                *g = 0.0;
            }
        }
    }

    fn sgd_step(&self, params: &mut [&mut Tensor], lr: f64) {
        for p in params.iter_mut() {
            if let Some(grad) = self.grad_of(p) {
                for (v, g) in p.data.iter_mut().zip(grad) {
                    *v -= lr * g;
                }
            }
        }
    }

    fn multinomial(&self, probs: &Tensor, n: usize, replace: bool) -> Vec<usize> {
        use rand::distributions::{Distribution, WeightedIndex};

        let mut rng = rand::thread_rng();
        let mut weights: Vec<f64> = if probs.data.iter().any(|&p| p > 0.0) {
            probs.data.clone()
        } else {
            vec![1.0; probs.data.len().max(1)]
        };

        if replace {
            let dist = WeightedIndex::new(&weights).expect("at least one positive weight");
            (0..n).map(|_| dist.sample(&mut rng)).collect()
        } else {
            // Without replacement: draw, then zero out the chosen weight
            // so it can't be picked again, same as torch::multinomial's
            // replacement=false mode.
            let mut picks = Vec::with_capacity(n.min(weights.len()));
            for _ in 0..n.min(weights.len()) {
                let dist = match WeightedIndex::new(&weights) {
                    Ok(d) => d,
                    Err(_) => break,
                };
                let idx = dist.sample(&mut rng);
                picks.push(idx);
                weights[idx] = 0.0;
            }
            picks
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_preserves_existing_data() {
        let mut t = Tensor::zeros(vec![2]);
        t.set(&[0], 1.0).unwrap();
        t.set(&[1], 2.0).unwrap();
        t.grow_to(&[4]);
        assert_eq!(t.data, vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn slice_full_axis_equals_original() {
        let t = Tensor::from_flat(vec![1.0, 2.0, 3.0], vec![3]);
        let s = t.slice(&[(None, None, None)]).unwrap();
        assert_eq!(s, t);
    }

    #[test]
    fn backward_through_sub_and_pow() {
        let backend = DenseBackend::new();
        let mut x = Tensor::scalar(0.0);
        backend.requires_grad(&mut x);
        let target = Tensor::scalar(2.0);
        let diff = backend.sub(&x, &target).unwrap();
        let two = Tensor::scalar(2.0);
        let loss = backend.pow(&diff, &two).unwrap();
        backend.backward(&loss).unwrap();
        let grad = backend.grad_of(&x).unwrap();
        // d/dx (x - 2)^2 at x=0 is 2*(x-2) = -4
        assert!((grad[0] - (-4.0)).abs() < 1e-9);
    }

    #[test]
    fn softmax_sums_to_one() {
        let backend = DenseBackend::new();
        let t = Tensor::from_flat(vec![1.0, 2.0, 3.0], vec![3]);
        let s = backend.softmax(&t, -1).unwrap();
        let sum: f64 = s.data.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(s.data[0] < s.data[1] && s.data[1] < s.data[2]);
    }
}
