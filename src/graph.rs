//! Recorded operations and reverse-mode traversal.

use crate::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};
use crate::error::Error;
use crate::shape::Shape;
use crate::tensor::Tensor;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum OpType {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Maximum,
    Minimum,
    AddScalar(f64),
    MulScalar(f64),
    PowScalar(f64),
    Unary(UnaryOp),
    Sum { axes: Vec<usize>, keep_dims: bool },
    Mean { axes: Vec<usize>, keep_dims: bool },
    Softmax { axes: Vec<usize>, temperature: f64 },
    Matmul,
    Reshape,
    Transpose(Vec<usize>),
    Broadcast,
    Concat { axis: usize, sizes: Vec<usize> },
    SliceAxis { axis: usize, start: usize, end: usize },
    Get { offsets: Vec<usize> },
    Clip { min: f64, max: f64 },
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OpType::Add => write!(f, "Add"),
            OpType::Sub => write!(f, "Sub"),
            OpType::Mul => write!(f, "Mul"),
            OpType::Div => write!(f, "Div"),
            OpType::Pow => write!(f, "Pow"),
            OpType::Maximum => write!(f, "Maximum"),
            OpType::Minimum => write!(f, "Minimum"),
            OpType::AddScalar(s) => write!(f, "AddScalar(scalar={})", s),
            OpType::MulScalar(s) => write!(f, "MulScalar(scalar={})", s),
            OpType::PowScalar(p) => write!(f, "PowScalar(exponent={})", p),
            OpType::Unary(op) => write!(f, "{:?}", op),
            OpType::Sum { axes, keep_dims } => write!(f, "Sum(axes={:?}, keep_dims={})", axes, keep_dims),
            OpType::Mean { axes, keep_dims } => write!(f, "Mean(axes={:?}, keep_dims={})", axes, keep_dims),
            OpType::Softmax { axes, temperature } => {
                write!(f, "Softmax(axes={:?}, temperature={})", axes, temperature)
            }
            OpType::Matmul => write!(f, "Matmul"),
            OpType::Reshape => write!(f, "Reshape"),
            OpType::Transpose(perm) => write!(f, "Transpose(perm={:?})", perm),
            OpType::Broadcast => write!(f, "Broadcast"),
            OpType::Concat { axis, .. } => write!(f, "Concat(axis={})", axis),
            OpType::SliceAxis { axis, start, end } => write!(f, "SliceAxis(axis={}, {}..{})", axis, start, end),
            OpType::Get { offsets } => write!(f, "Get({} elements)", offsets.len()),
            OpType::Clip { min, max } => write!(f, "Clip(min={}, max={})", min, max),
        }
    }
}

#[allow(type_alias_bounds)]
type BackwardFn<B: Backend> = dyn Fn(&Op<B>, &B::Storage) -> Result<Vec<B::Storage>, Error>;

#[derive(Clone)]
pub struct Op<B: Backend> {
    pub op_type: OpType,
    pub inputs: Vec<Tensor<B>>,
    pub backward_fn: Rc<BackwardFn<B>>,
    /// Forward output, kept for rules that differentiate through it.
    pub cached_output: Option<B::Storage>,
    /// Input write counters at record time.
    pub(crate) input_versions: Vec<u64>,
}

impl<B: Backend> Op<B> {
    pub fn new(
        op_type: OpType,
        inputs: Vec<Tensor<B>>,
        backward_fn: impl Fn(&Op<B>, &B::Storage) -> Result<Vec<B::Storage>, Error> + 'static,
    ) -> Self {
        let input_versions = inputs.iter().map(|t| t.version()).collect();
        Self {
            op_type,
            inputs,
            backward_fn: Rc::new(backward_fn),
            cached_output: None,
            input_versions,
        }
    }

    /// An op differentiated by the built-in rule for its type.
    pub fn recorded(op_type: OpType, inputs: Vec<Tensor<B>>) -> Self {
        Self::new(op_type, inputs, backward_rule::<B>)
    }

    fn input_data(&self, i: usize) -> Result<B::Storage, Error> {
        let input = self.inputs.get(i).ok_or_else(|| {
            Error::InternalLogicError(format!("{} has no input {}", self.op_type, i))
        })?;
        Ok(input.data()?.clone())
    }

    /// Fails if any input was written after this op was recorded.
    pub(crate) fn check_inputs_unchanged(&self) -> Result<(), Error> {
        for (input, &seen) in self.inputs.iter().zip(&self.input_versions) {
            if input.version() != seen {
                return Err(Error::InvalidOperation(format!(
                    "array {} was modified in place after being recorded by {}",
                    input.id(),
                    self.op_type
                )));
            }
        }
        Ok(())
    }
}

impl<B: Backend> fmt::Debug for Op<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("op_type", &self.op_type)
            .field("inputs", &self.inputs.iter().map(|t| t.id()).collect::<Vec<_>>())
            .field("backward_fn", &"<closure>")
            .finish()
    }
}

/// Sums `grad` down to `target`, undoing a broadcast.
pub(crate) fn unbroadcast<B: Backend>(grad: B::Storage, target: &[usize]) -> Result<B::Storage, Error> {
    let grad_shape = B::shape(&grad).to_vec();
    if grad_shape == target {
        return Ok(grad);
    }
    let lead = grad_shape.len().saturating_sub(target.len());
    let mut axes: Vec<usize> = (0..lead).collect();
    for (i, &d) in target.iter().enumerate() {
        if d == 1 && grad_shape[lead + i] != 1 {
            axes.push(lead + i);
        }
    }
    let summed = B::reduce(ReduceOp::Sum, &grad, &axes, true)?;
    B::reshape(&summed, target)
}

/// Expands a reduced gradient back over the reduced axes.
fn expand_reduced<B: Backend>(
    grad: &B::Storage,
    input_shape: &[usize],
    axes: &[usize],
    keep_dims: bool,
) -> Result<B::Storage, Error> {
    let kept = Shape::from(input_shape).reduce(axes, true);
    let grad = if keep_dims {
        grad.clone()
    } else {
        B::reshape(grad, kept.dims())?
    };
    B::broadcast_to(&grad, input_shape)
}

fn unary_derivative<B: Backend>(op: UnaryOp, x: &B::Storage, g: &B::Storage) -> Result<B::Storage, Error> {
    let local = match op {
        UnaryOp::Neg => return B::binary_scalar(BinaryOp::Mul, g, -1.0),
        UnaryOp::Abs => B::map(x, &|v: f64| if v > 0.0 { 1.0 } else if v < 0.0 { -1.0 } else { 0.0 }, B::dtype(g))?,
        UnaryOp::Square => B::binary_scalar(BinaryOp::Mul, x, 2.0)?,
        UnaryOp::Sqrt => B::map(x, &|v: f64| 0.5 / v.sqrt(), B::dtype(g))?,
        UnaryOp::Cbrt => B::map(x, &|v: f64| 1.0 / (3.0 * v.cbrt() * v.cbrt()), B::dtype(g))?,
        UnaryOp::Exp => B::unary(UnaryOp::Exp, x)?,
        UnaryOp::Log => B::map(x, &|v: f64| 1.0 / v, B::dtype(g))?,
        UnaryOp::Log10 => B::map(x, &|v: f64| 1.0 / (v * std::f64::consts::LN_10), B::dtype(g))?,
        UnaryOp::Log2 => B::map(x, &|v: f64| 1.0 / (v * std::f64::consts::LN_2), B::dtype(g))?,
        UnaryOp::Sin => B::unary(UnaryOp::Cos, x)?,
        UnaryOp::Cos => B::map(x, &|v: f64| -v.sin(), B::dtype(g))?,
        UnaryOp::Tan => B::map(x, &|v: f64| 1.0 / (v.cos() * v.cos()), B::dtype(g))?,
        UnaryOp::Asin => B::map(x, &|v: f64| 1.0 / (1.0 - v * v).sqrt(), B::dtype(g))?,
        UnaryOp::Acos => B::map(x, &|v: f64| -1.0 / (1.0 - v * v).sqrt(), B::dtype(g))?,
        UnaryOp::Atan => B::map(x, &|v: f64| 1.0 / (1.0 + v * v), B::dtype(g))?,
        UnaryOp::Sinh => B::unary(UnaryOp::Cosh, x)?,
        UnaryOp::Cosh => B::unary(UnaryOp::Sinh, x)?,
        UnaryOp::Tanh => B::map(x, &|v: f64| 1.0 - v.tanh() * v.tanh(), B::dtype(g))?,
        UnaryOp::Asinh => B::map(x, &|v: f64| 1.0 / (v * v + 1.0).sqrt(), B::dtype(g))?,
        UnaryOp::Acosh => B::map(x, &|v: f64| 1.0 / (v * v - 1.0).sqrt(), B::dtype(g))?,
        UnaryOp::Atanh => B::map(x, &|v: f64| 1.0 / (1.0 - v * v), B::dtype(g))?,
        UnaryOp::ToDegrees => return B::binary_scalar(BinaryOp::Mul, g, 180.0 / std::f64::consts::PI),
        UnaryOp::ToRadians => return B::binary_scalar(BinaryOp::Mul, g, std::f64::consts::PI / 180.0),
        UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Round | UnaryOp::Trunc => {
            return B::zeros(B::shape(g), B::dtype(g), B::device(g))
        }
        UnaryOp::LogicalNot | UnaryOp::IsNan | UnaryOp::IsInfinite => {
            return Err(Error::InvalidOperation(format!("{:?} is not differentiable", op)))
        }
    };
    B::binary(BinaryOp::Mul, g, &local)
}

/// Gradient rule for every [`OpType`].
///
/// Returns one gradient per input, each shaped like that input.
pub(crate) fn backward_rule<B: Backend>(op: &Op<B>, grad: &B::Storage) -> Result<Vec<B::Storage>, Error> {
    crate::debug_println!("backward {} with grad shape {:?}", op.op_type, B::shape(grad));
    match &op.op_type {
        OpType::Add | OpType::Sub => {
            let a_shape = op.inputs[0].shape();
            let b_shape = op.inputs[1].shape();
            let grad_b = if op.op_type == OpType::Sub {
                B::binary_scalar(BinaryOp::Mul, grad, -1.0)?
            } else {
                grad.clone()
            };
            Ok(vec![
                unbroadcast::<B>(grad.clone(), a_shape.dims())?,
                unbroadcast::<B>(grad_b, b_shape.dims())?,
            ])
        }
        OpType::Mul => {
            let a = op.input_data(0)?;
            let b = op.input_data(1)?;
            let grad_a = B::binary(BinaryOp::Mul, grad, &b)?;
            let grad_b = B::binary(BinaryOp::Mul, grad, &a)?;
            Ok(vec![
                unbroadcast::<B>(grad_a, B::shape(&a))?,
                unbroadcast::<B>(grad_b, B::shape(&b))?,
            ])
        }
        OpType::Div => {
            // d(a/b)/da = 1/b, d(a/b)/db = -a/b^2
            let a = op.input_data(0)?;
            let b = op.input_data(1)?;
            let grad_a = B::binary(BinaryOp::Div, grad, &b)?;
            let b_sq = B::unary(UnaryOp::Square, &b)?;
            let ratio = B::binary(BinaryOp::Div, &a, &b_sq)?;
            let grad_b = B::binary_scalar(BinaryOp::Mul, &B::binary(BinaryOp::Mul, grad, &ratio)?, -1.0)?;
            Ok(vec![
                unbroadcast::<B>(grad_a, B::shape(&a))?,
                unbroadcast::<B>(grad_b, B::shape(&b))?,
            ])
        }
        OpType::Pow => {
            // d(a^b)/da = b * a^(b-1), d(a^b)/db = a^b * ln(a)
            let a = op.input_data(0)?;
            let b = op.input_data(1)?;
            let b_minus_one = B::binary_scalar(BinaryOp::Sub, &b, 1.0)?;
            let local_a = B::binary(BinaryOp::Mul, &b, &B::binary(BinaryOp::Pow, &a, &b_minus_one)?)?;
            let out = B::binary(BinaryOp::Pow, &a, &b)?;
            let local_b = B::binary(BinaryOp::Mul, &out, &B::unary(UnaryOp::Log, &a)?)?;
            Ok(vec![
                unbroadcast::<B>(B::binary(BinaryOp::Mul, grad, &local_a)?, B::shape(&a))?,
                unbroadcast::<B>(B::binary(BinaryOp::Mul, grad, &local_b)?, B::shape(&b))?,
            ])
        }
        OpType::Maximum | OpType::Minimum => {
            let a = op.input_data(0)?;
            let b = op.input_data(1)?;
            let cmp = if op.op_type == OpType::Maximum {
                crate::backend::CompareOp::Gte
            } else {
                crate::backend::CompareOp::Lte
            };
            let mask_a = B::cast(&B::compare(cmp, &a, &b)?, B::dtype(grad))?;
            let mask_b = B::binary_scalar(BinaryOp::Sub, &B::binary_scalar(BinaryOp::Mul, &mask_a, -1.0)?, -1.0)?;
            Ok(vec![
                unbroadcast::<B>(B::binary(BinaryOp::Mul, grad, &mask_a)?, B::shape(&a))?,
                unbroadcast::<B>(B::binary(BinaryOp::Mul, grad, &mask_b)?, B::shape(&b))?,
            ])
        }
        OpType::AddScalar(_) => Ok(vec![grad.clone()]),
        OpType::MulScalar(s) => Ok(vec![B::binary_scalar(BinaryOp::Mul, grad, *s)?]),
        OpType::PowScalar(p) => {
            let x = op.input_data(0)?;
            let p = *p;
            let local = B::map(&x, &move |v: f64| p * v.powf(p - 1.0), B::dtype(grad))?;
            Ok(vec![B::binary(BinaryOp::Mul, grad, &local)?])
        }
        OpType::Unary(u) => {
            let x = op.input_data(0)?;
            Ok(vec![unary_derivative::<B>(*u, &x, grad)?])
        }
        OpType::Sum { axes, keep_dims } => {
            let input_shape = op.inputs[0].shape();
            Ok(vec![expand_reduced::<B>(grad, input_shape.dims(), axes, *keep_dims)?])
        }
        OpType::Mean { axes, keep_dims } => {
            let input_shape = op.inputs[0].shape();
            let count: usize = axes.iter().map(|&a| input_shape[a]).product();
            let expanded = expand_reduced::<B>(grad, input_shape.dims(), axes, *keep_dims)?;
            Ok(vec![B::binary_scalar(BinaryOp::Div, &expanded, count.max(1) as f64)?])
        }
        OpType::Softmax { axes, temperature } => {
            // dx = y * (g - sum(g * y)) / t
            let y = op
                .cached_output
                .clone()
                .ok_or_else(|| Error::InternalLogicError("softmax output was not cached".to_string()))?;
            let gy = B::binary(BinaryOp::Mul, grad, &y)?;
            let total = B::reduce(ReduceOp::Sum, &gy, axes, true)?;
            let centered = B::binary(BinaryOp::Sub, grad, &total)?;
            let dx = B::binary(BinaryOp::Mul, &y, &centered)?;
            Ok(vec![B::binary_scalar(BinaryOp::Div, &dx, *temperature)?])
        }
        OpType::Matmul => {
            // grad_a = grad @ b.T, grad_b = a.T @ grad
            let a = op.input_data(0)?;
            let b = op.input_data(1)?;
            let b_t = B::transpose(&b, &[1, 0])?;
            let a_t = B::transpose(&a, &[1, 0])?;
            Ok(vec![B::matmul(grad, &b_t)?, B::matmul(&a_t, grad)?])
        }
        OpType::Reshape => {
            let input_shape = op.inputs[0].shape();
            Ok(vec![B::reshape(grad, input_shape.dims())?])
        }
        OpType::Transpose(perm) => {
            let mut inverse = vec![0; perm.len()];
            for (i, &p) in perm.iter().enumerate() {
                inverse[p] = i;
            }
            Ok(vec![B::transpose(grad, &inverse)?])
        }
        OpType::Broadcast => {
            let input_shape = op.inputs[0].shape();
            Ok(vec![unbroadcast::<B>(grad.clone(), input_shape.dims())?])
        }
        OpType::Concat { axis, sizes } => {
            let mut grads = Vec::with_capacity(sizes.len());
            let mut start = 0;
            for &size in sizes {
                grads.push(B::slice_axis(grad, *axis, start, start + size)?);
                start += size;
            }
            Ok(grads)
        }
        OpType::SliceAxis { axis, start, end } => {
            let input_shape = op.inputs[0].shape();
            let dtype = B::dtype(grad);
            let device = B::device(grad);
            let before = B::zeros(input_shape.with_dim(*axis, *start).dims(), dtype, device)?;
            let after = B::zeros(
                input_shape.with_dim(*axis, input_shape[*axis] - end).dims(),
                dtype,
                device,
            )?;
            Ok(vec![B::concat(&[&before, grad, &after], *axis)?])
        }
        OpType::Get { offsets } => {
            let input_shape = op.inputs[0].shape();
            let mut full = B::zeros(input_shape.dims(), B::dtype(grad), B::device(grad))?;
            B::scatter(&mut full, offsets, grad)?;
            Ok(vec![full])
        }
        OpType::Clip { min, max } => {
            let x = op.input_data(0)?;
            let (lo, hi) = (*min, *max);
            let mask = B::map(&x, &move |v: f64| if v >= lo && v <= hi { 1.0 } else { 0.0 }, B::dtype(grad))?;
            Ok(vec![B::binary(BinaryOp::Mul, grad, &mask)?])
        }
    }
}

/// Nodes reachable from `root` through recorded ops, leaves first.
pub(crate) fn topological_order<B: Backend>(root: &Tensor<B>) -> Result<Vec<Tensor<B>>, Error> {
    let mut sorted = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();

    fn visit<B: Backend>(
        node: &Tensor<B>,
        visited: &mut HashSet<usize>,
        sorted: &mut Vec<Tensor<B>>,
        visiting: &mut HashSet<usize>,
    ) -> Result<(), Error> {
        let node_id = node.id();
        if visited.contains(&node_id) {
            return Ok(());
        }
        if !visiting.insert(node_id) {
            return Err(Error::InternalLogicError(format!(
                "Cycle detected in computation graph involving array {}",
                node_id
            )));
        }

        let inputs = node.op_inputs();
        for input in &inputs {
            visit(input, visited, sorted, visiting)?;
        }

        visiting.remove(&node_id);
        visited.insert(node_id);
        sorted.push(node.clone());
        Ok(())
    }

    visit(root, &mut visited, &mut sorted, &mut visiting)?;
    Ok(sorted)
}

/// Propagates `seed` from `root` to every reachable node.
///
/// Returns the summed gradient per node id along with the visited nodes.
pub(crate) fn propagate<B: Backend>(
    root: &Tensor<B>,
    seed: B::Storage,
) -> Result<(Vec<Tensor<B>>, HashMap<usize, B::Storage>), Error> {
    let nodes = topological_order(root)?;
    let mut grads: HashMap<usize, B::Storage> = HashMap::new();
    grads.insert(root.id(), seed);

    for node in nodes.iter().rev() {
        let Some(op) = node.op() else {
            continue;
        };
        let Some(output_grad) = grads.get(&node.id()).cloned() else {
            continue;
        };
        op.check_inputs_unchanged()?;
        let input_grads = (op.backward_fn)(&op, &output_grad)?;
        if op.inputs.len() != input_grads.len() {
            return Err(Error::InternalLogicError(format!(
                "Backward function for op {} (array {}) returned {} gradients, expected {}",
                op.op_type,
                node.id(),
                input_grads.len(),
                op.inputs.len()
            )));
        }
        for (input, g) in op.inputs.iter().zip(input_grads) {
            if !input.tracks_grad() {
                continue;
            }
            let total = match grads.remove(&input.id()) {
                Some(existing) => B::binary(BinaryOp::Add, &existing, &g)?,
                None => g,
            };
            grads.insert(input.id(), total);
        }
    }
    Ok((nodes, grads))
}
