//! Array operations that dispatch to backend kernels and record the
//! computation graph while autograd recording is active.
//!
//! Every mutating operation comes in two forms. The copy form returns a
//! new array and leaves the receiver untouched; the `i`-suffixed form
//! writes into the receiver and returns its handle for chaining. Both apply
//! the same broadcast and promotion rules; the in-place form additionally
//! refuses to change the receiver's shape or data type.

use crate::autograd;
use crate::backend::{Backend, BinaryOp, CompareOp, UnaryOp};
use crate::error::Error;
use crate::graph::{Op, OpType};
use crate::tensor::Tensor;
use crate::types::DataType;
use crate::{Device, DEFAULT_EPS};

use std::ops::{Add, Div, Mul, Neg, Sub};

pub mod cpu_ops;
pub mod index;
pub mod reduce;
pub mod structural;

pub use structural::{concat, stack};

/// Whether an operation over `inputs` is recorded into the graph.
pub(crate) fn should_record<B: Backend>(inputs: &[&Tensor<B>]) -> bool {
    autograd::is_recording() && inputs.iter().any(|t| t.tracks_grad())
}

/// Attaches a differentiable op to `output` when recording applies.
pub(crate) fn record<B: Backend>(output: &Tensor<B>, op_type: OpType, inputs: &[&Tensor<B>]) {
    if should_record(inputs) {
        let inputs = inputs.iter().map(|&t| t.clone()).collect();
        output.set_op(Op::recorded(op_type, inputs));
    }
}

// --- Factories ---

/// Samples U(low, high). Not differentiable.
///
/// # Errors
/// [`Error::InvalidOperation`] if `high <= low`.
pub fn random_uniform<B: Backend>(
    shape: &[usize],
    low: f64,
    high: f64,
    dtype: DataType,
) -> Result<Tensor<B>, Error> {
    if high <= low {
        return Err(Error::InvalidOperation(format!(
            "Upper bound ({}) must be greater than lower bound ({}) for uniform distribution",
            high, low
        )));
    }
    let storage = B::random_uniform(shape, low, high, dtype, Device::Cpu)?;
    Ok(Tensor::new(storage))
}

/// Samples N(mean, std_dev^2). Not differentiable.
///
/// # Errors
/// [`Error::InvalidOperation`] if `std_dev` is negative.
pub fn random_normal<B: Backend>(
    shape: &[usize],
    mean: f64,
    std_dev: f64,
    dtype: DataType,
) -> Result<Tensor<B>, Error> {
    if std_dev < 0.0 {
        return Err(Error::InvalidOperation(format!(
            "Standard deviation ({}) must be non-negative for normal distribution",
            std_dev
        )));
    }
    let storage = B::random_normal(shape, mean, std_dev, dtype, Device::Cpu)?;
    Ok(Tensor::new(storage))
}

// --- Element-wise ---

fn binary_op_type(op: BinaryOp) -> Option<OpType> {
    match op {
        BinaryOp::Add => Some(OpType::Add),
        BinaryOp::Sub => Some(OpType::Sub),
        BinaryOp::Mul => Some(OpType::Mul),
        BinaryOp::Div => Some(OpType::Div),
        BinaryOp::Pow => Some(OpType::Pow),
        BinaryOp::Maximum => Some(OpType::Maximum),
        BinaryOp::Minimum => Some(OpType::Minimum),
        BinaryOp::Rem => None,
    }
}

fn scalar_op_type(op: BinaryOp, scalar: f64) -> Option<OpType> {
    match op {
        BinaryOp::Add => Some(OpType::AddScalar(scalar)),
        BinaryOp::Sub => Some(OpType::AddScalar(-scalar)),
        BinaryOp::Mul => Some(OpType::MulScalar(scalar)),
        BinaryOp::Div => Some(OpType::MulScalar(1.0 / scalar)),
        BinaryOp::Pow => Some(OpType::PowScalar(scalar)),
        _ => None,
    }
}

/// Element-wise `a op b` over the broadcast shape.
pub fn binary<B: Backend>(op: BinaryOp, a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    crate::debug_println!("{}: {} with {}", op, a.shape(), b.shape());
    let output_data = B::binary(op, &*a.data()?, &*b.data()?)?;
    let output = a.derive(output_data);
    if let Some(op_type) = binary_op_type(op) {
        record(&output, op_type, &[a, b]);
    }
    Ok(output)
}

/// Element-wise `a op= b`; `b` must broadcast to `a`'s shape.
pub fn binary_inplace<B: Backend>(op: BinaryOp, a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    crate::debug_println!("{} in place: {} with {}", op, a.shape(), b.shape());
    a.check_mutable(&op.to_string())?;
    // `b` may be `a` itself
    let rhs = b.data()?.clone();
    B::binary_inplace(op, &mut *a.data_mut()?, &rhs)?;
    Ok(a.clone())
}

pub fn binary_scalar<B: Backend>(op: BinaryOp, a: &Tensor<B>, scalar: f64) -> Result<Tensor<B>, Error> {
    let output_data = B::binary_scalar(op, &*a.data()?, scalar)?;
    let output = a.derive(output_data);
    if let Some(op_type) = scalar_op_type(op, scalar) {
        record(&output, op_type, &[a]);
    }
    Ok(output)
}

pub fn binary_scalar_inplace<B: Backend>(op: BinaryOp, a: &Tensor<B>, scalar: f64) -> Result<Tensor<B>, Error> {
    a.check_mutable(&op.to_string())?;
    B::binary_scalar_inplace(op, &mut *a.data_mut()?, scalar)?;
    Ok(a.clone())
}

/// Element-wise comparison producing a boolean array. Not differentiable.
pub fn compare<B: Backend>(op: CompareOp, a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    let output_data = B::compare(op, &*a.data()?, &*b.data()?)?;
    Ok(a.derive(output_data))
}

pub fn compare_scalar<B: Backend>(op: CompareOp, a: &Tensor<B>, scalar: f64) -> Result<Tensor<B>, Error> {
    let output_data = B::compare_scalar(op, &*a.data()?, scalar)?;
    Ok(a.derive(output_data))
}

pub fn unary<B: Backend>(op: UnaryOp, x: &Tensor<B>) -> Result<Tensor<B>, Error> {
    crate::debug_println!("{:?}: {}", op, x.shape());
    let output_data = B::unary(op, &*x.data()?)?;
    let output = x.derive(output_data);
    if !matches!(op, UnaryOp::LogicalNot | UnaryOp::IsNan | UnaryOp::IsInfinite) {
        record(&output, OpType::Unary(op), &[x]);
    }
    Ok(output)
}

pub fn unary_inplace<B: Backend>(op: UnaryOp, x: &Tensor<B>) -> Result<Tensor<B>, Error> {
    x.check_mutable(&format!("{:?}", op))?;
    B::unary_inplace(op, &mut *x.data_mut()?)?;
    Ok(x.clone())
}

pub fn add<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    binary(BinaryOp::Add, a, b)
}

pub fn sub<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    binary(BinaryOp::Sub, a, b)
}

pub fn mul<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    binary(BinaryOp::Mul, a, b)
}

pub fn div<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    binary(BinaryOp::Div, a, b)
}

/// 2-D matrix product.
///
/// # Errors
/// [`Error::IncompatibleShapes`] unless both operands are 2-D with matching
/// inner dimensions.
pub fn matmul<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) -> Result<Tensor<B>, Error> {
    let a_shape = a.shape();
    let b_shape = b.shape();
    if a_shape.rank() != 2 || b_shape.rank() != 2 || a_shape[1] != b_shape[0] {
        return Err(Error::incompatible("matmul", a_shape.dims(), b_shape.dims()));
    }
    let output_data = B::matmul(&*a.data()?, &*b.data()?)?;
    let output = a.derive(output_data);
    record(&output, OpType::Matmul, &[a, b]);
    Ok(output)
}

// Copy form, in-place form, scalar copy form, scalar in-place form.
macro_rules! binary_methods {
    ($($name:ident, $inplace:ident, $scalar:ident, $scalar_inplace:ident => $op:ident;)*) => {
        impl<B: Backend> Tensor<B> {
            $(
                pub fn $name(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
                    binary(BinaryOp::$op, self, other)
                }

                pub fn $inplace(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
                    binary_inplace(BinaryOp::$op, self, other)
                }

                pub fn $scalar(&self, scalar: f64) -> Result<Tensor<B>, Error> {
                    binary_scalar(BinaryOp::$op, self, scalar)
                }

                pub fn $scalar_inplace(&self, scalar: f64) -> Result<Tensor<B>, Error> {
                    binary_scalar_inplace(BinaryOp::$op, self, scalar)
                }
            )*
        }
    };
}

binary_methods! {
    add, addi, add_scalar, add_scalari => Add;
    sub, subi, sub_scalar, sub_scalari => Sub;
    mul, muli, mul_scalar, mul_scalari => Mul;
    div, divi, div_scalar, div_scalari => Div;
    rem, remi, rem_scalar, rem_scalari => Rem;
    pow, powi, pow_scalar, pow_scalari => Pow;
    maximum, maximumi, maximum_scalar, maximum_scalari => Maximum;
    minimum, minimumi, minimum_scalar, minimum_scalari => Minimum;
}

macro_rules! compare_methods {
    ($($name:ident, $scalar:ident => $op:ident;)*) => {
        impl<B: Backend> Tensor<B> {
            $(
                pub fn $name(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
                    compare(CompareOp::$op, self, other)
                }

                pub fn $scalar(&self, scalar: f64) -> Result<Tensor<B>, Error> {
                    compare_scalar(CompareOp::$op, self, scalar)
                }
            )*
        }
    };
}

compare_methods! {
    eq, eq_scalar => Eq;
    neq, neq_scalar => Neq;
    gt, gt_scalar => Gt;
    gte, gte_scalar => Gte;
    lt, lt_scalar => Lt;
    lte, lte_scalar => Lte;
}

macro_rules! unary_methods {
    ($($name:ident, $inplace:ident => $op:ident;)*) => {
        impl<B: Backend> Tensor<B> {
            $(
                pub fn $name(&self) -> Result<Tensor<B>, Error> {
                    unary(UnaryOp::$op, self)
                }

                pub fn $inplace(&self) -> Result<Tensor<B>, Error> {
                    unary_inplace(UnaryOp::$op, self)
                }
            )*
        }
    };
}

unary_methods! {
    neg, negi => Neg;
    abs, absi => Abs;
    square, squarei => Square;
    sqrt, sqrti => Sqrt;
    cbrt, cbrti => Cbrt;
    floor, floori => Floor;
    ceil, ceili => Ceil;
    round, roundi => Round;
    trunc, trunci => Trunc;
    exp, expi => Exp;
    log, logi => Log;
    log10, log10i => Log10;
    log2, log2i => Log2;
    sin, sini => Sin;
    cos, cosi => Cos;
    tan, tani => Tan;
    asin, asini => Asin;
    acos, acosi => Acos;
    atan, atani => Atan;
    sinh, sinhi => Sinh;
    cosh, coshi => Cosh;
    tanh, tanhi => Tanh;
    asinh, asinhi => Asinh;
    acosh, acoshi => Acosh;
    atanh, atanhi => Atanh;
    to_degrees, to_degreesi => ToDegrees;
    to_radians, to_radiansi => ToRadians;
}

impl<B: Backend> Tensor<B> {
    /// Boolean array, true where the element is zero or false.
    pub fn logical_not(&self) -> Result<Tensor<B>, Error> {
        unary(UnaryOp::LogicalNot, self)
    }

    pub fn is_nan(&self) -> Result<Tensor<B>, Error> {
        unary(UnaryOp::IsNan, self)
    }

    pub fn is_infinite(&self) -> Result<Tensor<B>, Error> {
        unary(UnaryOp::IsInfinite, self)
    }

    pub fn mmul(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        matmul(self, other)
    }

    /// `|self - other| < tolerance`, computed in `float64`.
    fn within(&self, other: &Tensor<B>, tolerance: f64) -> Result<B::Storage, Error> {
        let a = B::cast(&*self.data()?, DataType::Float64)?;
        let b = B::cast(&*other.data()?, DataType::Float64)?;
        let diff = B::unary(UnaryOp::Abs, &B::binary(BinaryOp::Sub, &a, &b)?)?;
        B::compare_scalar(CompareOp::Lt, &diff, tolerance)
    }

    /// Boolean array, true where the elements differ by less than [`DEFAULT_EPS`].
    pub fn eps(&self, other: &Tensor<B>) -> Result<Tensor<B>, Error> {
        let output_data = self.within(other, DEFAULT_EPS)?;
        Ok(self.derive(output_data))
    }

    /// True iff every broadcast-compared element pair is equal.
    ///
    /// # Errors
    /// A shape error if the shapes do not broadcast.
    pub fn content_equals(&self, other: &Tensor<B>) -> Result<bool, Error> {
        let mask = B::compare(CompareOp::Eq, &*self.data()?, &*other.data()?)?;
        Ok(B::nonzero(&mask)? == B::size(&mask))
    }

    /// True iff every element equals `value`.
    pub fn content_equals_scalar(&self, value: f64) -> Result<bool, Error> {
        let mask = B::compare_scalar(CompareOp::Eq, &*self.data()?, value)?;
        Ok(B::nonzero(&mask)? == B::size(&mask))
    }

    /// Same shape and every element pair within `eps`.
    pub fn equals_with_eps(&self, other: &Tensor<B>, eps: f64) -> Result<bool, Error> {
        if !self.equal_shapes(other) {
            return Ok(false);
        }
        let mask = self.within(other, eps)?;
        Ok(B::nonzero(&mask)? == B::size(&mask))
    }

    pub fn equal_shapes(&self, other: &Tensor<B>) -> bool {
        self.shape() == other.shape()
    }
}

// --- Operator overloading ---

impl<'b, B: Backend> Add<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    /// Element-wise addition with broadcasting. Calls [`ops::add`](add).
    fn add(self, rhs: &'b Tensor<B>) -> Self::Output {
        add(self, rhs)
    }
}

impl<'b, B: Backend> Sub<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    fn sub(self, rhs: &'b Tensor<B>) -> Self::Output {
        sub(self, rhs)
    }
}

impl<'b, B: Backend> Mul<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    fn mul(self, rhs: &'b Tensor<B>) -> Self::Output {
        mul(self, rhs)
    }
}

impl<'b, B: Backend> Div<&'b Tensor<B>> for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    fn div(self, rhs: &'b Tensor<B>) -> Self::Output {
        div(self, rhs)
    }
}

impl<B: Backend> Neg for &Tensor<B> {
    type Output = Result<Tensor<B>, Error>;

    fn neg(self) -> Self::Output {
        unary(UnaryOp::Neg, self)
    }
}
