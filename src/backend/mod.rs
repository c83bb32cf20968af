//! Backend trait definition and the operation families it dispatches.
//!
//! A backend owns the storage type behind every array and executes the
//! numeric kernels. The array handle never branches on data type, layout or
//! device itself; it hands the storage to `B::*` and wraps the result.

use crate::error::Error;
use crate::types::{DataType, SparseFormat};
use crate::Device;
use std::fmt::{self, Debug, Display};

pub mod cpu;

pub type CpuTensor = crate::tensor::Tensor<cpu::CpuBackend>;

/// Element-wise binary arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Remainder with the sign of the dividend: `-3 mod -2 == -1`.
    Rem,
    Pow,
    Maximum,
    Minimum,
}

impl BinaryOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Maximum => a.max(b),
            BinaryOp::Minimum => a.min(b),
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "mod",
            BinaryOp::Pow => "pow",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
        };
        write!(f, "{}", name)
    }
}

/// Element-wise comparison; results are boolean arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn apply(self, a: f64, b: f64) -> bool {
        match self {
            CompareOp::Eq => a == b,
            CompareOp::Neq => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Gte => a >= b,
            CompareOp::Lt => a < b,
            CompareOp::Lte => a <= b,
        }
    }
}

/// Element-wise unary functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Square,
    Sqrt,
    Cbrt,
    Floor,
    Ceil,
    Round,
    Trunc,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    ToDegrees,
    ToRadians,
    LogicalNot,
    IsNan,
    IsInfinite,
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Square => x * x,
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Cbrt => x.cbrt(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Ceil => x.ceil(),
            UnaryOp::Round => x.round(),
            UnaryOp::Trunc => x.trunc(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Log10 => x.log10(),
            UnaryOp::Log2 => x.log2(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Asin => x.asin(),
            UnaryOp::Acos => x.acos(),
            UnaryOp::Atan => x.atan(),
            UnaryOp::Sinh => x.sinh(),
            UnaryOp::Cosh => x.cosh(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Asinh => x.asinh(),
            UnaryOp::Acosh => x.acosh(),
            UnaryOp::Atanh => x.atanh(),
            UnaryOp::ToDegrees => x.to_degrees(),
            UnaryOp::ToRadians => x.to_radians(),
            UnaryOp::LogicalNot => flag(x == 0.0),
            UnaryOp::IsNan => flag(x.is_nan()),
            UnaryOp::IsInfinite => flag(x.is_infinite()),
        }
    }

    /// Element type produced for an input of type `input`.
    ///
    /// Predicates yield booleans. Sign and rounding functions keep the input
    /// type; everything else needs a floating type and promotes integers to
    /// `float32`.
    pub fn result_dtype(self, input: DataType) -> DataType {
        match self {
            UnaryOp::LogicalNot | UnaryOp::IsNan | UnaryOp::IsInfinite => DataType::Boolean,
            UnaryOp::Neg
            | UnaryOp::Abs
            | UnaryOp::Square
            | UnaryOp::Floor
            | UnaryOp::Ceil
            | UnaryOp::Round
            | UnaryOp::Trunc => input,
            _ if input.is_floating() => input,
            _ => DataType::Float32,
        }
    }
}

/// Reductions over a set of axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Prod,
    Mean,
    Max,
    Min,
    /// Maximum of absolute values.
    AbsMax,
    /// Minimum of absolute values.
    AbsMin,
}

impl ReduceOp {
    pub fn result_dtype(self, input: DataType) -> DataType {
        match self {
            ReduceOp::Mean if !input.is_floating() => DataType::Float32,
            ReduceOp::Sum | ReduceOp::Prod if input.is_boolean() => DataType::Int64,
            _ => input,
        }
    }
}

/// Index-producing reductions. Results are `int64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgReduceOp {
    ArgMax,
    ArgMin,
}

/// Kernel dispatcher for one storage family.
///
/// Every method is an associated function over `Self::Storage`; backends
/// carry no per-instance state. Binary kernels broadcast their operands and
/// produce `a.dtype().promote(b.dtype())`; in-place kernels keep the
/// receiver's shape and type and fail when either would have to change.
pub trait Backend: Sized + Debug + Clone + 'static {
    type Storage: Clone + Debug + Display + 'static;

    // --- Factory Methods ---

    /// Creates new storage filled with `value`.
    fn full(shape: &[usize], value: f64, dtype: DataType, device: Device) -> Result<Self::Storage, Error>;
    /// Creates new storage filled with zeros.
    fn zeros(shape: &[usize], dtype: DataType, device: Device) -> Result<Self::Storage, Error> {
        Self::full(shape, 0.0, dtype, device)
    }
    /// Creates new storage filled with ones.
    fn ones(shape: &[usize], dtype: DataType, device: Device) -> Result<Self::Storage, Error> {
        Self::full(shape, 1.0, dtype, device)
    }
    /// Creates new storage from row-major host values.
    fn from_vec(data: Vec<f64>, shape: &[usize], dtype: DataType, device: Device) -> Result<Self::Storage, Error>;
    /// Samples U(low, high).
    fn random_uniform(
        shape: &[usize],
        low: f64,
        high: f64,
        dtype: DataType,
        device: Device,
    ) -> Result<Self::Storage, Error>;
    /// Samples N(mean, std_dev^2).
    fn random_normal(
        shape: &[usize],
        mean: f64,
        std_dev: f64,
        dtype: DataType,
        device: Device,
    ) -> Result<Self::Storage, Error>;

    // --- Metadata ---

    fn shape(storage: &Self::Storage) -> &[usize];
    fn size(storage: &Self::Storage) -> usize {
        Self::shape(storage).iter().product()
    }
    fn dtype(storage: &Self::Storage) -> DataType;
    fn device(storage: &Self::Storage) -> Device;
    fn format(storage: &Self::Storage) -> SparseFormat;
    /// Bytes held by the buffer, including sparse index bookkeeping.
    fn byte_len(storage: &Self::Storage) -> usize;

    // --- Host transfer ---

    /// Row-major element values (densified for sparse storage).
    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f64>, Error>;
    /// Overwrites every element from host values; the length must match.
    fn update_from_host(storage: &mut Self::Storage, data: &[f64]) -> Result<(), Error>;
    /// Copies `src` into `dst`, casting to `dst`'s type. Shapes must match.
    fn assign(dst: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error>;

    // --- Conversions ---

    fn cast(storage: &Self::Storage, dtype: DataType) -> Result<Self::Storage, Error>;
    fn to_device(storage: &Self::Storage, device: Device) -> Result<Self::Storage, Error>;
    /// Rebinds the storage to `device` without copying.
    fn set_device(storage: &mut Self::Storage, device: Device) -> Result<(), Error>;
    fn to_format(storage: &Self::Storage, format: SparseFormat) -> Result<Self::Storage, Error>;
    fn nonzero(storage: &Self::Storage) -> Result<usize, Error>;

    // --- Element-wise ---

    fn binary(op: BinaryOp, a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn binary_inplace(op: BinaryOp, a: &mut Self::Storage, b: &Self::Storage) -> Result<(), Error>;
    /// `a op scalar`, keeping `a`'s type.
    fn binary_scalar(op: BinaryOp, a: &Self::Storage, scalar: f64) -> Result<Self::Storage, Error>;
    fn binary_scalar_inplace(op: BinaryOp, a: &mut Self::Storage, scalar: f64) -> Result<(), Error>;
    fn compare(op: CompareOp, a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;
    fn compare_scalar(op: CompareOp, a: &Self::Storage, scalar: f64) -> Result<Self::Storage, Error>;
    fn unary(op: UnaryOp, a: &Self::Storage) -> Result<Self::Storage, Error>;
    fn unary_inplace(op: UnaryOp, a: &mut Self::Storage) -> Result<(), Error>;
    /// Applies `f` to every element, producing `dtype`.
    fn map(a: &Self::Storage, f: &dyn Fn(f64) -> f64, dtype: DataType) -> Result<Self::Storage, Error>;

    // --- Reductions ---

    /// Reduces over normalized `axes`; an empty list is a no-op copy.
    fn reduce(op: ReduceOp, a: &Self::Storage, axes: &[usize], keep_dims: bool) -> Result<Self::Storage, Error>;
    /// With `axis == None` the result indexes the flattened array.
    fn arg_reduce(
        op: ArgReduceOp,
        a: &Self::Storage,
        axis: Option<usize>,
        keep_dims: bool,
    ) -> Result<Self::Storage, Error>;
    /// With `axis == None` the result is the flattened cumulative sum.
    fn cumsum(a: &Self::Storage, axis: Option<usize>) -> Result<Self::Storage, Error>;
    fn sort(a: &Self::Storage, axis: usize, ascending: bool) -> Result<Self::Storage, Error>;
    fn argsort(a: &Self::Storage, axis: usize, ascending: bool) -> Result<Self::Storage, Error>;
    /// `q` in `[0, 100]`, linear interpolation between closest ranks.
    fn percentile(a: &Self::Storage, q: f64, axes: &[usize]) -> Result<Self::Storage, Error>;
    fn softmax(a: &Self::Storage, axes: &[usize], temperature: f64) -> Result<Self::Storage, Error>;

    // --- Linear algebra ---

    fn matmul(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error>;

    // --- Structural ---

    fn reshape(a: &Self::Storage, shape: &[usize]) -> Result<Self::Storage, Error>;
    fn transpose(a: &Self::Storage, perm: &[usize]) -> Result<Self::Storage, Error>;
    fn broadcast_to(a: &Self::Storage, shape: &[usize]) -> Result<Self::Storage, Error>;
    fn concat(inputs: &[&Self::Storage], axis: usize) -> Result<Self::Storage, Error>;
    /// Elements `start..end` along `axis`.
    fn slice_axis(a: &Self::Storage, axis: usize, start: usize, end: usize) -> Result<Self::Storage, Error>;
    /// Picks `indices` along `axis`, in order, repeats allowed.
    fn select(a: &Self::Storage, axis: usize, indices: &[usize]) -> Result<Self::Storage, Error>;
    /// Reads the elements at row-major `offsets` into a new array of `shape`.
    fn gather(a: &Self::Storage, offsets: &[usize], shape: &[usize]) -> Result<Self::Storage, Error>;
    /// Writes `values` (already shaped like the selection) at `offsets`.
    fn scatter(a: &mut Self::Storage, offsets: &[usize], values: &Self::Storage) -> Result<(), Error>;

    // --- Encoding ---

    /// Backend-defined blob holding the full reconstructable state.
    fn encode(storage: &Self::Storage) -> Result<Vec<u8>, Error>;
    fn decode(bytes: &[u8]) -> Result<Self::Storage, Error>;
}
