use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape error: {0}")]
    ShapeError(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Incompatible shapes for operation {op}: {shape_a:?} and {shape_b:?}")]
    IncompatibleShapes {
        op: String,
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Axis {axis} is out of range for an array of rank {rank}")]
    AxisOutOfRange { axis: isize, rank: usize },

    #[error("Index out of bounds: index {index}, size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("Cannot parse index expression {input:?}: {reason}")]
    IndexParse { input: String, reason: String },

    #[error("Invalid conversion: {0}")]
    InvalidConversion(String),

    #[error("Array {0} was already closed")]
    DoubleClose(usize),

    #[error("Array {0} was used after it was closed")]
    UseAfterClose(usize),

    #[error("Resource scope is already closed")]
    ScopeClosed,

    #[error("Array {0} does not have a gradient attached")]
    NoGradient(usize),

    #[error("Gradient check failed at index {at_index}: max relative error {max_rel_error:.3e} (absolute {max_abs_error:.3e})")]
    GradientCheckError {
        analytical: Vec<f64>,
        numerical: Vec<f64>,
        max_rel_error: f64,
        max_abs_error: f64,
        at_index: usize,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Operation cannot be performed on empty tensor")]
    EmptyTensor,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Error during tensor initialization")]
    InitializationError,

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),

    #[error("Operation not yet implemented: {0}")]
    Unimplemented(String),
}

/// Coarse classification of [`Error`] values.
///
/// Every contract violation maps to exactly one kind, so callers can react
/// to a class of failure without matching individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Broadcast incompatibility, reshape size mismatch, in-place shape change,
    /// concat/stack axis mismatch.
    ShapeMismatch,
    /// Selection or axis that does not resolve against the array.
    InvalidIndex,
    /// Unsupported data-type, layout or dimensionality conversion.
    InvalidConversion,
    /// Double close, use after close, attaching to a closed scope.
    LifetimeViolation,
    /// Gradient requested where none is attached.
    Autograd,
    /// Anything else the operation surface rejects.
    InvalidOperation,
    Io,
    Serialization,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ShapeError(_) | Error::ShapeMismatch { .. } | Error::IncompatibleShapes { .. } => {
                ErrorKind::ShapeMismatch
            }
            Error::InvalidIndex(_)
            | Error::AxisOutOfRange { .. }
            | Error::IndexOutOfBounds { .. }
            | Error::IndexParse { .. } => ErrorKind::InvalidIndex,
            Error::InvalidConversion(_) => ErrorKind::InvalidConversion,
            Error::DoubleClose(_) | Error::UseAfterClose(_) | Error::ScopeClosed => {
                ErrorKind::LifetimeViolation
            }
            Error::NoGradient(_) | Error::GradientCheckError { .. } => ErrorKind::Autograd,
            Error::IoError(_) => ErrorKind::Io,
            Error::SerializationError(_) | Error::DeserializationError(_) => {
                ErrorKind::Serialization
            }
            Error::EmptyTensor | Error::InvalidOperation(_) | Error::Unimplemented(_) => {
                ErrorKind::InvalidOperation
            }
            Error::InitializationError | Error::InternalLogicError(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand used by the operation surface when two shapes cannot be combined.
    pub(crate) fn incompatible(op: &str, a: &[usize], b: &[usize]) -> Self {
        Error::IncompatibleShapes {
            op: op.to_string(),
            shape_a: a.to_vec(),
            shape_b: b.to_vec(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
