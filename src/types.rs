//! Element data types and storage formats.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest `int64` magnitude stored exactly.
///
/// Elements live in `f64`, so any integer result beyond this bound would
/// already have been rounded and is rejected instead.
pub const MAX_EXACT_INT64: i64 = (1 << 53) - 1;

/// Element type of an array.
///
/// Variants are ordered along the promotion lattice used by binary operations:
/// `Boolean < Uint8 < Int32 < Int64 < Float32 < Float64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Uint8,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Width of one element in bytes.
    pub fn num_bytes(self) -> usize {
        match self {
            DataType::Boolean | DataType::Uint8 => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Uint8 | DataType::Int32 | DataType::Int64)
    }

    pub fn is_boolean(self) -> bool {
        self == DataType::Boolean
    }

    /// Result type of combining two element types.
    pub fn promote(self, other: DataType) -> DataType {
        self.max(other)
    }

    /// Maps a value into this type's domain.
    ///
    /// Integer types truncate toward zero and saturate at their bounds
    /// (NaN becomes 0); booleans become 0 or 1.
    pub fn cast_value(self, v: f64) -> f64 {
        match self {
            DataType::Float64 => v,
            DataType::Float32 => v as f32 as f64,
            DataType::Int64 => v as i64 as f64,
            DataType::Int32 => v as i32 as f64,
            DataType::Uint8 => v as u8 as f64,
            DataType::Boolean => {
                if v != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Rejects `v` when this type cannot hold it exactly.
    ///
    /// Only `int64` can fail: values past [`MAX_EXACT_INT64`] in magnitude
    /// are [`Error::InvalidConversion`].
    pub fn check_exact(self, v: f64) -> Result<(), Error> {
        if self == DataType::Int64 && self.cast_value(v).abs() > MAX_EXACT_INT64 as f64 {
            return Err(Error::InvalidConversion(format!(
                "{} is outside the exact int64 range of +/-{}",
                v, MAX_EXACT_INT64
            )));
        }
        Ok(())
    }

    /// Appends the little-endian encoding of `v` (already in this domain).
    pub(crate) fn write_le(self, v: f64, out: &mut Vec<u8>) {
        match self {
            DataType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
            DataType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            DataType::Int64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
            DataType::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            DataType::Uint8 => out.push(v as u8),
            DataType::Boolean => out.push(u8::from(v != 0.0)),
        }
    }

    /// Decodes a little-endian buffer holding `count` elements of this type.
    pub(crate) fn read_le(self, bytes: &[u8]) -> Result<Vec<f64>, Error> {
        let width = self.num_bytes();
        if bytes.len() % width != 0 {
            return Err(Error::DeserializationError(format!(
                "buffer of {} bytes is not a whole number of {} elements",
                bytes.len(),
                self
            )));
        }
        bytes
            .chunks_exact(width)
            .map(|c| match self {
                DataType::Float64 => Ok(f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])),
                DataType::Float32 => Ok(f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64),
                DataType::Int64 => {
                    let v = i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                    v.check_exact()
                        .map(|_| v as f64)
                        .map_err(|e| Error::DeserializationError(e.to_string()))
                }
                DataType::Int32 => Ok(i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64),
                DataType::Uint8 => Ok(c[0] as f64),
                DataType::Boolean => Ok(if c[0] != 0 { 1.0 } else { 0.0 }),
            })
            .collect()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "bool",
            DataType::Uint8 => "uint8",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// Storage encoding of an array's elements.
///
/// The format is fixed when an array is created; converting between formats
/// always yields a new array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SparseFormat {
    #[default]
    Dense,
    /// Compressed sparse rows, 2-D only.
    Csr,
    /// Only rows (slices along axis 0) holding a non-zero are stored.
    RowSparse,
}

impl SparseFormat {
    pub fn is_sparse(self) -> bool {
        self != SparseFormat::Dense
    }
}

impl fmt::Display for SparseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparseFormat::Dense => write!(f, "default"),
            SparseFormat::Csr => write!(f, "csr"),
            SparseFormat::RowSparse => write!(f, "row_sparse"),
        }
    }
}

/// Rust scalar types that can be stored in or read from an array.
pub trait Element: Copy + fmt::Debug + 'static {
    const DTYPE: DataType;

    fn to_f64(self) -> f64;

    /// Converts a value in the `DTYPE` domain back to `Self`.
    fn from_f64(v: f64) -> Self;

    /// Fails when `to_f64` would round this value.
    fn check_exact(self) -> Result<(), Error> {
        Ok(())
    }
}

macro_rules! numeric_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DataType = $dtype;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

numeric_element!(f32, DataType::Float32);
numeric_element!(f64, DataType::Float64);
numeric_element!(i32, DataType::Int32);
numeric_element!(u8, DataType::Uint8);

impl Element for i64 {
    const DTYPE: DataType = DataType::Int64;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as i64
    }

    fn check_exact(self) -> Result<(), Error> {
        if self.unsigned_abs() > MAX_EXACT_INT64.unsigned_abs() {
            return Err(Error::InvalidConversion(format!(
                "{} is outside the exact int64 range of +/-{}",
                self, MAX_EXACT_INT64
            )));
        }
        Ok(())
    }
}

impl Element for bool {
    const DTYPE: DataType = DataType::Boolean;

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_f64(v: f64) -> Self {
        v != 0.0
    }
}
