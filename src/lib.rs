//! An n-dimensional array library with explicit lifetimes and autograd hooks.
//!
//! This library provides:
//! - A broadcast-aware shape engine and a textual index expression language
//! - Copy-producing and in-place (`*i`) forms of every mutating operation
//! - Resource scopes that batch-release arrays, plus explicit `close`
//! - Gradient attachment and backward traversal over recorded operations
//! - Dense, CSR and row-sparse storage with conversions between them
//!
//! # Features
//! - `debug_logs` - Routes dispatch tracing through the `log` facade
//!
//! # Example
//! ```rust
//! use rust_ndarray_lib::{CpuTensor, DataType, ResourceScope};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scope = ResourceScope::new();
//!     let a = CpuTensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
//!     a.attach(&scope)?;
//!
//!     // Results inherit the scope of their receiver
//!     let summed = a.sum(&[0], false)?;
//!     assert_eq!(summed.to_vec::<f32>()?, vec![5.0, 7.0, 9.0]);
//!     assert_eq!(summed.dtype(), DataType::Float32);
//!
//!     scope.close();
//!     assert!(a.is_closed() && summed.is_closed());
//!     Ok(())
//! }
//! ```

// --- Central debug_println macro definition ---
/// Dispatch tracing. Forwards to `log::debug!` when `debug_logs` is enabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        $crate::__log::debug!(target: module_path!(), $($arg)*)
    };
}

/// Dispatch tracing (disabled version). Does nothing.
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

#[doc(hidden)]
pub use log as __log;

pub mod array;
pub mod autograd;
pub mod backend;
pub mod error;
pub mod graph;
pub mod index;
pub mod list;
pub mod ops;
pub mod scope;
pub mod shape;
pub mod tensor;
mod tensor_debug_impl;
pub mod types;

// Gradient checking helpers shared by the integration tests
pub mod test_utils;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance used by `eps` and the default `equals_with_eps`.
pub const DEFAULT_EPS: f64 = 1e-5;

/// Location tag of an array's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host memory
    #[default]
    Cpu,
    /// Accelerator with a device ordinal
    Gpu(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu()"),
            Device::Gpu(id) => write!(f, "gpu({})", id),
        }
    }
}

// Re-export the public types for easier use by consumers of the library
pub use array::Array;
pub use autograd::{BackwardOptions, GradReq};
pub use backend::cpu::CpuBackend;
pub use backend::Backend;
pub use backend::CpuTensor;
pub use error::{Error, ErrorKind};
pub use graph::{Op, OpType};
pub use index::NdIndex;
pub use list::TensorList;
pub use scope::ResourceScope;
pub use shape::Shape;
pub use tensor::Tensor;
pub use types::{DataType, Element, SparseFormat, MAX_EXACT_INT64};
