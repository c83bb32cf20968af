//! CPU backend implementation using `ndarray`.
//!
//! Devices are location tags on this backend: every buffer lives in host
//! memory and moving it to another device only changes the tag.

use crate::array::{Array, Layout};
use crate::backend::{ArgReduceOp, Backend, BinaryOp, CompareOp, ReduceOp, UnaryOp};
use crate::error::Error;
use crate::ops::cpu_ops;
use crate::types::{DataType, SparseFormat};
use crate::Device;
use rand::Rng;
use rand_distr::{Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Marker struct for the CPU backend.
/// Implements the `Backend` trait using `ndarray` operations via the `Array` wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuBackend;

const ENCODING_MAGIC: &str = "ndarray";
const ENCODING_VERSION: u32 = 1;

/// Wire form produced by [`CpuBackend::encode`].
///
/// `values` holds little-endian elements of `dtype`. Dense arrays leave
/// `indices` and `indptr` empty; CSR uses both, row-sparse only `indices`.
#[derive(Serialize, Deserialize)]
struct EncodedArray {
    magic: String,
    version: u32,
    dtype: DataType,
    device: Device,
    format: SparseFormat,
    shape: Vec<usize>,
    values: Vec<u8>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
}

fn le_bytes(dtype: DataType, values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * dtype.num_bytes());
    for &v in values {
        dtype.write_le(v, &mut out);
    }
    out
}

/// Runs an in-place kernel, staging `int64` receivers on a copy so a result
/// outside the exact range leaves `a` untouched.
fn write_exact(a: &mut Array, kernel: impl FnOnce(&mut Array) -> Result<(), Error>) -> Result<(), Error> {
    if a.dtype() != DataType::Int64 {
        return kernel(a);
    }
    let mut staged = a.clone();
    kernel(&mut staged)?;
    staged.check_exact()?;
    *a = staged;
    Ok(())
}

impl Backend for CpuBackend {
    type Storage = Array;

    // --- Factory Methods ---
    fn full(shape: &[usize], value: f64, dtype: DataType, device: Device) -> Result<Self::Storage, Error> {
        Array::full(shape, value, dtype).with_device(device).exact()
    }

    fn from_vec(data: Vec<f64>, shape: &[usize], dtype: DataType, device: Device) -> Result<Self::Storage, Error> {
        Array::from_vec(data, shape, dtype)?.with_device(device).exact()
    }

    fn random_uniform(
        shape: &[usize],
        low: f64,
        high: f64,
        dtype: DataType,
        device: Device,
    ) -> Result<Self::Storage, Error> {
        let size = shape.iter().product::<usize>();
        if size == 0 {
            return Self::zeros(shape, dtype, device);
        }
        let dist = Uniform::new(low, high).map_err(|_| Error::InitializationError)?;
        let mut rng = rand::rng();
        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            data.push(rng.sample(dist));
        }
        Self::from_vec(data, shape, dtype, device)
    }

    fn random_normal(
        shape: &[usize],
        mean: f64,
        std_dev: f64,
        dtype: DataType,
        device: Device,
    ) -> Result<Self::Storage, Error> {
        let size = shape.iter().product::<usize>();
        if size == 0 {
            return Self::zeros(shape, dtype, device);
        }
        let dist = Normal::new(mean, std_dev).map_err(|_| Error::InitializationError)?;
        let mut rng = rand::rng();
        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            data.push(rng.sample(dist));
        }
        Self::from_vec(data, shape, dtype, device)
    }

    // --- Metadata ---
    fn shape(storage: &Self::Storage) -> &[usize] {
        storage.shape()
    }

    fn dtype(storage: &Self::Storage) -> DataType {
        storage.dtype()
    }

    fn device(storage: &Self::Storage) -> Device {
        storage.device()
    }

    fn format(storage: &Self::Storage) -> SparseFormat {
        storage.format()
    }

    fn byte_len(storage: &Self::Storage) -> usize {
        storage.byte_len()
    }

    // --- Host transfer ---
    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f64>, Error> {
        Ok(storage.to_vec())
    }

    fn update_from_host(storage: &mut Self::Storage, data: &[f64]) -> Result<(), Error> {
        if storage.size() != data.len() {
            return Err(Error::ShapeMismatch {
                expected: storage.shape().to_vec(),
                actual: vec![data.len()],
            });
        }
        let dtype = storage.dtype();
        for &v in data {
            dtype.check_exact(v)?;
        }
        let dense = storage.dense_mut()?;
        let slice = dense
            .as_slice_mut()
            .ok_or_else(|| Error::InternalLogicError("dense buffer is not contiguous".to_string()))?;
        for (dst, &src) in slice.iter_mut().zip(data) {
            *dst = dtype.cast_value(src);
        }
        Ok(())
    }

    fn assign(dst: &mut Self::Storage, src: &Self::Storage) -> Result<(), Error> {
        if dst.shape() != src.shape() {
            return Err(Error::ShapeMismatch {
                expected: dst.shape().to_vec(),
                actual: src.shape().to_vec(),
            });
        }
        if dst.format().is_sparse() {
            let device = dst.device();
            let mut replacement = src.cast(dst.dtype()).exact()?.to_format(dst.format())?;
            replacement.set_device(device);
            *dst = replacement;
            return Ok(());
        }
        Self::update_from_host(dst, &src.to_vec())
    }

    // --- Conversions ---
    fn cast(storage: &Self::Storage, dtype: DataType) -> Result<Self::Storage, Error> {
        storage.cast(dtype).exact()
    }

    fn to_device(storage: &Self::Storage, device: Device) -> Result<Self::Storage, Error> {
        Ok(storage.clone().with_device(device))
    }

    fn set_device(storage: &mut Self::Storage, device: Device) -> Result<(), Error> {
        storage.set_device(device);
        Ok(())
    }

    fn to_format(storage: &Self::Storage, format: SparseFormat) -> Result<Self::Storage, Error> {
        storage.to_format(format)
    }

    fn nonzero(storage: &Self::Storage) -> Result<usize, Error> {
        Ok(storage.nonzero())
    }

    // --- Element-wise ---
    fn binary(op: BinaryOp, a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        cpu_ops::binary(op, a, b)?.exact()
    }

    fn binary_inplace(op: BinaryOp, a: &mut Self::Storage, b: &Self::Storage) -> Result<(), Error> {
        write_exact(a, |a| cpu_ops::binary_inplace(op, a, b))
    }

    fn binary_scalar(op: BinaryOp, a: &Self::Storage, scalar: f64) -> Result<Self::Storage, Error> {
        cpu_ops::binary_scalar(op, a, scalar)?.exact()
    }

    fn binary_scalar_inplace(op: BinaryOp, a: &mut Self::Storage, scalar: f64) -> Result<(), Error> {
        write_exact(a, |a| cpu_ops::binary_scalar_inplace(op, a, scalar))
    }

    fn compare(op: CompareOp, a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        cpu_ops::compare(op, a, b)
    }

    fn compare_scalar(op: CompareOp, a: &Self::Storage, scalar: f64) -> Result<Self::Storage, Error> {
        cpu_ops::compare_scalar(op, a, scalar)
    }

    fn unary(op: UnaryOp, a: &Self::Storage) -> Result<Self::Storage, Error> {
        cpu_ops::unary(op, a)?.exact()
    }

    fn unary_inplace(op: UnaryOp, a: &mut Self::Storage) -> Result<(), Error> {
        write_exact(a, |a| cpu_ops::unary_inplace(op, a))
    }

    fn map(a: &Self::Storage, f: &dyn Fn(f64) -> f64, dtype: DataType) -> Result<Self::Storage, Error> {
        cpu_ops::map(a, f, dtype)?.exact()
    }

    // --- Reductions ---
    fn reduce(op: ReduceOp, a: &Self::Storage, axes: &[usize], keep_dims: bool) -> Result<Self::Storage, Error> {
        cpu_ops::reduce(op, a, axes, keep_dims)?.exact()
    }

    fn arg_reduce(
        op: ArgReduceOp,
        a: &Self::Storage,
        axis: Option<usize>,
        keep_dims: bool,
    ) -> Result<Self::Storage, Error> {
        cpu_ops::arg_reduce(op, a, axis, keep_dims)
    }

    fn cumsum(a: &Self::Storage, axis: Option<usize>) -> Result<Self::Storage, Error> {
        cpu_ops::cumsum(a, axis)?.exact()
    }

    fn sort(a: &Self::Storage, axis: usize, ascending: bool) -> Result<Self::Storage, Error> {
        cpu_ops::sort(a, axis, ascending)
    }

    fn argsort(a: &Self::Storage, axis: usize, ascending: bool) -> Result<Self::Storage, Error> {
        cpu_ops::argsort(a, axis, ascending)
    }

    fn percentile(a: &Self::Storage, q: f64, axes: &[usize]) -> Result<Self::Storage, Error> {
        cpu_ops::percentile(a, q, axes)
    }

    fn softmax(a: &Self::Storage, axes: &[usize], temperature: f64) -> Result<Self::Storage, Error> {
        cpu_ops::softmax(a, axes, temperature)
    }

    // --- Linear algebra ---
    fn matmul(a: &Self::Storage, b: &Self::Storage) -> Result<Self::Storage, Error> {
        cpu_ops::matmul(a, b)?.exact()
    }

    // --- Structural ---
    fn reshape(a: &Self::Storage, shape: &[usize]) -> Result<Self::Storage, Error> {
        cpu_ops::reshape(a, shape)
    }

    fn transpose(a: &Self::Storage, perm: &[usize]) -> Result<Self::Storage, Error> {
        cpu_ops::transpose(a, perm)
    }

    fn broadcast_to(a: &Self::Storage, shape: &[usize]) -> Result<Self::Storage, Error> {
        cpu_ops::broadcast_to(a, shape)
    }

    fn concat(inputs: &[&Self::Storage], axis: usize) -> Result<Self::Storage, Error> {
        cpu_ops::concat(inputs, axis)
    }

    fn slice_axis(a: &Self::Storage, axis: usize, start: usize, end: usize) -> Result<Self::Storage, Error> {
        cpu_ops::slice_axis(a, axis, start, end)
    }

    fn select(a: &Self::Storage, axis: usize, indices: &[usize]) -> Result<Self::Storage, Error> {
        cpu_ops::select(a, axis, indices)
    }

    fn gather(a: &Self::Storage, offsets: &[usize], shape: &[usize]) -> Result<Self::Storage, Error> {
        cpu_ops::gather(a, offsets, shape)
    }

    fn scatter(a: &mut Self::Storage, offsets: &[usize], values: &Self::Storage) -> Result<(), Error> {
        write_exact(a, |a| cpu_ops::scatter(a, offsets, values))
    }

    // --- Encoding ---
    fn encode(storage: &Self::Storage) -> Result<Vec<u8>, Error> {
        let dtype = storage.dtype();
        let (values, indices, indptr) = match &storage.layout {
            Layout::Dense(data) => {
                let flat: Vec<f64> = data.iter().copied().collect();
                (le_bytes(dtype, &flat), Vec::new(), Vec::new())
            }
            Layout::Csr {
                values,
                col_indices,
                row_ptr,
                ..
            } => (le_bytes(dtype, values), col_indices.clone(), row_ptr.clone()),
            Layout::RowSparse {
                row_indices,
                values,
                ..
            } => (le_bytes(dtype, values), row_indices.clone(), Vec::new()),
        };
        let encoded = EncodedArray {
            magic: ENCODING_MAGIC.to_string(),
            version: ENCODING_VERSION,
            dtype,
            device: storage.device(),
            format: storage.format(),
            shape: storage.shape().to_vec(),
            values,
            indices,
            indptr,
        };
        serde_json::to_vec(&encoded)
            .map_err(|e| Error::SerializationError(format!("Failed to encode array: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<Self::Storage, Error> {
        let encoded: EncodedArray = serde_json::from_slice(bytes)
            .map_err(|e| Error::DeserializationError(format!("Failed to decode array: {}", e)))?;
        if encoded.magic != ENCODING_MAGIC || encoded.version != ENCODING_VERSION {
            return Err(Error::DeserializationError(format!(
                "unsupported encoding {:?} version {}",
                encoded.magic, encoded.version
            )));
        }
        let values = encoded.dtype.read_le(&encoded.values)?;
        let array = match encoded.format {
            SparseFormat::Dense => Array::from_vec(values, &encoded.shape, encoded.dtype)
                .map_err(|e| Error::DeserializationError(e.to_string()))?,
            SparseFormat::Csr => Array::from_csr_parts(
                encoded.shape,
                values,
                encoded.indices,
                encoded.indptr,
                encoded.dtype,
            )?,
            SparseFormat::RowSparse => {
                Array::from_row_sparse_parts(encoded.shape, encoded.indices, values, encoded.dtype)?
            }
        };
        Ok(array.with_device(encoded.device))
    }
}
