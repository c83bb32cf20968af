//! Host storage used by the CPU backend.
//!
//! Element values live in an `f64` compute domain and are normalized to the
//! array's [`DataType`] on every write, so an `int32` array only ever holds
//! integral values in the `i32` range.

use crate::error::Error;
use crate::types::{DataType, SparseFormat};
use crate::Device;
use ndarray::{ArrayD, IxDyn, ShapeError};
use std::borrow::Cow;
use std::fmt::{self, Debug, Display};

/// Physical encoding of an [`Array`]'s elements.
#[derive(Clone, PartialEq)]
pub enum Layout {
    Dense(ArrayD<f64>),
    /// Compressed sparse rows of a 2-D array.
    Csr {
        shape: Vec<usize>,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
    },
    /// Non-zero rows along axis 0, each stored densely and flattened.
    RowSparse {
        shape: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    },
}

#[derive(Clone)]
pub struct Array {
    pub(crate) layout: Layout,
    dtype: DataType,
    device: Device,
}

/// Product of `dims`, or `None` on overflow.
fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

fn standard(data: ArrayD<f64>) -> ArrayD<f64> {
    if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().into_owned()
    }
}

impl Array {
    /// Wraps a dense `ndarray`, casting its values into `dtype`.
    pub fn new(data: ArrayD<f64>, dtype: DataType) -> Self {
        let data = if dtype == DataType::Float64 {
            data
        } else {
            data.mapv(|v| dtype.cast_value(v))
        };
        Self {
            layout: Layout::Dense(standard(data)),
            dtype,
            device: Device::Cpu,
        }
    }

    pub fn from_vec(data: Vec<f64>, shape: &[usize], dtype: DataType) -> Result<Self, Error> {
        let actual_len = data.len();
        let map_err = |_e: ShapeError| Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![actual_len],
        };
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(map_err)?;
        Ok(Self::new(array, dtype))
    }

    pub fn zeros(shape: &[usize], dtype: DataType) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)), dtype)
    }

    pub fn full(shape: &[usize], value: f64, dtype: DataType) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), value), dtype)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn shape(&self) -> &[usize] {
        match &self.layout {
            Layout::Dense(data) => data.shape(),
            Layout::Csr { shape, .. } | Layout::RowSparse { shape, .. } => shape,
        }
    }

    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub(crate) fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn format(&self) -> SparseFormat {
        match self.layout {
            Layout::Dense(_) => SparseFormat::Dense,
            Layout::Csr { .. } => SparseFormat::Csr,
            Layout::RowSparse { .. } => SparseFormat::RowSparse,
        }
    }

    /// Bytes held by the buffer.
    ///
    /// Dense arrays hold `size * width`; sparse arrays hold their stored
    /// values plus 8 bytes per index entry.
    pub fn byte_len(&self) -> usize {
        let width = self.dtype.num_bytes();
        match &self.layout {
            Layout::Dense(data) => data.len() * width,
            Layout::Csr {
                values,
                col_indices,
                row_ptr,
                ..
            } => values.len() * width + (col_indices.len() + row_ptr.len()) * 8,
            Layout::RowSparse {
                row_indices,
                values,
                ..
            } => values.len() * width + row_indices.len() * 8,
        }
    }

    /// Dense view of the elements, materialized for sparse layouts.
    pub fn dense(&self) -> Cow<'_, ArrayD<f64>> {
        match &self.layout {
            Layout::Dense(data) => Cow::Borrowed(data),
            _ => Cow::Owned(self.densify()),
        }
    }

    /// The dense `ndarray`; fails for sparse layouts.
    pub fn get_data(&self) -> Result<&ArrayD<f64>, Error> {
        match &self.layout {
            Layout::Dense(data) => Ok(data),
            _ => Err(Error::InvalidConversion(format!(
                "{} array has no dense buffer",
                self.format()
            ))),
        }
    }

    /// Mutable dense buffer. In-place updates are only defined on dense arrays.
    pub(crate) fn dense_mut(&mut self) -> Result<&mut ArrayD<f64>, Error> {
        let format = self.format();
        match &mut self.layout {
            Layout::Dense(data) => {
                if !data.is_standard_layout() {
                    *data = data.as_standard_layout().into_owned();
                }
                Ok(data)
            }
            _ => Err(Error::InvalidOperation(format!(
                "in-place update of a {} array",
                format
            ))),
        }
    }

    /// Row-major element values.
    pub fn to_vec(&self) -> Vec<f64> {
        match &self.layout {
            Layout::Dense(data) => data.iter().copied().collect(),
            _ => self.densify().into_raw_vec_and_offset().0,
        }
    }

    fn densify(&self) -> ArrayD<f64> {
        match &self.layout {
            Layout::Dense(data) => data.clone(),
            Layout::Csr {
                shape,
                values,
                col_indices,
                row_ptr,
            } => {
                let mut out = ArrayD::zeros(IxDyn(shape));
                for row in 0..shape[0] {
                    for k in row_ptr[row]..row_ptr[row + 1] {
                        out[[row, col_indices[k]].as_slice()] = values[k];
                    }
                }
                out
            }
            Layout::RowSparse {
                shape,
                row_indices,
                values,
            } => {
                let row_len: usize = shape[1..].iter().product();
                let mut flat = vec![0.0; shape.iter().product()];
                for (i, &row) in row_indices.iter().enumerate() {
                    flat[row * row_len..(row + 1) * row_len]
                        .copy_from_slice(&values[i * row_len..(i + 1) * row_len]);
                }
                // The flat buffer always matches `shape`.
                ArrayD::from_shape_vec(IxDyn(shape), flat).unwrap_or_else(|_| ArrayD::zeros(IxDyn(shape)))
            }
        }
    }

    /// A dense copy with the same shape, type and device.
    pub fn to_dense(&self) -> Array {
        Array {
            layout: Layout::Dense(self.densify()),
            dtype: self.dtype,
            device: self.device,
        }
    }

    /// Converts to `format`, always producing a new array.
    pub fn to_format(&self, format: SparseFormat) -> Result<Array, Error> {
        match format {
            SparseFormat::Dense => Ok(self.to_dense()),
            SparseFormat::Csr => self.to_csr(),
            SparseFormat::RowSparse => self.to_row_sparse(),
        }
    }

    pub fn to_csr(&self) -> Result<Array, Error> {
        let dense = self.dense();
        if dense.ndim() != 2 {
            return Err(Error::InvalidConversion(format!(
                "csr storage requires a 2-D array, got shape {:?}",
                dense.shape()
            )));
        }
        let (rows, cols) = (dense.shape()[0], dense.shape()[1]);
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptr = Vec::with_capacity(rows + 1);
        row_ptr.push(0);
        for r in 0..rows {
            for c in 0..cols {
                let v = dense[[r, c].as_slice()];
                if v != 0.0 {
                    values.push(v);
                    col_indices.push(c);
                }
            }
            row_ptr.push(values.len());
        }
        Ok(Array {
            layout: Layout::Csr {
                shape: dense.shape().to_vec(),
                values,
                col_indices,
                row_ptr,
            },
            dtype: self.dtype,
            device: self.device,
        })
    }

    pub fn to_row_sparse(&self) -> Result<Array, Error> {
        let dense = self.dense();
        if dense.ndim() == 0 {
            return Err(Error::InvalidConversion(
                "row_sparse storage requires at least one axis".to_string(),
            ));
        }
        let shape = dense.shape().to_vec();
        let row_len: usize = shape[1..].iter().product();
        let flat: Vec<f64> = dense.iter().copied().collect();
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        for row in 0..shape[0] {
            let chunk = &flat[row * row_len..(row + 1) * row_len];
            if chunk.iter().any(|&v| v != 0.0) {
                row_indices.push(row);
                values.extend_from_slice(chunk);
            }
        }
        Ok(Array {
            layout: Layout::RowSparse {
                shape,
                row_indices,
                values,
            },
            dtype: self.dtype,
            device: self.device,
        })
    }

    /// Rebuilds a CSR array from its parts, validating the bookkeeping.
    pub(crate) fn from_csr_parts(
        shape: Vec<usize>,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
        dtype: DataType,
    ) -> Result<Array, Error> {
        let invalid = |reason: &str| Error::DeserializationError(format!("csr buffer: {}", reason));
        if shape.len() != 2 {
            return Err(invalid("shape is not 2-D"));
        }
        if element_count(&shape).is_none() {
            return Err(invalid("shape is too large"));
        }
        let rows = shape[0].checked_add(1).ok_or_else(|| invalid("shape is too large"))?;
        if row_ptr.len() != rows || row_ptr.first() != Some(&0) {
            return Err(invalid("row pointer length does not match rows"));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) || row_ptr.last() != Some(&values.len()) {
            return Err(invalid("row pointers are not monotonic"));
        }
        if col_indices.len() != values.len() || col_indices.iter().any(|&c| c >= shape[1]) {
            return Err(invalid("column indices out of range"));
        }
        Ok(Array {
            layout: Layout::Csr {
                shape,
                values: values.into_iter().map(|v| dtype.cast_value(v)).collect(),
                col_indices,
                row_ptr,
            },
            dtype,
            device: Device::Cpu,
        })
    }

    pub(crate) fn from_row_sparse_parts(
        shape: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
        dtype: DataType,
    ) -> Result<Array, Error> {
        let invalid =
            |reason: &str| Error::DeserializationError(format!("row_sparse buffer: {}", reason));
        if shape.is_empty() {
            return Err(invalid("shape has no axes"));
        }
        if element_count(&shape).is_none() {
            return Err(invalid("shape is too large"));
        }
        let row_len = element_count(&shape[1..]).ok_or_else(|| invalid("shape is too large"))?;
        let stored = row_indices.len().checked_mul(row_len);
        if stored != Some(values.len()) {
            return Err(invalid("value count does not match stored rows"));
        }
        if row_indices.iter().any(|&r| r >= shape[0]) {
            return Err(invalid("row index out of range"));
        }
        Ok(Array {
            layout: Layout::RowSparse {
                shape,
                row_indices,
                values: values.into_iter().map(|v| dtype.cast_value(v)).collect(),
            },
            dtype,
            device: Device::Cpu,
        })
    }

    /// Fails if an element is outside the range its type stores exactly.
    pub fn check_exact(&self) -> Result<(), Error> {
        if self.dtype != DataType::Int64 {
            return Ok(());
        }
        let values: Box<dyn Iterator<Item = &f64>> = match &self.layout {
            Layout::Dense(data) => Box::new(data.iter()),
            Layout::Csr { values, .. } | Layout::RowSparse { values, .. } => Box::new(values.iter()),
        };
        for &v in values {
            self.dtype.check_exact(v)?;
        }
        Ok(())
    }

    /// `self`, once [`Array::check_exact`] passes.
    pub fn exact(self) -> Result<Self, Error> {
        self.check_exact()?;
        Ok(self)
    }

    /// Count of non-zero elements.
    pub fn nonzero(&self) -> usize {
        match &self.layout {
            Layout::Dense(data) => data.iter().filter(|&&v| v != 0.0).count(),
            Layout::Csr { values, .. } | Layout::RowSparse { values, .. } => {
                values.iter().filter(|&&v| v != 0.0).count()
            }
        }
    }

    /// Converts element values to `dtype`, keeping the layout.
    pub fn cast(&self, dtype: DataType) -> Array {
        let layout = match &self.layout {
            Layout::Dense(data) => Layout::Dense(data.mapv(|v| dtype.cast_value(v))),
            Layout::Csr {
                shape,
                values,
                col_indices,
                row_ptr,
            } => Layout::Csr {
                shape: shape.clone(),
                values: values.iter().map(|&v| dtype.cast_value(v)).collect(),
                col_indices: col_indices.clone(),
                row_ptr: row_ptr.clone(),
            },
            Layout::RowSparse {
                shape,
                row_indices,
                values,
            } => Layout::RowSparse {
                shape: shape.clone(),
                row_indices: row_indices.clone(),
                values: values.iter().map(|&v| dtype.cast_value(v)).collect(),
            },
        };
        Array {
            layout,
            dtype,
            device: self.device,
        }
    }
}

impl Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layout {
            Layout::Dense(data) => write!(f, "{}", data),
            _ => write!(f, "{} {}", self.format(), self.dense()),
        }
    }
}

impl Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Array(shape={:?}, dtype={}, device={}, format={}, data={:?})",
            self.shape(),
            self.dtype,
            self.device,
            self.format(),
            self.to_vec()
        )
    }
}

impl PartialEq for Array {
    /// Same shape, type and element values, regardless of layout.
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.shape() == other.shape() && self.to_vec() == other.to_vec()
    }
}
