//! Selection by [`NdIndex`]: get, copy-on-write set, in-place set and masks.

use crate::backend::Backend;
use crate::error::Error;
use crate::graph::OpType;
use crate::index::{BooleanMask, NdIndex, ResolvedIndex};
use crate::ops::record;
use crate::tensor::Tensor;
use crate::types::{DataType, Element, SparseFormat};

impl<B: Backend> Tensor<B> {
    fn resolve(&self, index: &NdIndex) -> Result<ResolvedIndex, Error> {
        index.resolve(&self.shape())
    }

    /// `value` broadcast to the selection and cast to this array's type.
    fn selection_values(&self, resolved: &ResolvedIndex, value: &Tensor<B>) -> Result<B::Storage, Error> {
        let data = value.data()?;
        let dense = B::to_format(&data, SparseFormat::Dense)?;
        let stretched = B::broadcast_to(&dense, resolved.shape().dims())?;
        B::cast(&stretched, self.dtype())
    }

    /// The sub-array selected by `index`.
    ///
    /// Point-selected axes are removed, ranges resize their axis and masks
    /// collapse the axes they cover to the number of matches.
    pub fn get(&self, index: &NdIndex) -> Result<Tensor<B>, Error> {
        let resolved = self.resolve(index)?;
        crate::debug_println!("get {} from {} -> {}", index, self.shape(), resolved.shape());
        let offsets = resolved.offsets();
        let output_data = B::gather(&*self.data()?, &offsets, resolved.shape().dims())?;
        let output = self.derive(output_data);
        record(&output, OpType::Get { offsets }, &[self]);
        Ok(output)
    }

    /// Parses `expr` with [`NdIndex::parse`] and selects with it.
    pub fn get_expr(&self, expr: &str) -> Result<Tensor<B>, Error> {
        self.get(&NdIndex::parse(expr)?)
    }

    /// The single element at `coords` as a rank-0 array.
    ///
    /// # Errors
    /// [`Error::InvalidIndex`] unless `coords` address exactly one element.
    pub fn get_element(&self, coords: &[i64]) -> Result<Tensor<B>, Error> {
        let offset = self.resolve(&NdIndex::from_points(coords))?.single_offset()?;
        let output_data = B::gather(&*self.data()?, &[offset], &[])?;
        Ok(self.derive(output_data))
    }

    /// The single element at `coords`, converted to `T`.
    pub fn get_value<T: Element>(&self, coords: &[i64]) -> Result<T, Error> {
        let offset = self.resolve(&NdIndex::from_points(coords))?.single_offset()?;
        let value = B::gather(&*self.data()?, &[offset], &[])?;
        let host = B::copy_to_host(&value)?;
        host.first().map(|&v| T::from_f64(v)).ok_or(Error::EmptyTensor)
    }

    pub fn get_f64(&self, coords: &[i64]) -> Result<f64, Error> {
        self.get_value(coords)
    }

    pub fn get_f32(&self, coords: &[i64]) -> Result<f32, Error> {
        self.get_value(coords)
    }

    pub fn get_i64(&self, coords: &[i64]) -> Result<i64, Error> {
        self.get_value(coords)
    }

    pub fn get_i32(&self, coords: &[i64]) -> Result<i32, Error> {
        self.get_value(coords)
    }

    pub fn get_u8(&self, coords: &[i64]) -> Result<u8, Error> {
        self.get_value(coords)
    }

    pub fn get_bool(&self, coords: &[i64]) -> Result<bool, Error> {
        self.get_value(coords)
    }

    /// A copy of this array with the selection replaced by `value`.
    ///
    /// `value` is broadcast to the selection's shape. The result keeps this
    /// array's type and format.
    pub fn set(&self, index: &NdIndex, value: &Tensor<B>) -> Result<Tensor<B>, Error> {
        let resolved = self.resolve(index)?;
        let values = self.selection_values(&resolved, value)?;
        self.scattered_copy(&resolved, &values)
    }

    /// Writes `value` into the selection of this array.
    pub fn seti(&self, index: &NdIndex, value: &Tensor<B>) -> Result<Tensor<B>, Error> {
        self.check_mutable("set")?;
        let resolved = self.resolve(index)?;
        let values = self.selection_values(&resolved, value)?;
        B::scatter(&mut *self.data_mut()?, &resolved.offsets(), &values)?;
        Ok(self.clone())
    }

    pub fn set_scalar(&self, index: &NdIndex, value: f64) -> Result<Tensor<B>, Error> {
        let resolved = self.resolve(index)?;
        let values = B::full(resolved.shape().dims(), value, self.dtype(), self.device())?;
        self.scattered_copy(&resolved, &values)
    }

    pub fn set_scalari(&self, index: &NdIndex, value: f64) -> Result<Tensor<B>, Error> {
        self.check_mutable("set")?;
        let resolved = self.resolve(index)?;
        let values = B::full(resolved.shape().dims(), value, self.dtype(), self.device())?;
        B::scatter(&mut *self.data_mut()?, &resolved.offsets(), &values)?;
        Ok(self.clone())
    }

    /// A copy of this array with the one element `index` addresses set to `value`.
    ///
    /// # Errors
    /// [`Error::InvalidIndex`] unless `index` selects exactly one element.
    pub fn set_element(&self, index: &NdIndex, value: f64) -> Result<Tensor<B>, Error> {
        let offset = self.resolve(index)?.single_offset()?;
        let format = self.format();
        let mut data = B::to_format(&*self.data()?, SparseFormat::Dense)?;
        let values = B::full(&[], value, self.dtype(), self.device())?;
        B::scatter(&mut data, &[offset], &values)?;
        if format.is_sparse() {
            data = B::to_format(&data, format)?;
        }
        Ok(self.derive(data))
    }

    /// In-place form of [`Tensor::set_element`].
    pub fn set_elementi(&self, index: &NdIndex, value: f64) -> Result<Tensor<B>, Error> {
        self.check_mutable("set")?;
        let offset = self.resolve(index)?.single_offset()?;
        let values = B::full(&[], value, self.dtype(), self.device())?;
        B::scatter(&mut *self.data_mut()?, &[offset], &values)?;
        Ok(self.clone())
    }

    fn scattered_copy(&self, resolved: &ResolvedIndex, values: &B::Storage) -> Result<Tensor<B>, Error> {
        let format = self.format();
        let mut data = B::to_format(&*self.data()?, SparseFormat::Dense)?;
        B::scatter(&mut data, &resolved.offsets(), values)?;
        if format.is_sparse() {
            data = B::to_format(&data, format)?;
        }
        Ok(self.derive(data))
    }

    /// Boolean array of this shape, true at the positions `index` selects.
    pub fn create_mask(&self, index: &NdIndex) -> Result<Tensor<B>, Error> {
        let resolved = self.resolve(index)?;
        let shape = self.shape();
        let mut mask = B::zeros(shape.dims(), DataType::Boolean, self.device())?;
        let ones = B::ones(resolved.shape().dims(), DataType::Boolean, self.device())?;
        B::scatter(&mut mask, &resolved.offsets(), &ones)?;
        Ok(self.derive(mask))
    }

    /// Boolean array, true where `predicate` holds for the element.
    pub fn create_mask_with<F>(&self, predicate: F) -> Result<Tensor<B>, Error>
    where
        F: Fn(f64) -> bool,
    {
        let output_data = B::map(
            &*self.data()?,
            &|v: f64| if predicate(v) { 1.0 } else { 0.0 },
            DataType::Boolean,
        )?;
        Ok(self.derive(output_data))
    }

    /// This boolean array as a mask selector for [`NdIndex::mask`].
    ///
    /// # Errors
    /// [`Error::InvalidConversion`] unless the array is boolean.
    pub fn as_mask(&self) -> Result<BooleanMask, Error> {
        if self.dtype() != DataType::Boolean {
            return Err(Error::InvalidConversion(format!(
                "only boolean arrays can be used as masks, got {}",
                self.dtype()
            )));
        }
        BooleanMask::new(self.to_vec::<bool>()?, self.shape().dims())
    }
}
