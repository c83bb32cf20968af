//! Reductions, scans, sorting and the derived predicates.
//!
//! Axis lists accept negative values counted from the last axis; an empty
//! list reduces over every axis. With `keep_dims` the reduced axes stay in
//! the result at extent 1, otherwise they are removed.

use crate::backend::{ArgReduceOp, Backend, ReduceOp};
use crate::error::Error;
use crate::graph::{Op, OpType};
use crate::ops::{record, should_record};
use crate::tensor::Tensor;

impl<B: Backend> Tensor<B> {
    fn reduce_with(&self, op: ReduceOp, axes: &[isize], keep_dims: bool) -> Result<(Tensor<B>, Vec<usize>), Error> {
        let axes = self.shape().normalize_axes(axes)?;
        crate::debug_println!("reduce {:?} over {:?} of {}", op, axes, self.shape());
        let output_data = B::reduce(op, &*self.data()?, &axes, keep_dims)?;
        Ok((self.derive(output_data), axes))
    }

    /// Reduces every axis to a single host value.
    fn reduce_all(&self, op: ReduceOp) -> Result<f64, Error> {
        let all: Vec<usize> = (0..self.rank()).collect();
        let reduced = B::reduce(op, &*self.data()?, &all, false)?;
        first_value::<B>(&reduced)
    }

    /// Sum over `axes`.
    ///
    /// # Example
    /// ```rust
    /// use rust_ndarray_lib::CpuTensor;
    ///
    /// let a = CpuTensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// assert_eq!(a.sum(&[0], false).unwrap().to_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
    /// assert_eq!(a.sum(&[0], true).unwrap().shape().dims(), &[1, 3]);
    /// ```
    pub fn sum(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor<B>, Error> {
        let (output, axes) = self.reduce_with(ReduceOp::Sum, axes, keep_dims)?;
        record(&output, OpType::Sum { axes, keep_dims }, &[self]);
        Ok(output)
    }

    /// Arithmetic mean over `axes`; integer inputs produce `float32`.
    pub fn mean(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor<B>, Error> {
        let (output, axes) = self.reduce_with(ReduceOp::Mean, axes, keep_dims)?;
        record(&output, OpType::Mean { axes, keep_dims }, &[self]);
        Ok(output)
    }

    pub fn prod(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor<B>, Error> {
        Ok(self.reduce_with(ReduceOp::Prod, axes, keep_dims)?.0)
    }

    pub fn max(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor<B>, Error> {
        Ok(self.reduce_with(ReduceOp::Max, axes, keep_dims)?.0)
    }

    pub fn min(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor<B>, Error> {
        Ok(self.reduce_with(ReduceOp::Min, axes, keep_dims)?.0)
    }

    /// Maximum absolute value over `axes`.
    pub fn amax(&self, axes: &[isize]) -> Result<Tensor<B>, Error> {
        Ok(self.reduce_with(ReduceOp::AbsMax, axes, false)?.0)
    }

    /// Minimum absolute value over `axes`.
    pub fn amin(&self, axes: &[isize]) -> Result<Tensor<B>, Error> {
        Ok(self.reduce_with(ReduceOp::AbsMin, axes, false)?.0)
    }

    pub fn sum_all(&self) -> Result<f64, Error> {
        self.reduce_all(ReduceOp::Sum)
    }

    pub fn prod_all(&self) -> Result<f64, Error> {
        self.reduce_all(ReduceOp::Prod)
    }

    pub fn mean_all(&self) -> Result<f64, Error> {
        self.reduce_all(ReduceOp::Mean)
    }

    /// # Errors
    /// [`Error::EmptyTensor`] on an array without elements.
    pub fn max_all(&self) -> Result<f64, Error> {
        self.reduce_all(ReduceOp::Max)
    }

    /// # Errors
    /// [`Error::EmptyTensor`] on an array without elements.
    pub fn min_all(&self) -> Result<f64, Error> {
        self.reduce_all(ReduceOp::Min)
    }

    /// Flattened index of the largest element, as a rank-0 `int64` array.
    pub fn argmax(&self) -> Result<Tensor<B>, Error> {
        let output_data = B::arg_reduce(ArgReduceOp::ArgMax, &*self.data()?, None, false)?;
        Ok(self.derive(output_data))
    }

    pub fn argmin(&self) -> Result<Tensor<B>, Error> {
        let output_data = B::arg_reduce(ArgReduceOp::ArgMin, &*self.data()?, None, false)?;
        Ok(self.derive(output_data))
    }

    /// Index of the largest element along `axis`.
    pub fn argmax_axis(&self, axis: isize, keep_dims: bool) -> Result<Tensor<B>, Error> {
        let axis = self.shape().normalize_axis(axis)?;
        let output_data = B::arg_reduce(ArgReduceOp::ArgMax, &*self.data()?, Some(axis), keep_dims)?;
        Ok(self.derive(output_data))
    }

    pub fn argmin_axis(&self, axis: isize, keep_dims: bool) -> Result<Tensor<B>, Error> {
        let axis = self.shape().normalize_axis(axis)?;
        let output_data = B::arg_reduce(ArgReduceOp::ArgMin, &*self.data()?, Some(axis), keep_dims)?;
        Ok(self.derive(output_data))
    }

    /// Cumulative sum along `axis`; `None` scans the flattened array.
    pub fn cumsum(&self, axis: Option<isize>) -> Result<Tensor<B>, Error> {
        let axis = axis.map(|a| self.shape().normalize_axis(a)).transpose()?;
        let output_data = B::cumsum(&*self.data()?, axis)?;
        Ok(self.derive(output_data))
    }

    /// In-place cumulative sum along `axis`.
    ///
    /// # Errors
    /// [`Error::InvalidConversion`] when the running sum needs a wider type
    /// than the receiver's (integer arrays narrower than `int64`).
    pub fn cumsumi(&self, axis: isize) -> Result<Tensor<B>, Error> {
        self.check_mutable("cumsum")?;
        let axis = self.shape().normalize_axis(axis)?;
        let scanned = B::cumsum(&*self.data()?, Some(axis))?;
        if B::dtype(&scanned) != self.dtype() {
            return Err(Error::InvalidConversion(format!(
                "in-place cumsum would change {} to {}",
                self.dtype(),
                B::dtype(&scanned)
            )));
        }
        B::assign(&mut *self.data_mut()?, &scanned)?;
        Ok(self.clone())
    }

    /// The `q`-th percentile over `axes`, `q` in `[0, 100]`.
    pub fn percentile(&self, q: f64, axes: &[isize]) -> Result<Tensor<B>, Error> {
        let axes = self.shape().normalize_axes(axes)?;
        let output_data = B::percentile(&*self.data()?, q, &axes)?;
        Ok(self.derive(output_data))
    }

    pub fn percentile_all(&self, q: f64) -> Result<f64, Error> {
        let all: Vec<usize> = (0..self.rank()).collect();
        let reduced = B::percentile(&*self.data()?, q, &all)?;
        first_value::<B>(&reduced)
    }

    pub fn median(&self, axes: &[isize]) -> Result<Tensor<B>, Error> {
        self.percentile(50.0, axes)
    }

    pub fn median_all(&self) -> Result<f64, Error> {
        self.percentile_all(50.0)
    }

    /// `exp(x / t)` normalized over `axes`, stabilised by subtracting the maximum.
    pub fn softmax(&self, axes: &[isize], temperature: f64) -> Result<Tensor<B>, Error> {
        let axes = self.shape().normalize_axes(axes)?;
        let output_data = B::softmax(&*self.data()?, &axes, temperature)?;
        let output = self.derive(output_data.clone());
        if should_record(&[self]) {
            let mut op = Op::recorded(OpType::Softmax { axes, temperature }, vec![self.clone()]);
            op.cached_output = Some(output_data);
            output.set_op(op);
        }
        Ok(output)
    }

    pub fn sort(&self, axis: isize, ascending: bool) -> Result<Tensor<B>, Error> {
        let axis = self.shape().normalize_axis(axis)?;
        let output_data = B::sort(&*self.data()?, axis, ascending)?;
        Ok(self.derive(output_data))
    }

    /// Every element in order, as a 1-D array.
    pub fn sort_all(&self, ascending: bool) -> Result<Tensor<B>, Error> {
        let flat = B::reshape(&*self.data()?, &[self.size()])?;
        let output_data = B::sort(&flat, 0, ascending)?;
        Ok(self.derive(output_data))
    }

    /// Positions that would sort the array along `axis`, as `int64`.
    pub fn argsort(&self, axis: isize, ascending: bool) -> Result<Tensor<B>, Error> {
        let axis = self.shape().normalize_axis(axis)?;
        let output_data = B::argsort(&*self.data()?, axis, ascending)?;
        Ok(self.derive(output_data))
    }

    /// True when every element is non-zero. Vacuously true when empty.
    pub fn all(&self) -> Result<bool, Error> {
        Ok(self.nonzero()? == self.size())
    }

    pub fn any(&self) -> Result<bool, Error> {
        Ok(self.nonzero()? > 0)
    }

    pub fn none(&self) -> Result<bool, Error> {
        Ok(self.nonzero()? == 0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

fn first_value<B: Backend>(storage: &B::Storage) -> Result<f64, Error> {
    B::copy_to_host(storage)?
        .first()
        .copied()
        .ok_or(Error::EmptyTensor)
}
