//! Shape-changing operations. All of them produce new arrays.

use crate::backend::Backend;
use crate::error::Error;
use crate::graph::{self, Op, OpType};
use crate::list::TensorList;
use crate::ops::{record, should_record};
use crate::shape::{normalize_axis, Shape};
use crate::tensor::Tensor;

fn check_same_rank(op: &str, shapes: &[Shape]) -> Result<(), Error> {
    let first = &shapes[0];
    for shape in &shapes[1..] {
        if shape.rank() != first.rank() {
            return Err(Error::incompatible(op, first.dims(), shape.dims()));
        }
    }
    Ok(())
}

/// Joins arrays along an existing axis.
///
/// Every input must match the first one on all axes except `axis`.
///
/// # Example
/// ```rust
/// use rust_ndarray_lib::{ops, CpuTensor};
///
/// let a = CpuTensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
/// let b = CpuTensor::from_vec(vec![5.0f32, 6.0], &[2, 1]).unwrap();
/// let c = ops::concat(&[&a, &b], -1).unwrap();
/// assert_eq!(c.shape().dims(), &[2, 3]);
/// assert_eq!(c.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
/// ```
pub fn concat<B: Backend>(tensors: &[&Tensor<B>], axis: isize) -> Result<Tensor<B>, Error> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::InvalidOperation("Cannot concat empty list of arrays".to_string()))?;
    let shapes: Vec<Shape> = tensors.iter().map(|t| t.shape()).collect();
    check_same_rank("concat", &shapes)?;
    let axis = shapes[0].normalize_axis(axis)?;
    for shape in &shapes[1..] {
        if shape.with_dim(axis, 0) != shapes[0].with_dim(axis, 0) {
            return Err(Error::incompatible("concat", shapes[0].dims(), shape.dims()));
        }
    }

    let data_refs = tensors.iter().map(|t| t.data()).collect::<Result<Vec<_>, _>>()?;
    let storages: Vec<&B::Storage> = data_refs.iter().map(|d| &**d).collect();
    let output_data = B::concat(&storages, axis)?;
    drop(data_refs);

    let output = first.derive(output_data);
    let sizes = shapes.iter().map(|s| s[axis]).collect();
    record(&output, OpType::Concat { axis, sizes }, tensors);
    Ok(output)
}

/// Joins identically shaped arrays along a new axis inserted at `axis`.
pub fn stack<B: Backend>(tensors: &[&Tensor<B>], axis: isize) -> Result<Tensor<B>, Error> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::InvalidOperation("Cannot stack empty list of arrays".to_string()))?;
    let shape = first.shape();
    for t in &tensors[1..] {
        let other = t.shape();
        if other != shape {
            return Err(Error::incompatible("stack", shape.dims(), other.dims()));
        }
    }
    let axis = normalize_axis(axis, shape.rank() + 1)?;
    let expanded_shape = shape.insert_axis(axis)?;

    let expanded = tensors
        .iter()
        .map(|t| B::reshape(&*t.data()?, expanded_shape.dims()))
        .collect::<Result<Vec<_>, _>>()?;
    let storages: Vec<&B::Storage> = expanded.iter().collect();
    let output_data = B::concat(&storages, axis)?;
    let output = first.derive(output_data);

    if should_record(tensors) {
        let inputs = tensors.iter().map(|&t| t.clone()).collect();
        let input_shape = shape.to_vec();
        let op = Op::new(
            OpType::Concat {
                axis,
                sizes: vec![1; tensors.len()],
            },
            inputs,
            move |op_ctx, grad_output| {
                graph::backward_rule(op_ctx, grad_output)?
                    .iter()
                    .map(|g| B::reshape(g, &input_shape))
                    .collect()
            },
        );
        output.set_op(op);
    }
    Ok(output)
}

/// Index lists that expand an axis of extent `n` by `reps`.
fn tile_indices(n: usize, reps: usize) -> Vec<usize> {
    (0..reps).flat_map(|_| 0..n).collect()
}

fn repeat_indices(n: usize, reps: usize) -> Vec<usize> {
    (0..n).flat_map(|i| std::iter::repeat(i).take(reps)).collect()
}

impl<B: Backend> Tensor<B> {
    /// Reinterprets the elements under a new shape of the same size.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the sizes differ.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor<B>, Error> {
        crate::debug_println!("reshape {} to {:?}", self.shape(), shape);
        let output_data = B::reshape(&*self.data()?, shape)?;
        let output = self.derive(output_data);
        record(&output, OpType::Reshape, &[self]);
        Ok(output)
    }

    pub fn flatten(&self) -> Result<Tensor<B>, Error> {
        self.reshape(&[self.size()])
    }

    /// Inserts an axis of extent 1; `axis` may be `-1` or `rank` to append.
    pub fn expand_dims(&self, axis: isize) -> Result<Tensor<B>, Error> {
        let shape = self.shape();
        let axis = normalize_axis(axis, shape.rank() + 1)?;
        self.reshape(shape.insert_axis(axis)?.dims())
    }

    /// Removes `axis`, which must have extent 1, or every extent-1 axis when `None`.
    pub fn squeeze(&self, axis: Option<isize>) -> Result<Tensor<B>, Error> {
        let shape = self.shape();
        let dims: Vec<usize> = match axis {
            Some(axis) => {
                let axis = shape.normalize_axis(axis)?;
                if shape[axis] != 1 {
                    return Err(Error::ShapeError(format!(
                        "cannot squeeze axis {} of extent {} in {}",
                        axis, shape[axis], shape
                    )));
                }
                shape.remove_axis(axis).to_vec()
            }
            None => shape.dims().iter().copied().filter(|&d| d != 1).collect(),
        };
        self.reshape(&dims)
    }

    /// Reverses the axis order.
    pub fn transpose(&self) -> Result<Tensor<B>, Error> {
        let perm: Vec<usize> = (0..self.rank()).rev().collect();
        self.transpose_axes(&perm)
    }

    /// Reorders axes so that output axis `i` is input axis `perm[i]`.
    pub fn transpose_axes(&self, perm: &[usize]) -> Result<Tensor<B>, Error> {
        let output_data = B::transpose(&*self.data()?, perm)?;
        let output = self.derive(output_data);
        record(&output, OpType::Transpose(perm.to_vec()), &[self]);
        Ok(output)
    }

    pub fn swap_axes(&self, a: isize, b: isize) -> Result<Tensor<B>, Error> {
        let shape = self.shape();
        let a = shape.normalize_axis(a)?;
        let b = shape.normalize_axis(b)?;
        let mut perm: Vec<usize> = (0..shape.rank()).collect();
        perm.swap(a, b);
        self.transpose_axes(&perm)
    }

    /// Stretches to `shape` under the broadcast rule.
    pub fn broadcast(&self, shape: &[usize]) -> Result<Tensor<B>, Error> {
        let target = Shape::from(shape);
        if !self.shape().broadcasts_to(&target) {
            return Err(Error::incompatible("broadcast", self.shape().dims(), shape));
        }
        let output_data = B::broadcast_to(&*self.data()?, shape)?;
        let output = self.derive(output_data);
        record(&output, OpType::Broadcast, &[self]);
        Ok(output)
    }

    /// Elements `start..end` along `axis`.
    pub fn slice_axis(&self, axis: isize, start: usize, end: usize) -> Result<Tensor<B>, Error> {
        let axis = self.shape().normalize_axis(axis)?;
        let output_data = B::slice_axis(&*self.data()?, axis, start, end)?;
        let output = self.derive(output_data);
        record(&output, OpType::SliceAxis { axis, start, end }, &[self]);
        Ok(output)
    }

    /// Splits `axis` into `sections` equal parts.
    ///
    /// # Errors
    /// A shape error unless the extent is divisible by `sections`.
    pub fn split_equal(&self, axis: isize, sections: usize) -> Result<TensorList<B>, Error> {
        let shape = self.shape();
        let axis = shape.normalize_axis(axis)?;
        let extent = shape[axis];
        if sections == 0 || extent % sections != 0 {
            return Err(Error::ShapeError(format!(
                "axis {} of extent {} cannot be split into {} equal parts",
                axis, extent, sections
            )));
        }
        let step = extent / sections;
        let boundaries: Vec<usize> = (1..sections).map(|i| i * step).collect();
        self.split_at(axis as isize, &boundaries)
    }

    /// Splits `axis` before each of the increasing `boundaries`.
    pub fn split_at(&self, axis: isize, boundaries: &[usize]) -> Result<TensorList<B>, Error> {
        let shape = self.shape();
        let axis = shape.normalize_axis(axis)?;
        let extent = shape[axis];
        let mut starts = vec![0];
        for &b in boundaries {
            let last = starts.last().copied().unwrap_or(0);
            if b < last || b > extent {
                return Err(Error::InvalidIndex(format!(
                    "split boundaries {:?} must increase within 0..={}",
                    boundaries, extent
                )));
            }
            starts.push(b);
        }
        let mut pieces = TensorList::new();
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(extent);
            pieces.push(self.slice_axis(axis as isize, start, end)?);
        }
        Ok(pieces)
    }

    /// One array per position along `axis`, with that axis removed.
    pub fn unstack(&self, axis: isize) -> Result<TensorList<B>, Error> {
        let shape = self.shape();
        let axis = shape.normalize_axis(axis)?;
        let piece_shape = shape.remove_axis(axis);
        let kept_shape = shape.with_dim(axis, 1);
        let mut pieces = TensorList::new();
        for i in 0..shape[axis] {
            let sliced = B::slice_axis(&*self.data()?, axis, i, i + 1)?;
            let output = self.derive(B::reshape(&sliced, piece_shape.dims())?);
            if should_record(&[self]) {
                let kept = kept_shape.to_vec();
                let op = Op::new(
                    OpType::SliceAxis { axis, start: i, end: i + 1 },
                    vec![self.clone()],
                    move |op_ctx, grad_output| {
                        let grad = B::reshape(grad_output, &kept)?;
                        graph::backward_rule(op_ctx, &grad)
                    },
                );
                output.set_op(op);
            }
            pieces.push(output);
        }
        Ok(pieces)
    }

    /// Per-axis multipliers that turn this shape into `target`, right-aligned.
    fn multiples_of(&self, target: &[usize]) -> Result<Vec<usize>, Error> {
        let shape = self.shape();
        let rank = shape.rank().max(target.len());
        let mut current = vec![1; rank - shape.rank()];
        current.extend_from_slice(shape.dims());
        let mut wanted = current[..rank - target.len()].to_vec();
        wanted.extend_from_slice(target);
        current
            .iter()
            .zip(&wanted)
            .map(|(&c, &w)| match (c, w) {
                (0, 0) => Ok(1),
                (c, w) if c > 0 && w % c == 0 => Ok(w / c),
                _ => Err(Error::ShapeMismatch {
                    expected: wanted.clone(),
                    actual: current.clone(),
                }),
            })
            .collect()
    }

    fn expand_with(&self, reps: &[usize], indices: fn(usize, usize) -> Vec<usize>) -> Result<Tensor<B>, Error> {
        let (dims, reps) = self.shape().align_repeats(reps);
        let mut data = B::reshape(&*self.data()?, &dims)?;
        for (axis, (&n, &r)) in dims.iter().zip(&reps).enumerate() {
            if r != 1 {
                data = B::select(&data, axis, &indices(n, r))?;
            }
        }
        Ok(self.derive(data))
    }

    fn single_axis_reps(&self, axis: isize, reps: usize) -> Result<Vec<usize>, Error> {
        let shape = self.shape();
        let axis = shape.normalize_axis(axis)?;
        let mut all = vec![1; shape.rank()];
        all[axis] = reps;
        Ok(all)
    }

    /// Repeats the whole array `reps` times along every axis.
    pub fn tile(&self, reps: usize) -> Result<Tensor<B>, Error> {
        self.tile_dims(&vec![reps; self.rank()])
    }

    pub fn tile_axis(&self, axis: isize, reps: usize) -> Result<Tensor<B>, Error> {
        let reps = self.single_axis_reps(axis, reps)?;
        self.tile_dims(&reps)
    }

    /// Tiles with per-axis counts. A shorter list applies to the trailing
    /// axes; a longer one prepends axes.
    ///
    /// # Example
    /// ```rust
    /// use rust_ndarray_lib::CpuTensor;
    ///
    /// let a = CpuTensor::from_vec(vec![1i32, 2], &[2]).unwrap();
    /// assert_eq!(a.tile_dims(&[2]).unwrap().to_vec::<i32>().unwrap(), vec![1, 2, 1, 2]);
    /// assert_eq!(a.repeat_dims(&[2]).unwrap().to_vec::<i32>().unwrap(), vec![1, 1, 2, 2]);
    /// ```
    pub fn tile_dims(&self, reps: &[usize]) -> Result<Tensor<B>, Error> {
        self.expand_with(reps, tile_indices)
    }

    /// Tiles until the shape equals `target`; each extent must be a multiple.
    pub fn tile_to(&self, target: &[usize]) -> Result<Tensor<B>, Error> {
        let reps = self.multiples_of(target)?;
        self.tile_dims(&reps)
    }

    /// Repeats every element `reps` times along every axis.
    pub fn repeat(&self, reps: usize) -> Result<Tensor<B>, Error> {
        self.repeat_dims(&vec![reps; self.rank()])
    }

    pub fn repeat_axis(&self, axis: isize, reps: usize) -> Result<Tensor<B>, Error> {
        let reps = self.single_axis_reps(axis, reps)?;
        self.repeat_dims(&reps)
    }

    pub fn repeat_dims(&self, reps: &[usize]) -> Result<Tensor<B>, Error> {
        self.expand_with(reps, repeat_indices)
    }

    pub fn repeat_to(&self, target: &[usize]) -> Result<Tensor<B>, Error> {
        let reps = self.multiples_of(target)?;
        self.repeat_dims(&reps)
    }

    /// Limits every element to `[min, max]`.
    pub fn clip(&self, min: f64, max: f64) -> Result<Tensor<B>, Error> {
        if !(min <= max) {
            return Err(Error::InvalidOperation(format!(
                "clip bounds are inverted: min {} > max {}",
                min, max
            )));
        }
        let output_data = {
            let data = self.data()?;
            B::map(&data, &|v: f64| v.clamp(min, max), B::dtype(&data))?
        };
        let output = self.derive(output_data);
        record(&output, OpType::Clip { min, max }, &[self]);
        Ok(output)
    }

    pub fn clipi(&self, min: f64, max: f64) -> Result<Tensor<B>, Error> {
        self.check_mutable("clip")?;
        if !(min <= max) {
            return Err(Error::InvalidOperation(format!(
                "clip bounds are inverted: min {} > max {}",
                min, max
            )));
        }
        let clipped = {
            let data = self.data()?;
            B::map(&data, &|v: f64| v.clamp(min, max), B::dtype(&data))?
        };
        B::assign(&mut *self.data_mut()?, &clipped)?;
        Ok(self.clone())
    }
}
