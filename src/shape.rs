//! Immutable array shapes and the broadcast engine.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Ordered per-axis extents of an array.
///
/// A shape never changes after construction; every "modifying" helper
/// returns a new `Shape`. Rank 0 describes a scalar whose size is 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. The empty product makes a scalar size 1.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Extent of `axis`; negative values count from the last axis.
    pub fn dim(&self, axis: isize) -> Result<usize, Error> {
        let axis = self.normalize_axis(axis)?;
        Ok(self.dims[axis])
    }

    /// Row-major (C order) strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Resolves a possibly negative axis against this rank.
    pub fn normalize_axis(&self, axis: isize) -> Result<usize, Error> {
        normalize_axis(axis, self.rank())
    }

    /// Resolves a list of axes; an empty list selects every axis.
    /// Repeated axes are rejected.
    pub fn normalize_axes(&self, axes: &[isize]) -> Result<Vec<usize>, Error> {
        if axes.is_empty() {
            return Ok((0..self.rank()).collect());
        }
        let mut resolved = Vec::with_capacity(axes.len());
        for &axis in axes {
            let a = self.normalize_axis(axis)?;
            if resolved.contains(&a) {
                return Err(Error::InvalidIndex(format!(
                    "axis {} appears more than once in {:?}",
                    axis, axes
                )));
            }
            resolved.push(a);
        }
        resolved.sort_unstable();
        Ok(resolved)
    }

    /// Computes the broadcast of two shapes.
    ///
    /// Shapes are aligned from the trailing axis. Each aligned pair must be
    /// equal or contain a 1; missing leading axes count as 1.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape, Error> {
        broadcast_shapes(&self.dims, &other.dims).map(Shape::new)
    }

    /// Whether `self` can be stretched to `target` without changing `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        match self.broadcast(target) {
            Ok(result) => &result == target,
            Err(_) => false,
        }
    }

    /// Shape after reducing `axes` (already normalized).
    pub fn reduce(&self, axes: &[usize], keep_dims: bool) -> Shape {
        let dims = self
            .dims
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| {
                if axes.contains(&i) {
                    if keep_dims {
                        Some(1)
                    } else {
                        None
                    }
                } else {
                    Some(d)
                }
            })
            .collect::<Vec<_>>();
        Shape::new(dims)
    }

    pub fn remove_axis(&self, axis: usize) -> Shape {
        let mut dims = self.dims.clone();
        if axis < dims.len() {
            dims.remove(axis);
        }
        Shape::new(dims)
    }

    /// Inserts a size-1 axis; `axis` may equal the rank to append.
    pub fn insert_axis(&self, axis: usize) -> Result<Shape, Error> {
        if axis > self.rank() {
            return Err(Error::AxisOutOfRange {
                axis: axis as isize,
                rank: self.rank() + 1,
            });
        }
        let mut dims = self.dims.clone();
        dims.insert(axis, 1);
        Ok(Shape::new(dims))
    }

    pub fn with_dim(&self, axis: usize, extent: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims[axis] = extent;
        Shape::new(dims)
    }

    /// Reorders axes by `perm`, which must be a permutation of `0..rank`.
    pub fn permute(&self, perm: &[usize]) -> Result<Shape, Error> {
        validate_permutation(perm, self.rank())?;
        Ok(Shape::new(perm.iter().map(|&p| self.dims[p]).collect::<Vec<_>>()))
    }

    /// Right-aligns `reps` against this shape, padding with 1 on either side.
    ///
    /// Returns `(padded_dims, padded_reps)` of equal length.
    pub fn align_repeats(&self, reps: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let rank = self.rank().max(reps.len());
        let mut dims = vec![1; rank - self.rank()];
        dims.extend_from_slice(&self.dims);
        let mut padded = vec![1; rank - reps.len()];
        padded.extend_from_slice(reps);
        (dims, padded)
    }

    /// Flat row-major offset of a multi-index.
    pub fn offset(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(self.strides())
            .map(|(&i, s)| i * s)
            .sum()
    }

    /// Multi-index of a flat row-major offset.
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut index = vec![0; self.rank()];
        for axis in (0..self.rank()).rev() {
            let d = self.dims[axis];
            if d > 0 {
                index[axis] = flat % d;
                flat /= d;
            }
        }
        index
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.dims[axis]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<&[usize; N]> for Shape {
    fn from(dims: &[usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}

/// Compute the broadcasted shape for two shapes, following numpy broadcasting rules.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>, Error> {
    let ndim = std::cmp::max(a.len(), b.len());
    let mut result = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let a_dim = if i >= ndim - a.len() {
            a[i - (ndim - a.len())]
        } else {
            1
        };
        let b_dim = if i >= ndim - b.len() {
            b[i - (ndim - b.len())]
        } else {
            1
        };
        if a_dim == b_dim || b_dim == 1 {
            result.push(a_dim);
        } else if a_dim == 1 {
            result.push(b_dim);
        } else {
            return Err(Error::incompatible("broadcast", a, b));
        }
    }
    Ok(result)
}

pub(crate) fn normalize_axis(axis: isize, rank: usize) -> Result<usize, Error> {
    let resolved = if axis < 0 { axis + rank as isize } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(Error::AxisOutOfRange { axis, rank });
    }
    Ok(resolved as usize)
}

pub(crate) fn validate_permutation(perm: &[usize], rank: usize) -> Result<(), Error> {
    if perm.len() != rank {
        return Err(Error::InvalidIndex(format!(
            "permutation {:?} does not cover {} axes",
            perm, rank
        )));
    }
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return Err(Error::InvalidIndex(format!(
                "{:?} is not a permutation of 0..{}",
                perm, rank
            )));
        }
        seen[p] = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_size_one() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.size(), 1);
        assert_eq!(Shape::new(vec![2, 0, 3]).size(), 0);
    }

    #[test]
    fn broadcast_rules() {
        let a = Shape::from([2, 1, 3]);
        let b = Shape::from([4, 1]);
        assert_eq!(a.broadcast(&b).unwrap(), Shape::from([2, 4, 3]));
        assert_eq!(Shape::scalar().broadcast(&a).unwrap(), a);
        let err = Shape::from([2, 3]).broadcast(&Shape::from([4])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ShapeMismatch);
    }

    #[test]
    fn broadcast_with_zero_extent() {
        let a = Shape::from([0, 3]);
        assert_eq!(a.broadcast(&Shape::from([1, 3])).unwrap(), a);
        assert!(a.broadcast(&Shape::from([2, 3])).is_err());
    }

    #[test]
    fn negative_axes_and_reduce() {
        let s = Shape::from([2, 3, 4]);
        assert_eq!(s.normalize_axis(-1).unwrap(), 2);
        assert!(s.normalize_axis(3).is_err());
        assert!(s.normalize_axis(-4).is_err());
        let axes = s.normalize_axes(&[-1, 0]).unwrap();
        assert_eq!(axes, vec![0, 2]);
        assert_eq!(s.reduce(&axes, false), Shape::from([3]));
        assert_eq!(s.reduce(&axes, true), Shape::from([1, 3, 1]));
        assert!(s.normalize_axes(&[1, -2]).is_err());
    }

    #[test]
    fn strides_and_unravel() {
        let s = Shape::from([2, 3, 4]);
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.offset(&[1, 2, 3]), 23);
        assert_eq!(s.unravel(23), vec![1, 2, 3]);
    }

    #[test]
    fn permute_and_align() {
        let s = Shape::from([2, 3, 4]);
        assert_eq!(s.permute(&[2, 0, 1]).unwrap(), Shape::from([4, 2, 3]));
        assert!(s.permute(&[0, 0, 1]).is_err());
        let (dims, reps) = s.align_repeats(&[2, 3]);
        assert_eq!(dims, vec![2, 3, 4]);
        assert_eq!(reps, vec![1, 2, 3]);
        let (dims, reps) = Shape::from([3]).align_repeats(&[2, 2]);
        assert_eq!(dims, vec![1, 3]);
        assert_eq!(reps, vec![2, 2]);
    }

    #[test]
    fn display() {
        assert_eq!(Shape::from([2, 3]).to_string(), "(2, 3)");
        assert_eq!(Shape::scalar().to_string(), "()");
    }
}
