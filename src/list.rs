//! Ordered collections of arrays, used by multi-output and multi-input
//! operations such as split, unstack, concat and stack.

use crate::backend::Backend;
use crate::error::Error;
use crate::ops::structural;
use crate::shape::Shape;
use crate::tensor::Tensor;
use std::ops::Index;

/// An ordered, index-accessible sequence of array handles.
///
/// Duplicates are allowed. The list holds handles, so closing an array
/// through the list closes it for every other holder as well.
#[derive(Debug, Clone)]
pub struct TensorList<B: Backend> {
    items: Vec<Tensor<B>>,
}

impl<B: Backend> TensorList<B> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, tensor: Tensor<B>) {
        self.items.push(tensor);
    }

    pub fn get(&self, index: usize) -> Option<&Tensor<B>> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor<B>> {
        self.items.iter()
    }

    pub fn shapes(&self) -> Vec<Shape> {
        self.items.iter().map(Tensor::shape).collect()
    }

    pub fn into_vec(self) -> Vec<Tensor<B>> {
        self.items
    }

    /// Joins every array along `axis`. See [`structural::concat`].
    pub fn concat(&self, axis: isize) -> Result<Tensor<B>, Error> {
        let refs: Vec<&Tensor<B>> = self.items.iter().collect();
        structural::concat(&refs, axis)
    }

    /// Stacks every array along a new axis. See [`structural::stack`].
    pub fn stack(&self, axis: isize) -> Result<Tensor<B>, Error> {
        let refs: Vec<&Tensor<B>> = self.items.iter().collect();
        structural::stack(&refs, axis)
    }

    /// Closes every array that is still open. Repeated handles are closed once.
    pub fn close_all(&self) {
        for tensor in &self.items {
            if !tensor.is_closed() {
                if let Err(e) = tensor.close() {
                    log::debug!("array {} not closed: {}", tensor.id(), e);
                }
            }
        }
    }
}

impl<B: Backend> Default for TensorList<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Index<usize> for TensorList<B> {
    type Output = Tensor<B>;

    fn index(&self, index: usize) -> &Tensor<B> {
        &self.items[index]
    }
}

impl<B: Backend> From<Vec<Tensor<B>>> for TensorList<B> {
    fn from(items: Vec<Tensor<B>>) -> Self {
        Self { items }
    }
}

impl<B: Backend> FromIterator<Tensor<B>> for TensorList<B> {
    fn from_iter<I: IntoIterator<Item = Tensor<B>>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<B: Backend> IntoIterator for TensorList<B> {
    type Item = Tensor<B>;
    type IntoIter = std::vec::IntoIter<Tensor<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, B: Backend> IntoIterator for &'a TensorList<B> {
    type Item = &'a Tensor<B>;
    type IntoIter = std::slice::Iter<'a, Tensor<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
