//! Gradient attachment and the backward trigger.
//!
//! Gradient buffers are not stored on the array they belong to. A
//! thread-local table maps an array id to its gradient array and
//! accumulation policy; the table owns the gradient and closes it when the
//! host array is closed or dropped.
//!
//! Operations are recorded into the graph only while a [`record`] guard is
//! alive on the current thread and at least one input tracks gradients.

use crate::backend::{Backend, BinaryOp};
use crate::error::Error;
use crate::graph;
use crate::tensor::Tensor;
use crate::types::SparseFormat;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

thread_local! {
    static RECORDING: Cell<bool> = const { Cell::new(false) };
    static GRADIENTS: RefCell<HashMap<usize, Box<dyn GradientEntry>>> = RefCell::new(HashMap::new());
}

/// Restores the previous recording mode when dropped.
#[must_use = "recording stops as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RecordGuard {
    previous: bool,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        let _ = RECORDING.try_with(|r| r.set(self.previous));
    }
}

fn set_recording(on: bool) -> RecordGuard {
    let previous = RECORDING.with(|r| r.replace(on));
    RecordGuard { previous }
}

/// Records operations on this thread until the guard is dropped.
///
/// # Example
/// ```rust
/// use rust_ndarray_lib::{autograd, CpuTensor};
///
/// fn main() -> Result<(), rust_ndarray_lib::Error> {
///     let x = CpuTensor::from_vec(vec![1.0f64, 2.0, 3.0], &[3])?;
///     x.attach_grad()?;
///     let y = {
///         let _guard = autograd::record();
///         x.square()?.sum(&[], false)?
///     };
///     y.backward()?;
///     assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![2.0, 4.0, 6.0]);
///     Ok(())
/// }
/// ```
pub fn record() -> RecordGuard {
    set_recording(true)
}

/// Suspends recording on this thread until the guard is dropped.
pub fn pause() -> RecordGuard {
    set_recording(false)
}

pub fn is_recording() -> bool {
    RECORDING.with(|r| r.get())
}

/// How a backward pass updates an attached gradient buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GradReq {
    /// Overwrite the buffer with the new gradient.
    #[default]
    Write,
    /// Add the new gradient to the buffer.
    Add,
    /// Do not track gradients for this array.
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackwardOptions {
    /// Keep recorded history after the pass so backward can run again.
    pub retain_graph: bool,
    /// Write into attached gradient buffers. When false the traversal runs
    /// but no buffer changes.
    pub is_training: bool,
}

impl Default for BackwardOptions {
    fn default() -> Self {
        Self {
            retain_graph: false,
            is_training: true,
        }
    }
}

trait GradientEntry: Any {
    fn release(&self);
    fn as_any(&self) -> &dyn Any;
}

struct GradientLink<B: Backend> {
    grad: Tensor<B>,
    req: GradReq,
}

impl<B: Backend> GradientEntry for GradientLink<B> {
    fn release(&self) {
        if !self.grad.is_closed() {
            let _ = self.grad.close();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn link<B: Backend>(id: usize) -> Option<(Tensor<B>, GradReq)> {
    GRADIENTS
        .try_with(|table| {
            let table = table.try_borrow().ok()?;
            let link = table.get(&id)?.as_any().downcast_ref::<GradientLink<B>>()?;
            Some((link.grad.clone(), link.req))
        })
        .ok()
        .flatten()
}

/// Drops and closes the gradient linked to `id`, if any.
pub(crate) fn forget(id: usize) {
    let entry = GRADIENTS
        .try_with(|table| table.try_borrow_mut().ok().and_then(|mut t| t.remove(&id)))
        .ok()
        .flatten();
    if let Some(entry) = entry {
        entry.release();
        crate::debug_println!("gradient of array {} released", id);
    }
}

impl<B: Backend> Tensor<B> {
    /// Attaches a zero-filled gradient buffer with [`GradReq::Write`].
    pub fn attach_grad(&self) -> Result<(), Error> {
        self.attach_grad_with(GradReq::Write, None)
    }

    /// Attaches a zero-filled gradient buffer shaped like this array.
    ///
    /// The buffer uses `format` when given, otherwise this array's format.
    /// Any previous gradient is closed and any recorded history is cut, so
    /// the array becomes a leaf.
    pub fn attach_grad_with(&self, req: GradReq, format: Option<SparseFormat>) -> Result<(), Error> {
        let format = format.unwrap_or_else(|| self.format());
        let grad: Tensor<B> = {
            let data = self.data()?;
            let zeros = B::zeros(B::shape(&data), B::dtype(&data), B::device(&data))?;
            let zeros = if format.is_sparse() {
                B::to_format(&zeros, format)?
            } else {
                zeros
            };
            Tensor::new(zeros)
        };
        let id = self.id();
        forget(id);
        self.clear_op();
        GRADIENTS.with(|table| {
            table
                .borrow_mut()
                .insert(id, Box::new(GradientLink { grad, req }) as Box<dyn GradientEntry>)
        });
        crate::debug_println!("array {} attached gradient ({:?}, {})", id, req, format);
        Ok(())
    }

    /// The attached gradient buffer.
    ///
    /// # Errors
    /// [`Error::NoGradient`] if none is attached.
    pub fn get_gradient(&self) -> Result<Tensor<B>, Error> {
        link::<B>(self.id())
            .map(|(grad, _)| grad)
            .ok_or(Error::NoGradient(self.id()))
    }

    pub fn has_gradient(&self) -> bool {
        link::<B>(self.id()).is_some()
    }

    pub fn grad_req(&self) -> Option<GradReq> {
        link::<B>(self.id()).map(|(_, req)| req)
    }

    /// Whether a gradient is attached with a policy other than [`GradReq::Null`].
    pub fn requires_grad(&self) -> bool {
        matches!(self.grad_req(), Some(req) if req != GradReq::Null)
    }

    /// Whether gradients flow through this array: it requires a gradient
    /// itself or was produced by a recorded operation.
    pub fn tracks_grad(&self) -> bool {
        self.requires_grad() || self.inner.borrow().op.is_some()
    }

    /// Resets the attached gradient to zero.
    pub fn zero_grad(&self) -> Result<(), Error> {
        let grad = self.get_gradient()?;
        let zeros = {
            let data = grad.data()?;
            B::zeros(B::shape(&data), B::dtype(&data), B::device(&data))?
        };
        let result = B::assign(&mut *grad.data_mut()?, &zeros);
        result
    }

    /// Runs backward with a ones-filled head gradient and default options.
    pub fn backward(&self) -> Result<(), Error> {
        self.backward_with_options(BackwardOptions::default())
    }

    pub fn backward_with_options(&self, options: BackwardOptions) -> Result<(), Error> {
        let seed = {
            let data = self.data()?;
            B::ones(B::shape(&data), B::dtype(&data), B::device(&data))?
        };
        self.run_backward(seed, options)
    }

    /// Runs backward with an explicit head gradient.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless `head_grad` has this array's shape.
    pub fn backward_with_grad(&self, head_grad: &Tensor<B>, options: BackwardOptions) -> Result<(), Error> {
        let expected = self.shape();
        let actual = head_grad.shape();
        if expected != actual {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        let seed = {
            let data = head_grad.data()?;
            B::cast(&B::to_format(&data, SparseFormat::Dense)?, self.dtype())?
        };
        self.run_backward(seed, options)
    }

    fn run_backward(&self, seed: B::Storage, options: BackwardOptions) -> Result<(), Error> {
        if !self.tracks_grad() {
            return Err(Error::InvalidOperation(format!(
                "array {} has no attached gradient and no recorded history",
                self.id()
            )));
        }
        crate::debug_println!("backward from array {} with {:?}", self.id(), options);

        let (nodes, mut grads) = graph::propagate(self, seed)?;

        if options.is_training {
            for node in &nodes {
                let Some((grad, req)) = link::<B>(node.id()) else {
                    continue;
                };
                let Some(update) = grads.remove(&node.id()) else {
                    continue;
                };
                match req {
                    GradReq::Null => {}
                    GradReq::Write => B::assign(&mut *grad.data_mut()?, &update)?,
                    GradReq::Add => {
                        let total = B::binary(BinaryOp::Add, &*grad.data()?, &update)?;
                        B::assign(&mut *grad.data_mut()?, &total)?;
                    }
                }
            }
        }

        if !options.retain_graph {
            for node in &nodes {
                node.clear_op();
            }
        }
        Ok(())
    }
}
