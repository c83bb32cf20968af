use crate::{
    autograd,
    backend::Backend,
    error::Error,
    graph::Op,
    scope::{self, ManagedResource, ResourceScope, ScopeRef},
    shape::Shape,
    types::{DataType, Element, SparseFormat},
    Device,
};
use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    fs::File,
    hash::{Hash, Hasher},
    io::{BufReader, BufWriter, Read, Write},
    marker::PhantomData,
    path::Path,
    rc::{Rc, Weak},
    sync::atomic::{AtomicUsize, Ordering},
};

static TENSOR_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    TENSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub struct TensorData<B: Backend> {
    pub id: usize,
    /// `None` once the array has been closed.
    pub(crate) data: Option<B::Storage>,
    pub(crate) shape: Shape,
    pub(crate) dtype: DataType,
    pub(crate) device: Device,
    pub(crate) format: SparseFormat,
    pub op: Option<Op<B>>,
    pub(crate) scope: Option<ScopeRef>,
    /// Bumped on every mutable borrow of `data`.
    pub(crate) version: u64,
}

impl<B: Backend> TensorData<B> {
    fn sync_meta(&mut self) {
        if let Some(data) = &self.data {
            self.shape = Shape::from(B::shape(data));
            self.dtype = B::dtype(data);
            self.device = B::device(data);
            self.format = B::format(data);
        }
    }
}

/// Releases the buffer behind `cell` exactly once.
fn release_data<B: Backend>(cell: &RefCell<TensorData<B>>) -> Result<(), Error> {
    let (id, storage, op) = {
        let mut inner = cell.try_borrow_mut().map_err(|_| {
            Error::InvalidOperation("array is borrowed and cannot be closed".to_string())
        })?;
        let storage = inner.data.take().ok_or(Error::DoubleClose(inner.id))?;
        (inner.id, storage, inner.op.take())
    };
    drop(op);
    drop(storage);
    autograd::forget(id);
    log::debug!("array {} closed", id);
    Ok(())
}

impl<B: Backend> ManagedResource for RefCell<TensorData<B>> {
    fn resource_id(&self) -> usize {
        self.try_borrow().map(|inner| inner.id).unwrap_or(usize::MAX)
    }

    fn clear_scope(&self) {
        if let Ok(mut inner) = self.try_borrow_mut() {
            inner.scope = None;
        }
    }

    fn release(&self) -> Result<(), Error> {
        release_data(self)
    }
}

impl<B: Backend> Drop for TensorData<B> {
    fn drop(&mut self) {
        if self.data.is_some() {
            match &self.scope {
                Some(scope) => scope::unregister(scope, self.id),
                None => log::warn!(
                    "array {} {} was dropped without being closed",
                    self.id,
                    self.shape
                ),
            }
        }
        autograd::forget(self.id);
    }
}

/// An n-dimensional array handle.
///
/// Cloning a `Tensor` clones the handle, not the buffer: both handles refer
/// to the same array, share its id and observe each other's in-place
/// mutations. Shape, data type, device and format stay queryable after the
/// array is closed; every access to its elements then fails with
/// [`Error::UseAfterClose`].
///
/// # Example
/// ```rust
/// use rust_ndarray_lib::{CpuTensor, NdIndex};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let a = CpuTensor::from_vec(vec![10i32, 20, 30], &[3])?;
///     let last = a.get(&NdIndex::from_points(&[-1]))?;
///     assert!(last.shape().is_scalar());
///     assert_eq!(last.to_vec::<i32>()?, vec![30]);
///
///     a.close()?;
///     assert!(a.close().is_err());
///     Ok(())
/// }
/// ```
pub struct Tensor<B: Backend> {
    pub(crate) inner: Rc<RefCell<TensorData<B>>>,
    _backend: PhantomData<B>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> PartialEq for Tensor<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<B: Backend> Eq for Tensor<B> {}

impl<B: Backend> Hash for Tensor<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<B: Backend> fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => fmt::Debug::fmt(&*inner, f),
            Err(_) => write!(f, "Tensor {{ id: <borrowed> }}"),
        }
    }
}

impl<B: Backend> fmt::Display for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        match &inner.data {
            Some(data) => write!(f, "{}", data),
            None => write!(f, "ND: {} {} {} <closed>", inner.shape, inner.device, inner.dtype),
        }
    }
}

impl<B: Backend> Tensor<B> {
    /// Wraps backend storage in a new, unscoped array.
    pub fn new(data: B::Storage) -> Self {
        let shape = Shape::from(B::shape(&data));
        let dtype = B::dtype(&data);
        let device = B::device(&data);
        let format = B::format(&data);
        let id = next_id();
        crate::debug_println!("array {} created: {} {}", id, shape, dtype);
        Self {
            inner: Rc::new(RefCell::new(TensorData {
                id,
                data: Some(data),
                shape,
                dtype,
                device,
                format,
                op: None,
                scope: None,
                version: 0,
            })),
            _backend: PhantomData,
        }
    }

    /// A new array that joins this array's scope, if it has an open one.
    pub(crate) fn derive(&self, data: B::Storage) -> Tensor<B> {
        let out = Tensor::new(data);
        let scope = self.inner.borrow().scope.clone();
        if let Some(scope) = scope {
            if scope::is_open(&scope) && out.register(&scope).is_ok() {
                out.inner.borrow_mut().scope = Some(scope);
            }
        }
        out
    }

    fn register(&self, scope: &ScopeRef) -> Result<(), Error> {
        let resource: Rc<dyn ManagedResource> = self.inner.clone();
        let weak: Weak<dyn ManagedResource> = Rc::downgrade(&resource);
        scope::register_with(scope, weak, self.id())
    }

    // --- Factories ---

    pub fn zeros(shape: &[usize], dtype: DataType) -> Result<Self, Error> {
        Ok(Self::new(B::zeros(shape, dtype, Device::Cpu)?))
    }

    pub fn ones(shape: &[usize], dtype: DataType) -> Result<Self, Error> {
        Ok(Self::new(B::ones(shape, dtype, Device::Cpu)?))
    }

    pub fn full(shape: &[usize], value: f64, dtype: DataType) -> Result<Self, Error> {
        Ok(Self::new(B::full(shape, value, dtype, Device::Cpu)?))
    }

    /// Creates an array from row-major values; the type follows `T`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `data.len()` differs from the shape's size,
    /// [`Error::InvalidConversion`] for an `i64` past [`crate::MAX_EXACT_INT64`].
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self, Error> {
        data.iter().try_for_each(|&v| v.check_exact())?;
        let values = data.into_iter().map(Element::to_f64).collect();
        Ok(Self::new(B::from_vec(values, shape, T::DTYPE, Device::Cpu)?))
    }

    pub fn from_f64_vec(data: Vec<f64>, shape: &[usize], dtype: DataType) -> Result<Self, Error> {
        Ok(Self::new(B::from_vec(data, shape, dtype, Device::Cpu)?))
    }

    /// A rank-0 array holding `value`.
    pub fn scalar<T: Element>(value: T) -> Result<Self, Error> {
        Self::from_vec(vec![value], &[])
    }

    /// Values `start, start + step, ...` strictly below `stop`.
    pub fn arange(start: f64, stop: f64, step: f64, dtype: DataType) -> Result<Self, Error> {
        if step == 0.0 || !step.is_finite() {
            return Err(Error::InvalidOperation(format!("arange step must be non-zero, got {}", step)));
        }
        let count = ((stop - start) / step).ceil().max(0.0) as usize;
        let values: Vec<f64> = (0..count).map(|i| start + i as f64 * step).collect();
        Self::from_f64_vec(values, &[count], dtype)
    }

    // --- Identity and metadata ---

    pub fn id(&self) -> usize {
        self.inner.borrow().id
    }

    pub fn shape(&self) -> Shape {
        self.inner.borrow().shape.clone()
    }

    pub fn rank(&self) -> usize {
        self.inner.borrow().shape.rank()
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().shape.size()
    }

    pub fn dtype(&self) -> DataType {
        self.inner.borrow().dtype
    }

    pub fn device(&self) -> Device {
        self.inner.borrow().device
    }

    pub fn format(&self) -> SparseFormat {
        self.inner.borrow().format
    }

    pub fn is_sparse(&self) -> bool {
        self.format().is_sparse()
    }

    /// Bytes held by the buffer; sparse arrays count their index arrays too.
    pub fn byte_len(&self) -> Result<usize, Error> {
        Ok(B::byte_len(&*self.data()?))
    }

    /// Immutable access to the backend storage.
    ///
    /// # Errors
    /// [`Error::UseAfterClose`] once the array has been closed.
    pub fn data(&self) -> Result<Ref<'_, B::Storage>, Error> {
        Ref::filter_map(self.inner.borrow(), |inner| inner.data.as_ref())
            .map_err(|inner| Error::UseAfterClose(inner.id))
    }

    pub(crate) fn data_mut(&self) -> Result<RefMut<'_, B::Storage>, Error> {
        RefMut::filter_map(self.inner.borrow_mut(), |inner| {
            inner.version += 1;
            inner.data.as_mut()
        })
        .map_err(|inner| Error::UseAfterClose(inner.id))
    }

    /// Write counter, compared by backward against the value seen at record time.
    pub(crate) fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    pub fn op(&self) -> Option<Op<B>> {
        self.inner.borrow().op.clone()
    }

    pub(crate) fn op_inputs(&self) -> Vec<Tensor<B>> {
        self.inner
            .borrow()
            .op
            .as_ref()
            .map(|op| op.inputs.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_op(&self, op: Op<B>) {
        self.inner.borrow_mut().op = Some(op);
    }

    pub(crate) fn clear_op(&self) {
        let op = self.inner.borrow_mut().op.take();
        drop(op);
    }

    /// Fails when mutating this array would invalidate a recorded graph.
    pub(crate) fn check_mutable(&self, op: &str) -> Result<(), Error> {
        if autograd::is_recording() && self.tracks_grad() {
            return Err(Error::InvalidOperation(format!(
                "in-place {} on array {} while it is part of a recorded graph",
                op,
                self.id()
            )));
        }
        if self.is_sparse() {
            return Err(Error::InvalidOperation(format!(
                "in-place {} on {} array {}; convert with to_dense first",
                op,
                self.format(),
                self.id()
            )));
        }
        Ok(())
    }

    // --- Lifecycle ---

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().data.is_none()
    }

    /// Releases the buffer and leaves any scope.
    ///
    /// # Errors
    /// [`Error::DoubleClose`] if the array was already closed.
    pub fn close(&self) -> Result<(), Error> {
        let scope = self.inner.borrow_mut().scope.take();
        if let Some(scope) = scope {
            scope::unregister(&scope, self.id());
        }
        release_data(&self.inner)
    }

    /// Moves this array into `scope`, leaving its previous scope.
    ///
    /// Attaching to the scope it already belongs to is a no-op.
    pub fn attach(&self, scope: &ResourceScope) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::UseAfterClose(self.id()));
        }
        if scope.is_closed() {
            return Err(Error::ScopeClosed);
        }
        if let Some(current) = &self.inner.borrow().scope {
            if scope::same_scope(current, scope) {
                return Ok(());
            }
        }
        self.detach();
        let handle = scope.handle();
        self.register(&handle)?;
        self.inner.borrow_mut().scope = Some(handle);
        crate::debug_println!("array {} attached to scope {}", self.id(), scope.id());
        Ok(())
    }

    /// Leaves the current scope, if any. The caller must then close the array.
    pub fn detach(&self) {
        let scope = self.inner.borrow_mut().scope.take();
        if let Some(scope) = scope {
            scope::unregister(&scope, self.id());
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().scope.as_ref().is_some_and(scope::is_open)
    }

    pub fn is_attached_to(&self, scope: &ResourceScope) -> bool {
        self.inner
            .borrow()
            .scope
            .as_ref()
            .is_some_and(|s| scope::same_scope(s, scope))
    }

    // --- Host export ---

    /// Row-major element values converted to `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, Error> {
        let values = B::copy_to_host(&*self.data()?)?;
        Ok(values.into_iter().map(T::from_f64).collect())
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>, Error> {
        B::copy_to_host(&*self.data()?)
    }

    /// The elements of a 2-D array as an `ndarray` matrix.
    ///
    /// # Errors
    /// [`Error::InvalidConversion`] unless the array has rank 2.
    pub fn as_matrix(&self) -> Result<ndarray::Array2<f64>, Error> {
        let shape = self.shape();
        if shape.rank() != 2 {
            return Err(Error::InvalidConversion(format!(
                "as_matrix requires a 2-D array, got shape {}",
                shape
            )));
        }
        ndarray::Array2::from_shape_vec((shape[0], shape[1]), self.to_f64_vec()?)
            .map_err(|e| Error::InternalLogicError(e.to_string()))
    }

    // --- Conversions ---

    /// Converts to `dtype`. With `copy == false` an unchanged type returns
    /// this same handle.
    pub fn as_type(&self, dtype: DataType, copy: bool) -> Result<Tensor<B>, Error> {
        if !copy && dtype == self.dtype() {
            self.data()?;
            return Ok(self.clone());
        }
        let data = B::cast(&*self.data()?, dtype)?;
        Ok(self.derive(data))
    }

    /// Relocates to `device`. With `copy == false` the receiver itself is
    /// rebound and returned.
    pub fn as_in_device(&self, device: Device, copy: bool) -> Result<Tensor<B>, Error> {
        if copy {
            let data = B::to_device(&*self.data()?, device)?;
            return Ok(self.derive(data));
        }
        if device != self.device() {
            B::set_device(&mut *self.data_mut()?, device)?;
            self.inner.borrow_mut().sync_meta();
            crate::debug_println!("array {} rebound to {}", self.id(), device);
        }
        Ok(self.clone())
    }

    /// Replaces every element, casting to this array's type.
    pub fn set_data<T: Element>(&self, values: &[T]) -> Result<(), Error> {
        self.check_mutable("set_data")?;
        values.iter().try_for_each(|&v| v.check_exact())?;
        let values: Vec<f64> = values.iter().map(|v| v.to_f64()).collect();
        let mut data = self.data_mut()?;
        if values.len() != B::size(&data) {
            return Err(Error::ShapeMismatch {
                expected: B::shape(&data).to_vec(),
                actual: vec![values.len()],
            });
        }
        let format = B::format(&data);
        if format.is_sparse() {
            let dense = B::from_vec(values, B::shape(&data), B::dtype(&data), B::device(&data))?;
            B::assign(&mut data, &dense)
        } else {
            B::update_from_host(&mut data, &values)
        }
    }

    /// Copies this array's contents into `target`, which must have the same shape.
    pub fn copy_to(&self, target: &Tensor<B>) -> Result<(), Error> {
        target.check_mutable("copy_to")?;
        if self == target {
            self.data()?;
            return Ok(());
        }
        let source = self.data()?;
        B::assign(&mut *target.data_mut()?, &source)
    }

    /// A new array with the same contents, type, device and format.
    pub fn dup(&self) -> Result<Tensor<B>, Error> {
        let data = self.data()?.clone();
        Ok(self.derive(data))
    }

    pub fn zeros_like(&self) -> Result<Tensor<B>, Error> {
        self.filled_like(0.0)
    }

    pub fn ones_like(&self) -> Result<Tensor<B>, Error> {
        self.filled_like(1.0)
    }

    /// Same shape, type, device and format; contents unspecified.
    /// The CPU backend zero-fills.
    pub fn like(&self) -> Result<Tensor<B>, Error> {
        self.filled_like(0.0)
    }

    fn filled_like(&self, value: f64) -> Result<Tensor<B>, Error> {
        let (shape, dtype, device, format) = {
            let source = self.data()?;
            (B::shape(&source).to_vec(), B::dtype(&source), B::device(&source), B::format(&source))
        };
        let mut data = B::full(&shape, value, dtype, device)?;
        if format.is_sparse() {
            data = B::to_format(&data, format)?;
        }
        Ok(self.derive(data))
    }

    // --- Sparse ---

    /// A dense copy; dense receivers are copied as-is.
    pub fn to_dense(&self) -> Result<Tensor<B>, Error> {
        self.to_sparse(SparseFormat::Dense)
    }

    /// Converts to `format`, always producing a new array.
    pub fn to_sparse(&self, format: SparseFormat) -> Result<Tensor<B>, Error> {
        let data = B::to_format(&*self.data()?, format)?;
        Ok(self.derive(data))
    }

    /// Number of non-zero (true) elements.
    pub fn nonzero(&self) -> Result<usize, Error> {
        B::nonzero(&*self.data()?)
    }

    // --- Encoding ---

    /// Backend-defined blob holding everything needed to rebuild this array.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        B::encode(&*self.data()?)
    }

    /// Rebuilds an array from [`Tensor::encode`] output.
    pub fn decode(bytes: &[u8]) -> Result<Tensor<B>, Error> {
        Ok(Tensor::new(B::decode(bytes)?))
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_all(&self.encode()?)?;
        Ok(())
    }

    pub fn decode_from<R: Read>(reader: &mut R) -> Result<Tensor<B>, Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    /// Saves the encoded array to a file.
    ///
    /// Gradients and recorded history are not saved.
    ///
    /// # Example
    /// ```rust,no_run
    /// # use rust_ndarray_lib::CpuTensor;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let x = CpuTensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3])?;
    /// x.save_to_file("array.json")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.encode_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads an array written by [`Tensor::save_to_file`]. The result gets a fresh id.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Tensor<B>, Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::decode_from(&mut reader)
    }
}
