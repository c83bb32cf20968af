use crate::backend::Backend;
use crate::tensor::TensorData;
use std::fmt;

impl<B: Backend> fmt::Debug for TensorData<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorData")
            .field("id", &self.id)
            .field("data", &self.data.as_ref().map_or("<closed>", |_| "<backend storage>"))
            .field("shape", &self.shape.dims())
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("format", &self.format)
            .field("op", &self.op.as_ref().map(|op| op.op_type.to_string()))
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}
