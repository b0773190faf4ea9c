use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::backends::ndarray_backend::NDArrayNumericTensor;
use crate::backends::traced_backend::TracedTensor;
use crate::dtype::DType;

/// Payload of a backend that is not compiled into this crate.
#[derive(Clone)]
pub struct ForeignArray {
    type_name: String,
    handle: Arc<dyn Any + Send + Sync>,
    shape: Vec<usize>,
    dtype: Option<DType>,
}

impl ForeignArray {
    pub fn new<T: Any + Send + Sync>(value: T, shape: Vec<usize>, dtype: Option<DType>) -> Self {
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            handle: Arc::new(value),
            shape,
            dtype,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }
}

impl Debug for ForeignArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignArray")
            .field("type_name", &self.type_name)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish()
    }
}

/// Capability-tagged native payload: the variant identifies the owning backend.
#[derive(Clone, Debug)]
pub enum NativeArray {
    NDArray(NDArrayNumericTensor),
    Traced(TracedTensor),
    #[cfg(feature = "candle")]
    Candle(candle_core::Tensor),
    #[cfg(feature = "candle")]
    CandleVar(candle_core::Var),
    Foreign(ForeignArray),
}

impl NativeArray {
    /// Fully qualified name of the native type, used for backend inference.
    pub fn type_name(&self) -> &str {
        match self {
            NativeArray::NDArray(_) => std::any::type_name::<NDArrayNumericTensor>(),
            NativeArray::Traced(_) => std::any::type_name::<TracedTensor>(),
            #[cfg(feature = "candle")]
            NativeArray::Candle(_) => std::any::type_name::<candle_core::Tensor>(),
            #[cfg(feature = "candle")]
            NativeArray::CandleVar(_) => std::any::type_name::<candle_core::Var>(),
            NativeArray::Foreign(x) => x.type_name(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            NativeArray::NDArray(x) => x.shape().to_vec(),
            NativeArray::Traced(x) => x.data().shape().to_vec(),
            #[cfg(feature = "candle")]
            NativeArray::Candle(x) => x.dims().to_vec(),
            #[cfg(feature = "candle")]
            NativeArray::CandleVar(x) => x.dims().to_vec(),
            NativeArray::Foreign(x) => x.shape().to_vec(),
        }
    }

    pub fn dtype(&self) -> Option<DType> {
        match self {
            NativeArray::NDArray(x) => Some(x.dtype()),
            NativeArray::Traced(x) => Some(x.data().dtype()),
            #[cfg(feature = "candle")]
            NativeArray::Candle(x) => DType::try_from(x.dtype()).ok(),
            #[cfg(feature = "candle")]
            NativeArray::CandleVar(x) => DType::try_from(x.dtype()).ok(),
            NativeArray::Foreign(x) => x.dtype(),
        }
    }

    pub fn as_ndarray(&self) -> Option<&NDArrayNumericTensor> {
        match self {
            NativeArray::NDArray(x) => Some(x),
            _ => None,
        }
    }
}

impl From<NDArrayNumericTensor> for NativeArray {
    fn from(value: NDArrayNumericTensor) -> Self {
        NativeArray::NDArray(value)
    }
}

impl From<TracedTensor> for NativeArray {
    fn from(value: TracedTensor) -> Self {
        NativeArray::Traced(value)
    }
}

#[cfg(feature = "candle")]
impl From<candle_core::Tensor> for NativeArray {
    fn from(value: candle_core::Tensor) -> Self {
        NativeArray::Candle(value)
    }
}

#[cfg(feature = "candle")]
impl From<candle_core::Var> for NativeArray {
    fn from(value: candle_core::Var) -> Self {
        NativeArray::CandleVar(value)
    }
}

impl From<ForeignArray> for NativeArray {
    fn from(value: ForeignArray) -> Self {
        NativeArray::Foreign(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_are_distinct_per_variant() {
        let a = NativeArray::from(NDArrayNumericTensor::from_vec(vec![1.0f32]));
        let b = NativeArray::from(TracedTensor::new(NDArrayNumericTensor::from_vec(vec![1.0f32])));
        let c = NativeArray::from(ForeignArray::new(5u8, vec![], None));
        assert_ne!(a.type_name(), b.type_name());
        assert_eq!(c.type_name(), "u8");
        assert_eq!(b.shape(), vec![1]);
    }
}
