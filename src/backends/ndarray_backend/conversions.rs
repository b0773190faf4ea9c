use half::{bf16, f16};
use ndarray::{ArcArray, IxDyn};

use crate::backends::ndarray_backend::{NDArrayNumericTensor, NDArrayNumericTensorError};
use crate::dtype::{DType, DTypeOfPrimitive};
use crate::value::Value;

pub trait NDArrayNumericTensorType: Sized + DTypeOfPrimitive + Clone {
    fn ndarray_numeric_tensor_from_ndarray(value: ArcArray<Self, IxDyn>) -> NDArrayNumericTensor;
    fn ndarray_numeric_tensor_inner(
        tensor: &NDArrayNumericTensor,
    ) -> Result<&ArcArray<Self, IxDyn>, NDArrayNumericTensorError>;
}

impl NDArrayNumericTensor {
    pub fn from_vec_shape<T: NDArrayNumericTensorType>(
        v: Vec<T>,
        shape: &[usize],
    ) -> Result<Self, NDArrayNumericTensorError> {
        let arr: ArcArray<T, IxDyn> = ArcArray::from_shape_vec(IxDyn(shape), v)?;
        Ok(T::ndarray_numeric_tensor_from_ndarray(arr))
    }

    pub fn from_vec<T: NDArrayNumericTensorType>(v: Vec<T>) -> Self {
        T::ndarray_numeric_tensor_from_ndarray(ArcArray::from_vec(v).into_dyn())
    }

    pub fn scalar<T: NDArrayNumericTensorType>(v: T) -> Self {
        T::ndarray_numeric_tensor_from_ndarray(ArcArray::from_elem(IxDyn(&[]), v))
    }

    pub fn try_to_vec<T: NDArrayNumericTensorType>(&self) -> Result<Vec<T>, NDArrayNumericTensorError> {
        Ok(T::ndarray_numeric_tensor_inner(self)?.iter().cloned().collect())
    }

    pub fn as_inner<T: NDArrayNumericTensorType>(&self) -> Result<&ArcArray<T, IxDyn>, NDArrayNumericTensorError> {
        T::ndarray_numeric_tensor_inner(self)
    }

    /// Build a tensor from a scalar or a (possibly nested) list of scalars.
    ///
    /// Without an explicit `dtype`, any float makes the result `float64`,
    /// otherwise any integer makes it `int64`, otherwise it is `bool`.
    pub fn from_value(value: &Value, dtype: Option<DType>) -> Result<Self, NDArrayNumericTensorError> {
        let mut shape = Vec::new();
        let mut leaf_depth = None;
        let mut leaves = Vec::new();
        flatten_value(value, 0, &mut shape, &mut leaf_depth, &mut leaves)?;

        let inferred = if leaves.iter().any(|x| matches!(x, Leaf::Float(_))) || leaves.is_empty() {
            DType::F64
        } else if leaves.iter().any(|x| matches!(x, Leaf::Int(_))) {
            DType::I64
        } else {
            DType::BOOL
        };
        let tensor = match inferred {
            DType::F64 => Self::from_vec_shape(leaves.iter().map(Leaf::as_f64).collect::<Vec<f64>>(), &shape)?,
            DType::I64 => Self::from_vec_shape(leaves.iter().map(Leaf::as_i64).collect::<Vec<i64>>(), &shape)?,
            _ => Self::from_vec_shape(leaves.iter().map(|x| x.as_i64() != 0).collect::<Vec<bool>>(), &shape)?,
        };
        match dtype {
            Some(dtype) => tensor.cast(dtype),
            None => Ok(tensor),
        }
    }
}

enum Leaf {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Leaf {
    fn as_f64(&self) -> f64 {
        match self {
            Leaf::Bool(b) => *b as u8 as f64,
            Leaf::Int(i) => *i as f64,
            Leaf::Float(f) => *f,
        }
    }

    fn as_i64(&self) -> i64 {
        match self {
            Leaf::Bool(b) => *b as i64,
            Leaf::Int(i) => *i,
            Leaf::Float(f) => *f as i64,
        }
    }
}

fn flatten_value(
    value: &Value,
    depth: usize,
    shape: &mut Vec<usize>,
    leaf_depth: &mut Option<usize>,
    out: &mut Vec<Leaf>,
) -> Result<(), NDArrayNumericTensorError> {
    let leaf = match value {
        Value::List(items) => {
            if shape.len() == depth {
                shape.push(items.len());
            } else if shape[depth] != items.len() {
                return Err(NDArrayNumericTensorError::RaggedSequence(shape[depth], items.len()));
            }
            for item in items {
                flatten_value(item, depth + 1, shape, leaf_depth, out)?;
            }
            return Ok(());
        }
        Value::Bool(b) => Leaf::Bool(*b),
        Value::Int(i) => Leaf::Int(*i),
        Value::Float(f) => Leaf::Float(*f),
        other => return Err(NDArrayNumericTensorError::UnsupportedValue(other.type_label().to_string())),
    };
    // Every scalar must sit at the same nesting depth
    match leaf_depth {
        None => *leaf_depth = Some(depth),
        Some(d) if *d != depth => {
            return Err(NDArrayNumericTensorError::RaggedSequence(*d, depth));
        }
        _ => {}
    }
    out.push(leaf);
    Ok(())
}

#[macro_export]
macro_rules! impl_type_ndarray_backend {
    ($a:ident, $b:ident) => {
        impl NDArrayNumericTensorType for $a {
            fn ndarray_numeric_tensor_from_ndarray(value: ArcArray<Self, IxDyn>) -> NDArrayNumericTensor {
                NDArrayNumericTensor::$b(value)
            }

            fn ndarray_numeric_tensor_inner(
                tensor: &NDArrayNumericTensor,
            ) -> Result<&ArcArray<Self, IxDyn>, NDArrayNumericTensorError> {
                if let NDArrayNumericTensor::$b(x) = tensor {
                    Ok(x)
                } else {
                    Err(NDArrayNumericTensorError::WrongDTypeError(Self::DTYPE, tensor.dtype()))
                }
            }
        }
    };
}

impl_type_ndarray_backend!(f64, F64);
impl_type_ndarray_backend!(f32, F32);
impl_type_ndarray_backend!(bf16, BF16);
impl_type_ndarray_backend!(f16, F16);
impl_type_ndarray_backend!(i64, I64);
impl_type_ndarray_backend!(i32, I32);
impl_type_ndarray_backend!(u32, U32);
impl_type_ndarray_backend!(u8, U8);
impl_type_ndarray_backend!(bool, BOOL);

impl<T: NDArrayNumericTensorType> From<Vec<T>> for NDArrayNumericTensor {
    fn from(value: Vec<T>) -> Self {
        NDArrayNumericTensor::from_vec(value)
    }
}
