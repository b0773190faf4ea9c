use half::{bf16, f16};
use ndarray::{ArcArray, IxDyn};
use rand::Rng;

use super::ops;
use super::ops::{BinaryOperation, NDArrayOperationError, UnaryOperation};
use crate::dtype::DType;

#[derive(Debug, thiserror::Error)]
pub enum NDArrayNumericTensorError {
    #[error("Requested dtype {0}, but had dtype {1}")]
    WrongDTypeError(DType, DType),
    #[error("Unsupported operation {0} for dtypes {1:?}")]
    UnsupportedOperationForDTypes(String, Vec<DType>),
    #[error("Cannot cast from {0} to {1}")]
    InvalidCastOperation(DType, DType),
    #[error("Cannot build an array from a {0}")]
    UnsupportedValue(String),
    #[error("Ragged nested sequence, expected {0} elements got {1}")]
    RaggedSequence(usize, usize),
    #[error(transparent)]
    NDArrayOperationError(#[from] NDArrayOperationError),
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
}

/// Dynamic-rank, dynamic-dtype CPU array.
///
/// This is both the native payload of the `ndarray` backend and the neutral
/// interchange form every other backend converts through.
#[derive(Debug, Clone, PartialEq)]
pub enum NDArrayNumericTensor {
    F64(ArcArray<f64, IxDyn>),
    F32(ArcArray<f32, IxDyn>),
    BF16(ArcArray<bf16, IxDyn>),
    F16(ArcArray<f16, IxDyn>),
    I64(ArcArray<i64, IxDyn>),
    I32(ArcArray<i32, IxDyn>),
    U32(ArcArray<u32, IxDyn>),
    U8(ArcArray<u8, IxDyn>),
    BOOL(ArcArray<bool, IxDyn>),
}

macro_rules! for_each_variant {
    ($value:expr, $x:ident => $body:expr) => {
        match $value {
            NDArrayNumericTensor::F64($x) => $body,
            NDArrayNumericTensor::F32($x) => $body,
            NDArrayNumericTensor::BF16($x) => $body,
            NDArrayNumericTensor::F16($x) => $body,
            NDArrayNumericTensor::I64($x) => $body,
            NDArrayNumericTensor::I32($x) => $body,
            NDArrayNumericTensor::U32($x) => $body,
            NDArrayNumericTensor::U8($x) => $body,
            NDArrayNumericTensor::BOOL($x) => $body,
        }
    };
}

impl NDArrayNumericTensor {
    pub fn dtype(&self) -> DType {
        match self {
            NDArrayNumericTensor::F64(_) => DType::F64,
            NDArrayNumericTensor::F32(_) => DType::F32,
            NDArrayNumericTensor::BF16(_) => DType::BF16,
            NDArrayNumericTensor::F16(_) => DType::F16,
            NDArrayNumericTensor::I64(_) => DType::I64,
            NDArrayNumericTensor::I32(_) => DType::I32,
            NDArrayNumericTensor::U32(_) => DType::U32,
            NDArrayNumericTensor::U8(_) => DType::U8,
            NDArrayNumericTensor::BOOL(_) => DType::BOOL,
        }
    }

    pub fn shape(&self) -> &[usize] {
        for_each_variant!(self, x => x.shape())
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    /// Row-major copy of the contents widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.to_f64_array().iter().copied().collect()
    }

    fn to_f64_array(&self) -> ArcArray<f64, IxDyn> {
        match self {
            NDArrayNumericTensor::F64(x) => x.clone(),
            NDArrayNumericTensor::F32(x) => x.mapv(|v| v as f64).into_shared(),
            NDArrayNumericTensor::BF16(x) => x.mapv(|v| v.to_f64()).into_shared(),
            NDArrayNumericTensor::F16(x) => x.mapv(|v| v.to_f64()).into_shared(),
            NDArrayNumericTensor::I64(x) => x.mapv(|v| v as f64).into_shared(),
            NDArrayNumericTensor::I32(x) => x.mapv(|v| v as f64).into_shared(),
            NDArrayNumericTensor::U32(x) => x.mapv(|v| v as f64).into_shared(),
            NDArrayNumericTensor::U8(x) => x.mapv(|v| v as f64).into_shared(),
            NDArrayNumericTensor::BOOL(x) => x.mapv(|v| if v { 1.0 } else { 0.0 }).into_shared(),
        }
    }

    fn to_i64_array(&self) -> ArcArray<i64, IxDyn> {
        match self {
            NDArrayNumericTensor::I64(x) => x.clone(),
            NDArrayNumericTensor::I32(x) => x.mapv(|v| v as i64).into_shared(),
            NDArrayNumericTensor::U32(x) => x.mapv(|v| v as i64).into_shared(),
            NDArrayNumericTensor::U8(x) => x.mapv(|v| v as i64).into_shared(),
            NDArrayNumericTensor::BOOL(x) => x.mapv(|v| v as i64).into_shared(),
            _ => self.to_f64_array().mapv(|v| v as i64).into_shared(),
        }
    }

    fn from_f64_array(x: &ArcArray<f64, IxDyn>, dtype: DType) -> Self {
        match dtype {
            DType::F64 => NDArrayNumericTensor::F64(x.clone()),
            DType::F32 => NDArrayNumericTensor::F32(x.mapv(|v| v as f32).into_shared()),
            DType::BF16 => NDArrayNumericTensor::BF16(x.mapv(bf16::from_f64).into_shared()),
            DType::F16 => NDArrayNumericTensor::F16(x.mapv(f16::from_f64).into_shared()),
            DType::I64 => NDArrayNumericTensor::I64(x.mapv(|v| v as i64).into_shared()),
            DType::I32 => NDArrayNumericTensor::I32(x.mapv(|v| v as i32).into_shared()),
            DType::U32 => NDArrayNumericTensor::U32(x.mapv(|v| v as u32).into_shared()),
            DType::U8 => NDArrayNumericTensor::U8(x.mapv(|v| v as u8).into_shared()),
            DType::BOOL => NDArrayNumericTensor::BOOL(x.mapv(|v| v != 0.0).into_shared()),
        }
    }

    fn from_i64_array(x: &ArcArray<i64, IxDyn>, dtype: DType) -> Self {
        match dtype {
            DType::I64 => NDArrayNumericTensor::I64(x.clone()),
            DType::I32 => NDArrayNumericTensor::I32(x.mapv(|v| v as i32).into_shared()),
            DType::U32 => NDArrayNumericTensor::U32(x.mapv(|v| v as u32).into_shared()),
            DType::U8 => NDArrayNumericTensor::U8(x.mapv(|v| v as u8).into_shared()),
            DType::BOOL => NDArrayNumericTensor::BOOL(x.mapv(|v| v != 0).into_shared()),
            _ => Self::from_f64_array(&x.mapv(|v| v as f64).into_shared(), dtype),
        }
    }

    pub fn cast(&self, dtype: DType) -> Result<Self, NDArrayNumericTensorError> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let source = self.dtype();
        // Integer to integer casts stay exact by avoiding the f64 detour
        if !source.is_float() && !dtype.is_float() {
            Ok(Self::from_i64_array(&self.to_i64_array(), dtype))
        } else {
            Ok(Self::from_f64_array(&self.to_f64_array(), dtype))
        }
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::from_f64_array(&ArcArray::zeros(IxDyn(shape)), dtype)
    }

    pub fn ones(shape: &[usize], dtype: DType) -> Self {
        Self::from_f64_array(&ArcArray::ones(IxDyn(shape)), dtype)
    }

    pub fn random_uniform<G: Rng>(
        shape: &[usize],
        low: f64,
        high: f64,
        dtype: DType,
        rng: &mut G,
    ) -> Result<Self, NDArrayNumericTensorError> {
        if !dtype.is_float() {
            return Err(NDArrayNumericTensorError::UnsupportedOperationForDTypes(
                "random_uniform".to_string(),
                vec![dtype],
            ));
        }
        let n: usize = shape.iter().product();
        let values: Vec<f64> = (0..n)
            .map(|_| if high > low { rng.gen_range(low..high) } else { low })
            .collect();
        let x = ArcArray::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::from_f64_array(&x, dtype))
    }

    fn promoted(a: &Self, b: &Self) -> Result<(Self, Self), NDArrayNumericTensorError> {
        let dtype = DType::promote(a.dtype(), b.dtype());
        Ok((a.cast(dtype)?, b.cast(dtype)?))
    }

    fn try_binary_op(a: &Self, b: &Self, op: BinaryOperation) -> Result<Self, NDArrayNumericTensorError> {
        let (a, b) = Self::promoted(a, b)?;
        Ok(match (&a, &b) {
            (NDArrayNumericTensor::F64(a), NDArrayNumericTensor::F64(b)) => NDArrayNumericTensor::F64(op.apply(a, b)?),
            (NDArrayNumericTensor::F32(a), NDArrayNumericTensor::F32(b)) => NDArrayNumericTensor::F32(op.apply(a, b)?),
            (NDArrayNumericTensor::BF16(a), NDArrayNumericTensor::BF16(b)) => NDArrayNumericTensor::BF16(op.apply(a, b)?),
            (NDArrayNumericTensor::F16(a), NDArrayNumericTensor::F16(b)) => NDArrayNumericTensor::F16(op.apply(a, b)?),
            (NDArrayNumericTensor::I64(a), NDArrayNumericTensor::I64(b)) => NDArrayNumericTensor::I64(op.apply(a, b)?),
            (NDArrayNumericTensor::I32(a), NDArrayNumericTensor::I32(b)) => NDArrayNumericTensor::I32(op.apply(a, b)?),
            (NDArrayNumericTensor::U32(a), NDArrayNumericTensor::U32(b)) => NDArrayNumericTensor::U32(op.apply(a, b)?),
            (NDArrayNumericTensor::U8(a), NDArrayNumericTensor::U8(b)) => NDArrayNumericTensor::U8(op.apply(a, b)?),
            _ => {
                return Err(NDArrayNumericTensorError::UnsupportedOperationForDTypes(
                    op.to_string(),
                    vec![a.dtype(), b.dtype()],
                ));
            }
        })
    }

    pub fn add(a: &Self, b: &Self) -> Result<Self, NDArrayNumericTensorError> {
        Self::try_binary_op(a, b, BinaryOperation::Add)
    }

    pub fn sub(a: &Self, b: &Self) -> Result<Self, NDArrayNumericTensorError> {
        Self::try_binary_op(a, b, BinaryOperation::Sub)
    }

    pub fn mul(a: &Self, b: &Self) -> Result<Self, NDArrayNumericTensorError> {
        Self::try_binary_op(a, b, BinaryOperation::Mul)
    }

    pub fn div(a: &Self, b: &Self) -> Result<Self, NDArrayNumericTensorError> {
        Self::try_binary_op(a, b, BinaryOperation::Div)
    }

    pub fn neg(&self) -> Result<Self, NDArrayNumericTensorError> {
        Ok(match self {
            NDArrayNumericTensor::F64(x) => NDArrayNumericTensor::F64(x.mapv(|x| -x).into_shared()),
            NDArrayNumericTensor::F32(x) => NDArrayNumericTensor::F32(x.mapv(|x| -x).into_shared()),
            NDArrayNumericTensor::BF16(x) => NDArrayNumericTensor::BF16(x.mapv(|x| -x).into_shared()),
            NDArrayNumericTensor::F16(x) => NDArrayNumericTensor::F16(x.mapv(|x| -x).into_shared()),
            NDArrayNumericTensor::I64(x) => NDArrayNumericTensor::I64(x.mapv(|x| -x).into_shared()),
            NDArrayNumericTensor::I32(x) => NDArrayNumericTensor::I32(x.mapv(|x| -x).into_shared()),
            _ => {
                return Err(NDArrayNumericTensorError::UnsupportedOperationForDTypes(
                    "neg".to_string(),
                    vec![self.dtype()],
                ));
            }
        })
    }

    pub fn abs(&self) -> Result<Self, NDArrayNumericTensorError> {
        Ok(match self {
            NDArrayNumericTensor::F64(x) => NDArrayNumericTensor::F64(x.mapv(f64::abs).into_shared()),
            NDArrayNumericTensor::F32(x) => NDArrayNumericTensor::F32(x.mapv(f32::abs).into_shared()),
            NDArrayNumericTensor::BF16(x) => {
                NDArrayNumericTensor::BF16(x.mapv(|x| bf16::from_f32(x.to_f32().abs())).into_shared())
            }
            NDArrayNumericTensor::F16(x) => {
                NDArrayNumericTensor::F16(x.mapv(|x| f16::from_f32(x.to_f32().abs())).into_shared())
            }
            NDArrayNumericTensor::I64(x) => NDArrayNumericTensor::I64(x.mapv(i64::abs).into_shared()),
            NDArrayNumericTensor::I32(x) => NDArrayNumericTensor::I32(x.mapv(i32::abs).into_shared()),
            NDArrayNumericTensor::U32(_) | NDArrayNumericTensor::U8(_) => self.clone(),
            NDArrayNumericTensor::BOOL(_) => {
                return Err(NDArrayNumericTensorError::UnsupportedOperationForDTypes(
                    "abs".to_string(),
                    vec![self.dtype()],
                ));
            }
        })
    }

    fn try_unary_op(&self, op: UnaryOperation) -> Result<Self, NDArrayNumericTensorError> {
        // Integer inputs produce float64 like numpy does
        let input = if self.dtype().is_float() {
            self.clone()
        } else {
            self.cast(DType::F64)?
        };
        Ok(match &input {
            NDArrayNumericTensor::F64(x) => NDArrayNumericTensor::F64(op.apply(x)),
            NDArrayNumericTensor::F32(x) => NDArrayNumericTensor::F32(op.apply(x)),
            NDArrayNumericTensor::BF16(x) => NDArrayNumericTensor::BF16(op.apply(x)),
            NDArrayNumericTensor::F16(x) => NDArrayNumericTensor::F16(op.apply(x)),
            _ => {
                return Err(NDArrayNumericTensorError::UnsupportedOperationForDTypes(
                    op.to_string(),
                    vec![self.dtype()],
                ));
            }
        })
    }

    pub fn exp(&self) -> Result<Self, NDArrayNumericTensorError> {
        self.try_unary_op(UnaryOperation::Exp)
    }

    pub fn sqrt(&self) -> Result<Self, NDArrayNumericTensorError> {
        self.try_unary_op(UnaryOperation::Sqrt)
    }

    /// Sum over every element, producing a rank-0 tensor.
    pub fn sum_all(&self) -> Result<Self, NDArrayNumericTensorError> {
        let scalar = IxDyn(&[]);
        Ok(match self {
            NDArrayNumericTensor::F64(x) => NDArrayNumericTensor::F64(ArcArray::from_elem(scalar, x.sum())),
            NDArrayNumericTensor::F32(x) => NDArrayNumericTensor::F32(ArcArray::from_elem(scalar, x.sum())),
            NDArrayNumericTensor::BF16(_) | NDArrayNumericTensor::F16(_) => {
                // Accumulate in f32 to keep precision
                self.cast(DType::F32)?.sum_all()?.cast(self.dtype())?
            }
            NDArrayNumericTensor::I64(x) => NDArrayNumericTensor::I64(ArcArray::from_elem(scalar, x.sum())),
            NDArrayNumericTensor::I32(x) => NDArrayNumericTensor::I32(ArcArray::from_elem(scalar, x.sum())),
            NDArrayNumericTensor::U32(x) => NDArrayNumericTensor::U32(ArcArray::from_elem(scalar, x.sum())),
            NDArrayNumericTensor::U8(_) | NDArrayNumericTensor::BOOL(_) => self.cast(DType::I64)?.sum_all()?,
        })
    }

    /// Mean over every element, producing a rank-0 float tensor.
    pub fn mean_all(&self) -> Result<Self, NDArrayNumericTensorError> {
        let n = self.num_elements();
        let out_dtype = if self.dtype().is_float() {
            self.dtype()
        } else {
            DType::F64
        };
        let total: f64 = self.to_f64_array().sum();
        let mean = if n == 0 { f64::NAN } else { total / n as f64 };
        Ok(Self::from_f64_array(&ArcArray::from_elem(IxDyn(&[]), mean), out_dtype))
    }

    pub fn matmul(a: &Self, b: &Self) -> Result<Self, NDArrayNumericTensorError> {
        let (a, b) = Self::promoted(a, b)?;
        Ok(match (&a, &b) {
            (NDArrayNumericTensor::F64(a), NDArrayNumericTensor::F64(b)) => NDArrayNumericTensor::F64(ops::matmul(a, b)?),
            (NDArrayNumericTensor::F32(a), NDArrayNumericTensor::F32(b)) => NDArrayNumericTensor::F32(ops::matmul(a, b)?),
            (NDArrayNumericTensor::I64(a), NDArrayNumericTensor::I64(b)) => NDArrayNumericTensor::I64(ops::matmul(a, b)?),
            (NDArrayNumericTensor::I32(a), NDArrayNumericTensor::I32(b)) => NDArrayNumericTensor::I32(ops::matmul(a, b)?),
            (NDArrayNumericTensor::U32(a), NDArrayNumericTensor::U32(b)) => NDArrayNumericTensor::U32(ops::matmul(a, b)?),
            (NDArrayNumericTensor::U8(a), NDArrayNumericTensor::U8(b)) => NDArrayNumericTensor::U8(ops::matmul(a, b)?),
            (NDArrayNumericTensor::BF16(_), _) | (NDArrayNumericTensor::F16(_), _) => {
                let dtype = a.dtype();
                Self::matmul(&a.cast(DType::F32)?, &b.cast(DType::F32)?)?.cast(dtype)?
            }
            _ => {
                return Err(NDArrayNumericTensorError::UnsupportedOperationForDTypes(
                    "matmul".to_string(),
                    vec![a.dtype(), b.dtype()],
                ));
            }
        })
    }

    pub fn matrix_transpose(&self) -> Self {
        match self {
            NDArrayNumericTensor::F64(x) => NDArrayNumericTensor::F64(ops::matrix_transpose(x)),
            NDArrayNumericTensor::F32(x) => NDArrayNumericTensor::F32(ops::matrix_transpose(x)),
            NDArrayNumericTensor::BF16(x) => NDArrayNumericTensor::BF16(ops::matrix_transpose(x)),
            NDArrayNumericTensor::F16(x) => NDArrayNumericTensor::F16(ops::matrix_transpose(x)),
            NDArrayNumericTensor::I64(x) => NDArrayNumericTensor::I64(ops::matrix_transpose(x)),
            NDArrayNumericTensor::I32(x) => NDArrayNumericTensor::I32(ops::matrix_transpose(x)),
            NDArrayNumericTensor::U32(x) => NDArrayNumericTensor::U32(ops::matrix_transpose(x)),
            NDArrayNumericTensor::U8(x) => NDArrayNumericTensor::U8(ops::matrix_transpose(x)),
            NDArrayNumericTensor::BOOL(x) => NDArrayNumericTensor::BOOL(ops::matrix_transpose(x)),
        }
    }
}

impl core::fmt::Display for NDArrayNumericTensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for_each_variant!(self, x => write!(f, "{x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_promotes_mixed_dtypes() {
        let a = NDArrayNumericTensor::from_vec(vec![1i64, 2, 3]);
        let b = NDArrayNumericTensor::from_vec(vec![0.5f32, 0.5, 0.5]);
        let c = NDArrayNumericTensor::add(&a, &b).unwrap();
        assert_eq!(c.dtype(), DType::F32);
        assert_eq!(c.to_f64_vec(), vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_integer_cast_is_exact() {
        let big = (1i64 << 60) + 1;
        let a = NDArrayNumericTensor::from_vec(vec![big]);
        let b = a.cast(DType::I64).unwrap().cast(DType::I64).unwrap();
        assert_eq!(b.try_to_vec::<i64>().unwrap(), vec![big]);
        let c = NDArrayNumericTensor::from_vec(vec![true, false]).cast(DType::U8).unwrap();
        assert_eq!(c.try_to_vec::<u8>().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_sqrt_of_integers_is_float64() {
        let a = NDArrayNumericTensor::from_vec(vec![4i32, 9]);
        let b = a.sqrt().unwrap();
        assert_eq!(b.dtype(), DType::F64);
        assert_eq!(b.to_f64_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_sum_and_mean_are_rank_zero() {
        let a = NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 6.0], &[2, 2]).unwrap();
        let s = a.sum_all().unwrap();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.to_f64_vec(), vec![12.0]);
        let m = a.mean_all().unwrap();
        assert_eq!(m.dtype(), DType::F32);
        assert_eq!(m.to_f64_vec(), vec![3.0]);
    }

    #[test]
    fn test_bool_arithmetic_is_rejected() {
        let a = NDArrayNumericTensor::from_vec(vec![true]);
        assert!(NDArrayNumericTensor::add(&a, &a).is_err());
    }
}
