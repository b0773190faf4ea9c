//! Backend over `candle_core` tensors. Differentiable variables are
//! `candle_core::Var`s; candle has no `int32` or `bool` storage, so those
//! arrays arrive as `int64` and `uint8`.

use candle_core::{Device, Tensor, Var};

use crate::backends::BackendModule;
use crate::backends::ndarray_backend::{NDArrayNumericTensor, is_literal, reject_axis, weak_literal};
use crate::dtype::{DType, DTypeError};
use crate::handler::converter::ConversionError;
use crate::handler::function::{FunctionError, ModuleTable, backend_fn};
use crate::handler::globals::{self, GlobalState};
use crate::handler::version::{Version, VersionRange};
use crate::native_array::NativeArray;
use crate::value::{Args, Value};

const VERSION: &str = "0.9.1";

const INVALID_DTYPES: [DType; 2] = [DType::I32, DType::BOOL];

pub(crate) fn load_to_device(value: &NDArrayNumericTensor, device: &Device) -> Result<Tensor, ConversionError> {
    let shape = value.shape().to_vec();
    Ok(match value {
        NDArrayNumericTensor::F64(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::F32(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::BF16(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::F16(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::I64(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::U32(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::U8(x) => Tensor::from_vec(x.iter().cloned().collect::<Vec<_>>(), shape, device)?,
        NDArrayNumericTensor::I32(_) => load_to_device(&value.cast(DType::I64)?, device)?,
        NDArrayNumericTensor::BOOL(_) => load_to_device(&value.cast(DType::U8)?, device)?,
    })
}

impl TryFrom<&Tensor> for NDArrayNumericTensor {
    type Error = ConversionError;
    fn try_from(value: &Tensor) -> Result<Self, Self::Error> {
        let shape = value.dims().to_vec();
        let flat = value.flatten_all()?;
        Ok(match value.dtype() {
            candle_core::DType::F64 => Self::from_vec_shape(flat.to_vec1::<f64>()?, &shape)?,
            candle_core::DType::F32 => Self::from_vec_shape(flat.to_vec1::<f32>()?, &shape)?,
            candle_core::DType::BF16 => Self::from_vec_shape(flat.to_vec1::<half::bf16>()?, &shape)?,
            candle_core::DType::F16 => Self::from_vec_shape(flat.to_vec1::<half::f16>()?, &shape)?,
            candle_core::DType::I64 => Self::from_vec_shape(flat.to_vec1::<i64>()?, &shape)?,
            candle_core::DType::U32 => Self::from_vec_shape(flat.to_vec1::<u32>()?, &shape)?,
            candle_core::DType::U8 => Self::from_vec_shape(flat.to_vec1::<u8>()?, &shape)?,
            other => Err(DTypeError::UnsupportedCandleDType(other))?,
        })
    }
}

fn candle_dtype(dtype: DType) -> Result<candle_core::DType, DTypeError> {
    candle_core::DType::try_from(dtype)
}

fn tensor(value: &Value, function: &str, argument: &str) -> Result<Tensor, FunctionError> {
    match value {
        Value::Native(NativeArray::Candle(x)) => Ok(x.clone()),
        Value::Native(NativeArray::CandleVar(x)) => Ok(x.as_tensor().clone()),
        v if is_literal(v) => Ok(load_to_device(&NDArrayNumericTensor::from_value(v, None)?, &Device::Cpu)?),
        other => Err(FunctionError::invalid_argument(function, argument, "candle tensor", other)),
    }
}

fn unary_arg(args: &Args, function: &str) -> Result<Tensor, FunctionError> {
    tensor(args.require(0, "x", function)?, function, "x")
}

fn literal_like(value: &Value, other: &Tensor) -> Result<Tensor, FunctionError> {
    let dtype = DType::try_from(other.dtype())?;
    Ok(load_to_device(&weak_literal(value, Some(dtype))?, other.device())?)
}

/// Operands of a binary op, literals weakly typed and both sides promoted
/// to a common dtype.
fn binary_args(args: &Args, function: &str) -> Result<(Tensor, Tensor), FunctionError> {
    let a = args.require(0, "x1", function)?;
    let b = args.require(1, "x2", function)?;
    let (a, b) = match (is_literal(a), is_literal(b)) {
        (true, false) => {
            let b = tensor(b, function, "x2")?;
            (literal_like(a, &b)?, b)
        }
        (false, true) => {
            let a = tensor(a, function, "x1")?;
            let b = literal_like(b, &a)?;
            (a, b)
        }
        _ => (tensor(a, function, "x1")?, tensor(b, function, "x2")?),
    };
    if a.dtype() == b.dtype() {
        return Ok((a, b));
    }
    let dtype = candle_dtype(DType::promote(DType::try_from(a.dtype())?, DType::try_from(b.dtype())?))?;
    Ok((a.to_dtype(dtype)?, b.to_dtype(dtype)?))
}

fn native(x: Tensor) -> Result<Value, FunctionError> {
    Ok(Value::Native(NativeArray::Candle(x)))
}

/// Matrix product with 1-D operands promoted to matrices and the added
/// axis removed again afterwards.
fn matmul_with<F>(args: &Args, f: F) -> Result<Value, FunctionError>
where
    F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
{
    let (a, b) = binary_args(args, "matmul")?;
    let (a_vec, b_vec) = (a.rank() == 1, b.rank() == 1);
    let a = if a_vec { a.unsqueeze(0)? } else { a };
    let b = if b_vec { b.unsqueeze(1)? } else { b };
    let mut out = f(&a, &b)?;
    if b_vec {
        out = out.squeeze(out.rank() - 1)?;
    }
    if a_vec {
        out = out.squeeze(out.rank().saturating_sub(if b_vec { 1 } else { 2 }))?;
    }
    native(out)
}

pub struct CandleBackend {
    table: ModuleTable,
}

impl CandleBackend {
    pub fn new() -> Self {
        Self { table: build_table() }
    }
}

impl Default for CandleBackend {
    fn default() -> Self {
        Self::new()
    }
}

// No `seed`: candle's CPU generator cannot be reseeded.
fn build_table() -> ModuleTable {
    ModuleTable::new("backends.candle")
        .function("asarray", |_, args| {
            let obj = args.require(0, "obj", "asarray")?;
            let x = match obj {
                Value::Native(NativeArray::Candle(_)) | Value::Native(NativeArray::CandleVar(_)) => {
                    tensor(obj, "asarray", "obj")?
                }
                v if is_literal(v) => load_to_device(&NDArrayNumericTensor::from_value(v, None)?, &Device::Cpu)?,
                other => return Err(FunctionError::invalid_argument("asarray", "obj", "array-like", other)),
            };
            match args.dtype_arg(1, "dtype", "asarray")? {
                Some(dtype) => native(x.to_dtype(candle_dtype(dtype)?)?),
                None => native(x),
            }
        })
        .function("zeros", |_, args| {
            let shape = args.shape_arg(0, "shape", "zeros")?;
            let dtype = args.dtype_arg(1, "dtype", "zeros")?.unwrap_or(DType::F32);
            native(Tensor::zeros(shape, candle_dtype(dtype)?, &Device::Cpu)?)
        })
        .function("ones", |_, args| {
            let shape = args.shape_arg(0, "shape", "ones")?;
            let dtype = args.dtype_arg(1, "dtype", "ones")?.unwrap_or(DType::F32);
            native(Tensor::ones(shape, candle_dtype(dtype)?, &Device::Cpu)?)
        })
        .function("add", |_, args| {
            let (a, b) = binary_args(args, "add")?;
            native(a.broadcast_add(&b)?)
        })
        .function("subtract", |_, args| {
            let (a, b) = binary_args(args, "subtract")?;
            native(a.broadcast_sub(&b)?)
        })
        .function("multiply", |_, args| {
            let (a, b) = binary_args(args, "multiply")?;
            native(a.broadcast_mul(&b)?)
        })
        .function("divide", |_, args| {
            let (a, b) = binary_args(args, "divide")?;
            if a.dtype().is_float() {
                native(a.broadcast_div(&b)?)
            } else {
                let f = candle_core::DType::F64;
                native(a.to_dtype(f)?.broadcast_div(&b.to_dtype(f)?)?)
            }
        })
        .function("negative", |_, args| native(unary_arg(args, "negative")?.neg()?))
        .function("abs", |_, args| native(unary_arg(args, "abs")?.abs()?))
        .function("exp", |_, args| native(unary_arg(args, "exp")?.exp()?))
        .function("sqrt", |_, args| {
            let x = unary_arg(args, "sqrt")?;
            let x = if x.dtype().is_float() { x } else { x.to_dtype(candle_core::DType::F64)? };
            native(x.sqrt()?)
        })
        .function("sum", |_, args| {
            reject_axis(args, "sum")?;
            native(unary_arg(args, "sum")?.sum_all()?)
        })
        .function("mean", |_, args| {
            reject_axis(args, "mean")?;
            let x = unary_arg(args, "mean")?;
            let x = if x.dtype().is_float() { x } else { x.to_dtype(candle_core::DType::F64)? };
            native(x.mean_all()?)
        })
        .function("astype", |_, args| {
            let x = unary_arg(args, "astype")?;
            let dtype = args
                .dtype_arg(1, "dtype", "astype")?
                .ok_or_else(|| FunctionError::MissingArgument {
                    function: "astype".to_string(),
                    argument: "dtype".to_string(),
                })?;
            native(x.to_dtype(candle_dtype(dtype)?)?)
        })
        .function("shape", |_, args| Ok(Value::Shape(unary_arg(args, "shape")?.dims().to_vec())))
        .function("dtype", |_, args| {
            Ok(Value::DType(DType::try_from(unary_arg(args, "dtype")?.dtype())?))
        })
        .function("stop_gradient", |_, args| native(unary_arg(args, "stop_gradient")?.detach()))
        .module(
            "linalg",
            ModuleTable::new("backends.candle.linalg")
                .versioned(
                    "matmul",
                    VersionRange::AndBelow(Version::new(&[0, 8])),
                    backend_fn(|_, args| matmul_with(args, |a, b| a.matmul(b))),
                )
                .versioned(
                    "matmul",
                    VersionRange::AndAbove(Version::new(&[0, 9])),
                    backend_fn(|_, args| matmul_with(args, |a, b| a.broadcast_matmul(b))),
                )
                .function("matrix_transpose_v_0p4_and_above", |_, args| {
                    native(unary_arg(args, "matrix_transpose")?.t()?)
                }),
        )
        .module(
            "random",
            ModuleTable::new("backends.candle.random").function("random_uniform", |_, args| {
                let low = args.float_arg(0, "low", "random_uniform", 0.0)?;
                let high = args.float_arg(1, "high", "random_uniform", 1.0)?;
                let shape = match args.arg(2, "shape") {
                    Some(_) => args.shape_arg(2, "shape", "random_uniform")?,
                    None => vec![],
                };
                let dtype = args.dtype_arg(3, "dtype", "random_uniform")?.unwrap_or(DType::F32);
                if !dtype.is_float() {
                    return Err(DTypeError::DTypeNotSupportedByBackend(dtype, "random_uniform".to_string()).into());
                }
                let x = Tensor::rand(low, high, shape, &Device::Cpu)?;
                native(x.to_dtype(candle_dtype(dtype)?)?)
            }),
        )
}

impl BackendModule for CandleBackend {
    fn name(&self) -> &str {
        crate::backends::CANDLE
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn module_table(&self) -> &ModuleTable {
        &self.table
    }

    fn invalid_dtypes(&self) -> &[DType] {
        &INVALID_DTYPES
    }

    fn to_neutral(&self, payload: &NativeArray) -> Result<NDArrayNumericTensor, ConversionError> {
        match payload {
            NativeArray::Candle(x) => NDArrayNumericTensor::try_from(x),
            NativeArray::CandleVar(x) => NDArrayNumericTensor::try_from(x.as_tensor()),
            other => Err(ConversionError::unsupported(self.name(), other)),
        }
    }

    fn from_neutral(&self, neutral: &NDArrayNumericTensor) -> Result<NativeArray, ConversionError> {
        Ok(NativeArray::Candle(load_to_device(neutral, &Device::Cpu)?))
    }

    fn is_variable(&self, payload: &NativeArray) -> bool {
        matches!(payload, NativeArray::CandleVar(_))
    }

    fn variable_data(&self, payload: &NativeArray) -> Result<NativeArray, ConversionError> {
        match payload {
            NativeArray::CandleVar(x) => Ok(NativeArray::Candle(x.as_detached_tensor())),
            other => Ok(other.clone()),
        }
    }

    fn to_variable(&self, payload: NativeArray) -> Result<NativeArray, ConversionError> {
        match payload {
            NativeArray::Candle(x) => Ok(NativeArray::CandleVar(Var::from_tensor(&x)?)),
            NativeArray::CandleVar(x) => Ok(NativeArray::CandleVar(x)),
            other => Err(ConversionError::unsupported(self.name(), &other)),
        }
    }

    fn activate(&self, globals: &mut GlobalState) {
        globals.set_default_device(globals::Device::Cpu);
    }

    fn deactivate(&self, globals: &mut GlobalState) {
        globals.unset_default_device();
    }
}
