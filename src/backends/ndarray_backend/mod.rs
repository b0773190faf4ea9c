pub mod conversions;
pub mod numeric_tensor;
pub mod ops;

use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;

pub use numeric_tensor::{NDArrayNumericTensor, NDArrayNumericTensorError};

use crate::backends::BackendModule;
use crate::dtype::DType;
use crate::handler::converter::ConversionError;
use crate::handler::function::{FunctionError, ModuleTable};
use crate::handler::globals::{Device, GlobalState};
use crate::native_array::NativeArray;
use crate::value::{Args, Value};

const VERSION: &str = "0.16.1";

/// Scalars and (nested) lists passed where an array is expected.
pub(crate) fn is_literal(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::List(_))
}

/// Converts a literal, taking the dtype of the array it meets when that
/// loses nothing: float arrays absorb any literal, integer arrays absorb
/// integer and bool literals.
pub(crate) fn weak_literal(value: &Value, other: Option<DType>) -> Result<NDArrayNumericTensor, FunctionError> {
    let tensor = NDArrayNumericTensor::from_value(value, None)?;
    Ok(match other {
        Some(dtype) if dtype.is_float() || (!tensor.dtype().is_float() && dtype != DType::BOOL) => tensor.cast(dtype)?,
        _ => tensor,
    })
}

pub(crate) fn reject_axis(args: &Args, function: &str) -> Result<(), FunctionError> {
    match args.get_kwarg("axis") {
        Some(v) if !v.is_none() => Err(FunctionError::invalid_argument(function, "axis", "full reduction", v)),
        _ => Ok(()),
    }
}

fn tensor(value: &Value, function: &str, argument: &str) -> Result<NDArrayNumericTensor, FunctionError> {
    match value {
        Value::Native(NativeArray::NDArray(x)) => Ok(x.clone()),
        v if is_literal(v) => Ok(NDArrayNumericTensor::from_value(v, None)?),
        other => Err(FunctionError::invalid_argument(function, argument, "ndarray tensor", other)),
    }
}

fn unary_arg(args: &Args, function: &str) -> Result<NDArrayNumericTensor, FunctionError> {
    tensor(args.require(0, "x", function)?, function, "x")
}

fn binary_args(args: &Args, function: &str) -> Result<(NDArrayNumericTensor, NDArrayNumericTensor), FunctionError> {
    let a = args.require(0, "x1", function)?;
    let b = args.require(1, "x2", function)?;
    Ok(match (is_literal(a), is_literal(b)) {
        (true, false) => {
            let b = tensor(b, function, "x2")?;
            (weak_literal(a, Some(b.dtype()))?, b)
        }
        (false, true) => {
            let a = tensor(a, function, "x1")?;
            let dtype = a.dtype();
            (a, weak_literal(b, Some(dtype))?)
        }
        _ => (tensor(a, function, "x1")?, tensor(b, function, "x2")?),
    })
}

fn native(x: NDArrayNumericTensor) -> Result<Value, FunctionError> {
    Ok(Value::Native(NativeArray::NDArray(x)))
}

/// The CPU array backend and implicit default.
pub struct NDArrayBackend {
    table: ModuleTable,
}

impl NDArrayBackend {
    pub fn new() -> Self {
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(0)));
        Self {
            table: build_table(rng),
        }
    }
}

impl Default for NDArrayBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn build_table(rng: Arc<Mutex<StdRng>>) -> ModuleTable {
    let seed_rng = rng.clone();
    ModuleTable::new("backends.ndarray")
        .function("asarray", |_, args| {
            let obj = args.require(0, "obj", "asarray")?;
            let dtype = args.dtype_arg(1, "dtype", "asarray")?;
            match obj {
                Value::Native(NativeArray::NDArray(x)) => native(match dtype {
                    Some(d) => x.cast(d)?,
                    None => x.clone(),
                }),
                v if is_literal(v) => native(NDArrayNumericTensor::from_value(v, dtype)?),
                other => Err(FunctionError::invalid_argument("asarray", "obj", "array-like", other)),
            }
        })
        .function("zeros", |_, args| {
            let shape = args.shape_arg(0, "shape", "zeros")?;
            let dtype = args.dtype_arg(1, "dtype", "zeros")?.unwrap_or(DType::F32);
            native(NDArrayNumericTensor::zeros(&shape, dtype))
        })
        .function("ones", |_, args| {
            let shape = args.shape_arg(0, "shape", "ones")?;
            let dtype = args.dtype_arg(1, "dtype", "ones")?.unwrap_or(DType::F32);
            native(NDArrayNumericTensor::ones(&shape, dtype))
        })
        .function("add", |_, args| {
            let (a, b) = binary_args(args, "add")?;
            native(NDArrayNumericTensor::add(&a, &b)?)
        })
        .function("subtract", |_, args| {
            let (a, b) = binary_args(args, "subtract")?;
            native(NDArrayNumericTensor::sub(&a, &b)?)
        })
        .function("multiply", |_, args| {
            let (a, b) = binary_args(args, "multiply")?;
            native(NDArrayNumericTensor::mul(&a, &b)?)
        })
        .function("divide", |_, args| {
            let (a, b) = binary_args(args, "divide")?;
            // True division, integers included
            let (a, b) = if a.dtype().is_float() || b.dtype().is_float() {
                (a, b)
            } else {
                (a.cast(DType::F64)?, b.cast(DType::F64)?)
            };
            native(NDArrayNumericTensor::div(&a, &b)?)
        })
        .function("negative", |_, args| native(unary_arg(args, "negative")?.neg()?))
        .function("abs", |_, args| native(unary_arg(args, "abs")?.abs()?))
        .function("exp", |_, args| native(unary_arg(args, "exp")?.exp()?))
        .function("sqrt", |_, args| native(unary_arg(args, "sqrt")?.sqrt()?))
        .function("sum", |_, args| {
            reject_axis(args, "sum")?;
            native(unary_arg(args, "sum")?.sum_all()?)
        })
        .function("mean", |_, args| {
            reject_axis(args, "mean")?;
            native(unary_arg(args, "mean")?.mean_all()?)
        })
        .function("astype", |_, args| {
            let x = unary_arg(args, "astype")?;
            let dtype = args
                .dtype_arg(1, "dtype", "astype")?
                .ok_or_else(|| FunctionError::MissingArgument {
                    function: "astype".to_string(),
                    argument: "dtype".to_string(),
                })?;
            native(x.cast(dtype)?)
        })
        .function("shape", |_, args| Ok(Value::Shape(unary_arg(args, "shape")?.shape().to_vec())))
        .function("dtype", |_, args| Ok(Value::DType(unary_arg(args, "dtype")?.dtype())))
        .function("stop_gradient", |_, args| native(unary_arg(args, "stop_gradient")?))
        .module(
            "linalg",
            ModuleTable::new("backends.ndarray.linalg")
                .function("matmul", |_, args| {
                    let (a, b) = binary_args(args, "matmul")?;
                    native(NDArrayNumericTensor::matmul(&a, &b)?)
                })
                .function("matrix_transpose", |_, args| {
                    native(unary_arg(args, "matrix_transpose")?.matrix_transpose())
                }),
        )
        .module(
            "random",
            ModuleTable::new("backends.ndarray.random")
                .function("random_uniform", move |_, args| {
                    let low = args.float_arg(0, "low", "random_uniform", 0.0)?;
                    let high = args.float_arg(1, "high", "random_uniform", 1.0)?;
                    let shape = match args.arg(2, "shape") {
                        Some(_) => args.shape_arg(2, "shape", "random_uniform")?,
                        None => vec![],
                    };
                    let dtype = args.dtype_arg(3, "dtype", "random_uniform")?.unwrap_or(DType::F32);
                    let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                    native(NDArrayNumericTensor::random_uniform(&shape, low, high, dtype, &mut *rng)?)
                })
                .function("seed", move |_, args| {
                    let v = args.require(0, "seed", "seed")?;
                    let seed = v
                        .as_int()
                        .ok_or_else(|| FunctionError::invalid_argument("seed", "seed", "int", v))?;
                    *seed_rng.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed as u64);
                    Ok(Value::None)
                }),
        )
}

impl BackendModule for NDArrayBackend {
    fn name(&self) -> &str {
        crate::backends::NDARRAY
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn module_table(&self) -> &ModuleTable {
        &self.table
    }

    fn to_neutral(&self, payload: &NativeArray) -> Result<NDArrayNumericTensor, ConversionError> {
        match payload {
            NativeArray::NDArray(x) => Ok(x.clone()),
            other => Err(ConversionError::unsupported(self.name(), other)),
        }
    }

    fn from_neutral(&self, neutral: &NDArrayNumericTensor) -> Result<NativeArray, ConversionError> {
        Ok(NativeArray::NDArray(neutral.clone()))
    }

    fn activate(&self, globals: &mut GlobalState) {
        globals.set_default_device(Device::Cpu);
    }

    fn deactivate(&self, globals: &mut GlobalState) {
        globals.unset_default_device();
    }
}
