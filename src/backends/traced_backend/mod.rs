//! Reference backend in the style of tracing autodiff frameworks: arrays can
//! be marked as differentiable variables, and the module owns a seedable
//! random generator that is published as the `RNG` global while active.

mod tensor;

use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;

pub use tensor::TracedTensor;

use crate::backends::BackendModule;
use crate::backends::ndarray_backend::{NDArrayNumericTensor, is_literal, reject_axis, weak_literal};
use crate::dtype::DType;
use crate::handler::converter::ConversionError;
use crate::handler::function::{FunctionError, ModuleTable};
use crate::handler::globals::GlobalState;
use crate::handler::namespace::Namespace;
use crate::native_array::NativeArray;
use crate::value::{Args, Value};

const VERSION: &str = "0.4.30";

/// Name of the global attribute holding the active random generator.
pub const RNG_ATTR: &str = "RNG";

/// Random generator handle shared through the `RNG` global.
pub struct TracedRng(Mutex<StdRng>);

impl TracedRng {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    pub fn reseed(&self, seed: u64) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
    }
}

fn tensor(value: &Value, function: &str, argument: &str) -> Result<TracedTensor, FunctionError> {
    match value {
        Value::Native(NativeArray::Traced(x)) => Ok(x.clone()),
        v if is_literal(v) => Ok(TracedTensor::new(NDArrayNumericTensor::from_value(v, None)?)),
        other => Err(FunctionError::invalid_argument(function, argument, "traced tensor", other)),
    }
}

fn unary_arg(args: &Args, function: &str) -> Result<TracedTensor, FunctionError> {
    tensor(args.require(0, "x", function)?, function, "x")
}

fn binary_args(args: &Args, function: &str) -> Result<(TracedTensor, TracedTensor), FunctionError> {
    let a = args.require(0, "x1", function)?;
    let b = args.require(1, "x2", function)?;
    Ok(match (is_literal(a), is_literal(b)) {
        (true, false) => {
            let b = tensor(b, function, "x2")?;
            (TracedTensor::new(weak_literal(a, Some(b.data().dtype()))?), b)
        }
        (false, true) => {
            let a = tensor(a, function, "x1")?;
            let dtype = a.data().dtype();
            (a, TracedTensor::new(weak_literal(b, Some(dtype))?))
        }
        _ => (tensor(a, function, "x1")?, tensor(b, function, "x2")?),
    })
}

fn native(x: TracedTensor) -> Result<Value, FunctionError> {
    Ok(Value::Native(NativeArray::Traced(x)))
}

fn unary<F>(args: &Args, function: &str, f: F) -> Result<Value, FunctionError>
where
    F: Fn(&NDArrayNumericTensor) -> Result<NDArrayNumericTensor, FunctionError>,
{
    let x = unary_arg(args, function)?;
    native(TracedTensor::derived(f(x.data())?, &[&x]))
}

fn binary<F>(args: &Args, function: &str, f: F) -> Result<Value, FunctionError>
where
    F: Fn(&NDArrayNumericTensor, &NDArrayNumericTensor) -> Result<NDArrayNumericTensor, FunctionError>,
{
    let (a, b) = binary_args(args, function)?;
    native(TracedTensor::derived(f(a.data(), b.data())?, &[&a, &b]))
}

/// The generator published as the `RNG` global, else the module's own.
fn active_rng(ns: &Namespace, own: &Arc<TracedRng>) -> Arc<TracedRng> {
    ns.globals().attr::<TracedRng>(RNG_ATTR).unwrap_or_else(|| own.clone())
}

pub struct TracedBackend {
    table: ModuleTable,
    rng: Arc<TracedRng>,
}

impl TracedBackend {
    pub fn new() -> Self {
        let rng = Arc::new(TracedRng::new(0));
        Self {
            table: build_table(rng.clone()),
            rng,
        }
    }

    pub fn rng(&self) -> &Arc<TracedRng> {
        &self.rng
    }
}

impl Default for TracedBackend {
    fn default() -> Self {
        Self::new()
    }
}

// No native `mean`: the library composes it from `sum`.
fn build_table(rng: Arc<TracedRng>) -> ModuleTable {
    let seed_rng = rng.clone();
    ModuleTable::new("backends.traced")
        .function("asarray", |_, args| {
            let obj = args.require(0, "obj", "asarray")?;
            let dtype = args.dtype_arg(1, "dtype", "asarray")?;
            match obj {
                Value::Native(NativeArray::Traced(x)) => match dtype {
                    Some(d) => native(TracedTensor::derived(x.data().cast(d)?, &[x])),
                    None => native(x.clone()),
                },
                v if is_literal(v) => native(TracedTensor::new(NDArrayNumericTensor::from_value(v, dtype)?)),
                other => Err(FunctionError::invalid_argument("asarray", "obj", "array-like", other)),
            }
        })
        .function("zeros", |_, args| {
            let shape = args.shape_arg(0, "shape", "zeros")?;
            let dtype = args.dtype_arg(1, "dtype", "zeros")?.unwrap_or(DType::F32);
            native(TracedTensor::new(NDArrayNumericTensor::zeros(&shape, dtype)))
        })
        .function("ones", |_, args| {
            let shape = args.shape_arg(0, "shape", "ones")?;
            let dtype = args.dtype_arg(1, "dtype", "ones")?.unwrap_or(DType::F32);
            native(TracedTensor::new(NDArrayNumericTensor::ones(&shape, dtype)))
        })
        .function("add", |_, args| binary(args, "add", |a, b| Ok(NDArrayNumericTensor::add(a, b)?)))
        .function("subtract", |_, args| {
            binary(args, "subtract", |a, b| Ok(NDArrayNumericTensor::sub(a, b)?))
        })
        .function("multiply", |_, args| {
            binary(args, "multiply", |a, b| Ok(NDArrayNumericTensor::mul(a, b)?))
        })
        .function("divide", |_, args| {
            binary(args, "divide", |a, b| {
                if a.dtype().is_float() || b.dtype().is_float() {
                    Ok(NDArrayNumericTensor::div(a, b)?)
                } else {
                    Ok(NDArrayNumericTensor::div(&a.cast(DType::F64)?, &b.cast(DType::F64)?)?)
                }
            })
        })
        .function("negative", |_, args| unary(args, "negative", |x| Ok(x.neg()?)))
        .function("abs", |_, args| unary(args, "abs", |x| Ok(x.abs()?)))
        .function("exp", |_, args| unary(args, "exp", |x| Ok(x.exp()?)))
        .function("sqrt", |_, args| unary(args, "sqrt", |x| Ok(x.sqrt()?)))
        .function("sum", |_, args| {
            reject_axis(args, "sum")?;
            unary(args, "sum", |x| Ok(x.sum_all()?))
        })
        .function("astype", |_, args| {
            let dtype = args
                .dtype_arg(1, "dtype", "astype")?
                .ok_or_else(|| FunctionError::MissingArgument {
                    function: "astype".to_string(),
                    argument: "dtype".to_string(),
                })?;
            unary(args, "astype", |x| Ok(x.cast(dtype)?))
        })
        .function("shape", |_, args| {
            Ok(Value::Shape(unary_arg(args, "shape")?.data().shape().to_vec()))
        })
        .function("dtype", |_, args| Ok(Value::DType(unary_arg(args, "dtype")?.data().dtype())))
        .function("stop_gradient", |_, args| native(unary_arg(args, "stop_gradient")?.detach()))
        .module(
            "linalg",
            ModuleTable::new("backends.traced.linalg")
                .function("matmul", |_, args| {
                    binary(args, "matmul", |a, b| Ok(NDArrayNumericTensor::matmul(a, b)?))
                })
                .function("matrix_transpose", |_, args| {
                    unary(args, "matrix_transpose", |x| Ok(x.matrix_transpose()))
                }),
        )
        .module(
            "random",
            ModuleTable::new("backends.traced.random")
                .function("random_uniform", move |ns, args| {
                    let low = args.float_arg(0, "low", "random_uniform", 0.0)?;
                    let high = args.float_arg(1, "high", "random_uniform", 1.0)?;
                    let shape = match args.arg(2, "shape") {
                        Some(_) => args.shape_arg(2, "shape", "random_uniform")?,
                        None => vec![],
                    };
                    let dtype = args.dtype_arg(3, "dtype", "random_uniform")?.unwrap_or(DType::F32);
                    let rng = active_rng(ns, &rng);
                    let mut guard = rng.0.lock().unwrap_or_else(PoisonError::into_inner);
                    let data = NDArrayNumericTensor::random_uniform(&shape, low, high, dtype, &mut *guard)?;
                    native(TracedTensor::new(data))
                })
                .function("seed", move |ns, args| {
                    let v = args.require(0, "seed", "seed")?;
                    let seed = v
                        .as_int()
                        .ok_or_else(|| FunctionError::invalid_argument("seed", "seed", "int", v))?;
                    active_rng(ns, &seed_rng).reseed(seed as u64);
                    Ok(Value::None)
                }),
        )
}

impl BackendModule for TracedBackend {
    fn name(&self) -> &str {
        crate::backends::TRACED
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn module_table(&self) -> &ModuleTable {
        &self.table
    }

    fn to_neutral(&self, payload: &NativeArray) -> Result<NDArrayNumericTensor, ConversionError> {
        match payload {
            NativeArray::Traced(x) => Ok(x.data().clone()),
            other => Err(ConversionError::unsupported(self.name(), other)),
        }
    }

    fn from_neutral(&self, neutral: &NDArrayNumericTensor) -> Result<NativeArray, ConversionError> {
        Ok(NativeArray::Traced(TracedTensor::new(neutral.clone())))
    }

    fn is_variable(&self, payload: &NativeArray) -> bool {
        matches!(payload, NativeArray::Traced(x) if x.requires_grad())
    }

    fn variable_data(&self, payload: &NativeArray) -> Result<NativeArray, ConversionError> {
        match payload {
            NativeArray::Traced(x) => Ok(NativeArray::Traced(x.detach())),
            other => Err(ConversionError::unsupported(self.name(), other)),
        }
    }

    fn to_variable(&self, payload: NativeArray) -> Result<NativeArray, ConversionError> {
        match payload {
            NativeArray::Traced(x) => Ok(NativeArray::Traced(TracedTensor::variable(x.data().clone()))),
            other => Err(ConversionError::unsupported(self.name(), &other)),
        }
    }

    fn activate(&self, globals: &mut GlobalState) {
        globals.set_attr(RNG_ATTR, self.rng.clone());
    }

    fn deactivate(&self, globals: &mut GlobalState) {
        globals.del_attr(RNG_ATTR);
    }
}
