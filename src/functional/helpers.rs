//! Typed calls into the global handler's current namespace.

use crate::args;
use crate::array::Array;
use crate::dtype::DType;
use crate::handler::converter::ConversionError;
use crate::handler::function::FunctionError;
use crate::handler::{call, handler};
use crate::value::Value;

fn value(x: impl Into<Value>) -> Value {
    x.into()
}

fn array(function: &str, value: Value) -> Result<Array, FunctionError> {
    match value {
        Value::Array(x) => Ok(x),
        other => Err(FunctionError::invalid_argument(function, "return", "array", &other)),
    }
}

pub fn asarray(obj: impl Into<Value>, dtype: Option<DType>) -> Result<Array, FunctionError> {
    array("asarray", call("asarray", args![value(obj), dtype])?)
}

pub fn zeros(shape: &[usize], dtype: DType) -> Result<Array, FunctionError> {
    array("zeros", call("zeros", args![Value::Shape(shape.to_vec()), dtype])?)
}

pub fn ones(shape: &[usize], dtype: DType) -> Result<Array, FunctionError> {
    array("ones", call("ones", args![Value::Shape(shape.to_vec()), dtype])?)
}

pub fn add(x1: impl Into<Value>, x2: impl Into<Value>) -> Result<Array, FunctionError> {
    array("add", call("add", args![value(x1), value(x2)])?)
}

pub fn subtract(x1: impl Into<Value>, x2: impl Into<Value>) -> Result<Array, FunctionError> {
    array("subtract", call("subtract", args![value(x1), value(x2)])?)
}

pub fn multiply(x1: impl Into<Value>, x2: impl Into<Value>) -> Result<Array, FunctionError> {
    array("multiply", call("multiply", args![value(x1), value(x2)])?)
}

pub fn divide(x1: impl Into<Value>, x2: impl Into<Value>) -> Result<Array, FunctionError> {
    array("divide", call("divide", args![value(x1), value(x2)])?)
}

pub fn sum(x: impl Into<Value>) -> Result<Array, FunctionError> {
    array("sum", call("sum", args![value(x)])?)
}

pub fn mean(x: impl Into<Value>) -> Result<Array, FunctionError> {
    array("mean", call("mean", args![value(x)])?)
}

pub fn matmul(x1: impl Into<Value>, x2: impl Into<Value>) -> Result<Array, FunctionError> {
    array("matmul", call("linalg.matmul", args![value(x1), value(x2)])?)
}

pub fn random_uniform(low: f64, high: f64, shape: &[usize], dtype: DType) -> Result<Array, FunctionError> {
    let value = call(
        "random.random_uniform",
        args![low, high, Value::Shape(shape.to_vec()), dtype],
    )?;
    array("random_uniform", value)
}

pub fn seed(seed: u64) -> Result<(), FunctionError> {
    call("random.seed", args![seed as i64])?;
    Ok(())
}

/// Values of `x` as `f64`, read through the backend that owns its payload.
pub fn to_f64_vec(x: &Array) -> Result<Vec<f64>, ConversionError> {
    let payload = x.data();
    let module = handler()
        .registry()
        .module_for_payload(&payload)
        .ok_or_else(|| ConversionError::UnrecognizedPayload(payload.type_name().to_string()))??;
    Ok(module.to_neutral(&payload)?.to_f64_vec())
}
