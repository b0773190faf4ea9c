use std::collections::BTreeMap;

use crate::array::Array;
use crate::backends::ndarray_backend::NDArrayNumericTensor;
use crate::container::Container;
use crate::dtype::DType;
use crate::handler::function::FunctionError;
use crate::handler::globals::Device;
use crate::native_array::NativeArray;

/// Dynamically typed argument or result of a namespace function.
#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DType(DType),
    Device(Device),
    Shape(Vec<usize>),
    Native(NativeArray),
    Array(Array),
    Container(Container),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::DType(_) => "dtype",
            Value::Device(_) => "device",
            Value::Shape(_) => "shape",
            Value::Native(_) => "native array",
            Value::Array(_) => "array",
            Value::Container(_) => "container",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Container(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeArray> {
        match self {
            Value::Native(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            Value::Bool(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(x) => Some(*x as f64),
            _ => None,
        }
    }

    /// Accepts either a `DType` or its name.
    pub fn as_dtype(&self) -> Option<DType> {
        match self {
            Value::DType(x) => Some(*x),
            Value::Str(x) => DType::from_name(x).ok(),
            _ => None,
        }
    }

    /// Accepts a `Shape`, a list of non-negative ints, or a single int.
    pub fn as_shape(&self) -> Option<Vec<usize>> {
        match self {
            Value::Shape(x) => Some(x.clone()),
            Value::Int(x) => usize::try_from(*x).ok().map(|x| vec![x]),
            Value::List(items) => items
                .iter()
                .map(|x| x.as_int().and_then(|x| usize::try_from(x).ok()))
                .collect(),
            _ => None,
        }
    }

    /// Payload of an `Array` or a bare native value.
    pub fn native_payload(&self) -> Option<NativeArray> {
        match self {
            Value::Native(x) => Some(x.clone()),
            Value::Array(x) => Some(x.data()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<DType> for Value {
    fn from(value: DType) -> Self {
        Value::DType(value)
    }
}

impl From<Device> for Value {
    fn from(value: Device) -> Self {
        Value::Device(value)
    }
}

impl From<NativeArray> for Value {
    fn from(value: NativeArray) -> Self {
        Value::Native(value)
    }
}

impl From<NDArrayNumericTensor> for Value {
    fn from(value: NDArrayNumericTensor) -> Self {
        Value::Native(NativeArray::NDArray(value))
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Value::Array(value)
    }
}

impl From<&Array> for Value {
    fn from(value: &Array) -> Self {
        Value::Array(value.clone())
    }
}

impl From<Container> for Value {
    fn from(value: Container) -> Self {
        Value::Container(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(x) => x.into(),
            None => Value::None,
        }
    }
}

/// Ordered positional and keyword arguments.
#[derive(Clone, Debug, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set_kwarg(name, value.into());
        self
    }

    pub fn set_kwarg(&mut self, name: &str, value: Value) {
        match self.keyword.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.keyword.push((name.to_string(), value)),
        }
    }

    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.keyword.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let idx = self.keyword.iter().position(|(k, _)| k == name)?;
        Some(self.keyword.remove(idx).1)
    }

    /// Positional argument `index`, else the keyword argument `name`.
    /// An explicit `None` counts as absent.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional
            .get(index)
            .or_else(|| self.get_kwarg(name))
            .filter(|x| !x.is_none())
    }

    pub fn require(&self, index: usize, name: &str, function: &str) -> Result<&Value, FunctionError> {
        self.arg(index, name).ok_or_else(|| FunctionError::MissingArgument {
            function: function.to_string(),
            argument: name.to_string(),
        })
    }

    pub fn dtype_arg(&self, index: usize, name: &str, function: &str) -> Result<Option<DType>, FunctionError> {
        match self.arg(index, name) {
            None => Ok(None),
            Some(v) => v
                .as_dtype()
                .map(Some)
                .ok_or_else(|| FunctionError::invalid_argument(function, name, "dtype", v)),
        }
    }

    pub fn shape_arg(&self, index: usize, name: &str, function: &str) -> Result<Vec<usize>, FunctionError> {
        let v = self.require(index, name, function)?;
        v.as_shape()
            .ok_or_else(|| FunctionError::invalid_argument(function, name, "shape", v))
    }

    pub fn float_arg(&self, index: usize, name: &str, function: &str, default: f64) -> Result<f64, FunctionError> {
        match self.arg(index, name) {
            None => Ok(default),
            Some(v) => v
                .as_float()
                .ok_or_else(|| FunctionError::invalid_argument(function, name, "float", v)),
        }
    }

    /// All argument values, positional first.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.positional.iter().chain(self.keyword.iter().map(|(_, v)| v))
    }

    pub fn map_values<F>(&self, mut f: F) -> Result<Args, FunctionError>
    where
        F: FnMut(&Value) -> Result<Value, FunctionError>,
    {
        Ok(Args {
            positional: self.positional.iter().map(&mut f).collect::<Result<_, _>>()?,
            keyword: self
                .keyword
                .iter()
                .map(|(k, v)| Ok((k.clone(), f(v)?)))
                .collect::<Result<_, FunctionError>>()?,
        })
    }
}

/// Build an [`Args`]: `args![a, b; out = c]`.
#[macro_export]
macro_rules! args {
    () => {
        $crate::value::Args::default()
    };
    ($($p:expr),* $(,)? $(; $($k:ident = $v:expr),* $(,)?)?) => {{
        #[allow(unused_mut)]
        let mut args = $crate::value::Args::default();
        $(args.positional.push($crate::value::Value::from($p));)*
        $($(args.set_kwarg(stringify!($k), $crate::value::Value::from($v));)*)?
        args
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_macro_orders_positional_then_keyword() {
        let args = args![1, 2.5; dtype = "float32", axis = 0];
        assert_eq!(args.positional.len(), 2);
        assert_eq!(args.arg(1, "y").and_then(Value::as_float), Some(2.5));
        assert_eq!(args.dtype_arg(9, "dtype", "f").unwrap(), Some(DType::F32));
        assert_eq!(args.get_kwarg("axis").and_then(Value::as_int), Some(0));
    }

    #[test]
    fn test_none_counts_as_missing() {
        let args = args![; bias = Value::None];
        assert!(args.arg(2, "bias").is_none());
        assert!(args.require(2, "bias", "linear").is_err());
    }

    #[test]
    fn test_shape_coercion() {
        assert_eq!(Value::from(vec![2, 3]).as_shape(), Some(vec![2, 3]));
        assert_eq!(Value::Int(4).as_shape(), Some(vec![4]));
        assert_eq!(Value::Int(-1).as_shape(), None);
    }
}
