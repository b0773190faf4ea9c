use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::array::Array;
use crate::handler::function::{BackendFn, FunctionError};
use crate::handler::namespace::Namespace;
use crate::value::{Args, Value};

/// Where a bound function comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// The backend's own primitive.
    Native { backend: String },
    /// The library's implementation, bound because the backend lacks the name.
    Compositional { backend: String },
    /// Unbound library function (no backend set).
    Library,
}

impl Provenance {
    pub fn is_compositional(&self) -> bool {
        matches!(self, Provenance::Compositional { .. })
    }

    pub fn backend(&self) -> Option<&str> {
        match self {
            Provenance::Native { backend } | Provenance::Compositional { backend } => Some(backend),
            Provenance::Library => None,
        }
    }
}

impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Native { backend } => write!(f, "native({backend})"),
            Provenance::Compositional { backend } => write!(f, "compositional({backend})"),
            Provenance::Library => write!(f, "library"),
        }
    }
}

pub struct WrappedFunction {
    name: String,
    provenance: Provenance,
    inner: BackendFn,
}

#[derive(Clone)]
pub enum Callable {
    Raw(BackendFn),
    Wrapped(Arc<WrappedFunction>),
}

impl Callable {
    pub fn call(&self, ns: &Namespace, args: &Args) -> Result<Value, FunctionError> {
        match self {
            Callable::Raw(f) => f(ns, args),
            Callable::Wrapped(w) => w.call(ns, args),
        }
    }
}

impl Debug for Callable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Raw(_) => write!(f, "Raw"),
            Callable::Wrapped(w) => write!(f, "Wrapped({}, {})", w.name, w.provenance),
        }
    }
}

/// Wraps `callable` for binding under `name`. Already wrapped functions are
/// returned unchanged, keeping their original provenance.
pub fn wrap(name: &str, callable: &Callable, provenance: Provenance) -> Arc<WrappedFunction> {
    match callable {
        Callable::Wrapped(w) => w.clone(),
        Callable::Raw(f) => Arc::new(WrappedFunction {
            name: name.to_string(),
            provenance,
            inner: f.clone(),
        }),
    }
}

fn unwrap_inputs(value: &Value) -> Result<Value, FunctionError> {
    Ok(match value {
        Value::Array(x) => Value::Native(x.data()),
        Value::List(items) => Value::List(items.iter().map(unwrap_inputs).collect::<Result<_, _>>()?),
        Value::Map(items) => Value::Map(
            items
                .iter()
                .map(|(k, v)| Ok((k.clone(), unwrap_inputs(v)?)))
                .collect::<Result<BTreeMap<_, _>, FunctionError>>()?,
        ),
        other => other.clone(),
    })
}

fn wrap_outputs(value: Value) -> Value {
    match value {
        Value::Native(x) => Value::Array(Array::new(x)),
        Value::List(items) => Value::List(items.into_iter().map(wrap_outputs).collect()),
        Value::Map(items) => Value::Map(items.into_iter().map(|(k, v)| (k, wrap_outputs(v))).collect()),
        other => other,
    }
}

impl WrappedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn is_compositional(&self) -> bool {
        self.provenance.is_compositional()
    }

    pub fn call(&self, ns: &Namespace, args: &Args) -> Result<Value, FunctionError> {
        // Nestable: map over the leaves of a container in first position
        if let Some(Value::Container(container)) = args.positional.first() {
            if args.get_kwarg("out").is_some_and(|x| !x.is_none()) {
                return Err(FunctionError::InvalidArgument {
                    function: self.name.clone(),
                    argument: "out".to_string(),
                    expected: "no out argument for container inputs".to_string(),
                    got: "out".to_string(),
                });
            }
            let mapped = container.try_map(|leaf| {
                let mut leaf_args = args.clone();
                leaf_args.positional[0] = Value::Array(leaf.clone());
                match self.call(ns, &leaf_args)? {
                    Value::Array(x) => Ok(x),
                    other => Err(FunctionError::invalid_argument(&self.name, "return", "array", &other)),
                }
            })?;
            return Ok(Value::Container(mapped));
        }

        let mut args = args.map_values(unwrap_inputs)?;
        let out = args.take_kwarg("out").filter(|x| !x.is_none());
        let ret = (self.inner)(ns, &args)?;

        match out {
            None => Ok(wrap_outputs(ret)),
            Some(Value::Array(out)) => {
                let payload = match ret {
                    Value::Native(x) => x,
                    Value::Array(x) => x.data(),
                    other => return Err(FunctionError::invalid_argument(&self.name, "return", "array", &other)),
                };
                out.set_data(payload);
                Ok(Value::Array(out))
            }
            Some(other) => Err(FunctionError::invalid_argument(&self.name, "out", "array", &other)),
        }
    }
}

impl Debug for WrappedFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedFunction")
            .field("name", &self.name)
            .field("provenance", &self.provenance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::function::backend_fn;

    #[test]
    fn test_wrapping_is_idempotent() {
        let raw = Callable::Raw(backend_fn(|_, _| Ok(Value::None)));
        let once = wrap(
            "add",
            &raw,
            Provenance::Native {
                backend: "ndarray".to_string(),
            },
        );
        let twice = wrap("add", &Callable::Wrapped(once.clone()), Provenance::Library);
        assert!(Arc::ptr_eq(&once, &twice));
        assert_eq!(twice.provenance().backend(), Some("ndarray"));
    }

    #[test]
    fn test_provenance_display() {
        let p = Provenance::Compositional {
            backend: "traced".to_string(),
        };
        assert!(p.is_compositional());
        assert_eq!(p.to_string(), "compositional(traced)");
    }
}
