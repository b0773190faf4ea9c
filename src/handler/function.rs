use std::sync::Arc;

use crate::backends::ndarray_backend::NDArrayNumericTensorError;
use crate::dtype::DTypeError;
use crate::handler::converter::ConversionError;
use crate::handler::namespace::Namespace;
use crate::handler::registry::RegistryError;
use crate::handler::version::{VersionParseError, VersionRange};
use crate::handler::wrapper::Callable;
use crate::value::{Args, Value};

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("{function}: missing argument {argument:?}")]
    MissingArgument { function: String, argument: String },
    #[error("{function}: expected {expected} for argument {argument:?}, got {got}")]
    InvalidArgument {
        function: String,
        argument: String,
        expected: String,
        got: String,
    },
    #[error("{function} is not implemented by backend {backend}")]
    NotImplemented { function: String, backend: String },
    #[error("No function named {0:?}")]
    UnknownFunction(String),
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    NDArrayNumericTensorError(#[from] NDArrayNumericTensorError),
    #[error(transparent)]
    DTypeError(#[from] DTypeError),
    #[error(transparent)]
    ConversionError(#[from] ConversionError),
    #[error(transparent)]
    RegistryError(#[from] RegistryError),
    #[error(transparent)]
    VersionParseError(#[from] VersionParseError),
    #[cfg(feature = "candle")]
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl FunctionError {
    pub fn invalid_argument(function: &str, argument: &str, expected: &str, got: &Value) -> Self {
        FunctionError::InvalidArgument {
            function: function.to_string(),
            argument: argument.to_string(),
            expected: expected.to_string(),
            got: got.type_label().to_string(),
        }
    }
}

/// A namespace function. It receives the namespace it was called through,
/// so compositional implementations reach sibling primitives of the same
/// binding.
pub type BackendFn = Arc<dyn Fn(&Namespace, &Args) -> Result<Value, FunctionError> + Send + Sync>;

pub fn backend_fn<F>(f: F) -> BackendFn
where
    F: Fn(&Namespace, &Args) -> Result<Value, FunctionError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
pub enum ModuleEntry {
    Function(Callable),
    Versioned {
        canonical: String,
        range: VersionRange,
        function: Callable,
    },
    Constant(Value),
    Module(ModuleTable),
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleEntry::Function(_) => write!(f, "Function"),
            ModuleEntry::Versioned { canonical, range, .. } => write!(f, "Versioned({canonical}, {range})"),
            ModuleEntry::Constant(v) => write!(f, "Constant({v:?})"),
            ModuleEntry::Module(m) => write!(f, "Module({})", m.location()),
        }
    }
}

/// Ordered function table of a backend or of the library namespace.
///
/// Tables are built once, when a backend module is constructed. Rebinding
/// picks which table is consulted and never mutates one in place.
#[derive(Clone, Debug)]
pub struct ModuleTable {
    location: String,
    entries: Vec<(String, ModuleEntry)>,
}

impl ModuleTable {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            entries: vec![],
        }
    }

    pub(crate) fn from_entries(location: &str, entries: Vec<(String, ModuleEntry)>) -> Self {
        Self {
            location: location.to_string(),
            entries,
        }
    }

    /// Qualified location, such as `functional.linalg` or `backends.candle`.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn entries(&self) -> &[(String, ModuleEntry)] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn push(mut self, name: &str, entry: ModuleEntry) -> Self {
        self.entries.push((name.to_string(), entry));
        self
    }

    pub fn function<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Namespace, &Args) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.push(name, ModuleEntry::Function(Callable::Raw(Arc::new(f))))
    }

    pub fn callable(self, name: &str, callable: Callable) -> Self {
        self.push(name, ModuleEntry::Function(callable))
    }

    pub fn versioned(self, canonical: &str, range: VersionRange, function: BackendFn) -> Self {
        let name = format!("{canonical}@{range}");
        self.push(
            &name,
            ModuleEntry::Versioned {
                canonical: canonical.to_string(),
                range,
                function: Callable::Raw(function),
            },
        )
    }

    pub fn constant(self, name: &str, value: Value) -> Self {
        self.push(name, ModuleEntry::Constant(value))
    }

    pub fn module(self, name: &str, table: ModuleTable) -> Self {
        self.push(name, ModuleEntry::Module(table))
    }

    /// Latest entry declared under `name`.
    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.entries.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Entry at a dotted path, descending through sub-modules.
    pub fn lookup(&self, path: &str) -> Option<&ModuleEntry> {
        match path.split_once('.') {
            None => self.get(path),
            Some((head, rest)) => match self.get(head)? {
                ModuleEntry::Module(sub) => sub.lookup(rest),
                _ => None,
            },
        }
    }

    pub fn lookup_function(&self, path: &str) -> Option<&Callable> {
        match self.lookup(path)? {
            ModuleEntry::Function(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_descends_into_sub_modules() {
        let table = ModuleTable::new("functional")
            .function("add", |_, _| Ok(Value::None))
            .module(
                "linalg",
                ModuleTable::new("functional.linalg").function("matmul", |_, _| Ok(Value::None)),
            )
            .constant("float32", Value::DType(crate::dtype::DType::F32));
        assert!(table.lookup_function("linalg.matmul").is_some());
        assert!(table.lookup_function("linalg.inv").is_none());
        assert!(table.lookup_function("float32").is_none());
        assert!(table.lookup("float32").is_some());
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["add", "linalg", "float32"]);
    }
}
