use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use log::debug;

use crate::handler::function::{FunctionError, ModuleEntry, ModuleTable};
use crate::handler::globals::GlobalState;
use crate::handler::registry::{Backend, BackendRegistry};
use crate::handler::wrapper::{Provenance, WrappedFunction, wrap};
use crate::value::{Args, Value};

/// Root location of the library's rebindable functional tree.
pub const FUNCTIONAL_ROOT: &str = "functional";

#[derive(Clone, Debug)]
pub enum Binding {
    Function(Arc<WrappedFunction>),
    Constant(Value),
    Module(Arc<Namespace>),
}

/// State shared by a namespace and all of its sub-namespaces.
pub(crate) struct NamespaceEnv {
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) implicit_backend: String,
    pub(crate) globals: Arc<GlobalState>,
}

/// Immutable binding of the library namespace, either to one backend or,
/// with no backend, to the library's own per-call inferring functions.
pub struct Namespace {
    location: String,
    backend: Option<Arc<Backend>>,
    bindings: BTreeMap<String, Binding>,
    env: Arc<NamespaceEnv>,
}

fn is_under(location: &str, root: &str) -> bool {
    location == root || location.strip_prefix(root).is_some_and(|rest| rest.starts_with('.'))
}

impl Namespace {
    /// Binds every name of `original` to `backend`.
    ///
    /// A name the backend defines binds to the backend's function, any other
    /// name binds to the library's implementation marked compositional.
    /// Sub-modules under the functional tree are bound recursively against
    /// the backend's sub-module of the same name; anything else is exposed
    /// unchanged. Dtype constants the backend cannot represent are dropped
    /// unless the backend provides its own value.
    pub(crate) fn bind(original: &ModuleTable, backend: &Arc<Backend>, env: &Arc<NamespaceEnv>) -> Self {
        Self::bind_table(original, Some(backend.table()), backend, env)
    }

    fn bind_table(
        original: &ModuleTable,
        backend_table: Option<&ModuleTable>,
        backend: &Arc<Backend>,
        env: &Arc<NamespaceEnv>,
    ) -> Self {
        let backend_root = backend.descriptor().locator.as_str();
        let invalid_dtypes = backend.module().invalid_dtypes();
        let mut bindings = BTreeMap::new();
        let (mut native, mut compositional) = (0usize, 0usize);

        for (name, entry) in original.entries() {
            let provided = backend_table.and_then(|t| t.get(name));
            match entry {
                ModuleEntry::Function(original_fn) => {
                    let wrapped = match provided {
                        Some(ModuleEntry::Function(backend_fn)) => {
                            native += 1;
                            wrap(
                                name,
                                backend_fn,
                                Provenance::Native {
                                    backend: backend.name().to_string(),
                                },
                            )
                        }
                        _ => {
                            compositional += 1;
                            wrap(
                                name,
                                original_fn,
                                Provenance::Compositional {
                                    backend: backend.name().to_string(),
                                },
                            )
                        }
                    };
                    bindings.insert(name.clone(), Binding::Function(wrapped));
                }
                ModuleEntry::Constant(value) => match provided {
                    Some(ModuleEntry::Constant(own)) => {
                        bindings.insert(name.clone(), Binding::Constant(own.clone()));
                    }
                    _ => {
                        let invalid = value.as_dtype().is_some_and(|d| invalid_dtypes.contains(&d));
                        if !invalid {
                            bindings.insert(name.clone(), Binding::Constant(value.clone()));
                        }
                    }
                },
                ModuleEntry::Module(sub) => {
                    let rebind = is_under(sub.location(), FUNCTIONAL_ROOT) && !is_under(sub.location(), backend_root);
                    let ns = if rebind {
                        let backend_sub = match provided {
                            Some(ModuleEntry::Module(t)) => Some(t),
                            _ => None,
                        };
                        Self::bind_table(sub, backend_sub, backend, env)
                    } else {
                        Self::library_table(sub, None, env)
                    };
                    bindings.insert(name.clone(), Binding::Module(Arc::new(ns)));
                }
                // Library tables carry no version-specific entries
                ModuleEntry::Versioned { .. } => {}
            }
        }
        debug!(
            "bound {} to {}: {native} native, {compositional} compositional",
            original.location(),
            backend.name()
        );
        Self {
            location: original.location().to_string(),
            backend: Some(backend.clone()),
            bindings,
            env: env.clone(),
        }
    }

    /// The unbound namespace: library functions that infer a backend per call.
    pub(crate) fn library(original: &ModuleTable, env: &Arc<NamespaceEnv>) -> Self {
        Self::library_table(original, None, env)
    }

    fn library_table(original: &ModuleTable, backend: Option<Arc<Backend>>, env: &Arc<NamespaceEnv>) -> Self {
        let bindings = original
            .entries()
            .iter()
            .filter_map(|(name, entry)| {
                let binding = match entry {
                    ModuleEntry::Function(f) => Binding::Function(wrap(name, f, Provenance::Library)),
                    ModuleEntry::Constant(v) => Binding::Constant(v.clone()),
                    ModuleEntry::Module(sub) => Binding::Module(Arc::new(Self::library_table(sub, None, env))),
                    ModuleEntry::Versioned { .. } => return None,
                };
                Some((name.clone(), binding))
            })
            .collect();
        Self {
            location: original.location().to_string(),
            backend,
            bindings,
            env: env.clone(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn backend(&self) -> Option<&Arc<Backend>> {
        self.backend.as_ref()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_ref().map(|b| b.name())
    }

    pub fn globals(&self) -> &GlobalState {
        &self.env.globals
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn get(&self, path: &str) -> Option<&Binding> {
        match path.split_once('.') {
            None => self.bindings.get(path),
            Some((head, rest)) => match self.bindings.get(head)? {
                Binding::Module(sub) => sub.get(rest),
                _ => None,
            },
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn function(&self, path: &str) -> Result<&Arc<WrappedFunction>, FunctionError> {
        match self.get(path) {
            Some(Binding::Function(f)) => Ok(f),
            _ => Err(FunctionError::UnknownFunction(path.to_string())),
        }
    }

    pub fn constant(&self, path: &str) -> Option<&Value> {
        match self.get(path)? {
            Binding::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Calls the function at the dotted `path`. The function receives this
    /// namespace, so paths used inside compositional code are absolute.
    pub fn call(&self, path: &str, args: &Args) -> Result<Value, FunctionError> {
        self.function(path)?.call(self, args)
    }

    /// Backend that serves a library primitive: the bound backend, else the
    /// one inferred from the arguments, else the implicit default.
    pub fn dispatch_backend(&self, args: &Args) -> Result<Arc<Backend>, FunctionError> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }
        let name = self
            .env
            .registry
            .infer_from_args(args)
            .unwrap_or_else(|| self.env.implicit_backend.clone());
        Ok(self.env.registry.backend(&name)?)
    }

    /// Runs the backend primitive at `path` for the dispatch backend.
    pub fn call_primitive(&self, path: &str, args: &Args) -> Result<Value, FunctionError> {
        let backend = self.dispatch_backend(args)?;
        match backend.table().lookup_function(path) {
            Some(f) => f.call(self, args),
            None => Err(FunctionError::NotImplemented {
                function: path.to_string(),
                backend: backend.name().to_string(),
            }),
        }
    }
}

impl Debug for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("location", &self.location)
            .field("backend", &self.backend_name())
            .field("names", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_prefix_matching() {
        assert!(is_under("functional.linalg", "functional"));
        assert!(is_under("functional", "functional"));
        assert!(!is_under("functionality", "functional"));
        assert!(!is_under("utils", "functional"));
    }
}
