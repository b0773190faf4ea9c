use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::backends::BackendModule;
use crate::handler::function::ModuleTable;
use crate::handler::version::{Version, VersionParseError, resolve_version_specific};
use crate::native_array::NativeArray;
use crate::value::{Args, Value};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown backend {0:?}")]
    UnknownBackend(String),
    #[error("Backend {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("Native type {type_name} already belongs to backend {backend:?}")]
    TypeAlreadyClaimed { type_name: String, backend: String },
    #[error("Failed to load backend {name:?}: {reason}")]
    LoadFailed { name: String, reason: String },
    #[error(transparent)]
    VersionParseError(#[from] VersionParseError),
}

/// Immutable description of a registered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    pub locator: String,
    pub native_type_names: BTreeSet<String>,
}

pub type BackendLoader = Arc<dyn Fn() -> Result<Arc<dyn BackendModule>, RegistryError> + Send + Sync>;

/// A loaded backend: its module plus the function table resolved against
/// the module's reported version.
pub struct Backend {
    descriptor: Arc<BackendDescriptor>,
    module: Arc<dyn BackendModule>,
    version: Version,
    table: ModuleTable,
}

impl Backend {
    pub fn load(descriptor: Arc<BackendDescriptor>, module: Arc<dyn BackendModule>) -> Result<Arc<Self>, VersionParseError> {
        let version = Version::parse(module.version())?;
        let table = resolve_version_specific(module.module_table(), &version)?;
        Ok(Arc::new(Self {
            descriptor,
            module,
            version,
            table,
        }))
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<BackendDescriptor> {
        &self.descriptor
    }

    pub fn module(&self) -> &Arc<dyn BackendModule> {
        &self.module
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn table(&self) -> &ModuleTable {
        &self.table
    }
}

impl Debug for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.descriptor.name)
            .field("version", &self.version.to_string())
            .finish()
    }
}

struct RegistryEntry {
    descriptor: Arc<BackendDescriptor>,
    loader: BackendLoader,
    module: Mutex<Option<Arc<dyn BackendModule>>>,
    loaded: Mutex<Option<Arc<Backend>>>,
}

/// Name to backend lookup, plus the native type table used for inference.
///
/// Modules are imported lazily, on first resolution, so an uninstallable
/// backend only fails when it is selected.
#[derive(Default)]
pub struct BackendRegistry {
    entries: RwLock<BTreeMap<String, Arc<RegistryEntry>>>,
    native_types: RwLock<HashMap<String, String>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &self,
        name: &str,
        locator: &str,
        native_type_names: &[&str],
        loader: F,
    ) -> Result<Arc<BackendDescriptor>, RegistryError>
    where
        F: Fn() -> Result<Arc<dyn BackendModule>, RegistryError> + Send + Sync + 'static,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut native_types = self.native_types.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        for type_name in native_type_names {
            if let Some(owner) = native_types.get(*type_name) {
                return Err(RegistryError::TypeAlreadyClaimed {
                    type_name: type_name.to_string(),
                    backend: owner.clone(),
                });
            }
        }
        let descriptor = Arc::new(BackendDescriptor {
            name: name.to_string(),
            locator: locator.to_string(),
            native_type_names: native_type_names.iter().map(|x| x.to_string()).collect(),
        });
        for type_name in native_type_names {
            native_types.insert(type_name.to_string(), name.to_string());
        }
        entries.insert(
            name.to_string(),
            Arc::new(RegistryEntry {
                descriptor: descriptor.clone(),
                loader: Arc::new(loader),
                module: Mutex::new(None),
                loaded: Mutex::new(None),
            }),
        );
        Ok(descriptor)
    }

    fn entry(&self, name: &str) -> Result<Arc<RegistryEntry>, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    pub fn descriptor(&self, name: &str) -> Result<Arc<BackendDescriptor>, RegistryError> {
        Ok(self.entry(name)?.descriptor.clone())
    }

    /// Imports (once) and returns the backend module registered as `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BackendModule>, RegistryError> {
        let entry = self.entry(name)?;
        let mut module = entry.module.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = module.as_ref() {
            return Ok(module.clone());
        }
        let loaded = (entry.loader)()?;
        *module = Some(loaded.clone());
        Ok(loaded)
    }

    /// Resolves `name` and builds a fresh version-resolved [`Backend`].
    pub fn load(&self, name: &str) -> Result<Arc<Backend>, RegistryError> {
        let descriptor = self.descriptor(name)?;
        let module = self.resolve(name)?;
        Ok(Backend::load(descriptor, module)?)
    }

    /// Builds a backend from a fresh module instance that shares no state
    /// (random generators included) with the cached module.
    pub fn load_isolated(&self, name: &str) -> Result<Arc<Backend>, RegistryError> {
        let entry = self.entry(name)?;
        let module = (entry.loader)()?;
        Ok(Backend::load(entry.descriptor.clone(), module)?)
    }

    /// Like [`load`](Self::load) but reuses the first resolution. Used by
    /// per-call inference where re-resolving every call would be wasteful.
    pub fn backend(&self, name: &str) -> Result<Arc<Backend>, RegistryError> {
        let entry = self.entry(name)?;
        let mut loaded = entry.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backend) = loaded.as_ref() {
            return Ok(backend.clone());
        }
        drop(loaded);
        let backend = self.load(name)?;
        loaded = entry.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(loaded.get_or_insert(backend).clone())
    }

    pub fn backend_for_type(&self, type_name: &str) -> Option<String> {
        self.native_types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    /// Module owning a native payload, found through its type name.
    pub fn module_for_payload(&self, payload: &NativeArray) -> Option<Result<Arc<dyn BackendModule>, RegistryError>> {
        let name = self.backend_for_type(payload.type_name())?;
        Some(self.resolve(&name))
    }

    /// Backend that owns the first recognised native payload in `value`.
    ///
    /// Arrays are looked through to their payload, maps are searched by
    /// value and lists by element, both in iteration order.
    pub fn infer_from_value(&self, value: &Value) -> Option<String> {
        match value {
            Value::Native(x) => self.backend_for_type(x.type_name()),
            Value::Array(x) => self.backend_for_type(&x.type_name()),
            Value::Container(x) => x.leaves().iter().find_map(|leaf| self.backend_for_type(&leaf.type_name())),
            Value::Map(items) => items.values().find_map(|v| self.infer_from_value(v)),
            Value::List(items) => items.iter().find_map(|v| self.infer_from_value(v)),
            _ => None,
        }
    }

    pub fn infer_from_args(&self, args: &Args) -> Option<String> {
        args.values().find_map(|v| self.infer_from_value(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::backends::ndarray_backend::{NDArrayBackend, NDArrayNumericTensor};
    use crate::native_array::ForeignArray;

    fn registry() -> BackendRegistry {
        let registry = BackendRegistry::new();
        registry
            .register(
                "ndarray",
                "backends.ndarray",
                &[std::any::type_name::<NDArrayNumericTensor>()],
                || Ok(Arc::new(NDArrayBackend::new()) as Arc<dyn BackendModule>),
            )
            .unwrap();
        registry
            .register("missing", "backends.missing", &["u16"], || {
                Err(RegistryError::LoadFailed {
                    name: "missing".to_string(),
                    reason: "not installed".to_string(),
                })
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = registry();
        let err = registry.register("ndarray", "x", &[], || Err(RegistryError::UnknownBackend("x".to_string())));
        assert!(matches!(err, Err(RegistryError::AlreadyRegistered(_))));
        let err = registry.register("other", "x", &["u16"], || Err(RegistryError::UnknownBackend("x".to_string())));
        assert!(matches!(err, Err(RegistryError::TypeAlreadyClaimed { .. })));
    }

    #[test]
    fn test_loading_is_lazy() {
        let registry = registry();
        assert!(registry.contains("missing"));
        assert!(matches!(registry.resolve("missing"), Err(RegistryError::LoadFailed { .. })));
        assert!(matches!(registry.resolve("nope"), Err(RegistryError::UnknownBackend(_))));
        assert_eq!(registry.backend("ndarray").unwrap().name(), "ndarray");
    }

    #[test]
    fn test_inference_traverses_lists_and_maps() {
        let registry = registry();
        let nd = Value::from(NDArrayNumericTensor::from_vec(vec![1.0f32]));
        let foreign = Value::Native(ForeignArray::new(3u16, vec![], None).into());
        let list = Value::List(vec![Value::Int(1), foreign.clone(), nd.clone()]);
        assert_eq!(registry.infer_from_value(&list).as_deref(), Some("missing"));
        let map = Value::Map(BTreeMap::from([("a".to_string(), Value::Int(1)), ("b".to_string(), nd)]));
        assert_eq!(registry.infer_from_value(&map).as_deref(), Some("ndarray"));
        let array = Array::with_dynamic_backend(NDArrayNumericTensor::from_vec(vec![1i64]), false);
        assert_eq!(registry.infer_from_value(&Value::Array(array)).as_deref(), Some("ndarray"));
        assert_eq!(registry.infer_from_value(&Value::Float(1.0)), None);
    }
}
