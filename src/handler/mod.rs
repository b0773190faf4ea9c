//! Backend selection: the backend stack, the published namespace and the
//! process-wide handler instance.

pub mod converter;
pub mod function;
pub mod globals;
pub mod namespace;
pub mod registry;
pub mod version;
pub mod wrapper;

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::config::HandlerConfig;
use crate::handler::converter::{ConversionError, export_to_neutral, import_from_neutral};
use crate::handler::function::{FunctionError, ModuleTable};
use crate::handler::globals::GlobalState;
use crate::handler::namespace::{Namespace, NamespaceEnv};
use crate::handler::registry::{Backend, BackendDescriptor, BackendRegistry, RegistryError};
use crate::handler::version::VersionParseError;
use crate::value::{Args, Value};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid backend {name:?}, expected one of {available:?}")]
    InvalidBackend { name: String, available: Vec<String> },
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    VersionParse(#[from] VersionParseError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Every registered backend is excluded")]
    AllBackendsExcluded,
}

impl From<RegistryError> for HandlerError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::VersionParseError(err) => HandlerError::VersionParse(err),
            other => HandlerError::Registry(other),
        }
    }
}

/// Immutable snapshot of the active backend selection. Calls resolve
/// against the context that was current when they started.
pub struct BackendContext {
    stack: Vec<Arc<Backend>>,
    namespace: Arc<Namespace>,
    globals: Arc<GlobalState>,
}

impl BackendContext {
    pub fn stack(&self) -> &[Arc<Backend>] {
        &self.stack
    }

    /// Top of the stack.
    pub fn active(&self) -> Option<&Arc<Backend>> {
        self.stack.last()
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn globals(&self) -> &Arc<GlobalState> {
        &self.globals
    }
}

impl Debug for BackendContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("stack", &self.stack.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("globals", &self.globals)
            .finish()
    }
}

/// A namespace bound to one backend outside of the stack, with globals of
/// its own. It cannot push or pop backends.
#[derive(Clone, Debug)]
pub struct IsolatedBackend {
    key: String,
    backend: Arc<Backend>,
    namespace: Arc<Namespace>,
}

impl IsolatedBackend {
    /// Cache key, `"{name}_{n}"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn globals(&self) -> &GlobalState {
        self.namespace.globals()
    }

    pub fn call(&self, path: &str, args: Args) -> Result<Value, FunctionError> {
        self.namespace.call(path, &args)
    }
}

/// Unsets the backend it was created for when dropped.
#[must_use = "the backend is unset as soon as the guard is dropped"]
pub struct BackendGuard<'a> {
    handler: &'a BackendHandler,
    name: String,
}

impl BackendGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for BackendGuard<'_> {
    fn drop(&mut self) {
        self.handler.unset_backend();
    }
}

struct HandlerState {
    stack: Vec<Arc<Backend>>,
    globals: GlobalState,
    original: Option<Arc<ModuleTable>>,
}

#[derive(Default)]
struct CompiledBackends {
    counts: BTreeMap<String, usize>,
    backends: BTreeMap<String, IsolatedBackend>,
}

pub struct BackendHandler {
    registry: Arc<BackendRegistry>,
    config: HandlerConfig,
    library: Arc<ModuleTable>,
    state: Mutex<HandlerState>,
    context: RwLock<Arc<BackendContext>>,
    compiled: Mutex<CompiledBackends>,
}

impl BackendHandler {
    pub fn new(registry: Arc<BackendRegistry>, config: HandlerConfig) -> Self {
        Self::with_library(registry, config, crate::functional::library_table())
    }

    /// Handler over a custom library namespace instead of the built-in one.
    pub fn with_library(registry: Arc<BackendRegistry>, config: HandlerConfig, library: ModuleTable) -> Self {
        let library = Arc::new(library);
        let globals = GlobalState::default();
        let context = Self::build_context(&registry, &config, &library, vec![], &globals);
        Self {
            registry,
            config,
            library,
            state: Mutex::new(HandlerState {
                stack: vec![],
                globals,
                original: None,
            }),
            context: RwLock::new(Arc::new(context)),
            compiled: Mutex::new(CompiledBackends::default()),
        }
    }

    pub fn with_builtin_backends(config: HandlerConfig) -> Self {
        Self::new(Arc::new(crate::backends::builtin_registry()), config)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The currently published backend context.
    pub fn context(&self) -> Arc<BackendContext> {
        self.context.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn env(registry: &Arc<BackendRegistry>, config: &HandlerConfig, globals: GlobalState) -> Arc<NamespaceEnv> {
        Arc::new(NamespaceEnv {
            registry: registry.clone(),
            implicit_backend: config.implicit_backend.clone(),
            globals: Arc::new(globals),
        })
    }

    fn build_context(
        registry: &Arc<BackendRegistry>,
        config: &HandlerConfig,
        original: &ModuleTable,
        stack: Vec<Arc<Backend>>,
        globals: &GlobalState,
    ) -> BackendContext {
        let env = Self::env(registry, config, globals.clone());
        let namespace = match stack.last() {
            Some(backend) => Namespace::bind(original, backend, &env),
            None => Namespace::library(original, &env),
        };
        BackendContext {
            stack,
            namespace: Arc::new(namespace),
            globals: env.globals.clone(),
        }
    }

    /// Rebinds the namespace against the state's stack top and publishes it.
    fn publish(&self, state: &HandlerState) {
        let original = state.original.as_ref().unwrap_or(&self.library);
        let context = Self::build_context(&self.registry, &self.config, original, state.stack.clone(), &state.globals);
        debug!(
            "backend stack: {:?}",
            context.stack.iter().map(|b| b.name()).collect::<Vec<_>>()
        );
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(context);
    }

    fn check_registered(&self, name: &str) -> Result<(), HandlerError> {
        if self.registry.contains(name) {
            Ok(())
        } else {
            Err(HandlerError::InvalidBackend {
                name: name.to_string(),
                available: self.registry.names(),
            })
        }
    }

    /// Pushes `name` onto the backend stack and rebinds the namespace.
    ///
    /// With `dynamic`, every tracked object that opted in is moved to the new
    /// backend. The target is loaded and version-resolved before any object
    /// is exported, so a load failure or an export failure leaves the stack
    /// and every object untouched. An import failure is reported after the
    /// switch, with the affected objects holding their neutral ndarray
    /// payload.
    pub fn set_backend(&self, name: &str, dynamic: bool) -> Result<(), HandlerError> {
        self.check_registered(name)?;
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if state.original.is_none() {
            state.original = Some(self.library.clone());
        }

        let mut unwound = Vec::with_capacity(state.stack.len());
        while let Some(backend) = state.stack.pop() {
            backend.module().deactivate(&mut state.globals);
            unwound.push(backend);
        }
        let loaded = self.registry.load(name);
        for backend in unwound.into_iter().rev() {
            backend.module().activate(&mut state.globals);
            state.stack.push(backend);
        }
        let backend = loaded?;

        let exported = if dynamic {
            Some(export_to_neutral(&self.registry)?)
        } else {
            None
        };

        backend.module().activate(&mut state.globals);
        state.stack.push(backend.clone());
        self.publish(state);

        if let Some(exported) = exported {
            if let Err(err) = import_from_neutral(&exported, &backend) {
                warn!("Converting tracked objects to {name} failed, they keep ndarray payloads: {err}");
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Pops the stack top, restoring the globals of the new top. Returns
    /// `None` when no backend was set.
    pub fn unset_backend(&self) -> Option<Arc<BackendDescriptor>> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let popped = state.stack.pop()?;
        popped.module().deactivate(&mut state.globals);
        if let Some(top) = state.stack.last() {
            top.module().activate(&mut state.globals);
        }
        self.publish(state);
        Some(popped.descriptor().clone())
    }

    pub fn clear_backend_stack(&self) {
        while self.unset_backend().is_some() {}
    }

    /// Stack top, else the backend inferred from `args`, else the implicit
    /// backend.
    pub fn current_backend(&self, args: &Args) -> Result<Arc<Backend>, HandlerError> {
        if let Some(backend) = self.context().active() {
            return Ok(backend.clone());
        }
        let name = self
            .registry
            .infer_from_args(args)
            .unwrap_or_else(|| self.config.implicit_backend.clone());
        Ok(self.registry.backend(&name)?)
    }

    /// With a name, a freshly resolved backend of that name; without one,
    /// the stack top (`None` on an empty stack).
    pub fn get_backend(&self, name: Option<&str>) -> Result<Option<Arc<Backend>>, HandlerError> {
        match name {
            None => Ok(self.context().active().cloned()),
            Some(name) => {
                self.check_registered(name)?;
                Ok(Some(self.registry.load(name)?))
            }
        }
    }

    pub fn choose_random_backend(&self, excluded: &[&str]) -> Result<String, HandlerError> {
        let candidates: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| !excluded.contains(&name.as_str()))
            .collect();
        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(HandlerError::AllBackendsExcluded)?;
        info!("Using backend from random choice: {chosen}");
        Ok(chosen)
    }

    /// Binds a private copy of the library namespace to a fresh instance of
    /// `name`, leaving the stack alone.
    pub fn with_backend(&self, name: &str) -> Result<IsolatedBackend, HandlerError> {
        self.check_registered(name)?;
        let backend = self.registry.load_isolated(name)?;
        let mut globals = GlobalState::default();
        backend.module().activate(&mut globals);
        let env = Self::env(&self.registry, &self.config, globals);
        let namespace = Arc::new(Namespace::bind(&self.library, &backend, &env));

        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        let count = compiled.counts.entry(name.to_string()).or_insert(0);
        let key = format!("{name}_{count}");
        *count += 1;
        let isolated = IsolatedBackend {
            key: key.clone(),
            backend,
            namespace,
        };
        compiled.backends.insert(key, isolated.clone());
        Ok(isolated)
    }

    /// Keys of every isolated backend built by [`with_backend`](Self::with_backend).
    pub fn compiled_backends(&self) -> Vec<String> {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .backends
            .keys()
            .cloned()
            .collect()
    }

    pub fn compiled_backend(&self, key: &str) -> Option<IsolatedBackend> {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .backends
            .get(key)
            .cloned()
    }

    /// Sets `name` until the returned guard is dropped.
    pub fn using_backend(&self, name: &str) -> Result<BackendGuard<'_>, HandlerError> {
        self.set_backend(name, false)?;
        Ok(BackendGuard {
            handler: self,
            name: name.to_string(),
        })
    }

    /// Calls the function at `path` of the published namespace.
    pub fn call(&self, path: &str, args: Args) -> Result<Value, FunctionError> {
        self.context().namespace().call(path, &args)
    }
}

static HANDLER: OnceLock<BackendHandler> = OnceLock::new();

/// The process-wide handler, built on first use from the environment
/// configuration with every compiled-in backend registered.
pub fn handler() -> &'static BackendHandler {
    HANDLER.get_or_init(|| {
        let config = HandlerConfig::from_env().unwrap_or_else(|err| {
            warn!("Ignoring invalid handler configuration: {err}");
            HandlerConfig::default()
        });
        BackendHandler::with_builtin_backends(config)
    })
}

pub fn set_backend(name: &str, dynamic: bool) -> Result<(), HandlerError> {
    handler().set_backend(name, dynamic)
}

pub fn unset_backend() -> Option<Arc<BackendDescriptor>> {
    handler().unset_backend()
}

pub fn clear_backend_stack() {
    handler().clear_backend_stack()
}

pub fn current_backend(args: &Args) -> Result<Arc<Backend>, HandlerError> {
    handler().current_backend(args)
}

pub fn get_backend(name: Option<&str>) -> Result<Option<Arc<Backend>>, HandlerError> {
    handler().get_backend(name)
}

pub fn choose_random_backend(excluded: &[&str]) -> Result<String, HandlerError> {
    handler().choose_random_backend(excluded)
}

pub fn with_backend(name: &str) -> Result<IsolatedBackend, HandlerError> {
    handler().with_backend(name)
}

pub fn using_backend(name: &str) -> Result<BackendGuard<'static>, HandlerError> {
    handler().using_backend(name)
}

pub fn set_ndarray_backend() -> Result<(), HandlerError> {
    set_backend(crate::backends::NDARRAY, false)
}

pub fn set_traced_backend() -> Result<(), HandlerError> {
    set_backend(crate::backends::TRACED, false)
}

#[cfg(feature = "candle")]
pub fn set_candle_backend() -> Result<(), HandlerError> {
    set_backend(crate::backends::CANDLE, false)
}

pub fn call(path: &str, args: Args) -> Result<Value, FunctionError> {
    handler().call(path, args)
}

pub fn set_dynamic_backend(value: bool) {
    crate::tracking::set_dynamic_backend(value)
}

pub fn dynamic_backend() -> bool {
    crate::tracking::dynamic_backend()
}
