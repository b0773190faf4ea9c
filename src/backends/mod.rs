use std::sync::Arc;

use log::warn;

use crate::backends::ndarray_backend::NDArrayNumericTensor;
use crate::dtype::DType;
use crate::handler::converter::ConversionError;
use crate::handler::function::ModuleTable;
use crate::handler::globals::GlobalState;
use crate::handler::registry::{BackendRegistry, RegistryError};
use crate::native_array::NativeArray;

#[cfg(feature = "candle")]
pub mod candle_backend;
pub mod ndarray_backend;
pub mod traced_backend;

/// A loaded backend implementation.
///
/// Besides its function table a backend knows how to move its native
/// payloads to and from the neutral ndarray form, and what "differentiable
/// variable" means for it.
pub trait BackendModule: Send + Sync {
    fn name(&self) -> &str;

    /// Reported version, matched against version-specific functions.
    fn version(&self) -> &str;

    fn module_table(&self) -> &ModuleTable;

    fn invalid_dtypes(&self) -> &[DType] {
        &[]
    }

    fn to_neutral(&self, payload: &NativeArray) -> Result<NDArrayNumericTensor, ConversionError>;

    fn from_neutral(&self, neutral: &NDArrayNumericTensor) -> Result<NativeArray, ConversionError>;

    fn is_variable(&self, _payload: &NativeArray) -> bool {
        false
    }

    /// Plain tensor behind a variable.
    fn variable_data(&self, payload: &NativeArray) -> Result<NativeArray, ConversionError> {
        Ok(payload.clone())
    }

    fn to_variable(&self, payload: NativeArray) -> Result<NativeArray, ConversionError> {
        Ok(payload)
    }

    /// Installs this backend's global state while it is the active backend.
    fn activate(&self, _globals: &mut GlobalState) {}

    fn deactivate(&self, _globals: &mut GlobalState) {}
}

pub const NDARRAY: &str = "ndarray";
pub const TRACED: &str = "traced";
#[cfg(feature = "candle")]
pub const CANDLE: &str = "candle";

/// Registry holding every backend compiled into this crate.
pub fn builtin_registry() -> BackendRegistry {
    let registry = BackendRegistry::new();
    register_builtin_backends(&registry);
    registry
}

fn register_builtin<F>(registry: &BackendRegistry, name: &str, locator: &str, type_names: &[&str], loader: F)
where
    F: Fn() -> Result<Arc<dyn BackendModule>, RegistryError> + Send + Sync + 'static,
{
    if registry.contains(name) {
        return;
    }
    if let Err(err) = registry.register(name, locator, type_names, loader) {
        warn!("Could not register builtin backend {name}: {err}");
    }
}

/// Adds the compiled-in backends that `registry` does not already know.
pub fn register_builtin_backends(registry: &BackendRegistry) {
    register_builtin(
        registry,
        NDARRAY,
        "backends.ndarray",
        &[std::any::type_name::<NDArrayNumericTensor>()],
        || Ok(Arc::new(ndarray_backend::NDArrayBackend::new()) as Arc<dyn BackendModule>),
    );
    register_builtin(
        registry,
        TRACED,
        "backends.traced",
        &[std::any::type_name::<traced_backend::TracedTensor>()],
        || Ok(Arc::new(traced_backend::TracedBackend::new()) as Arc<dyn BackendModule>),
    );
    #[cfg(feature = "candle")]
    register_builtin(
        registry,
        CANDLE,
        "backends.candle",
        &[
            std::any::type_name::<candle_core::Tensor>(),
            std::any::type_name::<candle_core::Var>(),
        ],
        || Ok(Arc::new(candle_backend::CandleBackend::new()) as Arc<dyn BackendModule>),
    );
}
