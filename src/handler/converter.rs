//! Dynamic backend conversion of tracked objects.
//!
//! Export moves every opted-in object's payload to the neutral ndarray form
//! and remembers which objects held differentiable variables. Import turns
//! the neutral payloads into the new backend's native form, restoring
//! variable-ness. Each phase computes all of its conversions before it
//! overwrites any payload, so a failing phase leaves every object as it was
//! at the start of that phase. Export commits its payloads when it returns:
//! callers must have everything else that can fail, such as loading the
//! target backend, done before exporting.

use std::collections::HashSet;

use log::debug;

use crate::array::Array;
use crate::backends::ndarray_backend::{NDArrayNumericTensor, NDArrayNumericTensorError};
use crate::container::Container;
use crate::dtype::DTypeError;
use crate::handler::registry::{Backend, BackendRegistry, RegistryError};
use crate::native_array::NativeArray;
use crate::tracking::{self, TrackedObject};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("No registered backend recognises the native type {0}")]
    UnrecognizedPayload(String),
    #[error("Backend {backend} cannot convert {type_name}: {reason}")]
    Unsupported {
        backend: String,
        type_name: String,
        reason: String,
    },
    #[error(transparent)]
    RegistryError(#[from] RegistryError),
    #[error(transparent)]
    NDArrayNumericTensorError(#[from] NDArrayNumericTensorError),
    #[error(transparent)]
    DTypeError(#[from] DTypeError),
    #[cfg(feature = "candle")]
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl ConversionError {
    pub fn unsupported(backend: &str, payload: &NativeArray) -> Self {
        ConversionError::Unsupported {
            backend: backend.to_string(),
            type_name: payload.type_name().to_string(),
            reason: "payload belongs to another backend".to_string(),
        }
    }
}

/// Result of the export phase, consumed by the import phase.
#[derive(Debug, Default)]
pub struct ExportedObjects {
    variable_ids: HashSet<u64>,
    objects: Vec<TrackedObject>,
}

impl ExportedObjects {
    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn is_variable(&self, id: u64) -> bool {
        self.variable_ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Plain data of `payload` in neutral form, and whether it was a variable.
fn export_payload(registry: &BackendRegistry, payload: &NativeArray) -> Result<(NDArrayNumericTensor, bool), ConversionError> {
    let module = registry
        .module_for_payload(payload)
        .ok_or_else(|| ConversionError::UnrecognizedPayload(payload.type_name().to_string()))??;
    let is_variable = module.is_variable(payload);
    let neutral = if is_variable {
        module.to_neutral(&module.variable_data(payload)?)?
    } else {
        module.to_neutral(payload)?
    };
    Ok((neutral, is_variable))
}

fn commit(staged: Vec<(Array, NativeArray)>) {
    for (array, payload) in staged {
        array.set_data(payload);
    }
}

/// Export phase over every live tracked object whose `dynamic_backend` flag
/// is set. Arrays that are leaves of an exported container are converted
/// through that container only.
pub fn export_to_neutral(registry: &BackendRegistry) -> Result<ExportedObjects, ConversionError> {
    let live: Vec<TrackedObject> = tracking::live_objects()
        .into_iter()
        .filter(TrackedObject::dynamic_backend)
        .collect();

    let containers: Vec<Container> = live
        .iter()
        .filter_map(|x| match x {
            TrackedObject::Container(c) => Some(c.clone()),
            TrackedObject::Array(_) => None,
        })
        .collect();
    let mut leaf_ids = HashSet::new();
    let container_leaves: Vec<(Container, Vec<Array>)> = containers
        .iter()
        .map(|c| {
            let leaves = c.leaves().into_iter().filter(|leaf| leaf_ids.insert(leaf.id())).collect();
            (c.clone(), leaves)
        })
        .collect();

    let mut exported = ExportedObjects::default();
    let mut staged = Vec::new();

    for object in &live {
        let TrackedObject::Array(array) = object else {
            continue;
        };
        if leaf_ids.contains(&array.id()) {
            continue;
        }
        let (neutral, is_variable) = export_payload(registry, &array.data())?;
        if is_variable {
            exported.variable_ids.insert(array.id());
        }
        staged.push((array.clone(), NativeArray::NDArray(neutral)));
        exported.objects.push(object.clone());
    }

    for (container, leaves) in container_leaves {
        let mut converted = Vec::with_capacity(leaves.len());
        let mut all_variables = true;
        for leaf in leaves {
            let (neutral, is_variable) = export_payload(registry, &leaf.data())?;
            all_variables &= is_variable;
            converted.push((leaf, NativeArray::NDArray(neutral)));
        }
        // A container is a variable only when every leaf is one
        if all_variables && !converted.is_empty() {
            exported.variable_ids.insert(container.id());
        }
        staged.extend(converted);
        exported.objects.push(TrackedObject::Container(container));
    }

    debug!(
        "exported {} tracked objects ({} variables) to neutral form",
        exported.objects.len(),
        exported.variable_ids.len()
    );
    commit(staged);
    Ok(exported)
}

fn import_payload(target: &Backend, payload: &NativeArray, as_variable: bool) -> Result<NativeArray, ConversionError> {
    let neutral = payload
        .as_ndarray()
        .ok_or_else(|| ConversionError::UnrecognizedPayload(payload.type_name().to_string()))?;
    let native = target.module().from_neutral(neutral)?;
    if as_variable {
        target.module().to_variable(native)
    } else {
        Ok(native)
    }
}

/// Import phase: converts every exported object to `target`'s native form.
pub fn import_from_neutral(exported: &ExportedObjects, target: &Backend) -> Result<(), ConversionError> {
    let mut staged = Vec::new();
    let mut seen = HashSet::new();
    for object in &exported.objects {
        let as_variable = exported.is_variable(object.id());
        match object {
            TrackedObject::Array(array) => {
                staged.push((array.clone(), import_payload(target, &array.data(), as_variable)?));
            }
            TrackedObject::Container(container) => {
                for leaf in container.leaves().into_iter().filter(|leaf| seen.insert(leaf.id())) {
                    let payload = import_payload(target, &leaf.data(), as_variable)?;
                    staged.push((leaf, payload));
                }
            }
        }
    }
    debug!("imported {} payloads into {}", staged.len(), target.name());
    commit(staged);
    Ok(())
}
