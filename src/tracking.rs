//! Process-wide registry of live [`Array`] and [`Container`] objects.
//!
//! Entries are weak and keyed by creation id, so iteration follows creation
//! order and the registry never keeps an object alive. Cells register
//! themselves on construction and deregister in `Drop`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};

use log::warn;

use crate::array::{Array, ArrayCell};
use crate::config::HandlerConfig;
use crate::container::{Container, ContainerCell};

enum TrackedRef {
    Array(Weak<ArrayCell>),
    Container(Weak<ContainerCell>),
}

#[derive(Clone, Debug)]
pub enum TrackedObject {
    Array(Array),
    Container(Container),
}

impl TrackedObject {
    pub fn id(&self) -> u64 {
        match self {
            TrackedObject::Array(x) => x.id(),
            TrackedObject::Container(x) => x.id(),
        }
    }

    pub fn dynamic_backend(&self) -> bool {
        match self {
            TrackedObject::Array(x) => x.dynamic_backend(),
            TrackedObject::Container(x) => x.dynamic_backend(),
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static REGISTRY: LazyLock<Mutex<BTreeMap<u64, TrackedRef>>> = LazyLock::new(|| Mutex::new(BTreeMap::new()));
// Seeded from the environment configuration, independent of any handler.
static DYNAMIC_BACKEND_DEFAULT: LazyLock<AtomicBool> = LazyLock::new(|| {
    let seeded = HandlerConfig::from_env().map(|c| c.dynamic_backend).unwrap_or_else(|err| {
        warn!("Ignoring invalid handler configuration for dynamic_backend: {err}");
        false
    });
    AtomicBool::new(seeded)
});

fn registry() -> MutexGuard<'static, BTreeMap<u64, TrackedRef>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn register_array(cell: &Arc<ArrayCell>) {
    registry().insert(cell.id(), TrackedRef::Array(Arc::downgrade(cell)));
}

pub(crate) fn register_container(cell: &Arc<ContainerCell>) {
    registry().insert(cell.id(), TrackedRef::Container(Arc::downgrade(cell)));
}

pub(crate) fn deregister(id: u64) {
    registry().remove(&id);
}

/// Strong handles to every tracked object still alive, in creation order.
pub fn live_objects() -> Vec<TrackedObject> {
    let guard = registry();
    guard
        .values()
        .filter_map(|r| match r {
            TrackedRef::Array(w) => w.upgrade().map(|cell| TrackedObject::Array(Array::from_cell(cell))),
            TrackedRef::Container(w) => w
                .upgrade()
                .map(|cell| TrackedObject::Container(Container::from_cell(cell))),
        })
        .collect()
}

pub fn live_count() -> usize {
    registry().len()
}

/// Default `dynamic_backend` flag for newly created objects.
pub fn dynamic_backend() -> bool {
    DYNAMIC_BACKEND_DEFAULT.load(Ordering::Relaxed)
}

pub fn set_dynamic_backend(value: bool) {
    DYNAMIC_BACKEND_DEFAULT.store(value, Ordering::Relaxed);
}
