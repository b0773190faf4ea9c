use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::dtype::DType;
use crate::native_array::NativeArray;
use crate::tracking;

pub struct ArrayCell {
    id: u64,
    data: RwLock<NativeArray>,
    dynamic_backend: AtomicBool,
}

impl ArrayCell {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ArrayCell {
    fn drop(&mut self) {
        tracking::deregister(self.id);
    }
}

/// The library's own array: a shared, tracked cell around a native payload.
///
/// Clones share the cell, so an in-place payload replacement (the `out`
/// argument, or a dynamic backend switch) is visible through every clone.
#[derive(Clone)]
pub struct Array {
    cell: Arc<ArrayCell>,
}

impl Array {
    pub fn new(data: impl Into<NativeArray>) -> Self {
        Self::with_dynamic_backend(data, tracking::dynamic_backend())
    }

    pub fn with_dynamic_backend(data: impl Into<NativeArray>, dynamic_backend: bool) -> Self {
        let cell = Arc::new(ArrayCell {
            id: tracking::next_id(),
            data: RwLock::new(data.into()),
            dynamic_backend: AtomicBool::new(dynamic_backend),
        });
        tracking::register_array(&cell);
        Self { cell }
    }

    pub(crate) fn from_cell(cell: Arc<ArrayCell>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> u64 {
        self.cell.id
    }

    /// Snapshot of the current payload.
    pub fn data(&self) -> NativeArray {
        self.cell.data.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_data(&self, data: NativeArray) {
        *self.cell.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    pub fn dynamic_backend(&self) -> bool {
        self.cell.dynamic_backend.load(Ordering::Relaxed)
    }

    pub fn set_dynamic_backend(&self, value: bool) {
        self.cell.dynamic_backend.store(value, Ordering::Relaxed);
    }

    pub fn shape(&self) -> Vec<usize> {
        self.cell.data.read().unwrap_or_else(PoisonError::into_inner).shape()
    }

    pub fn dtype(&self) -> Option<DType> {
        self.cell.data.read().unwrap_or_else(PoisonError::into_inner).dtype()
    }

    pub fn type_name(&self) -> String {
        self.cell
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .type_name()
            .to_string()
    }

    pub fn same_object(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Debug for Array {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("id", &self.cell.id)
            .field("dynamic_backend", &self.dynamic_backend())
            .field("data", &self.data())
            .finish()
    }
}
