use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::array::Array;
use crate::tracking;

#[derive(Clone, Debug)]
pub enum ContainerNode {
    Leaf(Array),
    Branch(BTreeMap<String, ContainerNode>),
}

impl ContainerNode {
    fn collect_leaves(&self, out: &mut Vec<Array>) {
        match self {
            ContainerNode::Leaf(x) => out.push(x.clone()),
            ContainerNode::Branch(children) => {
                for child in children.values() {
                    child.collect_leaves(out);
                }
            }
        }
    }

    fn try_map<E>(&self, f: &mut impl FnMut(&Array) -> Result<Array, E>) -> Result<ContainerNode, E> {
        Ok(match self {
            ContainerNode::Leaf(x) => ContainerNode::Leaf(f(x)?),
            ContainerNode::Branch(children) => ContainerNode::Branch(
                children
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.try_map(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    fn get(&self, path: &[&str]) -> Option<&ContainerNode> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => match self {
                ContainerNode::Branch(children) => children.get(*head)?.get(rest),
                ContainerNode::Leaf(_) => None,
            },
        }
    }
}

pub struct ContainerCell {
    id: u64,
    root: RwLock<ContainerNode>,
    dynamic_backend: AtomicBool,
}

impl ContainerCell {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ContainerCell {
    fn drop(&mut self) {
        tracking::deregister(self.id);
    }
}

/// Nested, string-keyed tree of [`Array`] leaves.
#[derive(Clone)]
pub struct Container {
    cell: Arc<ContainerCell>,
}

impl Container {
    pub fn new(root: ContainerNode) -> Self {
        Self::with_dynamic_backend(root, tracking::dynamic_backend())
    }

    pub fn with_dynamic_backend(root: ContainerNode, dynamic_backend: bool) -> Self {
        let cell = Arc::new(ContainerCell {
            id: tracking::next_id(),
            root: RwLock::new(root),
            dynamic_backend: AtomicBool::new(dynamic_backend),
        });
        tracking::register_container(&cell);
        Self { cell }
    }

    /// Flat container from `(key, leaf)` pairs.
    pub fn from_leaves<K: Into<String>>(leaves: impl IntoIterator<Item = (K, Array)>) -> Self {
        Self::new(ContainerNode::Branch(
            leaves
                .into_iter()
                .map(|(k, v)| (k.into(), ContainerNode::Leaf(v)))
                .collect(),
        ))
    }

    pub(crate) fn from_cell(cell: Arc<ContainerCell>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn dynamic_backend(&self) -> bool {
        self.cell.dynamic_backend.load(Ordering::Relaxed)
    }

    pub fn set_dynamic_backend(&self, value: bool) {
        self.cell.dynamic_backend.store(value, Ordering::Relaxed);
    }

    pub fn root(&self) -> ContainerNode {
        self.cell.root.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Leaves in key order, depth first.
    pub fn leaves(&self) -> Vec<Array> {
        let mut out = Vec::new();
        self.cell
            .root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .collect_leaves(&mut out);
        out
    }

    /// Leaf at a dotted path such as `"layer0.weight"`.
    pub fn get(&self, path: &str) -> Option<Array> {
        let parts: Vec<&str> = path.split('.').filter(|x| !x.is_empty()).collect();
        match self.cell.root.read().unwrap_or_else(PoisonError::into_inner).get(&parts)? {
            ContainerNode::Leaf(x) => Some(x.clone()),
            ContainerNode::Branch(_) => None,
        }
    }

    /// New container of identical structure with every leaf mapped.
    pub fn try_map<E>(&self, mut f: impl FnMut(&Array) -> Result<Array, E>) -> Result<Container, E> {
        let root = self.root().try_map(&mut f)?;
        Ok(Container::with_dynamic_backend(root, self.dynamic_backend()))
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.cell.id)
            .field("dynamic_backend", &self.dynamic_backend())
            .field("root", &self.root())
            .finish()
    }
}
