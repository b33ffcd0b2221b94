//! Shared, lockable graph nodes.

use super::{AuditNode, NodeId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

/// A node referenced from several places in a graph, possibly cyclically.
///
/// The identity is captured at construction and stored outside the lock, so
/// a cascade can detect a revisit without locking the node again.
///
/// Serializing a cyclic graph does not terminate; back-links should be
/// `#[serde(skip)]`.
pub struct SharedNode<N> {
    id: NodeId,
    inner: Arc<Mutex<N>>,
}

impl<N: AuditNode> SharedNode<N> {
    pub fn new(node: N) -> Self {
        let inner = Arc::new(Mutex::new(node));
        // Keyless nodes take the address inside the shared allocation, which
        // stays stable for the node's lifetime.
        let id = lock_recover(&inner).node_id();
        Self { id, inner }
    }
}

impl<N> SharedNode<N> {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Locks the node, recovering the value if a previous holder panicked.
    pub fn lock(&self) -> MutexGuard<'_, N> {
        lock_recover(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn lock_recover<N>(mutex: &Mutex<N>) -> MutexGuard<'_, N> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<N> Clone for SharedNode<N> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N> Debug for SharedNode<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedNode").field("id", &self.id).finish()
    }
}

impl<N: Serialize> Serialize for SharedNode<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.lock().serialize(serializer)
    }
}

impl<'de, N> Deserialize<'de> for SharedNode<N>
where
    N: AuditNode + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        N::deserialize(deserializer).map(SharedNode::new)
    }
}
