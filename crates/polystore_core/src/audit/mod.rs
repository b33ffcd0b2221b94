//! Audit metadata and cascade traversal over entity graphs.
//!
//! # Responsibility
//! - Define the audit capability entities opt into (`AuditNode`).
//! - Stamp provenance on a root entity and propagate it depth-first through
//!   owned and shared sub-entities.
//!
//! # Invariants
//! - Every node is stamped at most once per cascade (visited set keyed by
//!   `NodeId`).
//! - Every stamped node ends with the root's `audit_id`.
//! - An existing `create_date` on the root is never reset by an update.
//! - Missing audit capability is not an error.

mod cascade;
mod shared;

pub use cascade::{cascade_audit, cascade_audit_at, Cascade, CascadeMode, CascadeReport};
pub use shared::SharedNode;

use crate::model::entity::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance fields carried by auditable entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditMetadata {
    pub audit_id: Option<Uuid>,
    pub created_by: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub update_date: Option<DateTime<Utc>>,
}

/// Identity of a graph node for cycle detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// Node with a persistent key.
    Keyed { kind: &'static str, key: String },
    /// Keyless node identified by its type and memory address.
    Address { kind: &'static str, addr: usize },
}

impl NodeId {
    /// Identity of an entity: collection plus key, or its address when the
    /// key is missing or still holds default values. Unsaved siblings keyed
    /// `0` stay distinct.
    pub fn of_entity<E: Entity>(entity: &E) -> Self {
        match entity.key() {
            Some(key) if !key.is_unassigned() => Self::Keyed {
                kind: E::COLLECTION,
                key: key.storage_key(),
            },
            _ => Self::of_ref(entity),
        }
    }

    /// Address-based identity for values without a key.
    pub fn of_ref<T>(value: &T) -> Self {
        Self::Address {
            kind: std::any::type_name::<T>(),
            addr: value as *const T as usize,
        }
    }
}

/// Audit capability of one node in an entity graph.
pub trait AuditNode {
    fn node_id(&self) -> NodeId;

    /// Mutable audit fields, or `None` for pass-through nodes that only
    /// connect auditable children.
    fn audit_metadata(&mut self) -> Option<&mut AuditMetadata>;

    /// Declares outgoing edges by handing each child to the cascade.
    fn children(&mut self, _cascade: &mut Cascade) {}
}
