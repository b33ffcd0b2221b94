//! Entity trait and backend-neutral key representation.
//!
//! # Responsibility
//! - Describe persistable records to repositories without tying them to one
//!   backend.
//! - Encode and decode entity bodies as JSON values.
//!
//! # Invariants
//! - `EntityKey` is never empty.
//! - `storage_key()` is deterministic for equal keys.

use crate::audit::AuditNode;
use crate::error::{RepoError, RepoResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// One component of an entity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

impl KeyPart {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(value) => Value::from(*value),
            Self::Text(value) => Value::from(value.as_str()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Text(value) => Some(value.as_str()),
        }
    }

    /// `0` or empty text: the value a key field holds before it is saved.
    pub fn is_default(&self) -> bool {
        match self {
            Self::Int(value) => *value == 0,
            Self::Text(value) => value.is_empty(),
        }
    }
}

impl Display for KeyPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Uuid> for KeyPart {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

/// Primary key of an entity: one part, or several for composite keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(Vec<KeyPart>);

impl EntityKey {
    pub fn single(part: impl Into<KeyPart>) -> Self {
        Self(vec![part.into()])
    }

    /// Builds a composite key. Returns `None` for an empty part list.
    pub fn composite(parts: Vec<KeyPart>) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        Some(Self(parts))
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }

    /// Every part still holds its default value, so the key does not
    /// identify a stored record yet.
    pub fn is_unassigned(&self) -> bool {
        self.0.iter().all(KeyPart::is_default)
    }

    /// Returns the first part, which is the whole key for single keys.
    pub fn first(&self) -> &KeyPart {
        &self.0[0]
    }

    /// Stable text form used as the storage identifier.
    pub fn storage_key(&self) -> String {
        if self.is_composite() {
            self.to_json().to_string()
        } else {
            self.first().to_string()
        }
    }

    /// JSON form: a scalar for single keys, an array for composite keys.
    pub fn to_json(&self) -> Value {
        if self.is_composite() {
            Value::Array(self.0.iter().map(KeyPart::to_json).collect())
        } else {
            self.first().to_json()
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

impl From<KeyPart> for EntityKey {
    fn from(value: KeyPart) -> Self {
        Self(vec![value])
    }
}

impl From<&EntityKey> for EntityKey {
    fn from(value: &EntityKey) -> Self {
        value.clone()
    }
}

macro_rules! single_key_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for EntityKey {
                fn from(value: $ty) -> Self {
                    Self::single(value)
                }
            }
        )*
    };
}

single_key_from!(i64, i32, u32, &str, String, &String, Uuid);

impl<A, B> From<(A, B)> for EntityKey
where
    A: Into<KeyPart>,
    B: Into<KeyPart>,
{
    fn from((a, b): (A, B)) -> Self {
        Self(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for EntityKey
where
    A: Into<KeyPart>,
    B: Into<KeyPart>,
    C: Into<KeyPart>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Self(vec![a.into(), b.into(), c.into()])
    }
}

/// A record type that repositories can persist.
///
/// Bodies are stored as the entity's serde JSON form, so key fields must be
/// part of the serialized body.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical collection (table, index, document collection) name.
    const COLLECTION: &'static str;

    /// Body field names that make up the primary key, in key-part order.
    fn key_fields() -> &'static [&'static str] {
        &["id"]
    }

    /// Current key, or `None` when the backend should generate one.
    fn key(&self) -> Option<EntityKey>;

    /// Receives a backend-generated key. Returns `false` when the entity
    /// cannot hold a key of that shape.
    fn assign_key(&mut self, _key: &EntityKey) -> bool {
        false
    }

    /// Routing key for sharded stores.
    fn shard_key(&self) -> Option<String> {
        self.key().map(|key| key.storage_key())
    }

    /// Audit capability of this entity, if it opts in.
    fn audit_node(&mut self) -> Option<&mut dyn AuditNode> {
        None
    }
}

/// Serializes an entity into its JSON body.
pub fn encode_entity<T: Entity>(entity: &T) -> RepoResult<Value> {
    let body = serde_json::to_value(entity)?;
    if !body.is_object() {
        return Err(RepoError::InvalidData(format!(
            "{} entities must serialize to a JSON object",
            T::COLLECTION
        )));
    }
    Ok(body)
}

/// Deserializes a stored JSON body into an entity.
pub fn decode_entity<T: Entity>(body: Value) -> RepoResult<T> {
    serde_json::from_value(body).map_err(|err| {
        RepoError::InvalidData(format!("cannot decode {} entity: {err}", T::COLLECTION))
    })
}

/// Returns the entity key or an error naming the operation that needed it.
pub fn require_key<T: Entity>(entity: &T, operation: &str) -> RepoResult<EntityKey> {
    entity.key().ok_or_else(|| {
        RepoError::InvalidData(format!(
            "{operation} requires a key on {} entity",
            T::COLLECTION
        ))
    })
}
