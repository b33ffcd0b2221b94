//! Uniform repository contracts shared by every backend.
//!
//! # Responsibility
//! - Define CRUD, query, bulk and metadata operations independent of the
//!   storage engine behind them.
//! - Normalize caller-visible behavior: absence is `None`, bulk failures are
//!   `PartialFailure`, unsupported operations are `Unsupported`.
//!
//! # Invariants
//! - `find_all` returns filter, then order, then offset, then limit; a limit
//!   of zero is unbounded.
//! - `add`/`update`/`remove` return `None` for backend no-ops (missing row,
//!   duplicate key, version conflict in `ConflictMode::NoOp`).
//! - Bulk operations never drop an item failure silently.

mod load;

pub use load::LoadService;

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{require_key, Entity, EntityKey, KeyPart};
use crate::spec::{OrderBy, Specification};
use serde_json::Value;
use std::collections::BTreeMap;

/// Offset/limit window plus ordering for `find_all`.
///
/// A non-empty `order_by` replaces the specification's ordering hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
    pub order_by: Vec<OrderBy>,
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            order_by: Vec::new(),
        }
    }

    /// First result only.
    pub fn first() -> Self {
        Self::new(0, 1)
    }

    pub fn order_by(mut self, term: OrderBy) -> Self {
        self.order_by.push(term);
        self
    }

    /// Ordering to apply for `spec` under this page.
    pub fn effective_order<'a, T>(&'a self, spec: &'a Specification<T>) -> &'a [OrderBy] {
        if self.order_by.is_empty() {
            spec.order()
        } else {
            &self.order_by
        }
    }
}

/// Named parameters for backend-native commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    values: BTreeMap<String, Value>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Field assignments applied by `update_where`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPatch {
    assignments: Vec<(String, Value)>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((field.into(), value.into()));
        self
    }

    pub fn assignments(&self) -> &[(String, Value)] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// How optimistic-concurrency conflicts surface to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictMode {
    /// Conflicting writes return `None`.
    #[default]
    NoOp,
    /// Conflicting writes return `RepoError::Conflict`.
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryOptions {
    pub conflict_mode: ConflictMode,
}

impl RepositoryOptions {
    pub fn strict() -> Self {
        Self {
            conflict_mode: ConflictMode::Strict,
        }
    }

    /// Maps a detected conflict to the configured caller-visible result.
    pub fn conflict<T>(&self, collection: &str, key: &str) -> RepoResult<Option<T>> {
        match self.conflict_mode {
            ConflictMode::NoOp => Ok(None),
            ConflictMode::Strict => Err(RepoError::Conflict {
                collection: collection.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

/// CRUD and query facade over one store.
pub trait Repository {
    fn get_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>>;

    /// First match under the specification's ordering.
    fn find<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        let page = Page::first();
        Ok(self.find_all(spec, &page)?.into_iter().next())
    }

    fn find_all<T: Entity>(&self, spec: &Specification<T>, page: &Page) -> RepoResult<Vec<T>>;

    /// Persists a new entity. A missing key is generated by the backend and
    /// assigned to the returned entity.
    fn add<T: Entity>(&self, entity: T) -> RepoResult<Option<T>>;

    fn update<T: Entity>(&self, entity: T) -> RepoResult<Option<T>>;

    fn remove<T: Entity>(&self, entity: T) -> RepoResult<Option<T>> {
        let key = require_key(&entity, "remove")?;
        Ok(self.remove_by_id::<T>(key)?.map(|_| entity))
    }

    /// Deletes by key and returns the stored entity that was removed.
    fn remove_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>>;

    fn count<T: Entity>(&self, spec: Option<&Specification<T>>) -> RepoResult<u64>;

    fn all<T: Entity>(&self) -> RepoResult<Vec<T>> {
        self.find_all(&Specification::all(), &Page::default())
    }

    /// Backend-native passthrough.
    fn execute<T: Entity>(&self, command: &str, params: &ParamList) -> RepoResult<Vec<T>>;

    /// Starts change tracking for an entity loaded elsewhere.
    fn attach<T: Entity>(&self, entity: &T) -> RepoResult<()>;

    fn detach<T: Entity>(&self, entity: &T) -> RepoResult<()>;

    /// Commits the current unit of work.
    fn save_changes(&self) -> RepoResult<()>;

    fn source(&self) -> String;

    /// Load-then-update helper bound to this repository.
    fn load<T: Entity>(&self) -> LoadService<'_, Self, T>
    where
        Self: Sized,
    {
        LoadService::new(self)
    }
}

/// Set-oriented operations. Counts are the number of items actually
/// affected; any failed item or shard yields `RepoError::PartialFailure`.
pub trait BulkOperations {
    /// Returns the entities found for `ids`, in `ids` order.
    fn get_many<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<Vec<T>>;

    fn insert_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64>;

    fn update_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64>;

    fn delete_many<T: Entity>(&self, entities: &[T]) -> RepoResult<u64> {
        let ids = entities
            .iter()
            .map(|entity| require_key(entity, "delete_many"))
            .collect::<RepoResult<Vec<_>>>()?;
        self.delete_by_ids::<T>(&ids)
    }

    fn delete_by_ids<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<u64>;

    fn delete_where<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<u64>;

    fn update_where<T: Entity>(&self, spec: &Specification<T>, patch: &FieldPatch)
        -> RepoResult<u64>;
}

/// Primary-key introspection.
pub trait MetadataProvider {
    fn primary_key<T: Entity>(&self) -> Vec<&'static str> {
        T::key_fields().to_vec()
    }

    fn primary_key_value<T: Entity>(&self, entity: &T) -> Option<Vec<KeyPart>> {
        entity.key().map(|key| key.parts().to_vec())
    }
}

/// Reorders `found` to follow `ids`, dropping ids without a match.
pub(crate) fn order_by_ids<X>(
    ids: &[EntityKey],
    found: Vec<(String, X)>,
) -> Vec<X> {
    let mut by_key = found.into_iter().collect::<BTreeMap<_, _>>();
    ids.iter()
        .filter_map(|id| by_key.remove(&id.storage_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{order_by_ids, Page, RepositoryOptions};
    use crate::error::RepoError;
    use crate::model::entity::EntityKey;
    use crate::spec::{OrderBy, Predicate, Specification};

    #[test]
    fn page_order_overrides_spec_hints() {
        let spec = Specification::<()>::new(Predicate::always()).order_by(OrderBy::asc("a"));
        assert_eq!(Page::default().effective_order(&spec), &[OrderBy::asc("a")]);

        let page = Page::new(0, 10).order_by(OrderBy::desc("b"));
        assert_eq!(page.effective_order(&spec), &[OrderBy::desc("b")]);
    }

    #[test]
    fn strict_mode_turns_conflicts_into_errors() {
        assert!(RepositoryOptions::default()
            .conflict::<u32>("orders", "1")
            .unwrap()
            .is_none());
        assert!(matches!(
            RepositoryOptions::strict().conflict::<u32>("orders", "1"),
            Err(RepoError::Conflict { .. })
        ));
    }

    #[test]
    fn order_by_ids_follows_request_order() {
        let ids = vec![EntityKey::from(3_i64), EntityKey::from(9_i64), EntityKey::from(1_i64)];
        let found = vec![("1".to_string(), "one"), ("3".to_string(), "three")];
        assert_eq!(order_by_ids(&ids, found), vec!["three", "one"]);
    }
}
