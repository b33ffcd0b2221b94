//! In-process search index.
//!
//! Writes refresh immediately: a document is searchable as soon as the call
//! that wrote it returns.

use super::query::parse_query;
use crate::error::{RepoError, RepoResult};
use crate::spec::{order_and_paginate, OrderBy};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

const BACKEND: &str = "search";

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    Updated,
    Deleted,
    /// `create` against an existing id.
    Conflict,
    NotFound,
}

/// Result of one document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOutcome {
    pub id: String,
    pub status: IndexStatus,
}

impl IndexOutcome {
    fn new(id: impl Into<String>, status: IndexStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            IndexStatus::Created | IndexStatus::Updated | IndexStatus::Deleted
        )
    }
}

/// A set of named indices holding JSON sources by id.
pub struct SearchIndex {
    name: String,
    online: AtomicBool,
    indices: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl SearchIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: AtomicBool::new(true),
            indices: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Number of documents in `index`, regardless of availability.
    pub fn len(&self, index: &str) -> usize {
        self.read().get(index).map_or(0, BTreeMap::len)
    }

    pub fn get(&self, index: &str, id: &str) -> RepoResult<Option<Hit>> {
        self.check_online()?;
        Ok(self
            .read()
            .get(index)
            .and_then(|documents| documents.get(id))
            .map(|source| Hit {
                id: id.to_string(),
                source: source.clone(),
            }))
    }

    pub fn multi_get(&self, index: &str, ids: &[String]) -> RepoResult<Vec<Hit>> {
        self.check_online()?;
        let indices = self.read();
        let Some(documents) = indices.get(index) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                documents.get(id).map(|source| Hit {
                    id: id.clone(),
                    source: source.clone(),
                })
            })
            .collect())
    }

    /// Matching hits sorted by `sort` (then id), windowed by `from`/`size`.
    /// A `size` of zero is unbounded.
    pub fn search(
        &self,
        index: &str,
        query: &Value,
        sort: &[OrderBy],
        from: u64,
        size: u64,
    ) -> RepoResult<Vec<Hit>> {
        self.check_online()?;
        let query = parse_query(query)?;
        let indices = self.read();
        let hits = indices
            .get(index)
            .into_iter()
            .flatten()
            .filter(|(_, source)| query.matches(source))
            .map(|(id, source)| Hit {
                id: id.clone(),
                source: source.clone(),
            })
            .collect::<Vec<_>>();
        Ok(order_and_paginate(hits, sort, from, size, |hit| {
            (hit.id.as_str(), &hit.source)
        }))
    }

    pub fn count(&self, index: &str, query: &Value) -> RepoResult<u64> {
        self.check_online()?;
        let query = parse_query(query)?;
        Ok(self
            .read()
            .get(index)
            .into_iter()
            .flatten()
            .filter(|(_, source)| query.matches(source))
            .count() as u64)
    }

    /// Indexes a source. A missing id is generated (uuid v4). With `create`,
    /// an existing id is a `Conflict`; otherwise the source is replaced.
    pub fn index(
        &self,
        index: &str,
        id: Option<String>,
        source: Value,
        create: bool,
    ) -> RepoResult<IndexOutcome> {
        self.check_online()?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut indices = self.write();
        let documents = indices.entry(index.to_string()).or_default();
        let status = match documents.get_mut(&id) {
            Some(_) if create => IndexStatus::Conflict,
            Some(existing) => {
                *existing = source;
                IndexStatus::Updated
            }
            None => {
                documents.insert(id.clone(), source);
                IndexStatus::Created
            }
        };
        Ok(IndexOutcome::new(id, status))
    }

    /// Merges `doc` into an existing source, object fields recursively.
    pub fn update(&self, index: &str, id: &str, doc: Value) -> RepoResult<IndexOutcome> {
        self.check_online()?;
        let mut indices = self.write();
        let Some(existing) = indices
            .get_mut(index)
            .and_then(|documents| documents.get_mut(id))
        else {
            return Ok(IndexOutcome::new(id, IndexStatus::NotFound));
        };
        merge(existing, doc);
        Ok(IndexOutcome::new(id, IndexStatus::Updated))
    }

    pub fn delete(&self, index: &str, id: &str) -> RepoResult<IndexOutcome> {
        self.check_online()?;
        let removed = self
            .write()
            .get_mut(index)
            .and_then(|documents| documents.remove(id))
            .is_some();
        let status = if removed {
            IndexStatus::Deleted
        } else {
            IndexStatus::NotFound
        };
        Ok(IndexOutcome::new(id, status))
    }

    pub fn delete_by_query(&self, index: &str, query: &Value) -> RepoResult<u64> {
        self.check_online()?;
        let query = parse_query(query)?;
        let mut indices = self.write();
        let Some(documents) = indices.get_mut(index) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|_, source| !query.matches(source));
        Ok((before - documents.len()) as u64)
    }

    fn check_online(&self) -> RepoResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RepoError::backend(
                BACKEND,
                format!("index `{}` is unavailable", self.name),
            ))
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, BTreeMap<String, Value>>> {
        self.indices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, BTreeMap<String, Value>>> {
        self.indices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("name", &self.name)
            .field("online", &self.is_online())
            .finish()
    }
}

fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                match target.get_mut(&key) {
                    Some(existing) if nested => merge(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
