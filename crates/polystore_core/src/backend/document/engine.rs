//! In-process document engine with etags and per-collection id sequences.

use super::filter::parse_filter;
use super::index::IndexDefinition;
use crate::error::{RepoError, RepoResult};
use crate::spec::{order_and_paginate, OrderBy};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const BACKEND: &str = "document";

/// A stored document with its current etag.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
    pub etag: u64,
}

/// Result of a single-document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { id: String, etag: u64 },
    DuplicateId(String),
    NotFound(String),
    EtagMismatch { id: String, expected: u64, actual: u64 },
}

#[derive(Default)]
struct EngineState {
    collections: HashMap<String, BTreeMap<String, (Value, u64)>>,
    sequences: HashMap<String, u64>,
    indexes: BTreeMap<String, IndexDefinition>,
    last_etag: u64,
}

impl EngineState {
    fn next_etag(&mut self) -> u64 {
        self.last_etag += 1;
        self.last_etag
    }
}

/// One document database. Writes apply immediately; every write bumps the
/// document's etag from an engine-wide counter.
pub struct DocumentEngine {
    name: String,
    online: AtomicBool,
    state: RwLock<EngineState>,
}

impl DocumentEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: AtomicBool::new(true),
            state: RwLock::new(EngineState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the engine on or off line. Offline engines fail every call.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Number of documents in `collection`, regardless of availability.
    pub fn len(&self, collection: &str) -> usize {
        self.read()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn load(&self, collection: &str, ids: &[String]) -> RepoResult<Vec<Document>> {
        self.check_online()?;
        let state = self.read();
        let Some(documents) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                documents.get(id).map(|(body, etag)| Document {
                    id: id.clone(),
                    body: body.clone(),
                    etag: *etag,
                })
            })
            .collect())
    }

    pub fn query(
        &self,
        collection: &str,
        filter: &Value,
        order: &[OrderBy],
        offset: u64,
        limit: u64,
    ) -> RepoResult<Vec<Document>> {
        self.check_online()?;
        let predicate = parse_filter(filter)?;
        let state = self.read();
        let matches = state
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|(_, (body, _))| predicate.evaluate(body))
            .map(|(id, (body, etag))| Document {
                id: id.clone(),
                body: body.clone(),
                etag: *etag,
            })
            .collect::<Vec<_>>();
        Ok(order_and_paginate(matches, order, offset, limit, |document| {
            (document.id.as_str(), &document.body)
        }))
    }

    /// Stores `definition`, replacing an index of the same name.
    ///
    /// # Errors
    /// - `InvalidData` when the definition does not validate.
    pub fn put_index(&self, definition: IndexDefinition) -> RepoResult<()> {
        self.check_online()?;
        definition.validate()?;
        self.write()
            .indexes
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn index_definition(&self, name: &str) -> Option<IndexDefinition> {
        self.read().indexes.get(name).cloned()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.read().indexes.keys().cloned().collect()
    }

    /// Queries the documents an index maps. Without `order` the index sort
    /// applies.
    ///
    /// # Errors
    /// - `InvalidData` for unknown indexes, indexes over another collection
    ///   or queries on fields the index does not expose.
    pub fn query_index(
        &self,
        index: &str,
        collection: &str,
        filter: &Value,
        order: &[OrderBy],
        offset: u64,
        limit: u64,
    ) -> RepoResult<Vec<Document>> {
        self.check_online()?;
        let predicate = parse_filter(filter)?;
        let state = self.read();
        let definition = state.indexes.get(index).ok_or_else(|| {
            RepoError::InvalidData(format!("engine `{}` has no index `{index}`", self.name))
        })?;
        if definition.collection != collection {
            return Err(RepoError::InvalidData(format!(
                "index `{index}` covers `{}`, not `{collection}`",
                definition.collection
            )));
        }
        definition.check_query(&predicate, order)?;
        let matches = state
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|(_, (body, _))| definition.map.evaluate(body) && predicate.evaluate(body))
            .map(|(id, (body, etag))| Document {
                id: id.clone(),
                body: body.clone(),
                etag: *etag,
            })
            .collect::<Vec<_>>();
        Ok(order_and_paginate(
            matches,
            definition.effective_order(order),
            offset,
            limit,
            |document| (document.id.as_str(), &document.body),
        ))
    }

    pub fn count(&self, collection: &str, filter: &Value) -> RepoResult<u64> {
        self.check_online()?;
        let predicate = parse_filter(filter)?;
        let state = self.read();
        Ok(state
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|(_, (body, _))| predicate.evaluate(body))
            .count() as u64)
    }

    /// Reserves the next `<prefix><collection>/<n>` id.
    pub fn next_id(&self, collection: &str, prefix: &str) -> RepoResult<String> {
        self.check_online()?;
        let mut state = self.write();
        let next = state.sequences.entry(collection.to_string()).or_insert(0);
        *next += 1;
        Ok(format!("{prefix}{collection}/{next}"))
    }

    pub fn insert(&self, collection: &str, id: &str, body: Value) -> RepoResult<WriteOutcome> {
        self.check_online()?;
        let mut state = self.write();
        let etag = state.next_etag();
        let documents = state.collections.entry(collection.to_string()).or_default();
        if documents.contains_key(id) {
            return Ok(WriteOutcome::DuplicateId(id.to_string()));
        }
        documents.insert(id.to_string(), (body, etag));
        Ok(WriteOutcome::Written {
            id: id.to_string(),
            etag,
        })
    }

    /// Replaces an existing document. With `expected_etag`, the write only
    /// applies when the stored etag still matches.
    pub fn replace(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        expected_etag: Option<u64>,
    ) -> RepoResult<WriteOutcome> {
        self.check_online()?;
        let mut state = self.write();
        let etag = state.next_etag();
        let Some(slot) = state
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        else {
            return Ok(WriteOutcome::NotFound(id.to_string()));
        };
        if let Some(expected) = expected_etag {
            if slot.1 != expected {
                return Ok(WriteOutcome::EtagMismatch {
                    id: id.to_string(),
                    expected,
                    actual: slot.1,
                });
            }
        }
        *slot = (body, etag);
        Ok(WriteOutcome::Written {
            id: id.to_string(),
            etag,
        })
    }

    pub fn delete(&self, collection: &str, ids: &[String]) -> RepoResult<u64> {
        self.check_online()?;
        let mut state = self.write();
        let Some(documents) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| documents.remove(id.as_str()).is_some())
            .count() as u64)
    }

    pub fn delete_where(&self, collection: &str, filter: &Value) -> RepoResult<u64> {
        self.check_online()?;
        let predicate = parse_filter(filter)?;
        let mut state = self.write();
        let Some(documents) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = documents.len();
        documents.retain(|_, (body, _)| !predicate.evaluate(body));
        Ok((before - documents.len()) as u64)
    }

    fn check_online(&self) -> RepoResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RepoError::backend(
                BACKEND,
                format!("engine `{}` is offline", self.name),
            ))
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DocumentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentEngine")
            .field("name", &self.name)
            .field("online", &self.is_online())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DocumentEngine, WriteOutcome};
    use crate::backend::document::index::IndexDefinition;
    use crate::spec::{OrderBy, Predicate};
    use serde_json::json;

    #[test]
    fn index_queries_see_only_mapped_documents_in_index_order() {
        let engine = DocumentEngine::new("mem://a");
        for (id, status, total) in [("o1", "open", 5), ("o2", "shipped", 9), ("o3", "open", 7)] {
            engine
                .insert("orders", id, json!({ "status": status, "total": total }))
                .unwrap();
        }
        engine
            .put_index(
                IndexDefinition::new("open-by-total", "orders")
                    .map(Predicate::eq("status", "open"))
                    .field("total")
                    .sort(OrderBy::desc("total")),
            )
            .unwrap();

        let ids = |documents: Vec<super::Document>| {
            documents.into_iter().map(|document| document.id).collect::<Vec<_>>()
        };
        let all = engine
            .query_index("open-by-total", "orders", &json!({}), &[], 0, 0)
            .unwrap();
        assert_eq!(ids(all), vec!["o3", "o1"]);

        let cheap = engine
            .query_index(
                "open-by-total",
                "orders",
                &json!({ "total": { "$lt": 6 } }),
                &[OrderBy::asc("total")],
                0,
                0,
            )
            .unwrap();
        assert_eq!(ids(cheap), vec!["o1"]);

        assert!(engine
            .query_index("open-by-total", "customers", &json!({}), &[], 0, 0)
            .is_err());
        assert!(engine
            .query_index("missing", "orders", &json!({}), &[], 0, 0)
            .is_err());
        assert_eq!(engine.index_names(), vec!["open-by-total".to_string()]);
    }

    #[test]
    fn replace_checks_expected_etag() {
        let engine = DocumentEngine::new("mem://a");
        let first = engine.insert("orders", "orders/1", json!({ "n": 1 })).unwrap();
        let WriteOutcome::Written { etag, .. } = first else {
            panic!("insert should write");
        };

        let stale = engine
            .replace("orders", "orders/1", json!({ "n": 2 }), Some(etag + 100))
            .unwrap();
        assert!(matches!(stale, WriteOutcome::EtagMismatch { .. }));

        let fresh = engine
            .replace("orders", "orders/1", json!({ "n": 2 }), Some(etag))
            .unwrap();
        assert!(matches!(fresh, WriteOutcome::Written { .. }));
        assert_eq!(
            engine.replace("orders", "orders/9", json!({}), None).unwrap(),
            WriteOutcome::NotFound("orders/9".to_string())
        );
    }

    #[test]
    fn ids_are_sequential_per_collection() {
        let engine = DocumentEngine::new("mem://a");
        assert_eq!(engine.next_id("orders", "").unwrap(), "orders/1");
        assert_eq!(engine.next_id("orders", "").unwrap(), "orders/2");
        assert_eq!(engine.next_id("customers", "a/").unwrap(), "a/customers/1");
    }

    #[test]
    fn offline_engine_fails_calls() {
        let engine = DocumentEngine::new("mem://a");
        engine.set_online(false);
        assert!(engine.insert("orders", "orders/1", json!({})).is_err());
        engine.set_online(true);
        assert!(engine.insert("orders", "orders/1", json!({})).is_ok());
    }
}
