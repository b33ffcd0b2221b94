//! Document sessions: etag tracking per engine and shard routing.

use super::engine::{Document, DocumentEngine, WriteOutcome};
use super::store::ShardedStore;
use crate::error::{FailureDetail, RepoError, RepoResult};
use crate::session::NativeSession;
use crate::sharding::{AccessOutcome, ShardCall};
use crate::spec::{order_and_paginate, OrderBy};
use log::debug;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A document to insert as part of `InsertMany`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub id: String,
    pub body: Value,
    pub shard_key: Option<String>,
}

/// Native command language of the document backend.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    Load {
        collection: String,
        ids: Vec<String>,
    },
    Query {
        collection: String,
        filter: Value,
        order: Vec<OrderBy>,
        offset: u64,
        limit: u64,
    },
    /// Queries a named index. An empty `order` uses the index sort.
    QueryIndex {
        index: String,
        collection: String,
        filter: Value,
        order: Vec<OrderBy>,
        offset: u64,
        limit: u64,
    },
    Count {
        collection: String,
        filter: Value,
    },
    /// Reserves an id on the shard owning `shard_key`.
    GenerateId {
        collection: String,
        shard_key: Option<String>,
    },
    Insert {
        collection: String,
        id: String,
        body: Value,
        shard_key: Option<String>,
    },
    /// Replaces a document, checked against the etag tracked by this session.
    Replace {
        collection: String,
        id: String,
        body: Value,
    },
    Delete {
        collection: String,
        ids: Vec<String>,
    },
    DeleteWhere {
        collection: String,
        filter: Value,
    },
    InsertMany {
        collection: String,
        documents: Vec<NewDocument>,
    },
    Track {
        collection: String,
        id: String,
    },
    Untrack {
        collection: String,
        id: String,
    },
}

/// Per-item outcome of `InsertMany`.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub written: u64,
    pub failures: Vec<FailureDetail>,
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub enum DocumentOutput {
    Documents(Vec<Document>),
    Count(u64),
    Id(String),
    Write(WriteOutcome),
    Bulk(BulkReport),
    Tracked(bool),
}

impl DocumentOutput {
    /// Number of documents this output accounts for.
    pub fn affected(&self) -> u64 {
        match self {
            Self::Documents(documents) => documents.len() as u64,
            Self::Count(count) => *count,
            Self::Bulk(report) => report.written,
            Self::Write(WriteOutcome::Written { .. }) | Self::Id(_) => 1,
            Self::Tracked(tracked) => u64::from(*tracked),
            Self::Write(_) => 0,
        }
    }

    pub fn into_documents(self) -> RepoResult<Vec<Document>> {
        match self {
            Self::Documents(documents) => Ok(documents),
            other => Err(unexpected("documents", &other)),
        }
    }

    pub fn into_count(self) -> RepoResult<u64> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(unexpected("count", &other)),
        }
    }

    pub fn into_id(self) -> RepoResult<String> {
        match self {
            Self::Id(id) => Ok(id),
            other => Err(unexpected("id", &other)),
        }
    }

    pub fn into_write(self) -> RepoResult<WriteOutcome> {
        match self {
            Self::Write(outcome) => Ok(outcome),
            other => Err(unexpected("write outcome", &other)),
        }
    }

    pub fn into_bulk(self) -> RepoResult<BulkReport> {
        match self {
            Self::Bulk(report) => Ok(report),
            other => Err(unexpected("bulk report", &other)),
        }
    }

    pub fn into_tracked(self) -> RepoResult<bool> {
        match self {
            Self::Tracked(tracked) => Ok(tracked),
            other => Err(unexpected("tracking flag", &other)),
        }
    }
}

fn unexpected(expected: &str, actual: &DocumentOutput) -> RepoError {
    RepoError::backend("document", format!("expected {expected}, got {actual:?}"))
}

/// Session over one engine. Remembers the etag of every document it loaded
/// or wrote so replacements detect concurrent writers.
pub struct EngineSession {
    engine: Arc<DocumentEngine>,
    id_prefix: String,
    tracked: HashMap<(String, String), u64>,
}

impl EngineSession {
    pub fn new(engine: Arc<DocumentEngine>, id_prefix: impl Into<String>) -> Self {
        Self {
            engine,
            id_prefix: id_prefix.into(),
            tracked: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<DocumentEngine> {
        &self.engine
    }

    pub fn tracked_etag(&self, collection: &str, id: &str) -> Option<u64> {
        self.tracked
            .get(&(collection.to_string(), id.to_string()))
            .copied()
    }

    fn track(&mut self, collection: &str, id: &str, etag: u64) {
        self.tracked
            .insert((collection.to_string(), id.to_string()), etag);
    }

    fn track_all(&mut self, collection: &str, documents: &[Document]) {
        for document in documents {
            self.track(collection, &document.id, document.etag);
        }
    }

    fn untrack(&mut self, collection: &str, id: &str) -> bool {
        self.tracked
            .remove(&(collection.to_string(), id.to_string()))
            .is_some()
    }

    pub fn run(&mut self, command: DocumentCommand) -> RepoResult<DocumentOutput> {
        let engine = Arc::clone(&self.engine);
        match command {
            DocumentCommand::Load { collection, ids } => {
                let documents = engine.load(&collection, &ids)?;
                self.track_all(&collection, &documents);
                Ok(DocumentOutput::Documents(documents))
            }
            DocumentCommand::Query {
                collection,
                filter,
                order,
                offset,
                limit,
            } => {
                let documents = engine.query(&collection, &filter, &order, offset, limit)?;
                self.track_all(&collection, &documents);
                Ok(DocumentOutput::Documents(documents))
            }
            DocumentCommand::QueryIndex {
                index,
                collection,
                filter,
                order,
                offset,
                limit,
            } => {
                let documents =
                    engine.query_index(&index, &collection, &filter, &order, offset, limit)?;
                self.track_all(&collection, &documents);
                Ok(DocumentOutput::Documents(documents))
            }
            DocumentCommand::Count { collection, filter } => {
                Ok(DocumentOutput::Count(engine.count(&collection, &filter)?))
            }
            DocumentCommand::GenerateId { collection, .. } => {
                Ok(DocumentOutput::Id(engine.next_id(&collection, &self.id_prefix)?))
            }
            DocumentCommand::Insert {
                collection,
                id,
                body,
                ..
            } => {
                let outcome = engine.insert(&collection, &id, body)?;
                if let WriteOutcome::Written { id, etag } = &outcome {
                    self.track(&collection, id, *etag);
                }
                Ok(DocumentOutput::Write(outcome))
            }
            DocumentCommand::Replace {
                collection,
                id,
                body,
            } => {
                let expected = self.tracked_etag(&collection, &id);
                let outcome = engine.replace(&collection, &id, body, expected)?;
                if let WriteOutcome::Written { id, etag } = &outcome {
                    self.track(&collection, id, *etag);
                }
                Ok(DocumentOutput::Write(outcome))
            }
            DocumentCommand::Delete { collection, ids } => {
                for id in &ids {
                    self.untrack(&collection, id);
                }
                Ok(DocumentOutput::Count(engine.delete(&collection, &ids)?))
            }
            DocumentCommand::DeleteWhere { collection, filter } => {
                Ok(DocumentOutput::Count(engine.delete_where(&collection, &filter)?))
            }
            DocumentCommand::InsertMany {
                collection,
                documents,
            } => {
                let mut report = BulkReport::default();
                for document in documents {
                    match engine.insert(&collection, &document.id, document.body)? {
                        WriteOutcome::Written { id, etag } => {
                            self.track(&collection, &id, etag);
                            report.written += 1;
                        }
                        _ => report.failures.push(FailureDetail::new(
                            document.id.clone(),
                            RepoError::Conflict {
                                collection: collection.clone(),
                                key: document.id,
                            },
                        )),
                    }
                }
                Ok(DocumentOutput::Bulk(report))
            }
            DocumentCommand::Track { collection, id } => {
                let found = engine.load(&collection, std::slice::from_ref(&id))?;
                self.track_all(&collection, &found);
                Ok(DocumentOutput::Tracked(!found.is_empty()))
            }
            DocumentCommand::Untrack { collection, id } => {
                Ok(DocumentOutput::Tracked(self.untrack(&collection, &id)))
            }
        }
    }

    fn clear(&mut self) {
        self.tracked.clear();
    }
}

/// One engine session per shard, routed by id prefix or shard key.
pub struct ShardedSession {
    store: Arc<ShardedStore>,
    sessions: Vec<EngineSession>,
}

impl ShardedSession {
    pub(super) fn new(store: Arc<ShardedStore>, sessions: Vec<EngineSession>) -> Self {
        Self { store, sessions }
    }

    /// Shard owning a generated `<shard>/<collection>/<n>` id.
    fn shard_of_id(&self, id: &str) -> Option<usize> {
        let (prefix, _) = id.split_once('/')?;
        self.store.map.index_of(prefix)
    }

    fn resolve(&self, shard_key: &str) -> RepoResult<usize> {
        self.store
            .strategies
            .resolution
            .resolve(shard_key, &self.store.ids)
    }

    fn selected(&self, target: Option<usize>) -> Vec<usize> {
        self.store
            .strategies
            .selection
            .select(target, self.store.ids.len())
    }

    /// Shard for a write: the id prefix when present, else the resolved key.
    fn write_target(&self, id: &str, shard_key: Option<&str>) -> RepoResult<usize> {
        match self.shard_of_id(id) {
            Some(index) => Ok(index),
            None => self.resolve(shard_key.unwrap_or(id)),
        }
    }

    /// Groups ids by their owning shard. Ids without a shard prefix go to
    /// every selected shard.
    fn group_ids(&self, ids: Vec<String>) -> BTreeMap<usize, Vec<String>> {
        let fallback = self.selected(None);
        let mut groups = BTreeMap::<usize, Vec<String>>::new();
        for id in ids {
            match self.shard_of_id(&id) {
                Some(index) => groups.entry(index).or_default().push(id),
                None => {
                    for index in &fallback {
                        groups.entry(*index).or_default().push(id.clone());
                    }
                }
            }
        }
        groups
    }

    fn run_on(&mut self, index: usize, command: DocumentCommand) -> RepoResult<DocumentOutput> {
        let shard_id = self.store.ids.get(index).cloned().unwrap_or_default();
        let session = self.sessions.get_mut(index).ok_or_else(|| {
            RepoError::Configuration(format!("shard index {index} is out of range"))
        })?;
        debug!("event=shard_route module=document status=ok shard={shard_id}");
        session.run(command)
    }

    /// Runs one command per targeted shard through the access strategy.
    fn fan_out(
        &mut self,
        mut commands: BTreeMap<usize, DocumentCommand>,
    ) -> AccessOutcome<DocumentOutput> {
        let store = Arc::clone(&self.store);
        let calls = self
            .sessions
            .iter_mut()
            .enumerate()
            .filter_map(|(index, session)| {
                let command = commands.remove(&index)?;
                let shard_id = store.ids[index].clone();
                Some(ShardCall::new(shard_id, move || session.run(command)))
            })
            .collect::<Vec<_>>();
        debug!(
            "event=shard_fan_out module=document status=start shards={} access={}",
            calls.len(),
            store.strategies.access.name()
        );
        store.strategies.access.apply(calls)
    }

    fn broadcast(&mut self, command: &DocumentCommand) -> AccessOutcome<DocumentOutput> {
        let commands = self
            .selected(None)
            .into_iter()
            .map(|index| (index, command.clone()))
            .collect();
        self.fan_out(commands)
    }

    fn run(&mut self, command: DocumentCommand) -> RepoResult<DocumentOutput> {
        match command {
            DocumentCommand::Load { collection, ids } => {
                let commands = self
                    .group_ids(ids)
                    .into_iter()
                    .map(|(index, ids)| {
                        let collection = collection.clone();
                        (index, DocumentCommand::Load { collection, ids })
                    })
                    .collect();
                let mut documents = Vec::new();
                for (_, output) in self.fan_out(commands).into_result()? {
                    documents.extend(output.into_documents()?);
                }
                Ok(DocumentOutput::Documents(documents))
            }
            DocumentCommand::Query {
                collection,
                filter,
                order,
                offset,
                limit,
            } => {
                let window = if limit == 0 { 0 } else { offset.saturating_add(limit) };
                let per_shard = DocumentCommand::Query {
                    collection,
                    filter,
                    order: order.clone(),
                    offset: 0,
                    limit: window,
                };
                let mut merged = Vec::new();
                for (_, output) in self.broadcast(&per_shard).into_result()? {
                    merged.extend(output.into_documents()?);
                }
                Ok(DocumentOutput::Documents(order_and_paginate(
                    merged,
                    &order,
                    offset,
                    limit,
                    |document| (document.id.as_str(), &document.body),
                )))
            }
            DocumentCommand::QueryIndex {
                index,
                collection,
                filter,
                order,
                offset,
                limit,
            } => {
                // Every shard holds the same definition.
                let order = if order.is_empty() {
                    self.store
                        .map
                        .get(0)
                        .and_then(|(_, engine)| engine.index_definition(&index))
                        .map(|definition| definition.sort)
                        .unwrap_or_default()
                } else {
                    order
                };
                let window = if limit == 0 { 0 } else { offset.saturating_add(limit) };
                let per_shard = DocumentCommand::QueryIndex {
                    index,
                    collection,
                    filter,
                    order: order.clone(),
                    offset: 0,
                    limit: window,
                };
                let mut merged = Vec::new();
                for (_, output) in self.broadcast(&per_shard).into_result()? {
                    merged.extend(output.into_documents()?);
                }
                Ok(DocumentOutput::Documents(order_and_paginate(
                    merged,
                    &order,
                    offset,
                    limit,
                    |document| (document.id.as_str(), &document.body),
                )))
            }
            command @ DocumentCommand::Count { .. } => {
                let total = self
                    .broadcast(&command)
                    .into_result_counting(DocumentOutput::affected)?
                    .iter()
                    .map(|(_, output)| output.affected())
                    .sum();
                Ok(DocumentOutput::Count(total))
            }
            DocumentCommand::GenerateId {
                collection,
                shard_key,
            } => {
                let target = match shard_key.as_deref() {
                    Some(key) => self.resolve(key)?,
                    None => self.selected(None).first().copied().ok_or_else(|| {
                        RepoError::Configuration("no shard selected for id generation".to_string())
                    })?,
                };
                self.run_on(
                    target,
                    DocumentCommand::GenerateId {
                        collection,
                        shard_key,
                    },
                )
            }
            DocumentCommand::Insert {
                collection,
                id,
                body,
                shard_key,
            } => {
                let target = self.write_target(&id, shard_key.as_deref())?;
                self.run_on(
                    target,
                    DocumentCommand::Insert {
                        collection,
                        id,
                        body,
                        shard_key,
                    },
                )
            }
            DocumentCommand::Replace {
                collection,
                id,
                body,
            } => {
                let target = self.shard_of_id(&id);
                let missing = WriteOutcome::NotFound(id.clone());
                let command = DocumentCommand::Replace {
                    collection,
                    id,
                    body,
                };
                if let Some(target) = target {
                    return self.run_on(target, command);
                }
                let mut best = None;
                for (_, output) in self.broadcast(&command).into_result()? {
                    match output.into_write()? {
                        written @ WriteOutcome::Written { .. } => {
                            return Ok(DocumentOutput::Write(written));
                        }
                        conflict @ WriteOutcome::EtagMismatch { .. } => best = Some(conflict),
                        _ => {}
                    }
                }
                Ok(DocumentOutput::Write(best.unwrap_or(missing)))
            }
            DocumentCommand::Delete { collection, ids } => {
                let commands = self
                    .group_ids(ids)
                    .into_iter()
                    .map(|(index, ids)| {
                        let collection = collection.clone();
                        (index, DocumentCommand::Delete { collection, ids })
                    })
                    .collect();
                let total = self
                    .fan_out(commands)
                    .into_result_counting(DocumentOutput::affected)?
                    .iter()
                    .map(|(_, output)| output.affected())
                    .sum();
                Ok(DocumentOutput::Count(total))
            }
            command @ DocumentCommand::DeleteWhere { .. } => {
                let total = self
                    .broadcast(&command)
                    .into_result_counting(DocumentOutput::affected)?
                    .iter()
                    .map(|(_, output)| output.affected())
                    .sum();
                Ok(DocumentOutput::Count(total))
            }
            DocumentCommand::InsertMany {
                collection,
                documents,
            } => self.insert_many(collection, documents),
            DocumentCommand::Track { collection, id } => {
                self.route_tracking(&id, DocumentCommand::Track { collection, id: id.clone() })
            }
            DocumentCommand::Untrack { collection, id } => {
                self.route_tracking(&id, DocumentCommand::Untrack { collection, id: id.clone() })
            }
        }
    }

    fn insert_many(
        &mut self,
        collection: String,
        documents: Vec<NewDocument>,
    ) -> RepoResult<DocumentOutput> {
        let mut report = BulkReport::default();
        let mut groups = BTreeMap::<usize, Vec<NewDocument>>::new();
        for document in documents {
            match self.write_target(&document.id, document.shard_key.as_deref()) {
                Ok(index) => groups.entry(index).or_default().push(document),
                Err(err) => report.failures.push(FailureDetail::new(document.id, err)),
            }
        }

        let commands = groups
            .into_iter()
            .map(|(index, documents)| {
                let collection = collection.clone();
                (index, DocumentCommand::InsertMany { collection, documents })
            })
            .collect();
        let outcome = self.fan_out(commands);
        for (_, output) in outcome.completed {
            let shard = output.into_bulk()?;
            report.written += shard.written;
            report.failures.extend(shard.failures);
        }
        report.failures.extend(outcome.failures);
        report.skipped.extend(outcome.skipped);
        Ok(DocumentOutput::Bulk(report))
    }

    fn route_tracking(&mut self, id: &str, command: DocumentCommand) -> RepoResult<DocumentOutput> {
        if let Some(target) = self.shard_of_id(id) {
            return self.run_on(target, command);
        }
        let tracked = self
            .broadcast(&command)
            .into_result()?
            .into_iter()
            .any(|(_, output)| output.affected() > 0);
        Ok(DocumentOutput::Tracked(tracked))
    }

    fn clear(&mut self) {
        for session in &mut self.sessions {
            session.clear();
        }
    }
}

/// Session over a document store: one engine, or one engine per shard.
pub enum DocumentSession {
    Single(EngineSession),
    Sharded(ShardedSession),
}

impl NativeSession for DocumentSession {
    type Command = DocumentCommand;
    type Output = DocumentOutput;

    fn execute(&mut self, command: DocumentCommand) -> RepoResult<DocumentOutput> {
        match self {
            Self::Single(session) => session.run(command),
            Self::Sharded(session) => session.run(command),
        }
    }

    /// Document writes apply immediately.
    fn commit(&mut self) -> RepoResult<()> {
        Ok(())
    }

    fn dispose(&mut self) {
        match self {
            Self::Single(session) => session.clear(),
            Self::Sharded(session) => session.clear(),
        }
    }
}
