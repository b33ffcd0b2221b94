//! Repository over a document store.

use super::engine::{Document, WriteOutcome};
use super::filter::to_filter;
use super::session::{DocumentCommand, DocumentOutput, NewDocument};
use super::store::DocumentStore;
use crate::context::DataContext;
use crate::error::{FailureDetail, PartialFailure, RepoError, RepoResult};
use crate::model::entity::{decode_entity, encode_entity, require_key, Entity, EntityKey};
use crate::repository::{
    order_by_ids, BulkOperations, FieldPatch, MetadataProvider, Page, ParamList, Repository,
    RepositoryOptions,
};
use crate::spec::{Predicate, Specification};
use log::{info, warn};
use serde_json::Value;

const BACKEND: &str = "document";

/// Document-backed repository. Writes apply immediately; `update` is
/// checked against the etag this scope last saw for the document.
pub struct DocumentRepository {
    context: DataContext<DocumentStore>,
    options: RepositoryOptions,
}

impl DocumentRepository {
    pub fn new(context: DataContext<DocumentStore>) -> Self {
        Self::with_options(context, RepositoryOptions::default())
    }

    pub fn with_options(context: DataContext<DocumentStore>, options: RepositoryOptions) -> Self {
        Self { context, options }
    }

    pub fn context(&self) -> &DataContext<DocumentStore> {
        &self.context
    }

    fn run(&self, command: DocumentCommand) -> RepoResult<DocumentOutput> {
        self.context.session()?.execute(command)
    }

    fn load(&self, collection: &str, ids: Vec<String>) -> RepoResult<Vec<Document>> {
        self.run(DocumentCommand::Load {
            collection: collection.to_string(),
            ids,
        })?
        .into_documents()
    }

    /// Returns the entity's id, generating and assigning one when missing.
    fn ensure_id<T: Entity>(&self, entity: &mut T) -> RepoResult<String> {
        if let Some(key) = entity.key() {
            return Ok(key.storage_key());
        }
        let id = self
            .run(DocumentCommand::GenerateId {
                collection: T::COLLECTION.to_string(),
                shard_key: entity.shard_key(),
            })?
            .into_id()?;
        if !entity.assign_key(&EntityKey::single(id.as_str())) {
            return Err(RepoError::InvalidData(format!(
                "{} entities cannot hold generated id `{id}`",
                T::COLLECTION
            )));
        }
        Ok(id)
    }

    fn filter_of(predicate: &Predicate) -> RepoResult<Value> {
        to_filter(predicate)
    }

    /// Like `find_all`, restricted to the documents the named index maps.
    /// Without a page or specification order the index sort applies.
    ///
    /// # Errors
    /// - `InvalidData` for unknown indexes, indexes over another collection
    ///   or specifications on fields the index does not expose.
    pub fn find_in_index<T: Entity>(
        &self,
        index: &str,
        spec: &Specification<T>,
        page: &Page,
    ) -> RepoResult<Vec<T>> {
        let documents = self
            .run(DocumentCommand::QueryIndex {
                index: index.to_string(),
                collection: T::COLLECTION.to_string(),
                filter: Self::filter_of(spec.predicate())?,
                order: page.effective_order(spec).to_vec(),
                offset: page.offset,
                limit: page.limit,
            })?
            .into_documents()?;
        decode_all(documents)
    }
}

fn decode_all<T: Entity>(documents: Vec<Document>) -> RepoResult<Vec<T>> {
    documents
        .into_iter()
        .map(|document| decode_entity(document.body))
        .collect()
}

impl Repository for DocumentRepository {
    fn get_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let id = id.into().storage_key();
        self.load(T::COLLECTION, vec![id])?
            .into_iter()
            .next()
            .map(|document| decode_entity(document.body))
            .transpose()
    }

    fn find_all<T: Entity>(&self, spec: &Specification<T>, page: &Page) -> RepoResult<Vec<T>> {
        let documents = self
            .run(DocumentCommand::Query {
                collection: T::COLLECTION.to_string(),
                filter: Self::filter_of(spec.predicate())?,
                order: page.effective_order(spec).to_vec(),
                offset: page.offset,
                limit: page.limit,
            })?
            .into_documents()?;
        decode_all(documents)
    }

    fn add<T: Entity>(&self, mut entity: T) -> RepoResult<Option<T>> {
        let id = self.ensure_id(&mut entity)?;
        let outcome = self
            .run(DocumentCommand::Insert {
                collection: T::COLLECTION.to_string(),
                id,
                body: encode_entity(&entity)?,
                shard_key: entity.shard_key(),
            })?
            .into_write()?;
        match outcome {
            WriteOutcome::Written { .. } => Ok(Some(entity)),
            _ => Ok(None),
        }
    }

    fn update<T: Entity>(&self, entity: T) -> RepoResult<Option<T>> {
        let id = require_key(&entity, "update")?.storage_key();
        let outcome = self
            .run(DocumentCommand::Replace {
                collection: T::COLLECTION.to_string(),
                id: id.clone(),
                body: encode_entity(&entity)?,
            })?
            .into_write()?;
        match outcome {
            WriteOutcome::Written { .. } => Ok(Some(entity)),
            WriteOutcome::EtagMismatch { .. } => {
                warn!("event=etag_conflict module=document status=error collection={} id={id}", T::COLLECTION);
                self.options.conflict(T::COLLECTION, &id)
            }
            _ => Ok(None),
        }
    }

    fn remove_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let id = id.into().storage_key();
        let Some(document) = self.load(T::COLLECTION, vec![id.clone()])?.into_iter().next() else {
            return Ok(None);
        };
        let removed = self
            .run(DocumentCommand::Delete {
                collection: T::COLLECTION.to_string(),
                ids: vec![document.id.clone()],
            })?
            .into_count()?;
        if removed == 0 {
            return Ok(None);
        }
        decode_entity(document.body).map(Some)
    }

    fn count<T: Entity>(&self, spec: Option<&Specification<T>>) -> RepoResult<u64> {
        let filter = match spec {
            Some(spec) => Self::filter_of(spec.predicate())?,
            None => Self::filter_of(&Predicate::always())?,
        };
        self.run(DocumentCommand::Count {
            collection: T::COLLECTION.to_string(),
            filter,
        })?
        .into_count()
    }

    fn execute<T: Entity>(&self, _command: &str, _params: &ParamList) -> RepoResult<Vec<T>> {
        Err(RepoError::Unsupported {
            backend: BACKEND,
            operation: "execute",
        })
    }

    fn attach<T: Entity>(&self, entity: &T) -> RepoResult<()> {
        let id = require_key(entity, "attach")?.storage_key();
        let found = self
            .run(DocumentCommand::Track {
                collection: T::COLLECTION.to_string(),
                id: id.clone(),
            })?
            .into_tracked()?;
        if !found {
            return Err(RepoError::InvalidData(format!(
                "cannot attach missing {} document `{id}`",
                T::COLLECTION
            )));
        }
        Ok(())
    }

    fn detach<T: Entity>(&self, entity: &T) -> RepoResult<()> {
        let id = require_key(entity, "detach")?.storage_key();
        self.run(DocumentCommand::Untrack {
            collection: T::COLLECTION.to_string(),
            id,
        })?;
        Ok(())
    }

    fn save_changes(&self) -> RepoResult<()> {
        self.context.save_changes()
    }

    fn source(&self) -> String {
        self.context.source()
    }
}

impl BulkOperations for DocumentRepository {
    fn get_many<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<Vec<T>> {
        let documents = self.load(
            T::COLLECTION,
            ids.iter().map(EntityKey::storage_key).collect(),
        )?;
        let found = documents
            .into_iter()
            .map(|document| Ok((document.id, decode_entity::<T>(document.body)?)))
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(order_by_ids(ids, found))
    }

    fn insert_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64> {
        let total = entities.len();
        let mut failures = Vec::new();
        let mut documents = Vec::with_capacity(total);
        for (index, mut entity) in entities.into_iter().enumerate() {
            let prepared = self
                .ensure_id(&mut entity)
                .and_then(|id| Ok((id, encode_entity(&entity)?)));
            match prepared {
                Ok((id, body)) => documents.push(NewDocument {
                    id,
                    body,
                    shard_key: entity.shard_key(),
                }),
                Err(err) => failures.push(FailureDetail::new(
                    entity
                        .key()
                        .map_or_else(|| format!("#{index}"), |key| key.storage_key()),
                    err,
                )),
            }
        }

        let report = self
            .run(DocumentCommand::InsertMany {
                collection: T::COLLECTION.to_string(),
                documents,
            })?
            .into_bulk()?;
        failures.extend(report.failures);
        finish_bulk(
            "insert_many",
            T::COLLECTION,
            total,
            report.written,
            failures,
            report.skipped,
        )
    }

    fn update_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64> {
        let total = entities.len();
        let mut written = 0;
        let mut failures = Vec::new();
        for (index, entity) in entities.into_iter().enumerate() {
            let id = match require_key(&entity, "update_many") {
                Ok(key) => key.storage_key(),
                Err(err) => {
                    failures.push(FailureDetail::new(format!("#{index}"), err));
                    continue;
                }
            };
            let outcome = encode_entity(&entity).and_then(|body| {
                self.run(DocumentCommand::Replace {
                    collection: T::COLLECTION.to_string(),
                    id: id.clone(),
                    body,
                })?
                .into_write()
            });
            match outcome {
                Ok(WriteOutcome::Written { .. }) => written += 1,
                Ok(WriteOutcome::EtagMismatch { .. }) => failures.push(FailureDetail::new(
                    id.clone(),
                    RepoError::Conflict {
                        collection: T::COLLECTION.to_string(),
                        key: id,
                    },
                )),
                Ok(_) => {}
                Err(err) => failures.push(FailureDetail::new(id, err)),
            }
        }
        finish_bulk("update_many", T::COLLECTION, total, written, failures, Vec::new())
    }

    fn delete_by_ids<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.run(DocumentCommand::Delete {
            collection: T::COLLECTION.to_string(),
            ids: ids.iter().map(EntityKey::storage_key).collect(),
        })?
        .into_count()
    }

    fn delete_where<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<u64> {
        self.run(DocumentCommand::DeleteWhere {
            collection: T::COLLECTION.to_string(),
            filter: Self::filter_of(spec.predicate())?,
        })?
        .into_count()
    }

    fn update_where<T: Entity>(
        &self,
        _spec: &Specification<T>,
        _patch: &FieldPatch,
    ) -> RepoResult<u64> {
        Err(RepoError::Unsupported {
            backend: BACKEND,
            operation: "update_where",
        })
    }
}

impl MetadataProvider for DocumentRepository {}

fn finish_bulk(
    operation: &str,
    collection: &str,
    total: usize,
    succeeded: u64,
    failures: Vec<FailureDetail>,
    skipped: Vec<String>,
) -> RepoResult<u64> {
    if failures.is_empty() && skipped.is_empty() {
        info!(
            "event=bulk_write module=document status=ok operation={operation} collection={collection} total={total} written={succeeded}"
        );
        return Ok(succeeded);
    }
    warn!(
        "event=bulk_write module=document status=error operation={operation} collection={collection} total={total} written={succeeded} failed={} skipped={}",
        failures.len(),
        skipped.len()
    );
    Err(RepoError::PartialFailure(PartialFailure {
        succeeded,
        failures,
        skipped,
    }))
}
