//! Repository over a search index.

use super::index::{Hit, IndexOutcome, IndexStatus};
use super::session::{BulkAction, SearchRequest, SearchResponse, SearchStore};
use super::translate::translate_predicate;
use crate::context::DataContext;
use crate::error::{FailureDetail, PartialFailure, RepoError, RepoResult};
use crate::model::entity::{decode_entity, encode_entity, require_key, Entity, EntityKey};
use crate::repository::{
    order_by_ids, BulkOperations, FieldPatch, MetadataProvider, Page, ParamList, Repository,
};
use crate::spec::{Predicate, Specification};
use log::{info, warn};
use serde_json::Value;

const BACKEND: &str = "search";

/// Search-backed repository. Keyless entities get an index-generated id,
/// assigned back to the entity when it can hold one.
pub struct SearchRepository {
    context: DataContext<SearchStore>,
}

impl SearchRepository {
    pub fn new(context: DataContext<SearchStore>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &DataContext<SearchStore> {
        &self.context
    }

    fn run(&self, request: SearchRequest) -> RepoResult<SearchResponse> {
        self.context.session()?.execute(request)
    }

    fn query_of<T>(spec: Option<&Specification<T>>) -> RepoResult<Value> {
        match spec {
            Some(spec) => translate_predicate(spec.predicate()),
            None => translate_predicate(&Predicate::always()),
        }
    }

    fn unsupported<X>(operation: &'static str) -> RepoResult<X> {
        Err(RepoError::Unsupported {
            backend: BACKEND,
            operation,
        })
    }
}

/// Decodes a hit, filling a missing key from the hit id.
fn decode_hit<T: Entity>(hit: Hit) -> RepoResult<T> {
    let mut entity = decode_entity::<T>(hit.source)?;
    if entity.key().is_none() {
        entity.assign_key(&EntityKey::single(hit.id));
    }
    Ok(entity)
}

impl Repository for SearchRepository {
    fn get_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        self.run(SearchRequest::Get {
            index: T::COLLECTION.to_string(),
            id: id.into().storage_key(),
        })?
        .into_found()?
        .map(decode_hit)
        .transpose()
    }

    fn find_all<T: Entity>(&self, spec: &Specification<T>, page: &Page) -> RepoResult<Vec<T>> {
        self.run(SearchRequest::Search {
            index: T::COLLECTION.to_string(),
            query: Self::query_of(Some(spec))?,
            sort: page.effective_order(spec).to_vec(),
            from: page.offset,
            size: page.limit,
        })?
        .into_hits()?
        .into_iter()
        .map(decode_hit)
        .collect()
    }

    fn add<T: Entity>(&self, mut entity: T) -> RepoResult<Option<T>> {
        let outcome = self
            .run(SearchRequest::Index {
                index: T::COLLECTION.to_string(),
                id: entity.key().map(|key| key.storage_key()),
                source: encode_entity(&entity)?,
                create: true,
            })?
            .into_written()?;
        if outcome.status != IndexStatus::Created {
            return Ok(None);
        }
        if entity.key().is_none() {
            entity.assign_key(&EntityKey::single(outcome.id));
        }
        Ok(Some(entity))
    }

    fn update<T: Entity>(&self, entity: T) -> RepoResult<Option<T>> {
        let outcome = self
            .run(SearchRequest::Update {
                index: T::COLLECTION.to_string(),
                id: require_key(&entity, "update")?.storage_key(),
                doc: encode_entity(&entity)?,
            })?
            .into_written()?;
        Ok(outcome.is_success().then_some(entity))
    }

    fn remove_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let id = id.into().storage_key();
        let index = T::COLLECTION.to_string();
        let Some(hit) = self
            .run(SearchRequest::Get {
                index: index.clone(),
                id: id.clone(),
            })?
            .into_found()?
        else {
            return Ok(None);
        };
        let outcome = self
            .run(SearchRequest::Delete { index, id })?
            .into_written()?;
        if !outcome.is_success() {
            return Ok(None);
        }
        decode_hit(hit).map(Some)
    }

    fn count<T: Entity>(&self, spec: Option<&Specification<T>>) -> RepoResult<u64> {
        self.run(SearchRequest::Count {
            index: T::COLLECTION.to_string(),
            query: Self::query_of(spec)?,
        })?
        .into_count()
    }

    fn execute<T: Entity>(&self, _command: &str, _params: &ParamList) -> RepoResult<Vec<T>> {
        Self::unsupported("execute")
    }

    fn attach<T: Entity>(&self, _entity: &T) -> RepoResult<()> {
        Self::unsupported("attach")
    }

    fn detach<T: Entity>(&self, _entity: &T) -> RepoResult<()> {
        Self::unsupported("detach")
    }

    fn save_changes(&self) -> RepoResult<()> {
        self.context.save_changes()
    }

    fn source(&self) -> String {
        self.context.source()
    }
}

impl BulkOperations for SearchRepository {
    fn get_many<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<Vec<T>> {
        let hits = self
            .run(SearchRequest::MultiGet {
                index: T::COLLECTION.to_string(),
                ids: ids.iter().map(EntityKey::storage_key).collect(),
            })?
            .into_hits()?;
        let found = hits
            .into_iter()
            .map(|hit| {
                let id = hit.id.clone();
                Ok((id, decode_hit::<T>(hit)?))
            })
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(order_by_ids(ids, found))
    }

    fn insert_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64> {
        let total = entities.len();
        let (actions, failures) = prepare_actions(&entities, |entity| {
            Ok(BulkAction::Create {
                id: entity.key().map(|key| key.storage_key()),
                source: encode_entity(entity)?,
            })
        });
        let items = self.bulk::<T>(actions)?;
        finish_bulk::<T>("insert_many", total, items, failures)
    }

    fn update_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64> {
        let total = entities.len();
        let (actions, failures) = prepare_actions(&entities, |entity| {
            Ok(BulkAction::Update {
                id: require_key(entity, "update_many")?.storage_key(),
                doc: encode_entity(entity)?,
            })
        });
        let items = self.bulk::<T>(actions)?;
        finish_bulk::<T>("update_many", total, items, failures)
    }

    fn delete_by_ids<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let actions = ids
            .iter()
            .map(|id| BulkAction::Delete {
                id: id.storage_key(),
            })
            .collect();
        let items = self.bulk::<T>(actions)?;
        finish_bulk::<T>("delete_by_ids", ids.len(), items, Vec::new())
    }

    fn delete_where<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<u64> {
        self.run(SearchRequest::DeleteByQuery {
            index: T::COLLECTION.to_string(),
            query: Self::query_of(Some(spec))?,
        })?
        .into_count()
    }

    fn update_where<T: Entity>(
        &self,
        _spec: &Specification<T>,
        _patch: &FieldPatch,
    ) -> RepoResult<u64> {
        Self::unsupported("update_where")
    }
}

impl SearchRepository {
    fn bulk<T: Entity>(&self, actions: Vec<BulkAction>) -> RepoResult<Vec<IndexOutcome>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        self.run(SearchRequest::Bulk {
            index: T::COLLECTION.to_string(),
            actions,
        })?
        .into_bulk()
    }
}

impl MetadataProvider for SearchRepository {}

/// Builds one bulk action per entity. Entities that cannot be turned into an
/// action become failures targeted at their key, or `#<position>` without one.
fn prepare_actions<T: Entity>(
    entities: &[T],
    build: impl Fn(&T) -> RepoResult<BulkAction>,
) -> (Vec<BulkAction>, Vec<FailureDetail>) {
    let mut actions = Vec::with_capacity(entities.len());
    let mut failures = Vec::new();
    for (index, entity) in entities.iter().enumerate() {
        match build(entity) {
            Ok(action) => actions.push(action),
            Err(err) => failures.push(FailureDetail::new(
                entity
                    .key()
                    .map_or_else(|| format!("#{index}"), |key| key.storage_key()),
                err,
            )),
        }
    }
    (actions, failures)
}

/// Counts successful items and merges index-side failures with the ones
/// found while preparing actions. Create conflicts are item failures; missing
/// documents are skipped without failing the batch.
fn finish_bulk<T: Entity>(
    operation: &str,
    total: usize,
    items: Vec<IndexOutcome>,
    mut failures: Vec<FailureDetail>,
) -> RepoResult<u64> {
    let mut succeeded = 0;
    for item in items {
        match item.status {
            IndexStatus::Created | IndexStatus::Updated | IndexStatus::Deleted => succeeded += 1,
            IndexStatus::Conflict => failures.push(FailureDetail::new(
                item.id.clone(),
                RepoError::Conflict {
                    collection: T::COLLECTION.to_string(),
                    key: item.id,
                },
            )),
            IndexStatus::NotFound => {}
        }
    }
    if failures.is_empty() {
        info!(
            "event=bulk_write module=search status=ok operation={operation} index={} total={total} written={succeeded}",
            T::COLLECTION
        );
        return Ok(succeeded);
    }
    warn!(
        "event=bulk_write module=search status=error operation={operation} index={} total={total} written={succeeded} failed={}",
        T::COLLECTION,
        failures.len()
    );
    Err(RepoError::PartialFailure(PartialFailure {
        succeeded,
        failures,
        skipped: Vec::new(),
    }))
}
