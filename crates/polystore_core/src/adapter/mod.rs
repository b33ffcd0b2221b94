//! Repository decorators.
//!
//! # Responsibility
//! - Wrap any repository to add cross-cutting behavior without the backend
//!   knowing about it.
//! - `AuditableRepository` stamps audit metadata through the entity graph
//!   before every create and update.
//!
//! # Invariants
//! - Stamping happens before delegation; the adapter never touches sessions.
//! - Entities without audit capability pass through unchanged.
//! - Every other operation forwards verbatim.

mod principal;

pub use principal::{AnonymousPrincipal, NamedPrincipal, Principal, SwitchablePrincipal};

use crate::audit::{cascade_audit, CascadeMode};
use crate::error::RepoResult;
use crate::model::entity::{Entity, EntityKey, KeyPart};
use crate::repository::{BulkOperations, FieldPatch, MetadataProvider, Page, ParamList, Repository};
use crate::spec::Specification;
use log::debug;
use std::sync::Arc;

/// Audit-cascading wrapper around an inner repository.
pub struct AuditableRepository<R> {
    inner: R,
    principal: Arc<dyn Principal>,
}

impl<R> AuditableRepository<R> {
    pub fn new(inner: R, principal: Arc<dyn Principal>) -> Self {
        Self { inner, principal }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn principal(&self) -> &Arc<dyn Principal> {
        &self.principal
    }

    /// Stamps `entity` and its graph for `mode`.
    fn stamp<T: Entity>(&self, entity: &mut T, mode: CascadeMode) {
        let Some(node) = entity.audit_node() else {
            return;
        };
        let actor = self.principal.identity_name();
        if let Some(report) = cascade_audit(node, mode, actor.as_deref()) {
            debug!(
                "event=audit_stamp module=adapter status=ok collection={} audit_id={} stamped={}",
                T::COLLECTION,
                report.audit_id,
                report.stamped
            );
        }
    }
}

impl<R: Repository> Repository for AuditableRepository<R> {
    fn get_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        self.inner.get_by_id(id)
    }

    fn find<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        self.inner.find(spec)
    }

    fn find_all<T: Entity>(&self, spec: &Specification<T>, page: &Page) -> RepoResult<Vec<T>> {
        self.inner.find_all(spec, page)
    }

    fn add<T: Entity>(&self, mut entity: T) -> RepoResult<Option<T>> {
        self.stamp(&mut entity, CascadeMode::Create);
        self.inner.add(entity)
    }

    fn update<T: Entity>(&self, mut entity: T) -> RepoResult<Option<T>> {
        self.stamp(&mut entity, CascadeMode::Update);
        self.inner.update(entity)
    }

    fn remove<T: Entity>(&self, entity: T) -> RepoResult<Option<T>> {
        self.inner.remove(entity)
    }

    fn remove_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        self.inner.remove_by_id(id)
    }

    fn count<T: Entity>(&self, spec: Option<&Specification<T>>) -> RepoResult<u64> {
        self.inner.count(spec)
    }

    fn all<T: Entity>(&self) -> RepoResult<Vec<T>> {
        self.inner.all()
    }

    fn execute<T: Entity>(&self, command: &str, params: &ParamList) -> RepoResult<Vec<T>> {
        self.inner.execute(command, params)
    }

    fn attach<T: Entity>(&self, entity: &T) -> RepoResult<()> {
        self.inner.attach(entity)
    }

    fn detach<T: Entity>(&self, entity: &T) -> RepoResult<()> {
        self.inner.detach(entity)
    }

    fn save_changes(&self) -> RepoResult<()> {
        self.inner.save_changes()
    }

    fn source(&self) -> String {
        self.inner.source()
    }
}

impl<R: BulkOperations> BulkOperations for AuditableRepository<R> {
    fn get_many<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<Vec<T>> {
        self.inner.get_many(ids)
    }

    fn insert_many<T: Entity>(&self, mut entities: Vec<T>) -> RepoResult<u64> {
        for entity in &mut entities {
            self.stamp(entity, CascadeMode::Create);
        }
        self.inner.insert_many(entities)
    }

    fn update_many<T: Entity>(&self, mut entities: Vec<T>) -> RepoResult<u64> {
        for entity in &mut entities {
            self.stamp(entity, CascadeMode::Update);
        }
        self.inner.update_many(entities)
    }

    fn delete_many<T: Entity>(&self, entities: &[T]) -> RepoResult<u64> {
        self.inner.delete_many(entities)
    }

    fn delete_by_ids<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<u64> {
        self.inner.delete_by_ids::<T>(ids)
    }

    fn delete_where<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<u64> {
        self.inner.delete_where(spec)
    }

    fn update_where<T: Entity>(
        &self,
        spec: &Specification<T>,
        patch: &FieldPatch,
    ) -> RepoResult<u64> {
        self.inner.update_where(spec, patch)
    }
}

impl<R: MetadataProvider> MetadataProvider for AuditableRepository<R> {
    fn primary_key<T: Entity>(&self) -> Vec<&'static str> {
        self.inner.primary_key::<T>()
    }

    fn primary_key_value<T: Entity>(&self, entity: &T) -> Option<Vec<KeyPart>> {
        self.inner.primary_key_value(entity)
    }
}
