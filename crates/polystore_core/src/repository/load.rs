//! Load-then-update helper.

use super::{Page, Repository};
use crate::error::RepoResult;
use crate::model::entity::{Entity, EntityKey};
use crate::spec::Specification;
use std::marker::PhantomData;

/// Query and update entry point bound to one repository and entity type.
///
/// Updates go back through the owning repository, so adapters wrapping it
/// see them.
pub struct LoadService<'r, R, T> {
    repository: &'r R,
    _entity: PhantomData<fn() -> T>,
}

impl<'r, R: Repository, T: Entity> LoadService<'r, R, T> {
    pub fn new(repository: &'r R) -> Self {
        Self {
            repository,
            _entity: PhantomData,
        }
    }

    pub fn find(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        self.repository.find(spec)
    }

    pub fn find_all(&self, spec: &Specification<T>, page: &Page) -> RepoResult<Vec<T>> {
        self.repository.find_all(spec, page)
    }

    pub fn all(&self) -> RepoResult<Vec<T>> {
        self.repository.all()
    }

    pub fn update(&self, entity: T) -> RepoResult<Option<T>> {
        self.repository.update(entity)
    }

    /// Loads `id`, applies `change` and writes the result back.
    ///
    /// Returns `None` when the entity does not exist or the update was a
    /// no-op.
    pub fn modify(
        &self,
        id: impl Into<EntityKey>,
        change: impl FnOnce(&mut T),
    ) -> RepoResult<Option<T>> {
        let Some(mut entity) = self.repository.get_by_id::<T>(id)? else {
            return Ok(None);
        };
        change(&mut entity);
        self.repository.update(entity)
    }
}
