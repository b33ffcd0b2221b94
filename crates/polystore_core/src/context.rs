//! Scoped session reuse across repository instances.
//!
//! # Responsibility
//! - Map scope keys to live session handles so every repository working in
//!   one unit of work shares one native session.
//! - Own the unit-of-work lifecycle: create on demand, retire on cleanup.
//!
//! # Invariants
//! - At most one live handle per scope key is published at a time.
//! - First creation for a key runs at most once, even under concurrent
//!   callers; operations on different keys never take a global lock.
//! - The cache holds no backend knowledge.
//!
//! # See also
//! - `session` for the handle type stored by backends.

use crate::error::{RepoError, RepoResult};
use crate::session::{NativeSession, SessionFactory, SessionHandle};
use dashmap::DashMap;
use log::debug;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Scope used by repositories that were not given one.
pub const DEFAULT_SCOPE: &str = "default";

/// A value the context cache can publish and retire.
pub trait CachedHandle: Clone + Send + Sync + 'static {
    fn retire(&self);

    fn same_as(&self, other: &Self) -> bool;
}

impl<S: NativeSession> CachedHandle for SessionHandle<S> {
    fn retire(&self) {
        SessionHandle::retire(self);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// Concurrent registry of scope key to handle.
///
/// One cache instance should serve one store; repositories of different
/// stores sharing a cache must use distinct scope keys.
pub struct ContextCache<H> {
    entries: DashMap<String, Arc<OnceCell<H>>>,
}

impl<H: CachedHandle> Default for ContextCache<H> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<H: CachedHandle> ContextCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live handle for `scope`.
    pub fn get(&self, scope: &str) -> Option<H> {
        self.entries
            .get(scope)
            .and_then(|cell| cell.get().cloned())
    }

    /// Publishes `handle` for `scope`. A different handle previously stored
    /// under the key is retired.
    pub fn set(&self, scope: impl Into<String>, handle: H) {
        let scope = scope.into();
        let previous = self
            .entries
            .insert(scope.clone(), Arc::new(OnceCell::with_value(handle.clone())));
        if let Some(previous) = previous.as_ref().and_then(|cell| cell.get()) {
            if !previous.same_as(&handle) {
                previous.retire();
                debug!("event=context_replace module=context status=ok scope={scope}");
            }
        }
    }

    /// Returns the handle for `scope`, creating it with `create` when absent.
    ///
    /// Concurrent first callers for one key share a single creation; the map
    /// shard lock is not held while `create` runs. A failed creation leaves
    /// the key empty so a later call can retry.
    ///
    /// # Errors
    /// - Whatever `create` returns.
    /// - `SessionClosed` when the key was cleaned up while this call was
    ///   creating its handle; the orphaned handle is retired.
    pub fn get_or_try_insert_with(
        &self,
        scope: &str,
        create: impl FnOnce() -> RepoResult<H>,
    ) -> RepoResult<H> {
        let cell = Arc::clone(
            self.entries
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        let mut created = false;
        let handle = cell
            .get_or_try_init(|| {
                created = true;
                create()
            })?
            .clone();

        if created {
            let published = self
                .entries
                .get(scope)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &cell));
            if !published {
                handle.retire();
                return Err(RepoError::SessionClosed(scope.to_string()));
            }
            debug!("event=context_create module=context status=ok scope={scope}");
        }
        Ok(handle)
    }

    /// Evicts `scope`, retires its handle and returns it.
    pub fn cleanup(&self, scope: &str) -> Option<H> {
        let (_, cell) = self.entries.remove(scope)?;
        let handle = cell.get().cloned()?;
        handle.retire();
        debug!("event=context_cleanup module=context status=ok scope={scope}");
        Some(handle)
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.entries
            .get(scope)
            .is_some_and(|cell| cell.get().is_some())
    }

    /// Number of scopes with a live handle.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns sorted scope keys with a live handle.
    pub fn scope_keys(&self) -> Vec<String> {
        let mut keys = self
            .entries
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Cleans up every scope. Returns the number of retired handles.
    pub fn clear(&self) -> usize {
        let keys = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        keys.iter()
            .filter_map(|scope| self.cleanup(scope))
            .count()
    }

    /// Starts a unit of work that cleans `scope` up when the guard drops.
    pub fn begin_scope(&self, scope: impl Into<String>) -> ScopeGuard<'_, H> {
        ScopeGuard {
            cache: self,
            scope: scope.into(),
        }
    }
}

/// Unit-of-work guard returned by `ContextCache::begin_scope`.
pub struct ScopeGuard<'a, H: CachedHandle> {
    cache: &'a ContextCache<H>,
    scope: String,
}

impl<H: CachedHandle> ScopeGuard<'_, H> {
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl<H: CachedHandle> Drop for ScopeGuard<'_, H> {
    fn drop(&mut self) {
        self.cache.cleanup(&self.scope);
    }
}

/// Per-repository view of one store within one scope.
pub struct DataContext<F: SessionFactory> {
    factory: Arc<F>,
    cache: Arc<ContextCache<SessionHandle<F::Session>>>,
    scope: String,
}

impl<F: SessionFactory> DataContext<F> {
    pub fn new(
        factory: Arc<F>,
        cache: Arc<ContextCache<SessionHandle<F::Session>>>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            cache,
            scope: scope.into(),
        }
    }

    pub fn with_default_scope(
        factory: Arc<F>,
        cache: Arc<ContextCache<SessionHandle<F::Session>>>,
    ) -> Self {
        Self::new(factory, cache, DEFAULT_SCOPE)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    pub fn cache(&self) -> &Arc<ContextCache<SessionHandle<F::Session>>> {
        &self.cache
    }

    /// Returns the scope's session, opening and publishing it on first use.
    pub fn session(&self) -> RepoResult<SessionHandle<F::Session>> {
        self.cache.get_or_try_insert_with(&self.scope, || {
            let session = self.factory.open_session()?;
            Ok(SessionHandle::new(self.scope.clone(), session))
        })
    }

    /// Commits the scope's unit of work.
    pub fn save_changes(&self) -> RepoResult<()> {
        self.session()?.commit()
    }

    pub fn source(&self) -> String {
        self.factory.source()
    }
}

impl<F: SessionFactory> Clone for DataContext<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            cache: Arc::clone(&self.cache),
            scope: self.scope.clone(),
        }
    }
}
