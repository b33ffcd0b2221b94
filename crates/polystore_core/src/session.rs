//! Native session capability and shared session handles.
//!
//! # Responsibility
//! - Define the narrow surface every backend session exposes.
//! - Wrap native sessions in cloneable handles that serialize access and can
//!   be retired.
//!
//! # Invariants
//! - A retired handle never reaches its native session again.
//! - The native session is disposed exactly once: on explicit `dispose`, or
//!   when the last handle clone drops.

use crate::error::{RepoError, RepoResult};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A backend's unit-of-work session.
pub trait NativeSession: Send + 'static {
    type Command;
    type Output;

    fn execute(&mut self, command: Self::Command) -> RepoResult<Self::Output>;

    /// Makes pending work durable.
    fn commit(&mut self) -> RepoResult<()>;

    /// Releases native resources. Pending uncommitted work is discarded.
    fn dispose(&mut self);
}

/// Opens native sessions for one configured store.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: NativeSession;

    fn open_session(&self) -> RepoResult<Self::Session>;

    /// Human-readable address of the store.
    fn source(&self) -> String;
}

struct SessionSlot<S: NativeSession> {
    scope: String,
    session: Mutex<Option<S>>,
    retired: AtomicBool,
}

impl<S: NativeSession> SessionSlot<S> {
    fn lock(&self) -> MutexGuard<'_, Option<S>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: NativeSession> Drop for SessionSlot<S> {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(session) => session.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut session) = session {
            session.dispose();
            debug!(
                "event=session_dispose module=session status=ok scope={} trigger=drop",
                self.scope
            );
        }
    }
}

/// Shared handle to one native session.
pub struct SessionHandle<S: NativeSession> {
    slot: Arc<SessionSlot<S>>,
}

impl<S: NativeSession> SessionHandle<S> {
    pub fn new(scope: impl Into<String>, session: S) -> Self {
        Self {
            slot: Arc::new(SessionSlot {
                scope: scope.into(),
                session: Mutex::new(Some(session)),
                retired: AtomicBool::new(false),
            }),
        }
    }

    pub fn scope(&self) -> &str {
        &self.slot.scope
    }

    pub fn is_retired(&self) -> bool {
        self.slot.retired.load(Ordering::Acquire)
    }

    /// Runs `f` with exclusive access to the native session.
    ///
    /// Calls must not nest on the same handle.
    ///
    /// # Errors
    /// - `SessionClosed` when the handle was retired or disposed.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> RepoResult<R>) -> RepoResult<R> {
        if self.is_retired() {
            return Err(self.closed());
        }
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(session) => f(session),
            None => Err(self.closed()),
        }
    }

    pub fn execute(&self, command: S::Command) -> RepoResult<S::Output> {
        self.with(|session| session.execute(command))
    }

    pub fn commit(&self) -> RepoResult<()> {
        self.with(S::commit)
    }

    /// Marks the handle unusable. Native disposal waits for the last clone.
    pub fn retire(&self) {
        self.slot.retired.store(true, Ordering::Release);
    }

    /// Retires the handle and disposes the native session immediately.
    pub fn dispose(&self) {
        self.retire();
        let session = self.slot.lock().take();
        if let Some(mut session) = session {
            session.dispose();
            debug!(
                "event=session_dispose module=session status=ok scope={} trigger=explicit",
                self.slot.scope
            );
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    fn closed(&self) -> RepoError {
        RepoError::SessionClosed(self.slot.scope.clone())
    }
}

impl<S: NativeSession> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<S: NativeSession> std::fmt::Debug for SessionHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("scope", &self.slot.scope)
            .field("retired", &self.is_retired())
            .finish()
    }
}
