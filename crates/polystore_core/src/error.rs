//! Error taxonomy shared by every repository backend.
//!
//! # Responsibility
//! - Normalize backend failures into one caller-visible error type.
//! - Carry per-item and per-shard outcomes of bulk and fan-out operations.
//!
//! # Invariants
//! - "Not found" is never an error; repositories surface it as `None` or an
//!   empty collection.
//! - Native errors are wrapped, not reinterpreted, except for not-found and
//!   conflict normalization.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Failure raised by one of the in-process engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub backend: &'static str,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} backend failure: {}", self.backend, self.message)
    }
}

impl Error for BackendError {}

/// One failed item or shard inside a composite outcome.
#[derive(Debug)]
pub struct FailureDetail {
    /// Shard id or entity key the failure belongs to.
    pub target: String,
    pub error: RepoError,
}

impl FailureDetail {
    pub fn new(target: impl Into<String>, error: RepoError) -> Self {
        Self {
            target: target.into(),
            error,
        }
    }
}

/// Composite outcome of a bulk or sharded operation where something failed.
///
/// Successful writes counted in `succeeded` stay applied.
#[derive(Debug, Default)]
pub struct PartialFailure {
    pub succeeded: u64,
    pub failures: Vec<FailureDetail>,
    pub skipped: Vec<String>,
}

impl PartialFailure {
    /// Returns the targets of every failure in reporting order.
    pub fn failed_targets(&self) -> Vec<&str> {
        self.failures
            .iter()
            .map(|failure| failure.target.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

impl Display for PartialFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "partial failure: {} succeeded, {} failed",
            self.succeeded,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.target, failure.error)?;
        }
        if !self.skipped.is_empty() {
            write!(f, "; skipped: {}", self.skipped.join(","))?;
        }
        Ok(())
    }
}

/// Caller-visible repository error.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Backend(BackendError),
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
    Translation {
        backend: &'static str,
        reason: String,
    },
    Conflict {
        collection: String,
        key: String,
    },
    PartialFailure(PartialFailure),
    Configuration(String),
    SessionClosed(String),
    InvalidData(String),
}

impl RepoError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend(BackendError::new(backend, message))
    }

    pub fn translation(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Translation {
            backend,
            reason: reason.into(),
        }
    }

    /// Returns whether the error is a SQLite UNIQUE/PRIMARY KEY violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_constraint_violation())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::Unsupported { backend, operation } => {
                write!(f, "operation `{operation}` is not supported by the {backend} backend")
            }
            Self::Translation { backend, reason } => {
                write!(f, "predicate cannot be translated for the {backend} backend: {reason}")
            }
            Self::Conflict { collection, key } => {
                write!(f, "version conflict on {collection}/{key}")
            }
            Self::PartialFailure(outcome) => write!(f, "{outcome}"),
            Self::Configuration(message) => write!(f, "invalid configuration: {message}"),
            Self::SessionClosed(scope) => write!(f, "session for scope `{scope}` is closed"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Backend(err) => Some(err),
            Self::Unsupported { .. }
            | Self::Translation { .. }
            | Self::Conflict { .. }
            | Self::PartialFailure(_)
            | Self::Configuration(_)
            | Self::SessionClosed(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<BackendError> for RepoError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

impl From<PartialFailure> for RepoError {
    fn from(value: PartialFailure) -> Self {
        Self::PartialFailure(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

impl From<toml::de::Error> for RepoError {
    fn from(value: toml::de::Error) -> Self {
        Self::Configuration(value.to_string())
    }
}
