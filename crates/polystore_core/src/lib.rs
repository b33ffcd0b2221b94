//! Persistence abstraction over relational, document and search stores.
//! Application code programs against `Repository`; backends translate
//! specifications and drive their own native sessions.

pub mod adapter;
pub mod audit;
pub mod backend;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repository;
pub mod session;
pub mod sharding;
pub mod spec;

pub use adapter::{AnonymousPrincipal, AuditableRepository, NamedPrincipal, Principal};
pub use audit::{AuditMetadata, AuditNode, Cascade, CascadeMode, NodeId, SharedNode};
pub use config::Settings;
pub use context::{ContextCache, DataContext, ScopeGuard, DEFAULT_SCOPE};
pub use error::{BackendError, FailureDetail, PartialFailure, RepoError, RepoResult};
pub use logging::{default_log_level, init_from_settings, init_logging, LogConfig};
pub use model::entity::{Entity, EntityKey, KeyPart};
pub use repository::{
    BulkOperations, ConflictMode, FieldPatch, LoadService, MetadataProvider, Page, ParamList,
    Repository, RepositoryOptions,
};
pub use session::{NativeSession, SessionFactory, SessionHandle};
pub use spec::{CompareOp, OrderBy, Predicate, SortDirection, Specification};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
