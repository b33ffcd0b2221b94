//! Document backend.
//!
//! # Responsibility
//! - Host in-process document engines with per-document etags and
//!   per-collection id sequences.
//! - Route commands across shards when a prefix configures a shard layout.
//! - Expose the engine through the uniform repository contract.
//! - Keep named indexes (map filter, exposed fields, default sort) that
//!   `DocumentRepository::find_in_index` queries.
//!
//! # Invariants
//! - Generated ids are `<collection>/<n>`, prefixed with `<shard>/` on
//!   sharded stores, so an id alone identifies its shard.
//! - A replacement only applies when the session's tracked etag still
//!   matches; untracked documents replace unconditionally.
//! - Fan-out reads fail with `PartialFailure` when any targeted shard fails.
//!
//! # See also
//! - `crate::sharding` for the routing strategies.

mod engine;
mod filter;
mod index;
mod repository;
mod session;
mod store;

pub use engine::{Document, DocumentEngine, WriteOutcome};
pub use filter::{parse_filter, to_filter};
pub use index::IndexDefinition;
pub use repository::DocumentRepository;
pub use session::{
    BulkReport, DocumentCommand, DocumentOutput, DocumentSession, EngineSession, NewDocument,
    ShardedSession,
};
pub use store::{DocumentStore, DocumentStoreFactory, ShardedStore};
