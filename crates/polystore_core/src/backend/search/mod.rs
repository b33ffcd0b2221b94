//! Search backend.
//!
//! # Responsibility
//! - Host in-process search indices queried through a bool/term JSON DSL.
//! - Translate predicates into that DSL and expose the index through the
//!   uniform repository contract.
//!
//! # Invariants
//! - Writes are searchable as soon as they return.
//! - Substring predicates are rejected with `RepoError::Translation`.
//! - Ids missing on write are generated as uuid v4 strings.

mod index;
mod query;
mod repository;
mod session;
mod translate;

pub use index::{Hit, IndexOutcome, IndexStatus, SearchIndex};
pub use query::{parse_query, CompiledQuery, RangeBound};
pub use repository::SearchRepository;
pub use session::{BulkAction, SearchRequest, SearchResponse, SearchSession, SearchStore};
pub use translate::translate_predicate;
