//! Relational backend over SQLite.
//!
//! # Responsibility
//! - Store entities as JSON bodies in the `entities` table keyed by
//!   `(collection, entity_key)`.
//! - Translate predicates into `WHERE` clauses over `json_extract`.
//!
//! # Invariants
//! - Writes of one scope share one transaction, committed by
//!   `save_changes` and rolled back when the session is disposed first.
//! - Generated keys come from `key_sequences` and start at 1 per collection.

mod repository;
mod session;
mod translate;

pub use repository::SqlRepository;
pub use session::{
    json_to_sql, SqlCommand, SqlOutput, SqlParams, SqlRow, SqlSession, SqliteSessionFactory,
};
pub use translate::{translate_order, translate_predicate, SqlFilter, SqlOrder};
