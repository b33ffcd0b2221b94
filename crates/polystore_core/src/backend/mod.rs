//! Storage backends behind the repository contract.
//!
//! Each backend owns its native command language, a `SessionFactory`, a
//! predicate translator and a `Repository` implementation:
//!
//! - `sql`: SQLite entity store, predicates become `WHERE` clauses over
//!   `json_extract`.
//! - `document`: in-process document engine with etags, id sequences and
//!   sharding.
//! - `search`: in-process search index with a bool/term query DSL.

pub mod document;
pub mod search;
pub mod sql;
