//! Entity model shared by every repository backend.
//!
//! # Responsibility
//! - Define what a persistable record must expose: collection, key fields
//!   and key extraction.
//! - Keep key representation backend-neutral (`EntityKey`).
//!
//! # Invariants
//! - A key of `None` means "not yet assigned"; backends may generate one.
//! - Single-part keys store as their plain text form; composite keys store as
//!   a JSON array text.

pub mod entity;
