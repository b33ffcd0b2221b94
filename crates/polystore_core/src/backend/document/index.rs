//! Named static indexes on document engines.
//!
//! # Responsibility
//! - Describe an index: the collection it covers, the map filter that picks
//!   indexed documents, the fields it exposes and its default sort.
//! - Reject index queries that filter or sort on fields the index does not
//!   expose.
//!
//! # Invariants
//! - Definitions are validated before an engine stores them.
//! - An empty field list exposes every field.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::Entity;
use crate::spec::{OrderBy, Predicate};
use std::collections::BTreeSet;

/// Definition put on an engine under a unique name.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub collection: String,
    /// Only documents matching the map filter are indexed.
    pub map: Predicate,
    /// Fields queries may filter and sort on.
    pub fields: Vec<String>,
    /// Order applied when a query brings none.
    pub sort: Vec<OrderBy>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            map: Predicate::always(),
            fields: Vec::new(),
            sort: Vec::new(),
        }
    }

    pub fn for_entity<T: Entity>(name: impl Into<String>) -> Self {
        Self::new(name, T::COLLECTION)
    }

    pub fn map(mut self, filter: Predicate) -> Self {
        self.map = filter;
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn sort(mut self, term: OrderBy) -> Self {
        self.sort.push(term);
        self
    }

    /// # Errors
    /// - `InvalidData` for an empty name or collection, an invalid map
    ///   filter, or sort terms on fields the index does not expose.
    pub fn validate(&self) -> RepoResult<()> {
        if self.name.trim().is_empty() || self.collection.trim().is_empty() {
            return Err(RepoError::InvalidData(
                "index definitions need a name and a collection".to_string(),
            ));
        }
        self.map.validate()?;
        self.check_exposed(self.sort.iter().map(|term| term.field.as_str()))
    }

    /// Checks that a query only touches exposed fields.
    ///
    /// # Errors
    /// - `InvalidData` naming the first field the index does not expose.
    pub fn check_query(&self, filter: &Predicate, order: &[OrderBy]) -> RepoResult<()> {
        let mut fields = BTreeSet::new();
        referenced_fields(filter, &mut fields);
        self.check_exposed(
            fields
                .into_iter()
                .chain(order.iter().map(|term| term.field.as_str())),
        )
    }

    /// Query order, or the index sort when the query brings none.
    pub fn effective_order<'a>(&'a self, order: &'a [OrderBy]) -> &'a [OrderBy] {
        if order.is_empty() {
            &self.sort
        } else {
            order
        }
    }

    fn check_exposed<'a>(&self, mut fields: impl Iterator<Item = &'a str>) -> RepoResult<()> {
        if self.fields.is_empty() {
            return Ok(());
        }
        match fields.find(|field| !self.fields.iter().any(|exposed| exposed.as_str() == *field)) {
            Some(field) => Err(RepoError::InvalidData(format!(
                "index `{}` does not expose field `{field}`",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

fn referenced_fields<'a>(predicate: &'a Predicate, fields: &mut BTreeSet<&'a str>) {
    match predicate {
        Predicate::Const(_) => {}
        Predicate::Compare { field, .. } | Predicate::In { field, .. } | Predicate::IsNull(field) => {
            fields.insert(field.as_str());
        }
        Predicate::And(items) | Predicate::Or(items) => {
            for item in items {
                referenced_fields(item, fields);
            }
        }
        Predicate::Not(inner) => referenced_fields(inner, fields),
    }
}
