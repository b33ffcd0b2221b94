//! Composable, backend-neutral specifications.
//!
//! # Responsibility
//! - Let callers express filters once and have every backend translate them
//!   into its native query form.
//! - Define the reference semantics every translation must agree with.
//!
//! # Invariants
//! - Specifications are immutable; composition returns a new value.
//! - Logic is two-valued: comparisons against missing or null fields are
//!   false, except `Eq null` and `IsNull`.
//! - Result order is filter, then order, then offset, then limit, with ties
//!   broken by storage key ascending.

mod order;
mod predicate;

pub use order::{OrderBy, SortDirection};
pub use predicate::{lookup_path, CompareOp, Predicate};

pub(crate) use order::order_and_paginate;
pub(crate) use predicate::scalar_cmp;

use crate::error::RepoResult;
use crate::model::entity::Entity;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Boolean connective used by `Specification::combine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// A predicate over entities of type `T` plus optional ordering hints.
pub struct Specification<T> {
    predicate: Predicate,
    order: Vec<OrderBy>,
    _entity: PhantomData<fn(&T) -> bool>,
}

impl<T> Specification<T> {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            order: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Matches every entity.
    pub fn all() -> Self {
        Self::new(Predicate::always())
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    /// Appends an ordering hint.
    pub fn order_by(mut self, term: OrderBy) -> Self {
        self.order.push(term);
        self
    }

    pub fn and(self, other: Specification<T>) -> Self {
        self.combine(other, Combinator::And)
    }

    pub fn or(self, other: Specification<T>) -> Self {
        self.combine(other, Combinator::Or)
    }

    pub fn negate(self) -> Self {
        Self {
            predicate: self.predicate.negate(),
            order: self.order,
            _entity: PhantomData,
        }
    }

    /// Joins two specifications. Ordering hints of `self` come first.
    pub fn combine(self, other: Specification<T>, combinator: Combinator) -> Self {
        let predicate = match combinator {
            Combinator::And => self.predicate.and(other.predicate),
            Combinator::Or => self.predicate.or(other.predicate),
        };
        let mut order = self.order;
        order.extend(other.order);
        Self {
            predicate,
            order,
            _entity: PhantomData,
        }
    }

    pub fn validate(&self) -> RepoResult<()> {
        self.predicate.validate()
    }
}

impl<T: Entity> Specification<T> {
    /// Evaluates the specification against one entity.
    pub fn matches(&self, entity: &T) -> bool {
        serde_json::to_value(entity)
            .map(|body| self.predicate.evaluate(&body))
            .unwrap_or(false)
    }
}

impl<T> From<Predicate> for Specification<T> {
    fn from(value: Predicate) -> Self {
        Self::new(value)
    }
}

impl<T> Clone for Specification<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            order: self.order.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> Debug for Specification<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specification")
            .field("predicate", &self.predicate)
            .field("order", &self.order)
            .finish()
    }
}
