//! Query DSL of the search index.
//!
//! Queries are JSON objects with exactly one clause key:
//! `match_all`, `match_none`, `term`, `terms`, `range`, `prefix`, `exists`
//! or `bool` (`must`, `should`, `must_not`, `minimum_should_match`).

use crate::error::{RepoError, RepoResult};
use crate::spec::{lookup_path, scalar_cmp};
use serde_json::{Map, Value};
use std::cmp::Ordering;

const BACKEND: &str = "search";

/// A parsed query ready to run against document sources.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledQuery {
    MatchAll,
    MatchNone,
    Term {
        field: String,
        value: Value,
    },
    Terms {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        bounds: Vec<(RangeBound, Value)>,
    },
    Prefix {
        field: String,
        prefix: String,
    },
    Exists {
        field: String,
    },
    Bool {
        must: Vec<CompiledQuery>,
        should: Vec<CompiledQuery>,
        must_not: Vec<CompiledQuery>,
        minimum_should_match: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeBound {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            _ => return None,
        })
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

impl CompiledQuery {
    /// Whether `source` matches. Fields of a different scalar kind than the
    /// operand never match.
    pub fn matches(&self, source: &Value) -> bool {
        match self {
            Self::MatchAll => true,
            Self::MatchNone => false,
            Self::Term { field, value } => term_matches(lookup_path(source, field), value),
            Self::Terms { field, values } => {
                let actual = lookup_path(source, field);
                values.iter().any(|value| term_matches(actual, value))
            }
            Self::Range { field, bounds } => match lookup_path(source, field) {
                Some(actual) => bounds.iter().all(|(bound, operand)| {
                    scalar_cmp(actual, operand).is_some_and(|ordering| bound.holds(ordering))
                }),
                None => false,
            },
            Self::Prefix { field, prefix } => lookup_path(source, field)
                .and_then(Value::as_str)
                .is_some_and(|actual| actual.starts_with(prefix.as_str())),
            Self::Exists { field } => lookup_path(source, field).is_some_and(|value| !value.is_null()),
            Self::Bool {
                must,
                should,
                must_not,
                minimum_should_match,
            } => {
                must.iter().all(|query| query.matches(source))
                    && !must_not.iter().any(|query| query.matches(source))
                    && should.iter().filter(|query| query.matches(source)).count()
                        >= *minimum_should_match
            }
        }
    }
}

fn term_matches(actual: Option<&Value>, operand: &Value) -> bool {
    actual.is_some_and(|actual| scalar_cmp(actual, operand) == Some(Ordering::Equal))
}

/// Parses a query document.
///
/// # Errors
/// - `Translation` for unknown clauses or malformed clause bodies.
pub fn parse_query(query: &Value) -> RepoResult<CompiledQuery> {
    let (clause, body) = single_entry(query, "query")?;
    match clause {
        "match_all" => Ok(CompiledQuery::MatchAll),
        "match_none" => Ok(CompiledQuery::MatchNone),
        "term" => {
            let (field, value) = single_entry(body, "term")?;
            Ok(CompiledQuery::Term {
                field: field.to_string(),
                value: value.clone(),
            })
        }
        "terms" => {
            let (field, values) = single_entry(body, "terms")?;
            let Value::Array(values) = values else {
                return Err(malformed("`terms` expects an array of values"));
            };
            Ok(CompiledQuery::Terms {
                field: field.to_string(),
                values: values.clone(),
            })
        }
        "range" => {
            let (field, bounds) = single_entry(body, "range")?;
            let Value::Object(bounds) = bounds else {
                return Err(malformed("`range` expects an object of bounds"));
            };
            let bounds = bounds
                .iter()
                .map(|(name, operand)| {
                    RangeBound::parse(name)
                        .map(|bound| (bound, operand.clone()))
                        .ok_or_else(|| malformed(format!("unknown range bound `{name}`")))
                })
                .collect::<RepoResult<Vec<_>>>()?;
            Ok(CompiledQuery::Range {
                field: field.to_string(),
                bounds,
            })
        }
        "prefix" => {
            let (field, prefix) = single_entry(body, "prefix")?;
            let prefix = prefix
                .as_str()
                .ok_or_else(|| malformed("`prefix` expects a string"))?;
            Ok(CompiledQuery::Prefix {
                field: field.to_string(),
                prefix: prefix.to_string(),
            })
        }
        "exists" => {
            let field = body
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("`exists` expects a `field` name"))?;
            Ok(CompiledQuery::Exists {
                field: field.to_string(),
            })
        }
        "bool" => parse_bool(body),
        other => Err(malformed(format!("unknown query clause `{other}`"))),
    }
}

fn parse_bool(body: &Value) -> RepoResult<CompiledQuery> {
    let Value::Object(body) = body else {
        return Err(malformed("`bool` expects an object"));
    };
    let list = |name: &str| -> RepoResult<Vec<CompiledQuery>> {
        match body.get(name) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(parse_query).collect(),
            Some(single @ Value::Object(_)) => Ok(vec![parse_query(single)?]),
            Some(_) => Err(malformed(format!("`bool.{name}` expects queries"))),
        }
    };
    let must = list("must")?;
    let should = list("should")?;
    let must_not = list("must_not")?;
    let minimum_should_match = match body.get("minimum_should_match") {
        Some(value) => value
            .as_u64()
            .and_then(|value| usize::try_from(value).ok())
            .ok_or_else(|| malformed("`minimum_should_match` expects a count"))?,
        None if must.is_empty() && !should.is_empty() => 1,
        None => 0,
    };
    Ok(CompiledQuery::Bool {
        must,
        should,
        must_not,
        minimum_should_match,
    })
}

fn single_entry<'a>(value: &'a Value, what: &str) -> RepoResult<(&'a str, &'a Value)> {
    match value {
        Value::Object(entries) if entries.len() == 1 => entries
            .iter()
            .next()
            .map(|(key, value)| (key.as_str(), value))
            .ok_or_else(|| malformed(format!("empty {what}"))),
        _ => Err(malformed(format!("{what} must be an object with one entry"))),
    }
}

fn malformed(reason: impl Into<String>) -> RepoError {
    RepoError::translation(BACKEND, reason)
}

/// `{clause: {field: operand}}`
pub(crate) fn field_clause(clause: &str, field: &str, operand: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(field.to_string(), operand);
    let mut outer = Map::new();
    outer.insert(clause.to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::parse_query;
    use serde_json::json;

    #[test]
    fn bool_should_defaults_to_one_match_without_must() {
        let query = parse_query(&json!({ "bool": { "should": [
            { "term": { "status": "open" } },
            { "term": { "status": "held" } }
        ] } }))
        .unwrap();
        assert!(query.matches(&json!({ "status": "held" })));
        assert!(!query.matches(&json!({ "status": "done" })));
    }

    #[test]
    fn range_requires_the_same_scalar_kind() {
        let query = parse_query(&json!({ "range": { "total": { "gte": 10, "lt": 20 } } })).unwrap();
        assert!(query.matches(&json!({ "total": 10 })));
        assert!(!query.matches(&json!({ "total": 20 })));
        assert!(!query.matches(&json!({ "total": "15" })));
        assert!(!query.matches(&json!({})));
    }

    #[test]
    fn exists_ignores_null_values() {
        let query = parse_query(&json!({ "exists": { "field": "closed_at" } })).unwrap();
        assert!(!query.matches(&json!({ "closed_at": null })));
        assert!(query.matches(&json!({ "closed_at": "2024-03-01" })));
    }

    #[test]
    fn rejects_unknown_clauses() {
        assert!(parse_query(&json!({ "fuzzy": { "name": "ana" } })).is_err());
        assert!(parse_query(&json!({ "term": {}, "prefix": {} })).is_err());
    }
}
