//! Predicate to search DSL translation.

use super::query::field_clause;
use crate::error::{RepoError, RepoResult};
use crate::spec::{CompareOp, Predicate};
use serde_json::{json, Value};

const BACKEND: &str = "search";

/// Translates a validated predicate into a query document.
///
/// # Errors
/// - `InvalidData` for predicates that fail validation.
/// - `Translation` for `Contains`, which the index cannot express.
pub fn translate_predicate(predicate: &Predicate) -> RepoResult<Value> {
    predicate.validate()?;
    render(predicate)
}

fn match_all() -> Value {
    json!({ "match_all": {} })
}

fn match_none() -> Value {
    json!({ "match_none": {} })
}

fn exists(field: &str) -> Value {
    json!({ "exists": { "field": field } })
}

fn must_not(query: Value) -> Value {
    json!({ "bool": { "must_not": [query] } })
}

fn any_of(queries: Vec<Value>) -> Value {
    json!({ "bool": { "should": queries, "minimum_should_match": 1 } })
}

fn range(field: &str, bound: &str, value: &Value) -> Value {
    field_clause("range", field, json!({ bound: value }))
}

fn render(predicate: &Predicate) -> RepoResult<Value> {
    Ok(match predicate {
        Predicate::Const(true) => match_all(),
        Predicate::Const(false) => match_none(),
        Predicate::Compare { field, op, value } => render_compare(field, *op, value)?,
        Predicate::In { field, values } => {
            let (nulls, scalars): (Vec<&Value>, Vec<&Value>) =
                values.iter().partition(|value| value.is_null());
            let mut options = Vec::new();
            if !scalars.is_empty() {
                let scalars = scalars.into_iter().cloned().collect::<Vec<_>>();
                options.push(field_clause("terms", field, Value::Array(scalars)));
            }
            if !nulls.is_empty() {
                options.push(must_not(exists(field)));
            }
            match options.len() {
                0 => match_none(),
                1 => options.remove(0),
                _ => any_of(options),
            }
        }
        Predicate::IsNull(field) => must_not(exists(field)),
        Predicate::And(items) => {
            if items.is_empty() {
                match_all()
            } else {
                let must = items.iter().map(render).collect::<RepoResult<Vec<_>>>()?;
                json!({ "bool": { "must": must } })
            }
        }
        Predicate::Or(items) => {
            if items.is_empty() {
                match_none()
            } else {
                any_of(items.iter().map(render).collect::<RepoResult<Vec<_>>>()?)
            }
        }
        Predicate::Not(inner) => must_not(render(inner)?),
    })
}

fn render_compare(field: &str, op: CompareOp, value: &Value) -> RepoResult<Value> {
    if value.is_null() {
        return Ok(match op {
            CompareOp::Eq => must_not(exists(field)),
            CompareOp::Ne => exists(field),
            _ => match_none(),
        });
    }
    Ok(match op {
        CompareOp::Eq => field_clause("term", field, value.clone()),
        CompareOp::Ne => any_of(vec![range(field, "lt", value), range(field, "gt", value)]),
        CompareOp::Lt => range(field, "lt", value),
        CompareOp::Le => range(field, "lte", value),
        CompareOp::Gt => range(field, "gt", value),
        CompareOp::Ge => range(field, "gte", value),
        CompareOp::StartsWith => field_clause("prefix", field, value.clone()),
        CompareOp::Contains => {
            return Err(RepoError::translation(
                BACKEND,
                format!("substring match on `{field}` is not supported by the search index"),
            ));
        }
    })
}
