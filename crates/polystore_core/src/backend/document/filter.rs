//! Native filter documents for the document engine.
//!
//! A filter is a JSON object. `{}` matches everything; `$and`, `$or` and
//! `$not` combine sub-filters; any other key is a field path mapped to an
//! operator object such as `{"$gte": 10}`. Several operators on one field
//! must all hold.

use crate::error::{RepoError, RepoResult};
use crate::spec::{CompareOp, Predicate};
use serde_json::{json, Map, Value};

const BACKEND: &str = "document";

fn operator_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::Ne => "$ne",
        CompareOp::Lt => "$lt",
        CompareOp::Le => "$lte",
        CompareOp::Gt => "$gt",
        CompareOp::Ge => "$gte",
        CompareOp::StartsWith => "$prefix",
        CompareOp::Contains => "$contains",
    }
}

fn operator_from_name(name: &str) -> Option<CompareOp> {
    Some(match name {
        "$eq" => CompareOp::Eq,
        "$ne" => CompareOp::Ne,
        "$lt" => CompareOp::Lt,
        "$lte" => CompareOp::Le,
        "$gt" => CompareOp::Gt,
        "$gte" => CompareOp::Ge,
        "$prefix" => CompareOp::StartsWith,
        "$contains" => CompareOp::Contains,
        _ => return None,
    })
}

/// Translates a predicate into a filter document.
pub fn to_filter(predicate: &Predicate) -> RepoResult<Value> {
    predicate.validate()?;
    Ok(render(predicate))
}

fn render(predicate: &Predicate) -> Value {
    match predicate {
        Predicate::Const(true) => json!({}),
        Predicate::Const(false) => json!({ "$or": [] }),
        Predicate::Compare { field, op, value } => {
            field_filter(field, operator_name(*op), value.clone())
        }
        Predicate::In { field, values } => field_filter(field, "$in", Value::Array(values.clone())),
        Predicate::IsNull(field) => field_filter(field, "$null", Value::Bool(true)),
        Predicate::And(items) => json!({ "$and": items.iter().map(render).collect::<Vec<_>>() }),
        Predicate::Or(items) => json!({ "$or": items.iter().map(render).collect::<Vec<_>>() }),
        Predicate::Not(inner) => json!({ "$not": render(inner) }),
    }
}

fn field_filter(field: &str, operator: &str, operand: Value) -> Value {
    let mut condition = Map::new();
    condition.insert(operator.to_string(), operand);
    let mut filter = Map::new();
    filter.insert(field.to_string(), Value::Object(condition));
    Value::Object(filter)
}

/// Parses a filter document back into the predicate it evaluates.
///
/// # Errors
/// - `Translation` for malformed filters or unknown operators.
pub fn parse_filter(filter: &Value) -> RepoResult<Predicate> {
    let Value::Object(entries) = filter else {
        return Err(malformed("filter must be an object"));
    };
    let mut clauses = Vec::with_capacity(entries.len());
    for (key, operand) in entries {
        match key.as_str() {
            "$and" => clauses.push(Predicate::And(parse_list(key, operand)?)),
            "$or" => clauses.push(Predicate::Or(parse_list(key, operand)?)),
            "$not" => clauses.push(Predicate::Not(Box::new(parse_filter(operand)?))),
            field if field.starts_with('$') => {
                return Err(malformed(format!("unknown top-level operator `{field}`")));
            }
            field => clauses.extend(parse_conditions(field, operand)?),
        }
    }
    Ok(match clauses.len() {
        0 => Predicate::Const(true),
        1 => clauses.remove(0),
        _ => Predicate::And(clauses),
    })
}

fn parse_list(key: &str, operand: &Value) -> RepoResult<Vec<Predicate>> {
    let Value::Array(items) = operand else {
        return Err(malformed(format!("`{key}` expects an array")));
    };
    items.iter().map(parse_filter).collect()
}

fn parse_conditions(field: &str, operand: &Value) -> RepoResult<Vec<Predicate>> {
    let Value::Object(conditions) = operand else {
        return Err(malformed(format!("field `{field}` expects an operator object")));
    };
    conditions
        .iter()
        .map(|(operator, value)| match operator.as_str() {
            "$in" => match value {
                Value::Array(values) => Ok(Predicate::In {
                    field: field.to_string(),
                    values: values.clone(),
                }),
                _ => Err(malformed("`$in` expects an array")),
            },
            "$null" => match value {
                Value::Bool(true) => Ok(Predicate::IsNull(field.to_string())),
                Value::Bool(false) => Ok(Predicate::Not(Box::new(Predicate::IsNull(
                    field.to_string(),
                )))),
                _ => Err(malformed("`$null` expects a boolean")),
            },
            name => operator_from_name(name)
                .map(|op| Predicate::Compare {
                    field: field.to_string(),
                    op,
                    value: value.clone(),
                })
                .ok_or_else(|| malformed(format!("unknown operator `{name}`"))),
        })
        .collect()
}

fn malformed(reason: impl Into<String>) -> RepoError {
    RepoError::translation(BACKEND, reason)
}

#[cfg(test)]
mod tests {
    use super::{parse_filter, to_filter};
    use crate::spec::Predicate;
    use serde_json::json;

    #[test]
    fn renders_operator_objects_per_field() {
        let predicate = Predicate::ge("total", 10).and(Predicate::starts_with("code", "EU"));
        assert_eq!(
            to_filter(&predicate).unwrap(),
            json!({ "$and": [
                { "total": { "$gte": 10 } },
                { "code": { "$prefix": "EU" } }
            ] })
        );
        assert_eq!(to_filter(&Predicate::always()).unwrap(), json!({}));
    }

    #[test]
    fn parsed_filters_evaluate_like_the_source_predicate() {
        let predicate = Predicate::is_in("status", ["open", "held"])
            .or(Predicate::is_null("closed_at").negate());
        let parsed = parse_filter(&to_filter(&predicate).unwrap()).unwrap();
        for body in [
            json!({ "status": "open" }),
            json!({ "status": "done" }),
            json!({ "status": "done", "closed_at": "2024-01-01" }),
        ] {
            assert_eq!(parsed.evaluate(&body), predicate.evaluate(&body), "{body}");
        }
    }

    #[test]
    fn multiple_operators_on_one_field_are_conjunctive() {
        let parsed = parse_filter(&json!({ "n": { "$gt": 1, "$lt": 5 } })).unwrap();
        assert!(parsed.evaluate(&json!({ "n": 3 })));
        assert!(!parsed.evaluate(&json!({ "n": 7 })));
    }

    #[test]
    fn rejects_unknown_operators() {
        assert!(parse_filter(&json!({ "n": { "$near": 1 } })).is_err());
        assert!(parse_filter(&json!({ "$xor": [] })).is_err());
        assert!(parse_filter(&json!([])).is_err());
    }
}
