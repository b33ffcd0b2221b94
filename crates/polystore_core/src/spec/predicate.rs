//! Backend-neutral predicate AST and its reference evaluation.

use crate::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

static FIELD_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid field path regex")
});

/// Comparison operator of a `Predicate::Compare` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
    Contains,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::StartsWith => "starts_with",
            Self::Contains => "contains",
        }
    }
}

/// Predicate tree evaluated with two-valued logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Const(bool),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn always() -> Self {
        Self::Const(true)
    }

    pub fn never() -> Self {
        Self::Const(false)
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::StartsWith, Value::String(prefix.into()))
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Contains, Value::String(needle.into()))
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Checks field paths and operand shapes.
    ///
    /// # Errors
    /// - `InvalidData` for a malformed field path, a non-scalar operand, or a
    ///   non-string operand of `StartsWith`/`Contains`.
    pub fn validate(&self) -> RepoResult<()> {
        match self {
            Self::Const(_) => Ok(()),
            Self::Compare { field, op, value } => {
                validate_field(field)?;
                if !is_scalar(value) {
                    return Err(RepoError::InvalidData(format!(
                        "operand of `{field}` must be a scalar"
                    )));
                }
                if matches!(op, CompareOp::StartsWith | CompareOp::Contains) && !value.is_string()
                {
                    return Err(RepoError::InvalidData(format!(
                        "`{}` on `{field}` needs a string operand",
                        op.as_str()
                    )));
                }
                Ok(())
            }
            Self::In { field, values } => {
                validate_field(field)?;
                if values.iter().any(|value| !is_scalar(value)) {
                    return Err(RepoError::InvalidData(format!(
                        "`in` operands of `{field}` must be scalars"
                    )));
                }
                Ok(())
            }
            Self::IsNull(field) => validate_field(field),
            Self::And(items) | Self::Or(items) => items.iter().try_for_each(Predicate::validate),
            Self::Not(inner) => inner.validate(),
        }
    }

    /// Evaluates the predicate against a JSON entity body.
    pub fn evaluate(&self, body: &Value) -> bool {
        match self {
            Self::Const(value) => *value,
            Self::Compare { field, op, value } => {
                compare_field(lookup_path(body, field), *op, value)
            }
            Self::In { field, values } => {
                let actual = lookup_path(body, field);
                values
                    .iter()
                    .any(|value| compare_field(actual, CompareOp::Eq, value))
            }
            Self::IsNull(field) => lookup_path(body, field).map_or(true, Value::is_null),
            Self::And(items) => items.iter().all(|item| item.evaluate(body)),
            Self::Or(items) => items.iter().any(|item| item.evaluate(body)),
            Self::Not(inner) => !inner.evaluate(body),
        }
    }
}

fn validate_field(field: &str) -> RepoResult<()> {
    if FIELD_PATH_RE.is_match(field) {
        Ok(())
    } else {
        Err(RepoError::InvalidData(format!("invalid field path `{field}`")))
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Resolves a dotted path inside a JSON body.
pub fn lookup_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(body, |current, segment| current.as_object()?.get(segment))
}

fn compare_field(actual: Option<&Value>, op: CompareOp, operand: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    if operand.is_null() {
        return match op {
            CompareOp::Eq => actual.is_null(),
            CompareOp::Ne => !actual.is_null(),
            _ => false,
        };
    }
    if actual.is_null() {
        return false;
    }
    match op {
        CompareOp::StartsWith => match (actual.as_str(), operand.as_str()) {
            (Some(actual), Some(prefix)) => actual.starts_with(prefix),
            _ => false,
        },
        CompareOp::Contains => match (actual.as_str(), operand.as_str()) {
            (Some(actual), Some(needle)) => actual.contains(needle),
            _ => false,
        },
        _ => match scalar_cmp(actual, operand) {
            Some(ordering) => match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::StartsWith | CompareOp::Contains => false,
            },
            None => false,
        },
    }
}

/// Orders two scalars of the same kind. Different kinds are incomparable.
pub(crate) fn scalar_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        (Value::Number(left), Value::Number(right)) => {
            if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
                return Some(left.cmp(&right));
            }
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{lookup_path, Predicate};
    use serde_json::json;

    #[test]
    fn missing_fields_only_match_null_checks() {
        let body = json!({ "name": "ana" });

        assert!(!Predicate::eq("age", 3).evaluate(&body));
        assert!(!Predicate::ne("age", 3).evaluate(&body));
        assert!(Predicate::ne("age", 3).negate().evaluate(&body));
        assert!(Predicate::eq("age", serde_json::Value::Null).evaluate(&body));
        assert!(Predicate::is_null("age").evaluate(&body));
    }

    #[test]
    fn different_scalar_kinds_never_compare() {
        let body = json!({ "code": "10" });
        assert!(!Predicate::eq("code", 10).evaluate(&body));
        assert!(!Predicate::ne("code", 10).evaluate(&body));
        assert!(!Predicate::gt("code", 1).evaluate(&body));
    }

    #[test]
    fn numbers_compare_across_integer_and_float() {
        let body = json!({ "total": 10 });
        assert!(Predicate::gt("total", 9.5).evaluate(&body));
        assert!(Predicate::le("total", 10.0).evaluate(&body));
    }

    #[test]
    fn dotted_paths_walk_nested_objects() {
        let body = json!({ "customer": { "address": { "city": "Lisbon" } } });
        assert_eq!(
            lookup_path(&body, "customer.address.city"),
            Some(&json!("Lisbon"))
        );
        assert!(Predicate::starts_with("customer.address.city", "Lis").evaluate(&body));
        assert!(Predicate::contains("customer.address.city", "sbo").evaluate(&body));
    }

    #[test]
    fn validate_rejects_bad_paths_and_operands() {
        assert!(Predicate::eq("a..b", 1).validate().is_err());
        assert!(Predicate::eq("1abc", 1).validate().is_err());
        assert!(Predicate::eq("tags", json!(["a"])).validate().is_err());
        assert!(Predicate::starts_with("name", "a")
            .and(Predicate::is_in("status", ["open", "held"]))
            .validate()
            .is_ok());
    }

    #[test]
    fn empty_or_matches_nothing_and_empty_and_matches_everything() {
        let body = json!({});
        assert!(!Predicate::Or(Vec::new()).evaluate(&body));
        assert!(Predicate::And(Vec::new()).evaluate(&body));
    }
}
