//! Ordering hints and the shared in-memory order/paginate pipeline.

use super::predicate::{lookup_path, scalar_cmp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ordering term over a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Sort rank of a value kind: null (or missing) < bool < number < string <
/// array/object.
pub(crate) fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
    }
}

/// Compares two bodies under `order`, falling back to the storage key
/// ascending for ties.
pub(crate) fn compare_bodies(
    order: &[OrderBy],
    (left_key, left): (&str, &Value),
    (right_key, right): (&str, &Value),
) -> Ordering {
    for term in order {
        let left_value = lookup_path(left, &term.field);
        let right_value = lookup_path(right, &term.field);
        let ordering = kind_rank(left_value)
            .cmp(&kind_rank(right_value))
            .then_with(|| match (left_value, right_value) {
                (Some(left), Some(right)) => scalar_cmp(left, right).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        let ordering = match term.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left_key.cmp(right_key)
}

/// Sorts items by `order` and slices `offset..offset + limit`. A `limit` of
/// zero is unbounded.
pub(crate) fn order_and_paginate<X>(
    mut items: Vec<X>,
    order: &[OrderBy],
    offset: u64,
    limit: u64,
    key_and_body: impl Fn(&X) -> (&str, &Value),
) -> Vec<X> {
    items.sort_by(|left, right| compare_bodies(order, key_and_body(left), key_and_body(right)));
    paginate(items, offset, limit)
}

pub(crate) fn paginate<X>(items: Vec<X>, offset: u64, limit: u64) -> Vec<X> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let limited = items.into_iter().skip(offset);
    if limit == 0 {
        limited.collect()
    } else {
        limited
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{order_and_paginate, OrderBy};
    use serde_json::{json, Value};

    fn rows() -> Vec<(String, Value)> {
        vec![
            ("3".to_string(), json!({ "total": 5, "name": "c" })),
            ("1".to_string(), json!({ "total": 9, "name": "a" })),
            ("2".to_string(), json!({ "total": 5, "name": "b" })),
            ("4".to_string(), json!({ "name": "d" })),
        ]
    }

    fn keys(rows: &[(String, Value)]) -> Vec<&str> {
        rows.iter().map(|(key, _)| key.as_str()).collect()
    }

    #[test]
    fn ties_break_by_key_and_missing_sorts_first() {
        let sorted = order_and_paginate(rows(), &[OrderBy::asc("total")], 0, 0, |(k, v)| {
            (k.as_str(), v)
        });
        assert_eq!(keys(&sorted), vec!["4", "2", "3", "1"]);
    }

    #[test]
    fn descending_keeps_key_tiebreak_ascending() {
        let sorted = order_and_paginate(rows(), &[OrderBy::desc("total")], 0, 0, |(k, v)| {
            (k.as_str(), v)
        });
        assert_eq!(keys(&sorted), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn offset_then_limit_after_ordering() {
        let page = order_and_paginate(rows(), &[OrderBy::asc("name")], 1, 2, |(k, v)| {
            (k.as_str(), v)
        });
        assert_eq!(keys(&page), vec!["2", "3"]);
    }
}
