//! Predicate to SQL translation over JSON entity bodies.
//!
//! Every leaf renders to an expression that is exactly 0 or 1, never NULL,
//! so `NOT` keeps two-valued semantics. Each comparison is guarded by
//! `json_type` so values of a different kind never compare.

use super::session::json_to_sql;
use crate::error::RepoResult;
use crate::spec::{CompareOp, OrderBy, Predicate, SortDirection};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// A rendered `WHERE` fragment and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

/// A rendered `ORDER BY` list (without the keyword) and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlOrder {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

pub fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// Translates a validated predicate into a `WHERE` fragment.
pub fn translate_predicate(predicate: &Predicate) -> RepoResult<SqlFilter> {
    predicate.validate()?;
    let mut params = Vec::new();
    let clause = render(predicate, &mut params);
    Ok(SqlFilter { clause, params })
}

/// Renders ordering terms followed by the `entity_key` tiebreak.
pub fn translate_order(order: &[OrderBy]) -> SqlOrder {
    let mut clause = String::new();
    let mut params = Vec::new();
    for term in order {
        let direction = match term.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let path = json_path(&term.field);
        clause.push_str(&format!(
            "CASE COALESCE(json_type(body, ?), 'null') \
             WHEN 'null' THEN 0 WHEN 'true' THEN 1 WHEN 'false' THEN 1 \
             WHEN 'integer' THEN 2 WHEN 'real' THEN 2 WHEN 'text' THEN 3 ELSE 4 END {direction}, \
             CASE WHEN json_type(body, ?) IN ('array', 'object') THEN NULL \
             ELSE json_extract(body, ?) END {direction}, "
        ));
        for _ in 0..3 {
            params.push(SqlValue::Text(path.clone()));
        }
    }
    clause.push_str("entity_key ASC");
    SqlOrder { clause, params }
}

fn render(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    match predicate {
        Predicate::Const(true) => "1".to_string(),
        Predicate::Const(false) => "0".to_string(),
        Predicate::Compare { field, op, value } => render_compare(field, *op, value, params),
        Predicate::In { field, values } => {
            if values.is_empty() {
                return "0".to_string();
            }
            let parts = values
                .iter()
                .map(|value| render_compare(field, CompareOp::Eq, value, params))
                .collect::<Vec<_>>();
            format!("({})", parts.join(" OR "))
        }
        Predicate::IsNull(field) => render_is_null(field, params, true),
        Predicate::And(items) => join(items, " AND ", "1", params),
        Predicate::Or(items) => join(items, " OR ", "0", params),
        Predicate::Not(inner) => format!("(NOT {})", render(inner, params)),
    }
}

fn join(items: &[Predicate], separator: &str, empty: &str, params: &mut Vec<SqlValue>) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let parts = items
        .iter()
        .map(|item| render(item, params))
        .collect::<Vec<_>>();
    format!("({})", parts.join(separator))
}

fn render_is_null(field: &str, params: &mut Vec<SqlValue>, is_null: bool) -> String {
    params.push(SqlValue::Text(json_path(field)));
    let op = if is_null { "=" } else { "<>" };
    format!("(COALESCE(json_type(body, ?), 'null') {op} 'null')")
}

fn render_compare(field: &str, op: CompareOp, value: &Value, params: &mut Vec<SqlValue>) -> String {
    if value.is_null() {
        return match op {
            CompareOp::Eq => render_is_null(field, params, true),
            CompareOp::Ne => render_is_null(field, params, false),
            _ => "0".to_string(),
        };
    }

    let guard = match value {
        Value::Bool(_) => "IN ('true', 'false')",
        Value::Number(_) => "IN ('integer', 'real')",
        _ => "= 'text'",
    };
    let path = json_path(field);
    params.push(SqlValue::Text(path.clone()));
    params.push(SqlValue::Text(path));
    let operand = json_to_sql(value);

    let comparison = match op {
        CompareOp::StartsWith => {
            params.push(operand.clone());
            params.push(operand);
            "substr(json_extract(body, ?), 1, length(?)) = ?"
        }
        CompareOp::Contains => {
            params.push(operand);
            "instr(json_extract(body, ?), ?) > 0"
        }
        _ => {
            params.push(operand);
            match op {
                CompareOp::Eq => "json_extract(body, ?) = ?",
                CompareOp::Ne => "json_extract(body, ?) <> ?",
                CompareOp::Lt => "json_extract(body, ?) < ?",
                CompareOp::Le => "json_extract(body, ?) <= ?",
                CompareOp::Gt => "json_extract(body, ?) > ?",
                _ => "json_extract(body, ?) >= ?",
            }
        }
    };
    format!("COALESCE(json_type(body, ?) {guard} AND {comparison}, 0)")
}
