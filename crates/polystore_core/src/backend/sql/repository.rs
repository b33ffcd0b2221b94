//! Repository over the SQLite entity store.

use super::session::{json_to_sql, SqlCommand, SqlOutput, SqlRow, SqliteSessionFactory};
use super::translate::{json_path, translate_order, translate_predicate};
use crate::context::DataContext;
use crate::error::{FailureDetail, PartialFailure, RepoError, RepoResult};
use crate::model::entity::{decode_entity, encode_entity, require_key, Entity, EntityKey};
use crate::repository::{
    order_by_ids, BulkOperations, FieldPatch, MetadataProvider, Page, ParamList, Repository,
};
use crate::spec::{Predicate, Specification};
use log::{debug, warn};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

const BACKEND: &str = "sql";

const NEXT_KEY_SQL: &str = "INSERT INTO key_sequences (collection, next_value) VALUES (?1, 2)
ON CONFLICT(collection) DO UPDATE SET next_value = next_value + 1
RETURNING next_value - 1 AS generated";

const NOW_MS_SQL: &str = "CAST(strftime('%s', 'now') AS INTEGER) * 1000";

/// Outcome of a single-row insert.
enum Inserted<T> {
    Written(T),
    Duplicate(String),
}

/// SQLite-backed repository. Writes join the scope's transaction and become
/// durable on `save_changes`.
pub struct SqlRepository {
    context: DataContext<SqliteSessionFactory>,
}

impl SqlRepository {
    pub fn new(context: DataContext<SqliteSessionFactory>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &DataContext<SqliteSessionFactory> {
        &self.context
    }

    fn run(&self, command: SqlCommand) -> RepoResult<SqlOutput> {
        self.context.session()?.execute(command)
    }

    fn query_bodies<T: Entity>(&self, command: SqlCommand) -> RepoResult<Vec<T>> {
        self.run(command)?
            .into_rows()
            .into_iter()
            .map(|row| decode_entity(body_of(row)?))
            .collect()
    }

    fn next_key(&self, collection: &str) -> RepoResult<EntityKey> {
        let rows = self
            .run(SqlCommand::new(
                NEXT_KEY_SQL,
                vec![SqlValue::Text(collection.to_string())],
            ))?
            .into_rows();
        rows.first()
            .and_then(|row| row.get("generated"))
            .and_then(Value::as_i64)
            .map(EntityKey::from)
            .ok_or_else(|| RepoError::InvalidData(format!("no key generated for {collection}")))
    }

    fn insert_one<T: Entity>(&self, mut entity: T) -> RepoResult<Inserted<T>> {
        let key = match entity.key() {
            Some(key) => key,
            None => {
                let key = self.next_key(T::COLLECTION)?;
                if !entity.assign_key(&key) {
                    return Err(RepoError::InvalidData(format!(
                        "{} entity cannot hold generated key {key}",
                        T::COLLECTION
                    )));
                }
                key
            }
        };
        let body = encode_entity(&entity)?;
        let result = self.run(SqlCommand::new(
            "INSERT INTO entities (collection, entity_key, body) VALUES (?1, ?2, ?3)",
            vec![
                SqlValue::Text(T::COLLECTION.to_string()),
                SqlValue::Text(key.storage_key()),
                SqlValue::Text(body.to_string()),
            ],
        ));
        match result {
            Ok(_) => Ok(Inserted::Written(entity)),
            Err(err) if err.is_constraint_violation() => Ok(Inserted::Duplicate(key.storage_key())),
            Err(err) => Err(err),
        }
    }

    fn update_one<T: Entity>(&self, entity: &T) -> RepoResult<bool> {
        let key = require_key(entity, "update")?;
        let body = encode_entity(entity)?;
        let affected = self
            .run(SqlCommand::new(
                format!(
                    "UPDATE entities SET body = ?3, updated_at = {NOW_MS_SQL}
                     WHERE collection = ?1 AND entity_key = ?2"
                ),
                vec![
                    SqlValue::Text(T::COLLECTION.to_string()),
                    SqlValue::Text(key.storage_key()),
                    SqlValue::Text(body.to_string()),
                ],
            ))?
            .affected();
        Ok(affected > 0)
    }

    fn filtered(
        &self,
        head: &str,
        collection: &str,
        predicate: &Predicate,
    ) -> RepoResult<(String, Vec<SqlValue>)> {
        let filter = translate_predicate(predicate)?;
        let mut params = vec![SqlValue::Text(collection.to_string())];
        params.extend(filter.params);
        Ok((
            format!("{head} WHERE collection = ? AND {}", filter.clause),
            params,
        ))
    }
}

/// Extracts the JSON body from a row: a `body` text column when present,
/// otherwise the row itself.
fn body_of(mut row: SqlRow) -> RepoResult<Value> {
    match row.remove("body") {
        Some(Value::String(text)) => Ok(serde_json::from_str(&text)?),
        Some(other) => Err(RepoError::InvalidData(format!(
            "body column holds non-text value {other}"
        ))),
        None => Ok(Value::Object(row)),
    }
}

fn in_list(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn key_params(collection: &str, ids: &[EntityKey]) -> Vec<SqlValue> {
    let mut params = vec![SqlValue::Text(collection.to_string())];
    params.extend(ids.iter().map(|id| SqlValue::Text(id.storage_key())));
    params
}

impl Repository for SqlRepository {
    fn get_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let key = id.into();
        let found = self.query_bodies::<T>(SqlCommand::new(
            "SELECT body FROM entities WHERE collection = ?1 AND entity_key = ?2",
            vec![
                SqlValue::Text(T::COLLECTION.to_string()),
                SqlValue::Text(key.storage_key()),
            ],
        ))?;
        Ok(found.into_iter().next())
    }

    fn find_all<T: Entity>(&self, spec: &Specification<T>, page: &Page) -> RepoResult<Vec<T>> {
        let (sql, mut params) =
            self.filtered("SELECT body FROM entities", T::COLLECTION, spec.predicate())?;
        let order = translate_order(page.effective_order(spec));
        params.extend(order.params);
        let limit = if page.limit == 0 {
            -1
        } else {
            i64::try_from(page.limit).unwrap_or(i64::MAX)
        };
        params.push(SqlValue::Integer(limit));
        params.push(SqlValue::Integer(
            i64::try_from(page.offset).unwrap_or(i64::MAX),
        ));
        self.query_bodies(SqlCommand::new(
            format!("{sql} ORDER BY {} LIMIT ? OFFSET ?", order.clause),
            params,
        ))
    }

    fn add<T: Entity>(&self, entity: T) -> RepoResult<Option<T>> {
        match self.insert_one(entity)? {
            Inserted::Written(entity) => {
                debug!(
                    "event=repo_add module=repo status=ok backend={BACKEND} collection={}",
                    T::COLLECTION
                );
                Ok(Some(entity))
            }
            Inserted::Duplicate(key) => {
                debug!(
                    "event=repo_add module=repo status=noop backend={BACKEND} collection={} key={key} reason=duplicate",
                    T::COLLECTION
                );
                Ok(None)
            }
        }
    }

    fn update<T: Entity>(&self, entity: T) -> RepoResult<Option<T>> {
        Ok(self.update_one(&entity)?.then_some(entity))
    }

    fn remove_by_id<T: Entity>(&self, id: impl Into<EntityKey>) -> RepoResult<Option<T>> {
        let key = id.into();
        let removed = self.query_bodies::<T>(SqlCommand::new(
            "DELETE FROM entities WHERE collection = ?1 AND entity_key = ?2 RETURNING body",
            vec![
                SqlValue::Text(T::COLLECTION.to_string()),
                SqlValue::Text(key.storage_key()),
            ],
        ))?;
        Ok(removed.into_iter().next())
    }

    fn count<T: Entity>(&self, spec: Option<&Specification<T>>) -> RepoResult<u64> {
        let always = Predicate::always();
        let predicate = spec.map_or(&always, Specification::predicate);
        let (sql, params) = self.filtered(
            "SELECT COUNT(*) AS total FROM entities",
            T::COLLECTION,
            predicate,
        )?;
        let rows = self.run(SqlCommand::new(sql, params))?.into_rows();
        Ok(rows
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Runs raw SQL with named parameters. Names without a sigil get `:`.
    /// Rows decode from their `body` column, or from the row itself.
    fn execute<T: Entity>(&self, command: &str, params: &ParamList) -> RepoResult<Vec<T>> {
        let named = params
            .iter()
            .map(|(name, value)| {
                let name = if name.starts_with([':', '@', '$']) {
                    name.to_string()
                } else {
                    format!(":{name}")
                };
                (name, json_to_sql(value))
            })
            .collect();
        self.query_bodies(SqlCommand::named(command, named))
    }

    fn attach<T: Entity>(&self, _entity: &T) -> RepoResult<()> {
        Err(RepoError::Unsupported {
            backend: BACKEND,
            operation: "attach",
        })
    }

    fn detach<T: Entity>(&self, _entity: &T) -> RepoResult<()> {
        Err(RepoError::Unsupported {
            backend: BACKEND,
            operation: "detach",
        })
    }

    fn save_changes(&self) -> RepoResult<()> {
        self.context.save_changes()
    }

    fn source(&self) -> String {
        self.context.source()
    }
}

impl BulkOperations for SqlRepository {
    fn get_many<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .run(SqlCommand::new(
                format!(
                    "SELECT entity_key, body FROM entities WHERE collection = ? AND entity_key IN ({})",
                    in_list(ids.len())
                ),
                key_params(T::COLLECTION, ids),
            ))?
            .into_rows();
        let found = rows
            .into_iter()
            .map(|mut row| {
                let key = match row.remove("entity_key") {
                    Some(Value::String(key)) => key,
                    _ => return Err(RepoError::InvalidData("row without entity_key".to_string())),
                };
                Ok((key, decode_entity::<T>(body_of(row)?)?))
            })
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(order_by_ids(ids, found))
    }

    fn insert_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64> {
        let mut outcome = PartialFailure::default();
        for (index, entity) in entities.into_iter().enumerate() {
            let target = entity
                .key()
                .map_or_else(|| format!("#{index}"), |key| key.storage_key());
            match self.insert_one(entity) {
                Ok(Inserted::Written(_)) => outcome.succeeded += 1,
                Ok(Inserted::Duplicate(key)) => outcome.failures.push(FailureDetail::new(
                    key.clone(),
                    RepoError::Conflict {
                        collection: T::COLLECTION.to_string(),
                        key,
                    },
                )),
                Err(err) => outcome.failures.push(FailureDetail::new(target, err)),
            }
        }
        finish_bulk("insert_many", T::COLLECTION, outcome)
    }

    fn update_many<T: Entity>(&self, entities: Vec<T>) -> RepoResult<u64> {
        let mut outcome = PartialFailure::default();
        for (index, entity) in entities.iter().enumerate() {
            match self.update_one(entity) {
                Ok(true) => outcome.succeeded += 1,
                Ok(false) => {}
                Err(err) => {
                    let target = entity
                        .key()
                        .map_or_else(|| format!("#{index}"), |key| key.storage_key());
                    outcome.failures.push(FailureDetail::new(target, err));
                }
            }
        }
        finish_bulk("update_many", T::COLLECTION, outcome)
    }

    fn delete_by_ids<T: Entity>(&self, ids: &[EntityKey]) -> RepoResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let affected = self
            .run(SqlCommand::new(
                format!(
                    "DELETE FROM entities WHERE collection = ? AND entity_key IN ({})",
                    in_list(ids.len())
                ),
                key_params(T::COLLECTION, ids),
            ))?
            .affected();
        Ok(affected as u64)
    }

    fn delete_where<T: Entity>(&self, spec: &Specification<T>) -> RepoResult<u64> {
        let (sql, params) =
            self.filtered("DELETE FROM entities", T::COLLECTION, spec.predicate())?;
        Ok(self.run(SqlCommand::new(sql, params))?.affected() as u64)
    }

    /// Applies `patch` with `json_set`. Key fields cannot be patched.
    fn update_where<T: Entity>(
        &self,
        spec: &Specification<T>,
        patch: &FieldPatch,
    ) -> RepoResult<u64> {
        if patch.is_empty() {
            return Ok(0);
        }
        let mut assignments = Vec::with_capacity(patch.assignments().len());
        let mut params = Vec::new();
        for (field, value) in patch.assignments() {
            Predicate::is_null(field.as_str()).validate()?;
            if T::key_fields().contains(&field.as_str()) {
                return Err(RepoError::InvalidData(format!(
                    "key field `{field}` of {} cannot be patched",
                    T::COLLECTION
                )));
            }
            assignments.push("?, json(?)");
            params.push(SqlValue::Text(json_path(field)));
            params.push(SqlValue::Text(value.to_string()));
        }

        let filter = translate_predicate(spec.predicate())?;
        params.push(SqlValue::Text(T::COLLECTION.to_string()));
        params.extend(filter.params);
        let sql = format!(
            "UPDATE entities SET body = json_set(body, {}), updated_at = {NOW_MS_SQL}
             WHERE collection = ? AND {}",
            assignments.join(", "),
            filter.clause
        );
        Ok(self.run(SqlCommand::new(sql, params))?.affected() as u64)
    }
}

impl MetadataProvider for SqlRepository {}

fn finish_bulk(operation: &str, collection: &str, outcome: PartialFailure) -> RepoResult<u64> {
    if outcome.failures.is_empty() {
        debug!(
            "event=repo_bulk module=repo status=ok backend={BACKEND} op={operation} collection={collection} affected={}",
            outcome.succeeded
        );
        return Ok(outcome.succeeded);
    }
    warn!(
        "event=repo_bulk module=repo status=error backend={BACKEND} op={operation} collection={collection} succeeded={} failed={}",
        outcome.succeeded,
        outcome.failures.len()
    );
    Err(RepoError::PartialFailure(outcome))
}
