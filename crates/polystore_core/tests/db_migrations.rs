use polystore_core::db::migrations::latest_version;
use polystore_core::db::{open_db, open_db_in_memory, DbError, DbLocation};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "entities");
    assert_table_exists(&conn, "key_sequences");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let location = DbLocation::File(dir.path().join("polystore.db"));

    let conn_first = open_db(&location).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    conn_first
        .execute(
            "INSERT INTO entities (collection, entity_key, body) VALUES ('orders', '1', '{}')",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&location).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let rows: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn entity_bodies_must_be_valid_json_and_unique_per_collection() {
    let conn = open_db_in_memory().unwrap();
    let insert = "INSERT INTO entities (collection, entity_key, body) VALUES (?1, ?2, ?3)";

    conn.execute(insert, ["orders", "1", "{\"id\":1}"]).unwrap();
    conn.execute(insert, ["customers", "1", "{\"id\":1}"]).unwrap();
    assert!(conn.execute(insert, ["orders", "2", "not json"]).is_err());

    let duplicate = DbError::from(conn.execute(insert, ["orders", "1", "{}"]).unwrap_err());
    assert!(duplicate.is_constraint_violation());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&DbLocation::File(path)).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
