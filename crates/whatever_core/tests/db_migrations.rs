use whatever_core::db::migrations::latest_version;
use whatever_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "events");
    assert_index_exists(&conn, "idx_events_aggregate");
    assert_trigger_exists(&conn, "events_no_update");
    assert_trigger_exists(&conn, "events_no_delete");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("whatever.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "events");
}

#[test]
fn events_survive_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("whatever.db");

    let conn = open_db(&path).unwrap();
    conn.execute(
        "INSERT INTO events (created_at, aggregate_type, aggregate_id, event_type, event_data)
         VALUES ('2024-05-01T17:00:00.000000Z', 'realm', 'r1', 'RealmCreated', '{\"name\":\"home\"}');",
        [],
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM events;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn migrated_events_table_is_append_only() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO events (created_at, aggregate_type, aggregate_id, event_type, event_data)
         VALUES ('2024-05-01T17:00:00.000000Z', 'realm', 'r1', 'RealmCreated', '{\"name\":\"home\"}');",
        [],
    )
    .unwrap();

    let err = conn.execute("DELETE FROM events;", []).unwrap_err();
    assert!(err.to_string().contains("append-only"), "{err}");
    assert!(conn
        .execute("UPDATE events SET event_type = 'RealmRenamed';", [])
        .is_err());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM events;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
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

fn assert_index_exists(conn: &Connection, index_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1);",
            [index_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "index {index_name} does not exist");
}

fn assert_trigger_exists(conn: &Connection, trigger_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'trigger' AND name = ?1);",
            [trigger_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "trigger {trigger_name} does not exist");
}
