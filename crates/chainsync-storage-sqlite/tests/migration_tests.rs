//! Migration tests
//!
//! Tests database schema migrations against fresh and reopened files.

use chainsync_core::{BitcoinLikeTransaction, BlockHeader, BlockStore, Checkpoint, CheckpointStore, FilledBlock};
use chainsync_storage_sqlite::{migrations, Database, SqliteTierStore};
use rusqlite::Connection;
use tempfile::NamedTempFile;

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
    .unwrap()
}

fn verify_schema(conn: &Connection) {
    for table in ["schema_version", "stable_blocks", "unstable_blocks", "sync_state"] {
        assert!(table_exists(conn, table), "missing table {}", table);
    }
}

#[test]
fn test_fresh_migration() {
    let file = NamedTempFile::new().unwrap();
    let conn = Connection::open(file.path()).unwrap();

    migrations::run_migrations(&conn).unwrap();

    verify_schema(&conn);
    assert_eq!(
        migrations::get_schema_version(&conn).unwrap(),
        migrations::SCHEMA_VERSION
    );
}

#[test]
fn test_migration_idempotency() {
    let file = NamedTempFile::new().unwrap();
    let conn = Connection::open(file.path()).unwrap();

    migrations::run_migrations(&conn).unwrap();
    migrations::run_migrations(&conn).unwrap();

    verify_schema(&conn);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn test_upgrade_from_v1() {
    let file = NamedTempFile::new().unwrap();
    let conn = Connection::open(file.path()).unwrap();

    // Database written before the checkpoint table existed
    conn.execute_batch(
        r#"
        CREATE TABLE schema_version (version INTEGER PRIMARY KEY);
        INSERT INTO schema_version (version) VALUES (1);
        CREATE TABLE stable_blocks (
            height INTEGER PRIMARY KEY, hash TEXT NOT NULL,
            timestamp INTEGER NOT NULL, transactions TEXT NOT NULL
        );
        CREATE TABLE unstable_blocks (
            height INTEGER PRIMARY KEY, hash TEXT NOT NULL,
            timestamp INTEGER NOT NULL, transactions TEXT NOT NULL
        );
        INSERT INTO stable_blocks VALUES (1, 'block 1', 0, '[]');
        "#,
    )
    .unwrap();

    migrations::run_migrations(&conn).unwrap();
    verify_schema(&conn);

    let kept: i64 = conn
        .query_row("SELECT COUNT(*) FROM stable_blocks", [], |row| row.get(0))
        .unwrap();
    assert_eq!(kept, 1);
}

#[test]
fn test_newer_schema_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE schema_version (version INTEGER PRIMARY KEY);
         INSERT INTO schema_version (version) VALUES (99);",
    )
    .unwrap();

    assert!(matches!(
        migrations::run_migrations(&conn),
        Err(chainsync_storage_sqlite::Error::Migration(_))
    ));
}

#[test]
fn test_data_survives_reopen() {
    let file = NamedTempFile::new().unwrap();
    let header = BlockHeader::new(1, "block 1", 1_600_000_000);
    let tx = BitcoinLikeTransaction::new("tx1")
        .in_block(header.clone())
        .with_input("X", 0)
        .with_output("0", 10_000);

    {
        let store = SqliteTierStore::<BitcoinLikeTransaction>::open(file.path()).unwrap();
        store
            .stable
            .add_block(&FilledBlock::new(header.clone(), vec![tx.clone()]))
            .unwrap();
        store.checkpoint.save(&Checkpoint::from_header(&header)).unwrap();
    }

    let store = SqliteTierStore::<BitcoinLikeTransaction>::open(file.path()).unwrap();
    let blocks = store.stable.get_all_blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].transactions, vec![tx]);
    assert_eq!(store.checkpoint.load().unwrap().unwrap().stable_height, 1);

    let db = Database::open(file.path()).unwrap();
    verify_schema(&db.conn());
}
