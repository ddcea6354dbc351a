//! Migration engine tests against on-disk databases.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use common::{write_migration, TestHarness};
use escolar_common::Error;
use escolar_db::migrations::MigrationRegistry;
use escolar_db::{ConnectionManager, DatabaseConfig, ExpectedTable, SchemaManager, SqlParams};

#[test]
fn test_fresh_database_single_migration() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("migrations");
    write_migration(&dir, "001_init.sql", "CREATE TABLE t (id INTEGER PRIMARY KEY);");

    let schema = harness.app.schema();
    let report = schema.run_pending_migrations(&dir).unwrap();

    assert_eq!(report.applied, vec!["001_init"]);
    assert!(schema.table_exists("t").unwrap());
    let records = schema.applied_migrations().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].migration, "001_init");
    assert_eq!(records[0].batch, 1);
}

#[test]
fn test_rerun_does_not_reapply() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("migrations");
    // not idempotent on purpose: a second execution would fail
    write_migration(&dir, "001_init.sql", "CREATE TABLE t (id INTEGER PRIMARY KEY);");

    let schema = harness.app.schema();
    schema.run_pending_migrations(&dir).unwrap();
    let second = schema.run_pending_migrations(&dir).unwrap();

    assert!(second.applied.is_empty());
    assert_eq!(schema.applied_migrations().unwrap().len(), 1);
}

#[test]
fn test_failure_leaves_no_partial_state() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("migrations");
    write_migration(
        &dir,
        "001_half.sql",
        "CREATE TABLE half (id INTEGER);
         INSERT INTO half VALUES (1);
         THIS IS NOT SQL;",
    );

    let schema = harness.app.schema();
    let err = schema.run_pending_migrations(&dir).unwrap_err();
    assert!(matches!(err, Error::Migration { ref name, .. } if name == "001_half"));
    assert!(err.to_string().starts_with("Migration 001_half failed"));

    assert!(!schema.table_exists("half").unwrap());
    assert!(schema.applied_migrations().unwrap().is_empty());
    assert!(!harness.app.db().in_transaction());
}

#[test]
fn test_numeric_prefixes_sort_lexically() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("migrations");
    write_migration(&dir, "010_c.sql", "INSERT INTO seen (name) VALUES ('010_c');");
    write_migration(&dir, "001_a.sql", "CREATE TABLE seen (seq INTEGER PRIMARY KEY, name TEXT);");
    write_migration(&dir, "002_b.sql", "INSERT INTO seen (name) VALUES ('002_b');");

    let report = harness.app.schema().run_pending_migrations(&dir).unwrap();
    assert_eq!(report.applied, vec!["001_a", "002_b", "010_c"]);

    let seen: Vec<String> = harness
        .app
        .db()
        .select_map("SELECT name FROM seen ORDER BY seq", &SqlParams::None, |row| row.get(0))
        .unwrap();
    assert_eq!(seen, vec!["002_b", "010_c"]);
}

#[test]
fn test_second_process_sees_applied_migrations() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("migrations");
    write_migration(&dir, "001_init.sql", "CREATE TABLE t (id INTEGER PRIMARY KEY);");

    harness.app.schema().run_pending_migrations(&dir).unwrap();

    let other = harness.other_process();
    let report = other.run_pending_migrations(&dir).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped, vec!["001_init"]);
}

#[test]
fn test_concurrent_runners_apply_each_migration_once() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("migrations");
    for i in 1..=5 {
        write_migration(
            &dir,
            &format!("{i:03}_table_{i}.sql"),
            &format!("CREATE TABLE table_{i} (id INTEGER PRIMARY KEY);"),
        );
    }

    let db_path = common::path_str(&harness.db_path());
    // the bookkeeping table must exist before the race so both runners
    // contend on the same rows
    harness.app.schema().ensure_migrations_table().unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let db_path = db_path.clone();
            let dir = dir.clone();
            thread::spawn(move || {
                let db = Arc::new(ConnectionManager::new(DatabaseConfig::sqlite(db_path)));
                SchemaManager::new(db).run_pending_migrations(&dir)
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let report = handle.join().unwrap().unwrap();
        applied += report.applied.len();
    }
    assert_eq!(applied, 5);
    assert_eq!(harness.app.schema().applied_migrations().unwrap().len(), 5);
}

#[test]
fn test_ghost_column_is_reported() {
    let harness = TestHarness::bootstrapped();

    let mut expected = BTreeMap::new();
    expected.insert(
        "users".to_string(),
        ExpectedTable::with_columns(["id", "email", "ghost_column"]),
    );
    let issues = harness
        .app
        .schema()
        .verify_schema_integrity(&expected)
        .unwrap();
    assert_eq!(issues, vec!["Columna faltante en users: ghost_column"]);
}

#[test]
fn test_builtin_and_directory_registries_combine() {
    let harness = TestHarness::new();
    let dir = harness.migrations_dir("extra");
    write_migration(&dir, "005_add_course_hours.sql", "ALTER TABLE courses ADD COLUMN hours INTEGER;");

    let mut registry = MigrationRegistry::builtin();
    registry.register_dir(&dir).unwrap();
    let report = harness.app.schema().run_migrations(&registry).unwrap();
    assert_eq!(report.applied.len(), 5);
    assert_eq!(report.applied.last().map(String::as_str), Some("005_add_course_hours"));

    // a directory file reusing a built-in name is rejected
    write_migration(&dir, "001_create_users.sql", "SELECT 1;");
    let mut registry = MigrationRegistry::builtin();
    assert!(matches!(registry.register_dir(&dir), Err(Error::InvalidInput(_))));
}
