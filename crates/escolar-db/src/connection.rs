//! Role-routed SQLite connections.
//!
//! [`ConnectionManager`] owns one lazily opened connection per
//! [`ConnectionRole`]. Callers state their intent (read or write) and the
//! manager picks the handle, so splitting into a primary and a replica only
//! needs a config change.
//!
//! Transactions live on the `write` role only. Reads that must observe
//! uncommitted writes of an open transaction have to use the `write` role
//! explicitly through [`ConnectionManager::query`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use escolar_common::{ConnectionRole, Error, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::config::{is_pragma_token, ConnectionConfig, DatabaseConfig};
use crate::params::{Row, SqlParams};

/// Lifecycle of one role's connection.
enum Slot {
    NotCreated,
    Open {
        conn: Connection,
        /// Role whose config entry built this handle.
        origin: ConnectionRole,
    },
    Closed,
}

/// Which roles currently hold an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub main: bool,
    pub read: bool,
    pub write: bool,
    pub pool_size: u32,
}

/// Lazily creates and routes database connections by role.
pub struct ConnectionManager {
    config: DatabaseConfig,
    slots: [Mutex<Slot>; 3],
    /// Distinguishes this manager's `:memory:` databases from other managers'.
    memory_id: u64,
}

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionManager {
    /// Create a manager. No connection is opened until first use.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            slots: [
                Mutex::new(Slot::NotCreated),
                Mutex::new(Slot::NotCreated),
                Mutex::new(Slot::NotCreated),
            ],
            memory_id: NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Manager where every role opens the database file at `path`.
    pub fn sqlite<S: Into<String>>(path: S) -> Self {
        Self::new(DatabaseConfig::sqlite(path))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The path handed to SQLite for the entry of `origin`.
    ///
    /// A plain `:memory:` would give every handle its own private database,
    /// so it becomes a named shared-cache database. Roles opened from the
    /// same entry then see the same data.
    fn open_path(&self, origin: ConnectionRole, config: &ConnectionConfig) -> String {
        if config.path == ":memory:" {
            format!(
                "file:escolar-memory-{}-{}?mode=memory&cache=shared",
                self.memory_id, origin
            )
        } else {
            config.path.clone()
        }
    }

    fn slot(&self, role: ConnectionRole) -> &Mutex<Slot> {
        match role {
            ConnectionRole::Default => &self.slots[0],
            ConnectionRole::Read => &self.slots[1],
            ConnectionRole::Write => &self.slots[2],
        }
    }

    /// Run `f` with the connection for `role`, opening it on first use.
    ///
    /// Calls for the same role are serialized; `f` must not call back into
    /// the manager for that role.
    pub fn with_connection<T, F>(&self, role: ConnectionRole, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut slot = self.slot(role).lock();
        if matches!(*slot, Slot::NotCreated) {
            let (origin, config) = self.config.connections.for_role(role);
            let path = self.open_path(origin, config);
            let conn = open_connection(role, config, &path)?;
            tracing::debug!(
                role = %role,
                origin = %origin,
                path = %config.path,
                "Opened database connection"
            );
            *slot = Slot::Open { conn, origin };
        }

        match &*slot {
            Slot::Open { conn, .. } => f(conn),
            Slot::Closed => Err(Error::connection(role, "connection has been closed")),
            Slot::NotCreated => Err(Error::internal("connection slot left uninitialized")),
        }
    }

    /// Open the connection for `role` now instead of on first query.
    pub fn connect(&self, role: ConnectionRole) -> Result<()> {
        self.with_connection(role, |_| Ok(()))
    }

    /// Prepare and run `sql` on `role`, returning every result row.
    ///
    /// Statements without a result set return an empty list.
    pub fn query(&self, sql: &str, params: &SqlParams, role: ConnectionRole) -> Result<Vec<Row>> {
        self.with_connection(role, |conn| {
            run_query(conn, sql, params).map_err(|e| query_error(role, sql, params, e))
        })
    }

    /// Rows from the `read` connection.
    pub fn select(&self, sql: &str, params: &SqlParams) -> Result<Vec<Row>> {
        self.query(sql, params, ConnectionRole::Read)
    }

    /// Rows from the `read` connection, mapped straight off the driver row.
    pub fn select_map<T, F>(&self, sql: &str, params: &SqlParams, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let role = ConnectionRole::Read;
        self.with_connection(role, |conn| {
            let mut run = || -> rusqlite::Result<Vec<T>> {
                let mut stmt = conn.prepare(sql)?;
                params.bind_to(&mut stmt)?;
                let mut rows = stmt.raw_query();
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(f(row)?);
                }
                Ok(out)
            };
            run().map_err(|e| query_error(role, sql, params, e))
        })
    }

    /// First row from the `read` connection, or `None`.
    pub fn fetch(&self, sql: &str, params: &SqlParams) -> Result<Option<Row>> {
        Ok(self.select(sql, params)?.into_iter().next())
    }

    /// Run a write statement on the `write` connection; returns affected rows.
    pub fn execute(&self, sql: &str, params: &SqlParams) -> Result<usize> {
        let role = ConnectionRole::Write;
        self.with_connection(role, |conn| {
            let run = || -> rusqlite::Result<usize> {
                let mut stmt = conn.prepare(sql)?;
                params.bind_to(&mut stmt)?;
                stmt.raw_execute()
            };
            run().map_err(|e| query_error(role, sql, params, e))
        })
    }

    /// Run an INSERT on `write` and return the last inserted rowid as text.
    ///
    /// The rowid is read back from the same connection, so it belongs to
    /// this insert even when other roles write concurrently.
    pub fn insert(&self, sql: &str, params: &SqlParams) -> Result<String> {
        let role = ConnectionRole::Write;
        self.with_connection(role, |conn| {
            let run = || -> rusqlite::Result<i64> {
                let mut stmt = conn.prepare(sql)?;
                params.bind_to(&mut stmt)?;
                stmt.raw_execute()?;
                Ok(conn.last_insert_rowid())
            };
            run()
                .map(|id| id.to_string())
                .map_err(|e| query_error(role, sql, params, e))
        })
    }

    /// Run a multi-statement script on `write`. No parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let role = ConnectionRole::Write;
        self.with_connection(role, |conn| {
            conn.execute_batch(sql)
                .map_err(|e| query_error(role, sql, &SqlParams::None, e))
        })
    }

    /// Start a transaction on the `write` connection.
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock up front, so two
    /// processes cannot both be inside a write transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        self.with_connection(ConnectionRole::Write, |conn| {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| Error::transaction("begin", e.to_string()))
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.with_connection(ConnectionRole::Write, |conn| {
            conn.execute_batch("COMMIT")
                .map_err(|e| Error::transaction("commit", e.to_string()))
        })
    }

    /// Roll back the open transaction. Returns `false` when none was open.
    pub fn rollback(&self) -> Result<bool> {
        self.with_connection(ConnectionRole::Write, |conn| {
            if conn.is_autocommit() {
                return Ok(false);
            }
            conn.execute_batch("ROLLBACK")
                .map(|_| true)
                .map_err(|e| Error::transaction("rollback", e.to_string()))
        })
    }

    /// Whether the `write` connection is inside a transaction.
    ///
    /// Does not open the connection.
    pub fn in_transaction(&self) -> bool {
        match &*self.slot(ConnectionRole::Write).lock() {
            Slot::Open { conn, .. } => !conn.is_autocommit(),
            _ => false,
        }
    }

    /// Run `f` inside a write transaction, committing on success and
    /// rolling back on error.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                if let Err(e) = self.commit() {
                    let _ = self.rollback();
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!("Rollback after failed transaction also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Close every open connection. Closed roles cannot be reopened.
    pub fn close_connections(&self) {
        for role in ConnectionRole::ALL {
            let mut slot = self.slot(role).lock();
            let previous = std::mem::replace(&mut *slot, Slot::Closed);
            if let Slot::Open { conn, .. } = previous {
                if let Err((_, e)) = conn.close() {
                    tracing::warn!(role = %role, "Error closing connection: {}", e);
                } else {
                    tracing::debug!(role = %role, "Closed database connection");
                }
            }
        }
    }

    /// Which roles have been opened, plus the advisory pool size.
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            main: self.is_open(ConnectionRole::Default),
            read: self.is_open(ConnectionRole::Read),
            write: self.is_open(ConnectionRole::Write),
            pool_size: self.config.pool.max_size,
        }
    }

    pub fn is_open(&self, role: ConnectionRole) -> bool {
        matches!(*self.slot(role).lock(), Slot::Open { .. })
    }

    /// The role whose config entry opened `role`'s handle, if it is open.
    pub fn opened_from(&self, role: ConnectionRole) -> Option<ConnectionRole> {
        match &*self.slot(role).lock() {
            Slot::Open { origin, .. } => Some(*origin),
            _ => None,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_connections();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.connection_status())
            .finish()
    }
}

fn open_connection(role: ConnectionRole, config: &ConnectionConfig, path: &str) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if config.read_only {
        flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
    } else {
        flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    }

    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        Error::connection(role, format!("Failed to open database at '{}': {}", config.path, e))
    })?;

    configure_session(&conn, config).map_err(|e| {
        Error::connection(role, format!("Failed to configure session for '{}': {}", config.path, e))
    })?;

    Ok(conn)
}

/// Session statements issued on every new connection.
fn configure_session(conn: &Connection, config: &ConnectionConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    run_pragma(conn, "foreign_keys", "ON")?;

    if !config.is_memory() && !config.read_only && is_pragma_token(&config.journal_mode) {
        run_pragma(conn, "journal_mode", &config.journal_mode)?;
    }

    for (key, value) in &config.options {
        if is_pragma_token(key) && is_pragma_token(value) {
            run_pragma(conn, key, value)?;
        } else {
            tracing::warn!("Ignoring invalid connection option {} = {}", key, value);
        }
    }
    Ok(())
}

// Some pragmas report their new value as a row, so results are drained
// rather than rejected.
fn run_pragma(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA {key} = {value}"))?;
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    Ok(())
}

fn run_query(conn: &Connection, sql: &str, params: &SqlParams) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    params.bind_to(&mut stmt)?;
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
        .into();

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(Row::from_sqlite(&columns, row)?);
    }
    Ok(out)
}

fn query_error(role: ConnectionRole, sql: &str, params: &SqlParams, e: rusqlite::Error) -> Error {
    Error::Query {
        role,
        sql: sql.trim().to_string(),
        params: params.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::sql_params;
    use tempfile::TempDir;

    fn file_manager() -> (TempDir, ConnectionManager) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escolar.db");
        let manager = ConnectionManager::sqlite(path.to_string_lossy().to_string());
        (dir, manager)
    }

    fn with_people(manager: &ConnectionManager) {
        manager
            .execute_batch(
                "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);",
            )
            .unwrap();
    }

    #[test]
    fn test_connections_are_lazy() {
        let (_dir, manager) = file_manager();
        assert_eq!(
            manager.connection_status(),
            ConnectionStatus {
                main: false,
                read: false,
                write: false,
                pool_size: 3
            }
        );

        manager.select("SELECT 1", &SqlParams::None).unwrap();
        let status = manager.connection_status();
        assert!(status.read);
        assert!(!status.write);
        assert!(!status.main);
    }

    #[test]
    fn test_select_does_not_touch_write() {
        let (_dir, manager) = file_manager();
        manager.select("SELECT 1", &SqlParams::None).unwrap();
        assert_eq!(manager.opened_from(ConnectionRole::Read), Some(ConnectionRole::Default));
        assert_eq!(manager.opened_from(ConnectionRole::Write), None);
    }

    #[test]
    fn test_read_specific_config_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("primary.db");
        let replica = dir.path().join("replica.db");

        let mut config = DatabaseConfig::sqlite(primary.to_string_lossy().to_string());
        config.connections.read = Some(ConnectionConfig::file(replica.to_string_lossy().to_string()));
        let manager = ConnectionManager::new(config);

        manager.select("SELECT 1", &SqlParams::None).unwrap();
        assert_eq!(manager.opened_from(ConnectionRole::Read), Some(ConnectionRole::Read));
        assert!(replica.exists());
        assert!(!primary.exists());
    }

    #[test]
    fn test_insert_returns_rowid_and_select_reads_it() {
        let (_dir, manager) = file_manager();
        with_people(&manager);

        let id = manager
            .insert("INSERT INTO people (name) VALUES (?1)", &sql_params!["Débora"])
            .unwrap();
        assert_eq!(id, "1");
        let id = manager
            .insert("INSERT INTO people (name) VALUES (:name)", &sql_params![":name" => "Lidia"])
            .unwrap();
        assert_eq!(id, "2");

        let rows = manager
            .select("SELECT id, name FROM people ORDER BY id", &SqlParams::None)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get::<String>("name").unwrap(), "Lidia");
    }

    #[test]
    fn test_fetch_returns_none_for_zero_rows() {
        let (_dir, manager) = file_manager();
        with_people(&manager);
        let row = manager
            .fetch("SELECT * FROM people WHERE name = ?1", &sql_params!["nadie"])
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn test_params_are_bound_not_interpolated() {
        let (_dir, manager) = file_manager();
        with_people(&manager);
        let hostile = "x'); DROP TABLE people; --";
        manager
            .execute("INSERT INTO people (name) VALUES (?1)", &sql_params![hostile])
            .unwrap();

        let row = manager
            .fetch("SELECT name FROM people", &SqlParams::None)
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>("name").unwrap(), hostile);
    }

    #[test]
    fn test_query_error_has_context() {
        let (_dir, manager) = file_manager();
        let err = manager
            .select("SELECT * FROM missing WHERE id = ?1", &sql_params![7])
            .unwrap_err();
        match err {
            Error::Query { role, sql, params, message } => {
                assert_eq!(role, ConnectionRole::Read);
                assert!(sql.contains("FROM missing"));
                assert_eq!(params, "[7]");
                assert!(message.contains("no such table"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_constraint_violation_is_query_error() {
        let (_dir, manager) = file_manager();
        with_people(&manager);
        let insert = "INSERT INTO people (name) VALUES (?1)";
        manager.execute(insert, &sql_params!["Ana"]).unwrap();
        let err = manager.execute(insert, &sql_params!["Ana"]).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_transaction_commit_and_rollback() {
        let (_dir, manager) = file_manager();
        with_people(&manager);

        manager.begin_transaction().unwrap();
        assert!(manager.in_transaction());
        manager
            .execute("INSERT INTO people (name) VALUES ('Marta')", &SqlParams::None)
            .unwrap();

        // uncommitted rows are visible on write only
        let on_write = manager
            .query("SELECT COUNT(*) AS n FROM people", &SqlParams::None, ConnectionRole::Write)
            .unwrap();
        assert_eq!(on_write[0].get::<i64>("n").unwrap(), 1);
        let on_read = manager.select("SELECT COUNT(*) AS n FROM people", &SqlParams::None).unwrap();
        assert_eq!(on_read[0].get::<i64>("n").unwrap(), 0);

        assert!(manager.rollback().unwrap());
        assert!(!manager.in_transaction());
        assert!(!manager.rollback().unwrap());

        manager
            .transaction(|db| {
                db.execute("INSERT INTO people (name) VALUES ('Noemí')", &SqlParams::None)
            })
            .unwrap();
        let rows = manager.select("SELECT name FROM people", &SqlParams::None).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_transaction_closure_error_rolls_back() {
        let (_dir, manager) = file_manager();
        with_people(&manager);

        let result: Result<()> = manager.transaction(|db| {
            db.execute("INSERT INTO people (name) VALUES ('Priscila')", &SqlParams::None)?;
            Err(Error::internal("abort"))
        });
        assert!(result.is_err());
        assert!(!manager.in_transaction());
        assert!(manager
            .fetch("SELECT * FROM people", &SqlParams::None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_commit_without_transaction_fails() {
        let (_dir, manager) = file_manager();
        let err = manager.commit().unwrap_err();
        assert!(matches!(err, Error::Transaction { operation: "commit", .. }));
    }

    #[test]
    fn test_close_connections_is_idempotent_and_terminal() {
        let (_dir, manager) = file_manager();
        manager.connect(ConnectionRole::Write).unwrap();
        manager.close_connections();
        manager.close_connections();

        assert_eq!(
            manager.connection_status(),
            ConnectionStatus {
                main: false,
                read: false,
                write: false,
                pool_size: 3
            }
        );
        let err = manager.select("SELECT 1", &SqlParams::None).unwrap_err();
        assert!(matches!(err, Error::Connection { role: ConnectionRole::Read, .. }));
    }

    #[test]
    fn test_bad_path_is_connection_error() {
        let manager = ConnectionManager::sqlite("/nonexistent-dir/for/sure/escolar.db");
        let err = manager.connect(ConnectionRole::Default).unwrap_err();
        assert!(matches!(err, Error::Connection { role: ConnectionRole::Default, .. }));
    }

    #[test]
    fn test_session_setup() {
        let (_dir, manager) = file_manager();
        let rows = manager
            .query("PRAGMA foreign_keys", &SqlParams::None, ConnectionRole::Default)
            .unwrap();
        assert_eq!(rows[0].get_index::<i64>(0).unwrap(), 1);

        let rows = manager
            .query("PRAGMA journal_mode", &SqlParams::None, ConnectionRole::Default)
            .unwrap();
        assert_eq!(rows[0].get_index::<String>(0).unwrap().to_lowercase(), "wal");
    }

    #[test]
    fn test_select_map() {
        let (_dir, manager) = file_manager();
        with_people(&manager);
        manager
            .execute("INSERT INTO people (name) VALUES ('Ester'), ('Rut')", &SqlParams::None)
            .unwrap();
        let names = manager
            .select_map("SELECT name FROM people ORDER BY name", &SqlParams::None, |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(names, vec!["Ester", "Rut"]);
    }

    #[test]
    fn test_memory_database_is_shared_between_roles() {
        let manager = ConnectionManager::sqlite(":memory:");
        with_people(&manager);
        manager
            .execute("INSERT INTO people (name) VALUES ('Noemí')", &SqlParams::None)
            .unwrap();

        let row = manager
            .fetch("SELECT name FROM people", &SqlParams::None)
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>("name").unwrap(), "Noemí");
        assert_eq!(manager.opened_from(ConnectionRole::Read), Some(ConnectionRole::Default));
    }

    #[test]
    fn test_memory_databases_of_different_managers_are_separate() {
        let first = ConnectionManager::sqlite(":memory:");
        let second = ConnectionManager::sqlite(":memory:");
        with_people(&first);

        let err = second
            .select("SELECT name FROM people", &SqlParams::None)
            .unwrap_err();
        assert!(err.to_string().contains("no such table"));
    }
}
