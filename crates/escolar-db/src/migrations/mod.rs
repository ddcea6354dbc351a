//! Schema migrations.
//!
//! A migration is a named, one-time forward change. Migrations come from a
//! [`MigrationRegistry`]: the built-in set embedded in the binary, a
//! directory of `*.sql` files, or code migrations implementing
//! [`Migration`]. They always run in lexical order of their names.
//!
//! Applied migrations are recorded in the `migrations` table together with
//! the batch number of the run that applied them. Each migration runs in its
//! own `BEGIN IMMEDIATE` transaction; the bookkeeping table is re-checked
//! inside it, so two processes racing on the same database apply each
//! migration once.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use escolar_common::{ConnectionRole, Error, Result};
use serde::Serialize;

use crate::connection::ConnectionManager;
use crate::ddl::{ColumnDefinition, TableOptions};
use crate::params::SqlParams;
use crate::schema::SchemaManager;
use crate::sql_params;

/// Name of the bookkeeping table.
pub const MIGRATIONS_TABLE: &str = "migrations";

/// Migrations compiled into the binary.
const BUILTIN: &[(&str, &str)] = &[
    ("001_create_users", include_str!("001_create_users.sql")),
    ("002_create_catalog", include_str!("002_create_catalog.sql")),
    (
        "003_create_academic_periods",
        include_str!("003_create_academic_periods.sql"),
    ),
    ("004_create_enrollments", include_str!("004_create_enrollments.sql")),
];

/// A named forward schema change.
///
/// `up` runs inside a transaction opened by the runner and must not manage
/// transactions itself.
pub trait Migration: Send + Sync {
    /// Stable identifier, recorded in the bookkeeping table.
    fn name(&self) -> &str;

    /// Key the registry orders by. Defaults to [`name`](Self::name).
    fn sort_key(&self) -> &str {
        self.name()
    }

    /// Apply the change.
    fn up(&self, db: &ConnectionManager) -> Result<()>;
}

/// A migration backed by an SQL script.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    sql: String,
    file_name: Option<String>,
}

impl SqlMigration {
    pub fn new<N: Into<String>, S: Into<String>>(name: N, sql: S) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            file_name: None,
        }
    }

    /// Order this migration by `file_name` instead of its name.
    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Load `path`. The file stem becomes the migration name; the full file
    /// name is the sort key, so `001_init-fix.sql` runs before `001_init.sql`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let invalid =
            || Error::invalid_input(format!("Invalid migration file name: {}", path.display()));
        let name = path.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
        let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(invalid)?;
        let sql = std::fs::read_to_string(path)?;
        Ok(Self::new(name, sql).with_file_name(file_name))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn sort_key(&self) -> &str {
        self.file_name.as_deref().unwrap_or(&self.name)
    }

    fn up(&self, db: &ConnectionManager) -> Result<()> {
        if self.sql.trim().is_empty() {
            return Ok(());
        }
        db.execute_batch(&self.sql)
    }
}

/// A migration written in Rust.
pub struct FnMigration<F> {
    name: String,
    up: F,
}

impl<F> FnMigration<F>
where
    F: Fn(&ConnectionManager) -> Result<()> + Send + Sync,
{
    pub fn new<N: Into<String>>(name: N, up: F) -> Self {
        Self {
            name: name.into(),
            up,
        }
    }
}

impl<F> Migration for FnMigration<F>
where
    F: Fn(&ConnectionManager) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, db: &ConnectionManager) -> Result<()> {
        (self.up)(db)
    }
}

/// Migrations sorted by [`Migration::sort_key`], with unique names.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The migrations shipped with the crate, creating the school schema.
    pub fn builtin() -> Self {
        let mut migrations: Vec<Box<dyn Migration>> = BUILTIN
            .iter()
            .map(|(name, sql)| {
                let migration = SqlMigration::new(*name, *sql).with_file_name(format!("{name}.sql"));
                Box::new(migration) as Box<dyn Migration>
            })
            .collect();
        migrations.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
        Self { migrations }
    }

    /// Every `*.sql` file directly inside `dir`. Other entries are ignored.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        registry.register_dir(dir)?;
        Ok(registry)
    }

    /// Add every `*.sql` file directly inside `dir`.
    pub fn register_dir(&mut self, dir: &Path) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_sql = path.extension().and_then(|e| e.to_str()) == Some("sql");
            if path.is_file() && is_sql {
                self.register(SqlMigration::from_file(&path)?)?;
            }
        }
        Ok(())
    }

    /// Add a migration. Names must be unique.
    pub fn register<M: Migration + 'static>(&mut self, migration: M) -> Result<()> {
        if self.migrations.iter().any(|m| m.name() == migration.name()) {
            return Err(Error::invalid_input(format!(
                "Duplicate migration: {}",
                migration.name()
            )));
        }
        let pos = self
            .migrations
            .partition_point(|m| m.sort_key() <= migration.sort_key());
        self.migrations.insert(pos, Box::new(migration));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<M: Migration + 'static>(mut self, migration: M) -> Result<Self> {
        self.register(migration)?;
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Migration> + '_ {
        self.migrations.iter().map(|m| m.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// A row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub migration: String,
    pub batch: i64,
    pub executed_at: String,
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Batch number assigned to the migrations applied by this run.
    pub batch: i64,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

impl MigrationReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Applied/pending state of a known migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationState {
    pub name: String,
    pub batch: Option<i64>,
    pub executed_at: Option<String>,
}

impl MigrationState {
    pub fn is_applied(&self) -> bool {
        self.batch.is_some()
    }
}

impl SchemaManager {
    /// Create the bookkeeping table if needed.
    pub fn ensure_migrations_table(&self) -> Result<()> {
        self.create_table(
            MIGRATIONS_TABLE,
            &[
                ColumnDefinition::increments("id"),
                ColumnDefinition::new("migration", "TEXT").not_null().unique(),
                ColumnDefinition::new("batch", "INTEGER").not_null(),
                ColumnDefinition::new("executed_at", "TEXT")
                    .not_null()
                    .default_expr("CURRENT_TIMESTAMP"),
            ],
            &TableOptions::default(),
        )
    }

    /// Every recorded migration, in the order applied.
    pub fn applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        if !self.table_exists(MIGRATIONS_TABLE)? {
            return Ok(Vec::new());
        }
        self.connections()
            .query(
                "SELECT id, migration, batch, executed_at FROM migrations ORDER BY id",
                &SqlParams::None,
                ConnectionRole::Write,
            )?
            .iter()
            .map(|row| {
                Ok(MigrationRecord {
                    id: row.get("id")?,
                    migration: row.get("migration")?,
                    batch: row.get("batch")?,
                    executed_at: row.get("executed_at")?,
                })
            })
            .collect()
    }

    /// Apply the pending `*.sql` migrations found in `dir`.
    ///
    /// A missing directory is not an error: nothing is run and the
    /// bookkeeping table is left untouched.
    pub fn run_pending_migrations(&self, dir: &Path) -> Result<MigrationReport> {
        if !dir.is_dir() {
            tracing::debug!("Migrations directory {} not found", dir.display());
            return Ok(MigrationReport::default());
        }
        let registry = MigrationRegistry::from_dir(dir)?;
        self.run_migrations(&registry)
    }

    /// Apply the pending migrations of `registry`, stopping at the first
    /// failure.
    pub fn run_migrations(&self, registry: &MigrationRegistry) -> Result<MigrationReport> {
        self.ensure_migrations_table()?;

        let applied: HashSet<String> = self
            .applied_migrations()?
            .into_iter()
            .map(|r| r.migration)
            .collect();
        let batch = self.next_batch()?;
        let mut report = MigrationReport {
            batch,
            ..MigrationReport::default()
        };

        for migration in registry.iter() {
            let name = migration.name();
            if applied.contains(name) {
                tracing::debug!("Skipping applied migration {}", name);
                report.skipped.push(name.to_string());
                continue;
            }
            if self.apply(migration, batch)? {
                report.applied.push(name.to_string());
            } else {
                report.skipped.push(name.to_string());
            }
        }

        if report.applied.is_empty() {
            tracing::info!("Nothing to migrate");
        } else {
            tracing::info!(
                batch,
                count = report.applied.len(),
                "Applied migrations"
            );
        }
        Ok(report)
    }

    /// Applied/pending listing for every migration in `registry`.
    pub fn migration_status(&self, registry: &MigrationRegistry) -> Result<Vec<MigrationState>> {
        let records = self.applied_migrations()?;
        Ok(registry
            .iter()
            .map(|m| {
                let record = records.iter().find(|r| r.migration == m.name());
                MigrationState {
                    name: m.name().to_string(),
                    batch: record.map(|r| r.batch),
                    executed_at: record.map(|r| r.executed_at.clone()),
                }
            })
            .collect())
    }

    fn next_batch(&self) -> Result<i64> {
        let row = self.connections().query(
            "SELECT COALESCE(MAX(batch), 0) + 1 AS next FROM migrations",
            &SqlParams::None,
            ConnectionRole::Write,
        )?;
        match row.first() {
            Some(row) => row.get("next"),
            None => Ok(1),
        }
    }

    fn is_recorded(&self, name: &str) -> Result<bool> {
        let rows = self.connections().query(
            "SELECT 1 AS found FROM migrations WHERE migration = ?1",
            &sql_params![name],
            ConnectionRole::Write,
        )?;
        Ok(!rows.is_empty())
    }

    /// Run one migration in its own transaction. `Ok(false)` means another
    /// process recorded it first.
    fn apply(&self, migration: &dyn Migration, batch: i64) -> Result<bool> {
        let name = migration.name();
        let db = self.connections();

        db.begin_transaction()
            .map_err(|e| Error::migration(name, e.to_string()))?;

        let outcome = (|| -> Result<bool> {
            if self.is_recorded(name)? {
                return Ok(false);
            }
            migration.up(db)?;
            db.execute(
                "INSERT INTO migrations (migration, batch) VALUES (?1, ?2)",
                &sql_params![name, batch],
            )?;
            Ok(true)
        })();

        let outcome = match outcome {
            Ok(applied) => db.commit().map(|_| applied),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(true) => {
                tracing::info!(batch, "Migrated: {}", name);
                Ok(true)
            }
            Ok(false) => {
                tracing::info!("Migration {} was applied by another process", name);
                Ok(false)
            }
            Err(e) => {
                if let Err(rollback) = db.rollback() {
                    tracing::warn!("Rollback after failed migration {} failed: {}", name, rollback);
                }
                let message = match e {
                    Error::Query { message, .. } => message,
                    other => other.to_string(),
                };
                tracing::error!("Migration {} failed and was rolled back: {}", name, message);
                Err(Error::migration(name, message))
            }
        }
    }
}
