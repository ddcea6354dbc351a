//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temporary on-disk database and a
//! full [`Application`] over it. A file is used instead of `:memory:` so that
//! a second manager, standing in for another process, sees the same data.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use control_escolar::app::Application;
use control_escolar::config::Config;
use escolar_db::{ConnectionManager, DatabaseConfig, SchemaManager};
use tempfile::TempDir;

/// Test harness wrapping an [`Application`] backed by a temporary database.
pub struct TestHarness {
    pub dir: TempDir,
    pub app: Application,
}

impl TestHarness {
    /// Create a new harness with default configuration. No migrations run.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after letting `customize` adjust the configuration.
    pub fn with_config<F: FnOnce(&mut Config)>(customize: F) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = test_config(&db_path(dir.path()));
        customize(&mut config);
        let app = Application::new(config).expect("failed to build application");
        Self { dir, app }
    }

    /// Create a harness with the built-in migrations applied.
    pub fn bootstrapped() -> Self {
        let harness = Self::new();
        harness.app.migrate().expect("failed to run migrations");
        harness
    }

    pub fn db_path(&self) -> PathBuf {
        db_path(self.dir.path())
    }

    /// Create `name` inside the temp dir and return its path.
    pub fn migrations_dir(&self, name: &str) -> PathBuf {
        let dir = self.dir.path().join(name);
        std::fs::create_dir_all(&dir).expect("failed to create migrations dir");
        dir
    }

    /// A second, independent manager on the same database file, standing in
    /// for another process.
    pub fn other_process(&self) -> SchemaManager {
        let db = ConnectionManager::new(DatabaseConfig::sqlite(path_str(&self.db_path())));
        SchemaManager::new(Arc::new(db))
    }
}

pub fn db_path(dir: &Path) -> PathBuf {
    dir.join("escolar.db")
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Default config over `db`, with a cheap bcrypt cost.
pub fn test_config(db: &Path) -> Config {
    let mut config = Config::default();
    config.database = DatabaseConfig::sqlite(path_str(db));
    config.security.bcrypt_cost = 4;
    config.app.environment = "testing".to_string();
    config
}

/// Write a TOML config file for CLI tests and return its path.
pub fn write_config_file(dir: &Path) -> PathBuf {
    let path = dir.join("control-escolar.toml");
    let toml = format!(
        r#"
[app]
name = "Colegio de Prueba"
environment = "testing"
timezone = "-06:00"

[database.connections.default]
path = "{}"

[security]
bcrypt_cost = 4
"#,
        path_str(&db_path(dir)).replace('\\', "\\\\")
    );
    std::fs::write(&path, toml).expect("failed to write config");
    path
}

/// Write `sql` to `dir/file`.
pub fn write_migration(dir: &Path, file: &str, sql: &str) {
    std::fs::write(dir.join(file), sql).expect("failed to write migration");
}
