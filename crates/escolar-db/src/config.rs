//! Database connection configuration.
//!
//! One required `default` connection plus optional `read` and `write`
//! overrides. A role without its own entry uses the `default` entry.

use std::collections::BTreeMap;

use escolar_common::{ConnectionRole, Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level `[database]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connections: ConnectionsConfig,
    pub pool: PoolConfig,
}

/// `[database.connections.*]` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    pub default: ConnectionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<ConnectionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write: Option<ConnectionConfig>,
}

impl ConnectionsConfig {
    /// The config used to open `role`, and the role whose entry it came from.
    pub fn for_role(&self, role: ConnectionRole) -> (ConnectionRole, &ConnectionConfig) {
        let specific = match role {
            ConnectionRole::Default => None,
            ConnectionRole::Read => self.read.as_ref(),
            ConnectionRole::Write => self.write.as_ref(),
        };
        match specific {
            Some(config) => (role, config),
            None => (ConnectionRole::Default, &self.default),
        }
    }
}

/// Settings for a single SQLite connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database file path, `:memory:`, or an SQLite `file:` URI.
    pub path: String,
    /// How long to wait on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Journal mode applied to file databases.
    pub journal_mode: String,
    /// Open the handle read-only.
    pub read_only: bool,
    /// Extra `PRAGMA name = value` statements issued on connect.
    pub options: BTreeMap<String, String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: "control_escolar.db".to_string(),
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            read_only: false,
            options: BTreeMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Config for a database file at `path` with default settings.
    pub fn file<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Whether this config points at an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:" || self.path.contains("mode=memory") || self.path.starts_with("file::memory:")
    }
}

/// `[database.pool]`. Advisory only: at most one handle exists per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 3,
            min_idle: 0,
        }
    }
}

impl DatabaseConfig {
    /// Single-file setup: every role opens `path`.
    pub fn sqlite<S: Into<String>>(path: S) -> Self {
        Self {
            connections: ConnectionsConfig {
                default: ConnectionConfig::file(path),
                read: None,
                write: None,
            },
            pool: PoolConfig::default(),
        }
    }

    /// Check the settings that would otherwise fail late, on first connect.
    pub fn validate(&self) -> Result<()> {
        let entries = [
            ("default", Some(&self.connections.default)),
            ("read", self.connections.read.as_ref()),
            ("write", self.connections.write.as_ref()),
        ];
        for (name, config) in entries {
            let Some(config) = config else { continue };
            if config.path.trim().is_empty() {
                return Err(Error::config(format!(
                    "database.connections.{name}.path cannot be empty"
                )));
            }
            if !is_pragma_token(&config.journal_mode) {
                return Err(Error::config(format!(
                    "database.connections.{name}.journal_mode is invalid: {}",
                    config.journal_mode
                )));
            }
            for (key, value) in &config.options {
                if !is_pragma_token(key) || !is_pragma_token(value) {
                    return Err(Error::config(format!(
                        "database.connections.{name}.options has an invalid entry: {key} = {value}"
                    )));
                }
            }
        }
        if self.pool.max_size == 0 {
            return Err(Error::config("database.pool.max_size must be at least 1"));
        }
        Ok(())
    }
}

/// Pragma names and values are written into SQL text, so only plain
/// identifiers and numbers are accepted.
pub(crate) fn is_pragma_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}
