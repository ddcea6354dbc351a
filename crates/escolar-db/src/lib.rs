//! Escolar-DB: connection routing, schema management and migrations
//!
//! This crate provides the persistence core of control-escolar on SQLite
//! with rusqlite.
//!
//! # Modules
//!
//! - `config` - Per-role connection settings
//! - `connection` - Lazily opened, role-routed connections and query helpers
//! - `params` - Bound statement parameters and owned result rows
//! - `schema_map` - Logical to physical table/column names
//! - `ddl` - CREATE/ALTER/DROP statement builders
//! - `schema` - DDL execution, introspection and schema verification
//! - `migrations` - Ordered, once-only schema migrations
//! - `models` - Rust models matching the database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use escolar_common::UserRole;
//! use escolar_db::migrations::MigrationRegistry;
//! use escolar_db::queries::users;
//! use escolar_db::{ConnectionManager, SchemaManager};
//!
//! let db = Arc::new(ConnectionManager::sqlite("/var/lib/escolar/school.db"));
//! let schema = SchemaManager::new(Arc::clone(&db));
//! schema.run_migrations(&MigrationRegistry::builtin()).unwrap();
//!
//! let user = users::create_user(&db, "ana@example.org", "Ana", "hash", UserRole::Student).unwrap();
//! println!("Created user: {}", user.email);
//! ```

pub mod config;
pub mod connection;
pub mod ddl;
pub mod migrations;
pub mod models;
pub mod params;
pub mod queries;
pub mod schema;
pub mod schema_map;

pub use config::{ConnectionConfig, ConnectionsConfig, DatabaseConfig, PoolConfig};
pub use connection::{ConnectionManager, ConnectionStatus};
pub use ddl::{ColumnDefinition, ForeignKey, TableModification, TableOptions};
pub use migrations::{
    FnMigration, Migration, MigrationRecord, MigrationRegistry, MigrationReport, MigrationState,
    SqlMigration,
};
pub use params::{IntoSqlValue, Row, SqlParams};
pub use schema::{ColumnInfo, ExpectedColumn, ExpectedTable, SchemaManager};
pub use schema_map::SchemaMap;

pub use rusqlite::types::Value;
