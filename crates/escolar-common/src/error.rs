//! Common error types used throughout control-escolar.
//!
//! The database-facing variants carry the context needed to diagnose a
//! failure without digging into the driver: the connection role, the SQL
//! text and its bound parameters, the DDL or transaction operation, or the
//! migration that was running.

use crate::types::ConnectionRole;

/// Common error type for control-escolar.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A connection for the given role could not be established.
    #[error("Connection error ({role}): {message}")]
    Connection {
        role: ConnectionRole,
        message: String,
    },

    /// A prepared statement failed to execute.
    #[error("Query failed ({role}): {message} [sql: {sql}] [params: {params}]")]
    Query {
        role: ConnectionRole,
        sql: String,
        params: String,
        message: String,
    },

    /// BEGIN, COMMIT or ROLLBACK itself failed.
    #[error("Transaction {operation} failed: {message}")]
    Transaction {
        operation: &'static str,
        message: String,
    },

    /// A schema change built by the schema manager failed.
    #[error("DDL {operation} on '{table}' failed: {message}")]
    Ddl {
        operation: &'static str,
        table: String,
        message: String,
    },

    /// A migration's forward operation or its bookkeeping write failed.
    #[error("Migration {name} failed: {message}")]
    Migration { name: String, message: String },

    /// The requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A database operation failed outside the categories above.
    #[error("Database error: {0}")]
    Database(String),

    /// The configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Connection error.
    pub fn connection<S: Into<String>>(role: ConnectionRole, msg: S) -> Self {
        Self::Connection {
            role,
            message: msg.into(),
        }
    }

    /// Create a new Transaction error.
    pub fn transaction<S: Into<String>>(operation: &'static str, msg: S) -> Self {
        Self::Transaction {
            operation,
            message: msg.into(),
        }
    }

    /// Create a new Ddl error.
    pub fn ddl<T: Into<String>, S: Into<String>>(operation: &'static str, table: T, msg: S) -> Self {
        Self::Ddl {
            operation,
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Create a new Migration error.
    pub fn migration<N: Into<String>, S: Into<String>>(name: N, msg: S) -> Self {
        Self::Migration {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the underlying failure was a UNIQUE constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Query { message, .. } | Self::Database(message) => {
                message.contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
