//! Core type definitions shared by the database layer and the application.
//!
//! All enums serialize in lowercase, which is also how they are stored in
//! the database.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// School administration staff.
    Admin,
    /// Teacher in charge of subjects.
    Teacher,
    /// Enrolled student.
    Student,
}

impl UserRole {
    /// Every role, in the order shown in administration screens.
    pub const ALL: [UserRole; 3] = [Self::Admin, Self::Teacher, Self::Student];

    /// Lowercase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            _ => Err(format!("Invalid user role: {}", s)),
        }
    }
}

/// Routing label for a database connection.
///
/// All three may point at the same database; the role states the caller's
/// intent so that a primary/replica split needs no call-site changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// The main connection, also the fallback config for the other roles.
    Default,
    /// Read-only traffic (replica).
    Read,
    /// Writes and transactions (primary).
    Write,
}

impl ConnectionRole {
    /// Every role, in slot order.
    pub const ALL: [ConnectionRole; 3] = [Self::Default, Self::Read, Self::Write];

    /// Lowercase name used in config and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl Default for ConnectionRole {
    fn default() -> Self {
        Self::Read
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "main" => Ok(Self::Default),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(format!("Invalid connection role: {}", s)),
        }
    }
}
