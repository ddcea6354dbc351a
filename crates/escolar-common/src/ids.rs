//! Typed ID wrappers for type safety across control-escolar.
//!
//! Newtypes around UUIDs so a `CourseId` can never be passed where a
//! `UserId` is expected. IDs are stored as hyphenated text in the database.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an ID from its text form as stored in the database.
            pub fn parse(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| Error::invalid_input(format!("Invalid {} '{}': {}", $label, s, e)))
            }

            /// The wrapped UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_id!(
    /// Unique identifier for a user account (admin, teacher or student).
    UserId,
    "user id"
);

typed_id!(
    /// Unique identifier for a course in the catalog.
    CourseId,
    "course id"
);

typed_id!(
    /// Unique identifier for a subject taught within a course.
    SubjectId,
    "subject id"
);

typed_id!(
    /// Unique identifier for a module of a subject.
    ModuleId,
    "module id"
);

typed_id!(
    /// Unique identifier for an academic period (term).
    PeriodId,
    "period id"
);

typed_id!(
    /// Unique identifier for a student enrollment.
    EnrollmentId,
    "enrollment id"
);
