//! Escolar-Common: shared types used across the control-escolar crates.
//!
//! - **Typed IDs**: UUID newtypes for users, courses, subjects, modules,
//!   academic periods and enrollments
//! - **Core Types**: user roles and database connection roles
//! - **Error Handling**: the common error type and result alias
//!
//! # Examples
//!
//! ```
//! use escolar_common::{ConnectionRole, Error, Result, UserId, UserRole};
//!
//! let id = UserId::new();
//! assert_eq!(UserId::parse(&id.to_string()).unwrap(), id);
//!
//! assert_eq!("teacher".parse::<UserRole>().unwrap(), UserRole::Teacher);
//! assert_eq!(ConnectionRole::Read.as_str(), "read");
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("user"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
