//! Database query modules.
//!
//! Repositories over [`ConnectionManager`](crate::ConnectionManager):
//! - users: User account CRUD and lookups

pub mod users;
