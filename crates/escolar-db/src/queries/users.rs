//! User database queries.
//!
//! This module provides CRUD operations for user accounts. Emails are
//! stored lowercased, so lookups by email are case-insensitive.

use chrono::Utc;
use escolar_common::{Error, Result, UserId, UserRole};
use rusqlite::types::Value;

use crate::connection::ConnectionManager;
use crate::ddl::quote_ident;
use crate::models::User;
use crate::params::SqlParams;
use crate::schema_map::SchemaMap;
use crate::sql_params;

const USER_COLUMNS: &str =
    "id, email, full_name, password_hash, role, active, created_at, updated_at";

/// Create a new user.
///
/// # Returns
///
/// * `Ok(User)` - The created user
/// * `Err(Error::InvalidInput)` - If the email is already registered
pub fn create_user(
    db: &ConnectionManager,
    email: &str,
    full_name: &str,
    password_hash: &str,
    role: UserRole,
) -> Result<User> {
    let id = UserId::new();
    let email = email.trim().to_lowercase();
    let created_at = Utc::now();

    db.execute(
        "INSERT INTO users (id, email, full_name, password_hash, role, active, created_at)
         VALUES (:id, :email, :full_name, :password_hash, :role, 1, :created_at)",
        &sql_params! {
            ":id" => id,
            ":email" => email.as_str(),
            ":full_name" => full_name,
            ":password_hash" => password_hash,
            ":role" => role,
            ":created_at" => created_at,
        },
    )
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::invalid_input(format!("Email '{}' already exists", email))
        } else {
            e
        }
    })?;

    Ok(User {
        id,
        email,
        full_name: full_name.to_string(),
        password_hash: password_hash.to_string(),
        role,
        active: true,
        created_at,
        updated_at: None,
    })
}

/// Get a user by ID.
pub fn get_user(db: &ConnectionManager, id: UserId) -> Result<Option<User>> {
    db.fetch(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        &sql_params![id],
    )?
    .as_ref()
    .map(User::try_from)
    .transpose()
}

/// Get a user by email.
pub fn get_user_by_email(db: &ConnectionManager, email: &str) -> Result<Option<User>> {
    db.fetch(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
        &sql_params![email.trim().to_lowercase()],
    )?
    .as_ref()
    .map(User::try_from)
    .transpose()
}

/// List users ordered by name, optionally only those with `role`.
pub fn list_users(db: &ConnectionManager, role: Option<UserRole>) -> Result<Vec<User>> {
    let rows = match role {
        Some(role) => db.select(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE role = ?1 ORDER BY full_name, email"),
            &sql_params![role],
        )?,
        None => db.select(
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY full_name, email"),
            &SqlParams::None,
        )?,
    };
    rows.iter().map(User::try_from).collect()
}

/// Number of users per role; roles without users are included with 0.
pub fn count_by_role(db: &ConnectionManager) -> Result<Vec<(UserRole, i64)>> {
    let rows = db.select(
        "SELECT role, COUNT(*) AS total FROM users GROUP BY role",
        &SqlParams::None,
    )?;

    let mut counts: Vec<(UserRole, i64)> = UserRole::ALL.iter().map(|r| (*r, 0)).collect();
    for row in &rows {
        let role: UserRole = row
            .get::<String>("role")?
            .parse()
            .map_err(Error::database)?;
        let total: i64 = row.get("total")?;
        if let Some(entry) = counts.iter_mut().find(|(r, _)| *r == role) {
            entry.1 = total;
        }
    }
    Ok(counts)
}

/// Activate or deactivate a user. Returns `false` if the user does not exist.
pub fn set_active(db: &ConnectionManager, id: UserId, active: bool) -> Result<bool> {
    let rows_affected = db.execute(
        "UPDATE users SET active = ?1, updated_at = ?2 WHERE id = ?3",
        &sql_params![active, Utc::now(), id],
    )?;
    Ok(rows_affected > 0)
}

/// Update arbitrary columns of a user.
///
/// Column names are logical names resolved through the default
/// [`SchemaMap`] and must be whitelisted for `users`; `id` cannot be changed.
/// Returns `false` if the user does not exist.
pub fn update_user_fields(
    db: &ConnectionManager,
    id: UserId,
    fields: Vec<(&str, Value)>,
) -> Result<bool> {
    if fields.is_empty() {
        return Err(Error::invalid_input("No fields to update"));
    }

    let map = SchemaMap::DEFAULT;
    let mut assignments = Vec::with_capacity(fields.len() + 1);
    let mut values = Vec::with_capacity(fields.len() + 2);
    for (column, value) in fields {
        let physical = map.column("users", column);
        if !map.has_column("users", column) || physical == "id" {
            return Err(Error::invalid_input(format!(
                "Column '{}' cannot be updated on users",
                column
            )));
        }
        values.push(value);
        assignments.push(format!("{} = ?{}", quote_ident(physical), values.len()));
    }

    values.push(Value::Text(Utc::now().to_rfc3339()));
    assignments.push(format!("updated_at = ?{}", values.len()));
    values.push(Value::Text(id.to_string()));
    let sql = format!(
        "UPDATE users SET {} WHERE id = ?{}",
        assignments.join(", "),
        values.len()
    );

    let rows_affected = db.execute(&sql, &SqlParams::Positional(values))?;
    Ok(rows_affected > 0)
}

/// Delete a user.
///
/// # Returns
///
/// * `Ok(true)` - If the user was deleted
/// * `Ok(false)` - If the user did not exist
pub fn delete_user(db: &ConnectionManager, id: UserId) -> Result<bool> {
    let rows_affected = db.execute("DELETE FROM users WHERE id = ?1", &sql_params![id])?;
    Ok(rows_affected > 0)
}
