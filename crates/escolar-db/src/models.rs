//! Rust models matching the database schema.

use chrono::{DateTime, NaiveDateTime, Utc};
use escolar_common::{Error, Result, UserId, UserRole};
use serde::{Deserialize, Serialize};

use crate::params::Row;

/// User account model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<&Row> for User {
    type Error = Error;

    fn try_from(row: &Row) -> Result<Self> {
        let role: String = row.get("role")?;
        let updated_at: Option<String> = row.get("updated_at")?;
        Ok(Self {
            id: UserId::parse(&row.get::<String>("id")?)?,
            email: row.get("email")?,
            full_name: row.get("full_name")?,
            password_hash: row.get("password_hash")?,
            role: role.parse().map_err(Error::database)?,
            active: row.get("active")?,
            created_at: parse_timestamp(&row.get::<String>("created_at")?)?,
            updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Parse a stored timestamp: RFC 3339 as written by this crate, or SQLite's
/// `CURRENT_TIMESTAMP` format (UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::database(format!("Invalid timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp_formats() {
        let ts = parse_timestamp("2024-08-19T14:30:00-06:00").unwrap();
        assert_eq!(ts.hour(), 20);

        let ts = parse_timestamp("2024-08-19 14:30:00").unwrap();
        assert_eq!(ts.day(), 19);
        assert_eq!(ts.hour(), 14);

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_password_hash_is_not_serialized() {
        let user = User {
            id: UserId::new(),
            email: "ana@example.org".into(),
            full_name: "Ana".into(),
            password_hash: "$2b$04$secret".into(),
            role: UserRole::Student,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "student");
    }
}
