use chrono::FixedOffset;
use escolar_db::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// `development`, `testing` or `production`
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Fixed UTC offset used for application timestamps, e.g. `-06:00`
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Directory of extra `*.sql` migrations run after the built-in ones
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,

    /// Fallback values for `Application::env` when the process environment
    /// does not define a key
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
            timezone: default_timezone(),
            migrations_dir: None,
            env: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// The configured timezone as a fixed offset.
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        parse_utc_offset(&self.timezone)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MailConfig {
    /// Sender address for outgoing mail
    #[serde(default = "default_mail_from")]
    pub from: String,

    /// Display name for the sender
    #[serde(default = "default_app_name")]
    pub from_name: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
            from_name: default_app_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Bcrypt work factor (4-31)
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,

    /// Minimum length for user passwords
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
            min_password_length: default_min_password_length(),
        }
    }
}

fn default_app_name() -> String {
    "Control Escolar".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_timezone() -> String {
    "-06:00".to_string()
}

fn default_mail_from() -> String {
    "no-reply@control-escolar.local".to_string()
}

fn default_bcrypt_cost() -> u32 {
    12
}

fn default_min_password_length() -> usize {
    8
}

/// Parse `UTC`, `Z` or `±HH:MM` into a fixed offset.
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
