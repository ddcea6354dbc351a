//! Input validation for account data.

use escolar_common::{Error, Result, UserRole};
use regex::Regex;
use serde::Deserialize;

/// Registration input, before hashing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
}

fn default_role() -> UserRole {
    UserRole::Student
}

/// Regex-backed validators.
#[derive(Debug, Clone)]
pub struct Validator {
    email: Regex,
    name: Regex,
    min_password_length: usize,
}

impl Validator {
    pub fn new(min_password_length: usize) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::internal(format!("Invalid pattern: {}", e)))
        };
        Ok(Self {
            email: compile(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")?,
            name: compile(r"^[\p{L}][\p{L}\p{M}' .\-]*$")?,
            min_password_length,
        })
    }

    pub fn is_email(&self, value: &str) -> bool {
        value.len() <= 254 && self.email.is_match(value.trim())
    }

    pub fn is_person_name(&self, value: &str) -> bool {
        let value = value.trim();
        !value.is_empty() && value.chars().count() <= 120 && self.name.is_match(value)
    }

    /// Problems with `password`; empty when acceptable.
    pub fn password_issues(&self, password: &str) -> Vec<String> {
        let mut issues = Vec::new();
        if password.chars().count() < self.min_password_length {
            issues.push(format!(
                "La contraseña debe tener al menos {} caracteres",
                self.min_password_length
            ));
        }
        if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit()) {
            issues.push("La contraseña debe incluir letras y números".to_string());
        }
        issues
    }

    /// Check every field, reporting all problems at once.
    pub fn validate_new_user(&self, user: &NewUser) -> Result<()> {
        let mut issues = Vec::new();
        if !self.is_email(&user.email) {
            issues.push(format!("Correo electrónico inválido: {}", user.email));
        }
        if !self.is_person_name(&user.full_name) {
            issues.push("Nombre inválido".to_string());
        }
        issues.extend(self.password_issues(&user.password));

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_input(issues.join("; ")))
        }
    }
}
