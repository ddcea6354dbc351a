//! Identifier generation.

use chrono::Datelike;
use chrono::{DateTime, TimeZone};
use escolar_common::{CourseId, EnrollmentId, UserId};
use rand::Rng;

/// Characters used in enrollment codes; no 0/O or 1/I to avoid misreads.
const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generates record ids and human-readable enrollment codes.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    /// `prefix` starts every enrollment code, e.g. `ESC`.
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into().to_uppercase(),
        }
    }

    pub fn user_id(&self) -> UserId {
        UserId::new()
    }

    pub fn course_id(&self) -> CourseId {
        CourseId::new()
    }

    pub fn enrollment_id(&self) -> EnrollmentId {
        EnrollmentId::new()
    }

    /// `PREFIX-YYYY-XXXXXX`, year taken from `at`.
    pub fn enrollment_code<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        format!("{}-{}-{}", self.prefix, at.year(), suffix)
    }

    /// Whether `code` has the shape produced by [`enrollment_code`](Self::enrollment_code).
    pub fn is_enrollment_code(&self, code: &str) -> bool {
        let mut parts = code.splitn(3, '-');
        let (Some(prefix), Some(year), Some(suffix)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        prefix == self.prefix
            && year.len() == 4
            && year.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == 6
            && suffix.bytes().all(|b| CODE_ALPHABET.contains(&b))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new("ESC")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_enrollment_code_shape() {
        let ids = IdGenerator::default();
        let at = FixedOffset::west_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 1, 1, 0, 30, 0)
            .unwrap();
        let code = ids.enrollment_code(&at);
        assert!(code.starts_with("ESC-2025-"), "{code}");
        assert!(ids.is_enrollment_code(&code));
    }

    #[test]
    fn test_is_enrollment_code() {
        let ids = IdGenerator::new("csp");
        assert!(ids.is_enrollment_code("CSP-2024-AB23CD"));
        assert!(!ids.is_enrollment_code("ESC-2024-AB23CD"));
        assert!(!ids.is_enrollment_code("CSP-24-AB23CD"));
        assert!(!ids.is_enrollment_code("CSP-2024-AB0CD1"));
        assert!(!ids.is_enrollment_code("CSP-2024"));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids = IdGenerator::default();
        assert_ne!(ids.user_id(), ids.user_id());
        let code = ids.enrollment_code(&Utc::now());
        assert_eq!(code.len(), "ESC-2025-XXXXXX".len());
    }
}
