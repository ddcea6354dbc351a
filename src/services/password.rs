//! Password hashing with bcrypt.

use escolar_common::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Hashes and verifies user passwords.
#[derive(Debug, Clone)]
pub struct PasswordService {
    cost: u32,
}

impl PasswordService {
    /// `cost` is the bcrypt work factor (4-31).
    pub fn new(cost: u32) -> Result<Self> {
        if !(4..=31).contains(&cost) {
            return Err(Error::config(format!(
                "bcrypt cost must be between 4 and 31, got {}",
                cost
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Generate a bcrypt password hash
    pub fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| Error::internal(format!("Failed to hash password: {}", e)))
    }

    /// Check `password` against a stored hash. A malformed hash is an error,
    /// a wrong password is `Ok(false)`.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash)
            .map_err(|e| Error::invalid_input(format!("Invalid password hash: {}", e)))
    }

    /// Random alphanumeric password for accounts created by an administrator.
    ///
    /// Always holds at least one letter and one digit, so it passes
    /// [`Validator::password_issues`](crate::services::Validator::password_issues).
    pub fn generate_temporary(&self, length: usize) -> String {
        const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        const DIGITS: &[u8] = b"0123456789";

        let mut rng = rand::thread_rng();
        let mut chars: Vec<u8> = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length.max(8))
            .collect();

        let letter_at = rng.gen_range(0..chars.len());
        let mut digit_at = rng.gen_range(0..chars.len() - 1);
        if digit_at >= letter_at {
            digit_at += 1;
        }
        chars[letter_at] = LETTERS[rng.gen_range(0..LETTERS.len())];
        chars[digit_at] = DIGITS[rng.gen_range(0..DIGITS.len())];

        chars.into_iter().map(char::from).collect()
    }
}
