use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;

use crate::error::{AppError, ValidationError};

/// Strength rules applied at registration and password reset.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_len: usize,
    pub max_len: usize,
    pub require_digit: bool,
    pub require_uppercase: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_len: 8,
            max_len: 128,
            require_digit: true,
            require_uppercase: true,
        }
    }
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> Result<(), ValidationError> {
        let len = password.chars().count();
        if len < self.min_len {
            return Err(ValidationError::WeakPassword(format!(
                "must be at least {} characters",
                self.min_len
            )));
        }
        if len > self.max_len {
            return Err(ValidationError::WeakPassword(format!(
                "must be at most {} characters",
                self.max_len
            )));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(ValidationError::WeakPassword("must contain a digit".into()));
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            return Err(ValidationError::WeakPassword(
                "must contain an uppercase letter".into(),
            ));
        }
        Ok(())
    }
}

/// Salted argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalError(format!("password hashing failed: {}", e)))
}

/// False for a wrong password and for a stored hash that does not parse.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("stored password hash is unreadable: {}", e);
            false
        }
    }
}
