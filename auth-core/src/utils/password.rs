use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;

use crate::services::error::AuthError;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &Password) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored PHC hash.
///
/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(password: &Password, password_hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AuthError::Internal(format!("Invalid password hash format: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok())
}

static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password(&Password::new("dummy-password-for-timing")).ok());

/// Burn the same work as a real verification. Used when the username is
/// unknown so response time does not reveal account existence.
pub fn verify_dummy(password: &Password) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "123456",
    "12345678",
    "123456789",
    "qwerty",
    "qwerty123",
    "admin",
    "admin123",
    "letmein",
    "welcome",
    "iloveyou",
    "abc123",
];

const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>-_=+[];'/\\`~";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    /// 0-5, one point per satisfied character-class or length rule.
    pub score: u8,
    pub issues: Vec<&'static str>,
}

impl PasswordStrength {
    pub fn is_acceptable(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn check_password_strength(password: &str) -> PasswordStrength {
    let mut score = 0u8;
    let mut issues = Vec::new();

    if password.chars().count() < 8 {
        issues.push("Password must be at least 8 characters long");
    } else {
        score += 1;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 1;
    } else {
        issues.push("Password must contain at least one uppercase letter");
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 1;
    } else {
        issues.push("Password must contain at least one lowercase letter");
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    } else {
        issues.push("Password must contain at least one number");
    }
    if password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        score += 1;
    } else {
        issues.push("Password must contain at least one special character");
    }
    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        issues.push("Password is too common");
    }

    PasswordStrength { score, issues }
}

/// Reject weak passwords with a `Validation` error listing every issue.
pub fn ensure_strong_password(password: &Password) -> Result<(), AuthError> {
    let strength = check_password_strength(password.as_str());
    if strength.is_acceptable() {
        Ok(())
    } else {
        Err(AuthError::Validation(format!(
            "Password validation failed: {}",
            strength.issues.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123!");
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn test_verify_password() {
        let password = Password::new("mySecurePassword123!");
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(verify_password(&password, &hash).unwrap());
        assert!(!verify_password(&Password::new("wrongPassword"), &hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_an_error() {
        assert!(verify_password(&Password::new("x"), "not-a-phc-string").is_err());
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        assert!(!format!("{:?}", password).contains("hunter2"));
    }

    #[test]
    fn test_strength_rules() {
        assert!(check_password_strength("Str0ng!Pass").is_acceptable());
        assert_eq!(check_password_strength("Str0ng!Pass").score, 5);

        let weak = check_password_strength("short");
        assert!(!weak.is_acceptable());
        assert!(weak
            .issues
            .contains(&"Password must be at least 8 characters long"));

        assert!(!check_password_strength("alllowercase1!").is_acceptable());
        assert!(!check_password_strength("NoDigitsHere!").is_acceptable());
        assert!(!check_password_strength("NoSpecial123").is_acceptable());
    }

    #[test]
    fn test_common_password_rejected() {
        let result = check_password_strength("Password123");
        assert!(result.issues.contains(&"Password is too common"));
    }
}
