pub mod crypto;
pub mod password;
pub mod secrets;
pub mod validation;

pub use crypto::SecretCipher;
pub use password::{
    check_password_strength, ensure_strong_password, hash_password, verify_dummy,
    verify_password, Password, PasswordStrength,
};
pub use validation::ValidatedJson;
