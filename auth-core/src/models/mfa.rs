//! MFA enrollment model - encrypted TOTP seed plus hashed backup codes.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MfaEnrollment {
    pub principal_id: Uuid,
    /// `nonce || ciphertext` of the raw TOTP seed.
    pub secret_ciphertext: Vec<u8>,
    /// Keyed hashes of unused backup codes.
    pub backup_code_hashes: BTreeSet<String>,
    pub created_utc: DateTime<Utc>,
    /// Set once the principal proves possession of the seed.
    pub confirmed_utc: Option<DateTime<Utc>>,
}

impl MfaEnrollment {
    pub fn pending(principal_id: Uuid, secret_ciphertext: Vec<u8>) -> Self {
        Self {
            principal_id,
            secret_ciphertext,
            backup_code_hashes: BTreeSet::new(),
            created_utc: Utc::now(),
            confirmed_utc: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_utc.is_some()
    }
}
