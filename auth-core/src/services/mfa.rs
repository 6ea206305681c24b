//! TOTP second factor with one-time backup codes.
//!
//! Seeds are sealed with ChaCha20-Poly1305 before they reach the credential
//! store. Backup codes are stored as peppered HMACs and consumed atomically.
//! An accepted TOTP code is claimed in the session store for its whole
//! validity window, so it cannot be replayed on another request or instance.

use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::sync::Arc;
use totp_rs::{Algorithm, TOTP};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{MfaEnrollment, Principal};
use crate::services::error::AuthError;
use crate::services::redis::SessionStore;
use crate::services::store::{bounded, CredentialStore};
use crate::utils::crypto::SecretCipher;
use crate::utils::secrets::{backup_code, constant_time_eq, hmac_sha256_hex, normalize_backup_code};

const DIGITS: usize = 6;
const STEP_SECS: u64 = 30;
const SEED_BYTES: usize = 20;
const BACKUP_CODE_COUNT: usize = 10;
/// Steps either side of the current one that are still accepted.
const SKEW_STEPS: u64 = 1;

/// Returned once from `begin_enrollment` for the authenticator app.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MfaSetup {
    pub secret_base32: String,
    pub otpauth_url: String,
}

#[derive(Clone)]
pub struct MfaVerifier {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    cipher: SecretCipher,
    pepper: Arc<Secret<String>>,
    issuer: String,
    timeout: std::time::Duration,
}

/// Account names and issuers may not contain ':' in an otpauth URL.
fn otpauth_label(raw: &str) -> String {
    raw.replace(':', "_")
}

fn totp(seed: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP, AuthError> {
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        1,
        STEP_SECS,
        seed,
        Some(otpauth_label(issuer)),
        otpauth_label(account),
    )
    .map_err(|e| AuthError::Internal(format!("TOTP init error: {}", e)))
}

fn is_totp_shaped(code: &str) -> bool {
    code.len() == DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

impl MfaVerifier {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        cipher: SecretCipher,
        pepper: Secret<String>,
        issuer: String,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            credentials,
            sessions,
            cipher,
            pepper: Arc::new(pepper),
            issuer,
            timeout,
        }
    }

    fn hash_backup_code(&self, code: &str) -> Result<String, AuthError> {
        hmac_sha256_hex(
            self.pepper.expose_secret().as_bytes(),
            &normalize_backup_code(code),
        )
    }

    async fn enrollment(&self, principal_id: Uuid) -> Result<Option<MfaEnrollment>, AuthError> {
        bounded(self.timeout, self.credentials.get_mfa_enrollment(principal_id)).await
    }

    /// True once the principal has confirmed an enrollment.
    pub async fn is_enrolled(&self, principal_id: Uuid) -> Result<bool, AuthError> {
        Ok(self
            .enrollment(principal_id)
            .await?
            .is_some_and(|e| e.is_confirmed()))
    }

    /// Generate a fresh seed and store it unconfirmed. Replaces any pending
    /// enrollment; a confirmed one must be disabled first.
    pub async fn begin_enrollment(&self, principal: &Principal) -> Result<MfaSetup, AuthError> {
        if self
            .enrollment(principal.principal_id)
            .await?
            .is_some_and(|e| e.is_confirmed())
        {
            return Err(AuthError::Conflict("MFA is already enabled".to_string()));
        }

        let mut seed = vec![0u8; SEED_BYTES];
        OsRng.fill_bytes(&mut seed);
        let sealed = self.cipher.seal(principal.principal_id, &seed)?;

        let totp = totp(seed, &self.issuer, &principal.username)?;
        let enrollment = MfaEnrollment::pending(principal.principal_id, sealed);
        bounded(self.timeout, self.credentials.put_mfa_enrollment(&enrollment)).await?;

        tracing::info!(principal_id = %principal.principal_id, "MFA enrollment started");
        Ok(MfaSetup {
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        })
    }

    /// Confirm a pending enrollment with a current code. Returns the backup
    /// codes in plaintext; only their hashes are kept.
    pub async fn confirm_enrollment(
        &self,
        principal_id: Uuid,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        self.confirm_enrollment_at(principal_id, code, unix_now()).await
    }

    pub async fn confirm_enrollment_at(
        &self,
        principal_id: Uuid,
        code: &str,
        unix_time: u64,
    ) -> Result<Vec<String>, AuthError> {
        let mut enrollment = self
            .enrollment(principal_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("no pending MFA enrollment".to_string()))?;
        if enrollment.is_confirmed() {
            return Err(AuthError::Conflict("MFA is already enabled".to_string()));
        }

        if !self.check_totp(&enrollment, code, unix_time).await? {
            return Err(AuthError::MfaInvalid);
        }

        let codes: Vec<String> = (0..BACKUP_CODE_COUNT).map(|_| backup_code()).collect();
        enrollment.backup_code_hashes = codes
            .iter()
            .map(|c| self.hash_backup_code(c))
            .collect::<Result<_, _>>()?;
        enrollment.confirmed_utc = Some(Utc::now());
        bounded(self.timeout, self.credentials.put_mfa_enrollment(&enrollment)).await?;

        tracing::info!(principal_id = %principal_id, "MFA enrollment confirmed");
        Ok(codes)
    }

    pub async fn disable(&self, principal_id: Uuid) -> Result<(), AuthError> {
        bounded(self.timeout, self.credentials.delete_mfa_enrollment(principal_id)).await?;
        tracing::info!(principal_id = %principal_id, "MFA disabled");
        Ok(())
    }

    /// Accepts the code for the current step or one step either side. Each
    /// step's code is accepted at most once.
    pub async fn verify_totp(&self, principal_id: Uuid, code: &str) -> Result<bool, AuthError> {
        self.verify_totp_at(principal_id, code, unix_now()).await
    }

    pub async fn verify_totp_at(
        &self,
        principal_id: Uuid,
        code: &str,
        unix_time: u64,
    ) -> Result<bool, AuthError> {
        match self.enrollment(principal_id).await? {
            Some(enrollment) if enrollment.is_confirmed() => {
                self.check_totp(&enrollment, code, unix_time).await
            }
            _ => Ok(false),
        }
    }

    async fn check_totp(
        &self,
        enrollment: &MfaEnrollment,
        code: &str,
        unix_time: u64,
    ) -> Result<bool, AuthError> {
        let code = code.trim();
        if !is_totp_shaped(code) {
            return Ok(false);
        }

        let seed = self
            .cipher
            .open(enrollment.principal_id, &enrollment.secret_ciphertext)?;
        let totp = totp(seed, &self.issuer, "verify")?;

        let current = unix_time / STEP_SECS;
        let first = current.saturating_sub(SKEW_STEPS);
        let Some(step) = (first..=current + SKEW_STEPS)
            .find(|step| constant_time_eq(&totp.generate(step * STEP_SECS), code))
        else {
            return Ok(false);
        };

        let claim = format!("totp:{}:{}", enrollment.principal_id, step);
        let window = Duration::seconds(((2 * SKEW_STEPS + 1) * STEP_SECS) as i64);
        let fresh = bounded(self.timeout, self.sessions.claim_once(&claim, window)).await?;
        if !fresh {
            tracing::warn!(principal_id = %enrollment.principal_id, "TOTP code replay rejected");
        }
        Ok(fresh)
    }

    /// Consume a one-time backup code.
    pub async fn verify_backup_code(
        &self,
        principal_id: Uuid,
        code: &str,
    ) -> Result<bool, AuthError> {
        if normalize_backup_code(code).len() != 8 || !self.is_enrolled(principal_id).await? {
            return Ok(false);
        }
        let hash = self.hash_backup_code(code)?;
        let consumed = bounded(
            self.timeout,
            self.credentials.consume_backup_code(principal_id, &hash),
        )
        .await?;
        if consumed {
            tracing::info!(principal_id = %principal_id, "Backup code consumed");
        }
        Ok(consumed)
    }

    /// TOTP for six digit input, backup code otherwise.
    pub async fn verify_code(&self, principal_id: Uuid, code: &str) -> Result<bool, AuthError> {
        if is_totp_shaped(code.trim()) {
            self.verify_totp(principal_id, code).await
        } else {
            self.verify_backup_code(principal_id, code).await
        }
    }
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
