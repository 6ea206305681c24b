//! Random secret generation and comparison helpers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{distributions::Uniform, rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::services::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// `len` random bytes, base64url without padding.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Keyed hash, hex encoded.
pub fn hmac_sha256_hex(key: &[u8], value: &str) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AuthError::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(value.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Human-typable one-time code, `XXXX-XXXX`, no ambiguous characters.
pub fn backup_code() -> String {
    let dist = Uniform::from(0..BACKUP_CODE_ALPHABET.len());
    let mut rng = OsRng;
    let chars: String = (0..8)
        .map(|_| BACKUP_CODE_ALPHABET[rng.sample(dist)] as char)
        .collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

/// Canonical form a backup code is hashed in: uppercase, no separators.
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tokens_differ() {
        let a = random_token(32);
        assert_eq!(a.len(), 43);
        assert_ne!(a, random_token(32));
    }

    #[test]
    fn test_backup_code_shape() {
        let code = backup_code();
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
        assert_eq!(normalize_backup_code(&code).len(), 8);
        assert_eq!(normalize_backup_code(" abcd-efgh "), "ABCDEFGH");
    }

    #[test]
    fn test_hmac_depends_on_key() {
        let a = hmac_sha256_hex(b"pepper-a", "CODE").unwrap();
        let b = hmac_sha256_hex(b"pepper-b", "CODE").unwrap();
        assert_ne!(a, b);
        assert!(constant_time_eq(&a, &hmac_sha256_hex(b"pepper-a", "CODE").unwrap()));
    }
}
