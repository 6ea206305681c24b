//! Authenticated encryption for secrets at rest (TOTP seeds).

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use uuid::Uuid;

use crate::services::error::AuthError;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretCipher {
    cipher: Arc<ChaCha20Poly1305>,
}

impl SecretCipher {
    pub fn new(key: &[u8; 32]) -> Result<Self, AuthError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| AuthError::Internal(format!("Invalid cipher key: {}", e)))?;
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Returns `nonce (12 bytes) || ciphertext`. The owner id is bound as AAD
    /// so a sealed seed cannot be replayed onto another principal.
    pub fn seal(&self, owner: Uuid, plaintext: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let aad = aad(owner);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| AuthError::Internal(format!("Encryption failure: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, owner: Uuid, sealed: &[u8]) -> Result<Vec<u8>, AuthError> {
        if sealed.len() <= NONCE_LEN {
            return Err(AuthError::Internal("Invalid ciphertext length".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let aad = aad(owner);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| AuthError::Internal(format!("Decryption failure: {}", e)))
    }
}

fn aad(owner: Uuid) -> Vec<u8> {
    let mut aad = b"auth-core:mfa-seed:v1:".to_vec();
    aad.extend_from_slice(owner.as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let cipher = SecretCipher::new(&[7u8; 32]).unwrap();
        let owner = Uuid::new_v4();

        let sealed = cipher.seal(owner, b"seed-bytes").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"seed-bytes");
        assert_eq!(cipher.open(owner, &sealed).unwrap(), b"seed-bytes");
    }

    #[test]
    fn test_open_rejects_other_owner() {
        let cipher = SecretCipher::new(&[7u8; 32]).unwrap();
        let sealed = cipher.seal(Uuid::new_v4(), b"seed-bytes").unwrap();
        assert!(cipher.open(Uuid::new_v4(), &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_other_key() {
        let sealed = SecretCipher::new(&[1u8; 32])
            .unwrap()
            .seal(Uuid::nil(), b"seed")
            .unwrap();
        let other = SecretCipher::new(&[2u8; 32]).unwrap();
        assert!(other.open(Uuid::nil(), &sealed).is_err());
    }
}
