//! Access/refresh token issuance, verification and refresh rotation.
//!
//! Tokens are RS256 JWTs carrying a `kid` header. The key ring holds one
//! active signing key and at most one retired key. The retired key verifies
//! access tokens until its grace period ends and keeps verifying refresh
//! tokens until the next rotation replaces it, so rotating keys does not log
//! every session out.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::sync::{Arc, RwLock};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AuthConfig, JwtConfig};
use crate::models::{Principal, PrincipalStatus, Session};
use crate::services::error::AuthError;
use crate::services::metrics;
use crate::services::redis::{RefreshRotation, SessionStore, SwapOutcome};
use crate::services::security_audit::{SecurityAuditLog, SecurityAuditService};
use crate::services::store::{bounded, CredentialStore};
use crate::utils::secrets::constant_time_eq;

const ACCESS: &str = "access";
const REFRESH: &str = "refresh";

/// Claims for access tokens (short-lived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenClaims {
    /// Principal id
    pub sub: Uuid,
    pub tenant_id: Uuid,
    /// Role ids at issuance. Advisory only; authorization resolves roles live.
    pub roles: Vec<Uuid>,
    /// Session id
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub iss: String,
    pub typ: String,
}

/// Claims for refresh tokens (long-lived, single use).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub iss: String,
    pub typ: String,
}

/// Token pair returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub session_id: Uuid,
}

/// PEM material for one signing key.
#[derive(Clone)]
pub struct KeyMaterial {
    pub kid: String,
    pub private_pem: String,
    pub public_pem: String,
}

impl KeyMaterial {
    /// Load the active key pair named by the JWT config.
    pub fn from_config(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        Self::from_files(
            &config.key_id,
            &config.private_key_path,
            &config.public_key_path,
        )
    }

    pub fn from_files(
        kid: &str,
        private_key_path: &str,
        public_key_path: &str,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            kid: kid.to_string(),
            private_pem: read_pem(private_key_path)?,
            public_pem: read_pem(public_key_path)?,
        })
    }
}

fn read_pem(path: &str) -> Result<String, anyhow::Error> {
    fs::read_to_string(path).map_err(|e| anyhow::anyhow!("Failed to read key from {}: {}", path, e))
}

/// Public half of a signing key, as published at `/.well-known/jwks.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    fn from_public_key(kid: &str, key: &RsaPublicKey) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: "RS256".to_string(),
            key_use: "sig".to_string(),
            kid: kid.to_string(),
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }
    }
}

fn parse_public(pem: &str) -> Result<RsaPublicKey, AuthError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AuthError::SigningError(format!("invalid public key: {}", e)))
}

fn parse_private(pem: &str) -> Result<RsaPrivateKey, AuthError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AuthError::SigningError(format!("invalid private key: {}", e)))
}

struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Jwk,
}

impl SigningKey {
    fn load(material: &KeyMaterial) -> Result<Self, AuthError> {
        let private = parse_private(&material.private_pem)?;
        let public = parse_public(&material.public_pem)?;
        if RsaPublicKey::from(&private) != public {
            return Err(AuthError::SigningError(format!(
                "public key does not match private key for kid {}",
                material.kid
            )));
        }

        let encoding = EncodingKey::from_rsa_pem(material.private_pem.as_bytes())
            .map_err(|e| AuthError::SigningError(format!("failed to parse private key: {}", e)))?;

        Ok(Self {
            kid: material.kid.clone(),
            encoding,
            decoding: decoding_key(&material.public_pem)?,
            jwk: Jwk::from_public_key(&material.kid, &public),
        })
    }
}

fn decoding_key(public_pem: &str) -> Result<DecodingKey, AuthError> {
    DecodingKey::from_rsa_pem(public_pem.as_bytes())
        .map_err(|e| AuthError::SigningError(format!("failed to parse public key: {}", e)))
}

struct RetiredKey {
    kid: String,
    decoding: DecodingKey,
    jwk: Jwk,
    access_until: DateTime<Utc>,
}

/// Active signing key plus the most recently retired one.
#[derive(Default)]
pub struct KeyRing {
    active: Option<SigningKey>,
    previous: Option<RetiredKey>,
}

impl KeyRing {
    /// A ring with no signing key. Issuance fails with `SigningError`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_active(material: &KeyMaterial) -> Result<Self, AuthError> {
        Ok(Self {
            active: Some(SigningKey::load(material)?),
            previous: None,
        })
    }

    /// Active key from the config, plus the configured previous public key
    /// when one is still inside its grace period.
    pub fn from_config(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let mut ring = Self::with_active(&KeyMaterial::from_config(config)?)?;

        if let (Some(kid), Some(path)) = (&config.previous_key_id, &config.previous_public_key_path)
        {
            let pem = read_pem(path)?;
            let public = parse_public(&pem)?;
            ring.previous = Some(RetiredKey {
                kid: kid.clone(),
                decoding: decoding_key(&pem)?,
                jwk: Jwk::from_public_key(kid, &public),
                access_until: Utc::now() + Duration::minutes(config.rotation_grace_minutes),
            });
        }

        tracing::info!(
            kid = %config.key_id,
            previous = ?config.previous_key_id,
            "Signing keys loaded"
        );
        Ok(ring)
    }

    /// Install a new active key. The old active key is retired and accepted
    /// for access tokens until `now + grace`.
    pub fn rotate(
        &mut self,
        material: &KeyMaterial,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let next = SigningKey::load(material)?;
        if self.active.as_ref().is_some_and(|k| k.kid == next.kid) {
            return Err(AuthError::Conflict(format!("kid {} is already active", next.kid)));
        }

        if let Some(old) = self.active.replace(next) {
            self.previous = Some(RetiredKey {
                kid: old.kid,
                decoding: old.decoding,
                jwk: old.jwk,
                access_until: now + grace,
            });
        }
        Ok(())
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        let key = self
            .active
            .as_ref()
            .ok_or_else(|| AuthError::SigningError("no active signing key".to_string()))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        encode(&header, claims, &key.encoding)
            .map_err(|e| AuthError::SigningError(format!("failed to encode token: {}", e)))
    }

    /// Pick the verification key for `kid`. The retired key only counts for
    /// access tokens while `now` is inside its grace period.
    fn decoding_for(
        &self,
        kid: Option<&str>,
        typ: &str,
        now: DateTime<Utc>,
    ) -> Option<&DecodingKey> {
        let active = self.active.as_ref();
        match kid {
            None => active.map(|k| &k.decoding),
            Some(kid) if active.is_some_and(|k| k.kid == kid) => active.map(|k| &k.decoding),
            Some(kid) => self
                .previous
                .as_ref()
                .filter(|p| p.kid == kid && (typ == REFRESH || now < p.access_until))
                .map(|p| &p.decoding),
        }
    }

    fn jwks(&self, now: DateTime<Utc>) -> Jwks {
        let mut keys: Vec<Jwk> = self.active.iter().map(|k| k.jwk.clone()).collect();
        if let Some(previous) = self.previous.as_ref().filter(|p| now < p.access_until) {
            keys.push(previous.jwk.clone());
        }
        Jwks { keys }
    }
}

/// Lifetimes and limits the token service runs with.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub rotation_grace: Duration,
    /// Sessions idle longer than this cannot be refreshed.
    pub idle_timeout: Option<Duration>,
    pub backend_timeout: std::time::Duration,
}

impl TokenSettings {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            issuer: config.jwt.issuer.clone(),
            access_ttl: Duration::minutes(config.jwt.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.jwt.refresh_token_expiry_days),
            rotation_grace: Duration::minutes(config.jwt.rotation_grace_minutes),
            idle_timeout: config.session.idle_timeout_minutes.map(Duration::minutes),
            backend_timeout: config.backend_timeout(),
        }
    }
}

struct Minted {
    pair: TokenPair,
    rotation: RefreshRotation,
}

/// Token service. Cloning shares the key ring.
#[derive(Clone)]
pub struct TokenService {
    keys: Arc<RwLock<KeyRing>>,
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    audit: SecurityAuditService,
    settings: TokenSettings,
}

impl TokenService {
    pub fn new(
        keys: KeyRing,
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
        audit: SecurityAuditService,
        settings: TokenSettings,
    ) -> Self {
        Self {
            keys: Arc::new(RwLock::new(keys)),
            sessions,
            credentials,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.settings.access_ttl.num_seconds()
    }

    fn with_keys<T>(&self, f: impl FnOnce(&KeyRing) -> T) -> Result<T, AuthError> {
        let ring = self
            .keys
            .read()
            .map_err(|_| AuthError::Internal("key ring lock poisoned".to_string()))?;
        Ok(f(&ring))
    }

    fn mint(
        &self,
        principal: &Principal,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Minted, AuthError> {
        let access_exp = now + self.settings.access_ttl;
        let refresh_exp = now + self.settings.refresh_ttl;
        let access_jti = Uuid::new_v4().to_string();

        let access = AccessTokenClaims {
            sub: principal.principal_id,
            tenant_id: principal.tenant_id,
            roles: principal.roles.iter().copied().collect(),
            sid: session_id,
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
            jti: access_jti.clone(),
            iss: self.settings.issuer.clone(),
            typ: ACCESS.to_string(),
        };
        let refresh = RefreshTokenClaims {
            sub: principal.principal_id,
            sid: session_id,
            iat: now.timestamp(),
            exp: refresh_exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.settings.issuer.clone(),
            typ: REFRESH.to_string(),
        };

        let (access_token, refresh_token) =
            self.with_keys(|ring| Ok::<_, AuthError>((ring.sign(&access)?, ring.sign(&refresh)?)))??;

        Ok(Minted {
            rotation: RefreshRotation {
                new_hash: Session::hash_token(&refresh_token),
                access_jti,
                access_expiry_utc: access_exp,
                expiry_utc: refresh_exp,
                seen_utc: now,
            },
            pair: TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.settings.access_ttl.num_seconds(),
                session_id,
            },
        })
    }

    async fn swap(
        &self,
        session: &Session,
        minted: Minted,
    ) -> Result<TokenPair, AuthError> {
        let outcome = bounded(
            self.settings.backend_timeout,
            self.sessions.compare_and_swap_refresh(
                session.session_id,
                session.version,
                &session.refresh_token_hash,
                &minted.rotation,
            ),
        )
        .await?;

        match outcome {
            SwapOutcome::Swapped => Ok(minted.pair),
            SwapOutcome::Conflict => Err(AuthError::ConcurrentRotation),
            SwapOutcome::Missing => Err(AuthError::TokenRevoked),
        }
    }

    /// Mint the first token pair of a freshly created session.
    pub async fn issue_token_pair(
        &self,
        principal: &Principal,
        session: &Session,
    ) -> Result<TokenPair, AuthError> {
        let minted = self.mint(principal, session.session_id, Utc::now())?;
        let pair = self.swap(session, minted).await?;
        tracing::info!(
            principal_id = %principal.principal_id,
            session_id = %session.session_id,
            "Issued token pair"
        );
        Ok(pair)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        token: &str,
        typ: &str,
        now: DateTime<Utc>,
    ) -> Result<T, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::TokenMalformed)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::TokenMalformed);
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        self.with_keys(|ring| {
            let key = ring
                .decoding_for(header.kid.as_deref(), typ, now)
                .ok_or(AuthError::TokenMalformed)?;
            decode::<T>(token, key, &validation)
                .map(|data| data.claims)
                .map_err(|e| match e.kind() {
                    JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::TokenMalformed,
                })
        })?
    }

    /// Signature, issuer and expiry checks only. No revocation lookup.
    pub fn decode_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let claims: AccessTokenClaims = self.decode(token, ACCESS, Utc::now())?;
        if claims.typ != ACCESS {
            return Err(AuthError::TokenMalformed);
        }
        Ok(claims)
    }

    /// Full verification: signature, expiry, and neither the `jti` nor the
    /// session id in the revocation set. A revocation lookup that fails or
    /// times out rejects the token.
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let result = self.verify_inner(token).await;
        metrics::record_verify(&result);
        result
    }

    async fn verify_inner(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let claims = self.decode_access_token(token)?;
        let sid = claims.sid.to_string();
        let revoked = bounded(
            self.settings.backend_timeout,
            self.sessions.any_revoked(&[claims.jti.as_str(), sid.as_str()]),
        )
        .await?;

        if revoked {
            tracing::debug!(jti = %claims.jti, session_id = %claims.sid, "Revoked token presented");
            return Err(AuthError::TokenRevoked);
        }
        Ok(claims)
    }

    /// Redeem a refresh token, taking the session id from its claims.
    pub async fn refresh(&self, presented: &str) -> Result<TokenPair, AuthError> {
        let result = match self.decode::<RefreshTokenClaims>(presented, REFRESH, Utc::now()) {
            Ok(claims) if claims.typ == REFRESH => {
                self.rotate_inner(claims.sid, presented).await
            }
            Ok(_) => Err(AuthError::TokenMalformed),
            Err(e) => Err(e),
        };
        metrics::record_refresh(&result);
        result
    }

    /// Single-use refresh rotation for `session_id`.
    ///
    /// A presented token whose hash is not the one stored on the session is a
    /// replay of a rotated-out token: the whole session is revoked and
    /// `TokenReuseDetected` returned. Two redemptions racing on the current
    /// token are settled by the store's compare-and-swap; the loser gets
    /// `ConcurrentRotation`.
    pub async fn rotate_refresh_token(
        &self,
        session_id: Uuid,
        presented: &str,
    ) -> Result<TokenPair, AuthError> {
        let result = match self.decode::<RefreshTokenClaims>(presented, REFRESH, Utc::now()) {
            Ok(claims) if claims.typ == REFRESH && claims.sid == session_id => {
                self.rotate_inner(session_id, presented).await
            }
            Ok(_) => Err(AuthError::TokenMalformed),
            Err(e) => Err(e),
        };
        metrics::record_refresh(&result);
        result
    }

    async fn rotate_inner(&self, session_id: Uuid, presented: &str) -> Result<TokenPair, AuthError> {
        let timeout = self.settings.backend_timeout;
        let now = Utc::now();

        let Some(session) = bounded(timeout, self.sessions.get_session(session_id)).await? else {
            return Err(AuthError::TokenRevoked);
        };

        if session.is_expired(now) {
            self.revoke_session(session_id).await?;
            return Err(AuthError::TokenExpired);
        }

        if let Some(idle) = self.settings.idle_timeout {
            if now - session.last_seen_utc > idle {
                tracing::info!(session_id = %session_id, "Session idle timeout exceeded");
                self.revoke_session(session_id).await?;
                return Err(AuthError::TokenExpired);
            }
        }

        let presented_hash = Session::hash_token(presented);
        if !constant_time_eq(&presented_hash, &session.refresh_token_hash) {
            self.revoke_session(session_id).await?;
            metrics::record_token_reuse();
            self.audit.log_async(SecurityAuditLog::token_reuse(
                session.principal_id,
                session.tenant_id,
                session_id,
            ));
            tracing::warn!(
                principal_id = %session.principal_id,
                session_id = %session_id,
                "Refresh token reuse detected, session revoked"
            );
            return Err(AuthError::TokenReuseDetected);
        }

        let principal = bounded(timeout, self.credentials.find_principal(session.principal_id))
            .await?
            .filter(|p| p.status == PrincipalStatus::Active);
        let Some(principal) = principal else {
            self.revoke_session(session_id).await?;
            return Err(AuthError::TokenRevoked);
        };

        let minted = self.mint(&principal, session_id, now)?;
        let pair = self.swap(&session, minted).await?;
        tracing::debug!(session_id = %session_id, version = session.version + 1, "Refresh token rotated");
        Ok(pair)
    }

    /// Delete the session and revoke its id and current access token.
    /// Returns false if the session did not exist.
    pub async fn revoke_session(&self, session_id: Uuid) -> Result<bool, AuthError> {
        let removed = bounded(
            self.settings.backend_timeout,
            self.sessions.revoke_session(session_id),
        )
        .await?;
        if removed.is_some() {
            tracing::info!(session_id = %session_id, "Session revoked");
        }
        Ok(removed.is_some())
    }

    /// Revoke every live session of a principal. Returns how many were revoked.
    pub async fn revoke_all_for_principal(&self, principal_id: Uuid) -> Result<usize, AuthError> {
        let sessions = bounded(
            self.settings.backend_timeout,
            self.sessions.list_sessions(principal_id),
        )
        .await?;

        let mut revoked = 0;
        for session in sessions {
            if self.revoke_session(session.session_id).await? {
                revoked += 1;
            }
        }
        tracing::info!(principal_id = %principal_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    /// Install a new active signing key with the configured grace period.
    pub fn rotate_signing_key(&self, material: &KeyMaterial) -> Result<(), AuthError> {
        self.rotate_signing_key_with_grace(material, self.settings.rotation_grace)
    }

    pub fn rotate_signing_key_with_grace(
        &self,
        material: &KeyMaterial,
        grace: Duration,
    ) -> Result<(), AuthError> {
        let mut ring = self
            .keys
            .write()
            .map_err(|_| AuthError::Internal("key ring lock poisoned".to_string()))?;
        ring.rotate(material, grace, Utc::now())?;
        tracing::info!(kid = %material.kid, grace_secs = grace.num_seconds(), "Signing key rotated");
        Ok(())
    }

    /// Public keys currently accepted for access tokens.
    pub fn jwks(&self) -> Result<Jwks, AuthError> {
        self.with_keys(|ring| ring.jwks(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryStore;
    use crate::services::redis::InMemorySessionStore;

    pub(crate) fn key_a() -> KeyMaterial {
        KeyMaterial {
            kid: "key-a".to_string(),
            private_pem: include_str!("../../tests/fixtures/signing_a.pem").to_string(),
            public_pem: include_str!("../../tests/fixtures/signing_a.pub.pem").to_string(),
        }
    }

    pub(crate) fn key_b() -> KeyMaterial {
        KeyMaterial {
            kid: "key-b".to_string(),
            private_pem: include_str!("../../tests/fixtures/signing_b.pem").to_string(),
            public_pem: include_str!("../../tests/fixtures/signing_b.pub.pem").to_string(),
        }
    }

    fn settings() -> TokenSettings {
        TokenSettings {
            issuer: "auth-core-test".to_string(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            rotation_grace: Duration::minutes(60),
            idle_timeout: None,
            backend_timeout: std::time::Duration::from_secs(2),
        }
    }

    async fn service_with(ring: KeyRing) -> (TokenService, Arc<InMemorySessionStore>, Principal) {
        let store = Arc::new(InMemoryStore::new());
        let sessions = Arc::new(InMemorySessionStore::default());
        let principal = Principal::new(Uuid::new_v4(), "alice".to_string(), "hash".to_string());
        store.insert_principal(&principal).await.unwrap();

        let tokens = TokenService::new(
            ring,
            sessions.clone(),
            store,
            SecurityAuditService::default(),
            settings(),
        );
        (tokens, sessions, principal)
    }

    async fn service() -> (TokenService, Arc<InMemorySessionStore>, Principal) {
        service_with(KeyRing::with_active(&key_a()).unwrap()).await
    }

    async fn login(
        tokens: &TokenService,
        sessions: &InMemorySessionStore,
        principal: &Principal,
    ) -> TokenPair {
        let session = sessions
            .create_session(principal.principal_id, principal.tenant_id, "test")
            .await
            .unwrap();
        tokens.issue_token_pair(principal, &session).await.unwrap()
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let (tokens, sessions, principal) = service().await;
        let pair = login(&tokens, &sessions, &principal).await;

        let first = tokens.verify_access_token(&pair.access_token).await.unwrap();
        let second = tokens.verify_access_token(&pair.access_token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sub, principal.principal_id);
        assert_eq!(first.sid, pair.session_id);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (tokens, _, principal) = service().await;
        let past = Utc::now() - Duration::hours(1);
        let minted = tokens.mint(&principal, Uuid::new_v4(), past).unwrap();

        assert!(matches!(
            tokens.verify_access_token(&minted.pair.access_token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_malformed_inputs() {
        let (tokens, sessions, principal) = service().await;
        let pair = login(&tokens, &sessions, &principal).await;

        for bad in ["", "not-a-jwt", "a.b.c"] {
            assert!(matches!(
                tokens.verify_access_token(bad).await,
                Err(AuthError::TokenMalformed)
            ));
        }

        // A refresh token is not an access token
        assert!(matches!(
            tokens.verify_access_token(&pair.refresh_token).await,
            Err(AuthError::TokenMalformed)
        ));

        // Access payload under the refresh token's signature
        let access: Vec<&str> = pair.access_token.split('.').collect();
        let refresh: Vec<&str> = pair.refresh_token.split('.').collect();
        let spliced = format!("{}.{}.{}", access[0], access[1], refresh[2]);
        assert!(matches!(
            tokens.verify_access_token(&spliced).await,
            Err(AuthError::TokenMalformed)
        ));
    }

    #[tokio::test]
    async fn test_no_signing_key() {
        let (tokens, sessions, principal) = service_with(KeyRing::empty()).await;
        let session = sessions
            .create_session(principal.principal_id, principal.tenant_id, "test")
            .await
            .unwrap();
        assert!(matches!(
            tokens.issue_token_pair(&principal, &session).await,
            Err(AuthError::SigningError(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_then_reuse_revokes_session() {
        let (tokens, sessions, principal) = service().await;
        let first = login(&tokens, &sessions, &principal).await;

        let second = tokens
            .rotate_refresh_token(first.session_id, &first.refresh_token)
            .await
            .unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(tokens.verify_access_token(&second.access_token).await.is_ok());

        assert!(matches!(
            tokens
                .rotate_refresh_token(first.session_id, &first.refresh_token)
                .await,
            Err(AuthError::TokenReuseDetected)
        ));
        assert!(matches!(
            tokens.verify_access_token(&second.access_token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            tokens.refresh(&second.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_refresh_bound_to_session() {
        let (tokens, sessions, principal) = service().await;
        let pair = login(&tokens, &sessions, &principal).await;
        assert!(matches!(
            tokens
                .rotate_refresh_token(Uuid::new_v4(), &pair.refresh_token)
                .await,
            Err(AuthError::TokenMalformed)
        ));
    }

    #[tokio::test]
    async fn test_disabled_principal_cannot_refresh() {
        let (tokens, sessions, principal) = service().await;
        let pair = login(&tokens, &sessions, &principal).await;
        tokens
            .credentials
            .set_status(principal.principal_id, PrincipalStatus::Disabled)
            .await
            .unwrap();

        assert!(matches!(
            tokens.refresh(&pair.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(sessions.get_session(pair.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idle_session_cannot_refresh() {
        let (mut tokens, sessions, principal) = service().await;
        tokens.settings.idle_timeout = Some(Duration::milliseconds(1));
        let pair = login(&tokens, &sessions, &principal).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(
            tokens.refresh(&pair.refresh_token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_revoke_session_rejects_access_token() {
        let (tokens, sessions, principal) = service().await;
        let pair = login(&tokens, &sessions, &principal).await;

        assert!(tokens.revoke_session(pair.session_id).await.unwrap());
        assert!(matches!(
            tokens.verify_access_token(&pair.access_token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(!tokens.revoke_session(pair.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_for_principal() {
        let (tokens, sessions, principal) = service().await;
        let a = login(&tokens, &sessions, &principal).await;
        let b = login(&tokens, &sessions, &principal).await;

        assert_eq!(tokens.revoke_all_for_principal(principal.principal_id).await.unwrap(), 2);
        for pair in [a, b] {
            assert!(tokens.verify_access_token(&pair.access_token).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_key_rotation_grace() {
        let (tokens, sessions, principal) = service().await;
        let old = login(&tokens, &sessions, &principal).await;

        tokens.rotate_signing_key(&key_b()).unwrap();
        assert!(tokens.verify_access_token(&old.access_token).await.is_ok());
        let kids: Vec<String> = tokens.jwks().unwrap().keys.into_iter().map(|k| k.kid).collect();
        assert_eq!(kids, vec!["key-b".to_string(), "key-a".to_string()]);

        let new = login(&tokens, &sessions, &principal).await;
        let header = decode_header(&new.access_token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("key-b"));
    }

    #[tokio::test]
    async fn test_retired_key_past_grace() {
        let (tokens, sessions, principal) = service().await;
        let old = login(&tokens, &sessions, &principal).await;

        tokens
            .rotate_signing_key_with_grace(&key_b(), Duration::zero())
            .unwrap();
        assert!(matches!(
            tokens.verify_access_token(&old.access_token).await,
            Err(AuthError::TokenMalformed)
        ));
        assert_eq!(tokens.jwks().unwrap().keys.len(), 1);

        // Refresh tokens signed by the retired key still redeem
        assert!(tokens.refresh(&old.refresh_token).await.is_ok());
    }

    #[test]
    fn test_mismatched_key_pair_rejected() {
        let mut material = key_a();
        material.public_pem = key_b().public_pem;
        assert!(matches!(
            KeyRing::with_active(&material),
            Err(AuthError::SigningError(_))
        ));
    }

    #[test]
    fn test_jwk_encoding() {
        let ring = KeyRing::with_active(&key_a()).unwrap();
        let jwks = ring.jwks(Utc::now());
        assert_eq!(jwks.keys.len(), 1);
        let jwk = &jwks.keys[0];
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.e, "AQAB");
        assert!(!jwk.n.contains('='));
    }
}
