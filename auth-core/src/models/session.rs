//! Session model - one refresh-token family per login.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: Uuid,
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub created_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    /// SHA-256 of the only refresh token currently valid for this session.
    /// Empty until the first token pair is issued.
    pub refresh_token_hash: String,
    /// Bumped on every successful rotation.
    pub version: u64,
    pub device_fingerprint: String,
    /// jti of the most recently issued access token, revoked with the session.
    pub access_jti: Option<String>,
    pub access_expiry_utc: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        principal_id: Uuid,
        tenant_id: Uuid,
        device_fingerprint: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            principal_id,
            tenant_id,
            created_utc: now,
            last_seen_utc: now,
            expiry_utc: now + ttl,
            refresh_token_hash: String::new(),
            version: 0,
            device_fingerprint,
            access_jti: None,
            access_expiry_utc: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    /// Hash a refresh token using SHA-256
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Flat field list for a Redis hash.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("session_id", self.session_id.to_string()),
            ("principal_id", self.principal_id.to_string()),
            ("tenant_id", self.tenant_id.to_string()),
            ("created_utc", self.created_utc.to_rfc3339()),
            ("last_seen_utc", self.last_seen_utc.to_rfc3339()),
            ("expiry_utc", self.expiry_utc.to_rfc3339()),
            ("refresh_token_hash", self.refresh_token_hash.clone()),
            ("version", self.version.to_string()),
            ("device_fingerprint", self.device_fingerprint.clone()),
        ];
        if let Some(jti) = &self.access_jti {
            fields.push(("access_jti", jti.clone()));
        }
        if let Some(exp) = &self.access_expiry_utc {
            fields.push(("access_expiry_utc", exp.to_rfc3339()));
        }
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, AuthError> {
        fn required<'a>(
            fields: &'a HashMap<String, String>,
            name: &str,
        ) -> Result<&'a str, AuthError> {
            fields.get(name).map(String::as_str).ok_or_else(|| {
                AuthError::BackendUnavailable(format!("session record missing '{}'", name))
            })
        }
        fn uuid(raw: &str) -> Result<Uuid, AuthError> {
            Uuid::parse_str(raw)
                .map_err(|e| AuthError::BackendUnavailable(format!("corrupt session id: {}", e)))
        }
        fn time(raw: &str) -> Result<DateTime<Utc>, AuthError> {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| AuthError::BackendUnavailable(format!("corrupt session time: {}", e)))
        }

        Ok(Self {
            session_id: uuid(required(fields, "session_id")?)?,
            principal_id: uuid(required(fields, "principal_id")?)?,
            tenant_id: uuid(required(fields, "tenant_id")?)?,
            created_utc: time(required(fields, "created_utc")?)?,
            last_seen_utc: time(required(fields, "last_seen_utc")?)?,
            expiry_utc: time(required(fields, "expiry_utc")?)?,
            refresh_token_hash: required(fields, "refresh_token_hash")?.to_string(),
            version: required(fields, "version")?.parse().map_err(|_| {
                AuthError::BackendUnavailable("corrupt session version".to_string())
            })?,
            device_fingerprint: fields
                .get("device_fingerprint")
                .cloned()
                .unwrap_or_default(),
            access_jti: fields.get("access_jti").filter(|s| !s.is_empty()).cloned(),
            access_expiry_utc: fields
                .get("access_expiry_utc")
                .filter(|s| !s.is_empty())
                .map(|s| time(s))
                .transpose()?,
        })
    }
}

/// Session info for API responses.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub device_fingerprint: String,
    pub created_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub is_current: bool,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.session_id,
            device_fingerprint: s.device_fingerprint,
            created_utc: s.created_utc,
            last_seen_utc: s.last_seen_utc,
            expiry_utc: s.expiry_utc,
            is_current: false, // Set by caller
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let a = Session::hash_token("token");
        assert_eq!(a.len(), 64);
        assert_eq!(a, Session::hash_token("token"));
        assert_ne!(a, Session::hash_token("token2"));
    }

    #[test]
    fn test_redis_fields_survive_reload() {
        let mut session = Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "laptop".to_string(),
            Duration::days(30),
        );
        session.refresh_token_hash = Session::hash_token("r1");
        session.version = 3;
        session.access_jti = Some("jti-1".to_string());
        session.access_expiry_utc = Some(session.created_utc + Duration::minutes(15));

        let map: HashMap<String, String> = session
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(Session::from_fields(&map).unwrap(), session);
    }

    #[test]
    fn test_missing_field_is_backend_error() {
        let map = HashMap::new();
        assert!(matches!(
            Session::from_fields(&map),
            Err(AuthError::BackendUnavailable(_))
        ));
    }
}
