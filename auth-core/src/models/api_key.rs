//! API key model - long-lived, scoped credentials for machine clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

use super::permission::{Permission, PermissionSet};

/// Prefix of every issued secret, so leaked keys are greppable.
pub const API_KEY_PREFIX: &str = "ak_";

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub key_id: Uuid,
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// SHA-256 hex of the secret. The plaintext is never stored.
    pub secret_hash: String,
    pub scopes: BTreeSet<Permission>,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn new(
        principal_id: Uuid,
        tenant_id: Uuid,
        name: String,
        secret_hash: String,
        scopes: BTreeSet<Permission>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key_id: Uuid::new_v4(),
            principal_id,
            tenant_id,
            name,
            secret_hash,
            scopes,
            created_utc: Utc::now(),
            expiry_utc,
            last_used_utc: None,
            revoked_utc: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry_utc, Some(exp) if exp <= now)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    pub fn scope_set(&self) -> PermissionSet {
        PermissionSet::new(self.scopes.clone())
    }
}

/// API key metadata for listing. Never includes the secret or its hash.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyInfo {
    pub key_id: Uuid,
    pub name: String,
    pub scopes: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl From<ApiKey> for ApiKeyInfo {
    fn from(k: ApiKey) -> Self {
        Self {
            key_id: k.key_id,
            name: k.name,
            scopes: k.scopes.iter().map(|s| s.to_string()).collect(),
            created_utc: k.created_utc,
            expiry_utc: k.expiry_utc,
            last_used_utc: k.last_used_utc,
            revoked: k.revoked_utc.is_some(),
        }
    }
}
