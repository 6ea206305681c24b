//! API keys: long-lived secrets with a scope set bounded by the issuer's own
//! permissions. Only a SHA-256 of the secret is stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{parse_permissions, ApiKey, ApiKeyInfo, Permission, PermissionSet, API_KEY_PREFIX};
use crate::services::authz::{AuthorizationEngine, Decision};
use crate::services::error::AuthError;
use crate::services::security_audit::{SecurityAuditLog, SecurityAuditService, SecurityEventType};
use crate::services::store::{bounded, spawn_bounded, ApiKeyStore, CredentialStore};
use crate::utils::secrets::{constant_time_eq, random_token, sha256_hex};

/// Issued key. `secret` is never retrievable again.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub key_id: Uuid,
    pub secret: String,
    pub scopes: Vec<String>,
    pub expiry_utc: Option<DateTime<Utc>>,
}

/// A key that passed verification.
#[derive(Debug, Clone)]
pub struct VerifiedKey {
    pub key_id: Uuid,
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub scopes: PermissionSet,
}

#[derive(Clone)]
pub struct ApiKeyManager {
    keys: Arc<dyn ApiKeyStore>,
    credentials: Arc<dyn CredentialStore>,
    authz: AuthorizationEngine,
    audit: SecurityAuditService,
    timeout: Duration,
}

impl ApiKeyManager {
    pub fn new(
        keys: Arc<dyn ApiKeyStore>,
        credentials: Arc<dyn CredentialStore>,
        authz: AuthorizationEngine,
        audit: SecurityAuditService,
        timeout: Duration,
    ) -> Self {
        Self {
            keys,
            credentials,
            authz,
            audit,
            timeout,
        }
    }

    pub async fn issue_key(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
        name: &str,
        scopes: &[String],
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Result<IssuedKey, AuthError> {
        let scopes = parse_permissions(scopes)?;
        if scopes.is_empty() {
            return Err(AuthError::Validation("at least one scope is required".to_string()));
        }
        if expiry_utc.is_some_and(|exp| exp <= Utc::now()) {
            return Err(AuthError::Validation("expiry must be in the future".to_string()));
        }

        let granted = self.authz.effective_permissions(principal_id, tenant_id).await?;
        if !granted.covers_all(&scopes) {
            let requested: Vec<&str> = scopes.iter().map(Permission::as_str).collect();
            self.audit.log_async(
                SecurityAuditLog::new(
                    SecurityEventType::PrivilegeEscalationAttempt,
                    serde_json::json!({ "action": "issue_api_key", "requested_scopes": requested }),
                )
                .principal(principal_id, tenant_id),
            );
            return Err(AuthError::PermissionDenied);
        }

        let secret = format!("{}{}", API_KEY_PREFIX, random_token(32));
        let key = ApiKey::new(
            principal_id,
            tenant_id,
            name.trim().to_string(),
            sha256_hex(&secret),
            scopes,
            expiry_utc,
        );
        bounded(self.timeout, self.keys.insert_key(&key)).await?;

        tracing::info!(
            key_id = %key.key_id,
            principal_id = %principal_id,
            tenant_id = %tenant_id,
            "API key issued"
        );
        Ok(IssuedKey {
            key_id: key.key_id,
            secret,
            scopes: key.scopes.iter().map(|s| s.to_string()).collect(),
            expiry_utc: key.expiry_utc,
        })
    }

    /// Every failure, whatever the cause, is `InvalidCredentials`.
    pub async fn verify_key(&self, key_id: Uuid, secret: &str) -> Result<VerifiedKey, AuthError> {
        let presented = sha256_hex(secret);
        let key = bounded(self.timeout, self.keys.find_key(key_id)).await?;

        let Some(key) = key else {
            // Same work as a real comparison
            constant_time_eq(&presented, &sha256_hex(""));
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        let matches = constant_time_eq(&presented, &key.secret_hash);
        if !matches || !key.is_usable(now) {
            tracing::debug!(key_id = %key_id, matches, revoked = key.is_revoked(), "API key rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let active = bounded(self.timeout, self.credentials.find_principal(key.principal_id))
            .await?
            .is_some_and(|p| p.is_active() && p.tenant_id == key.tenant_id);
        if !active {
            return Err(AuthError::InvalidCredentials);
        }

        let keys = self.keys.clone();
        spawn_bounded(self.timeout, "api_key_touch", async move {
            keys.touch_key(key_id, now).await
        });

        Ok(VerifiedKey {
            key_id: key.key_id,
            principal_id: key.principal_id,
            tenant_id: key.tenant_id,
            scopes: key.scope_set(),
        })
    }

    /// Allowed only when the key's scopes cover the permission and the owning
    /// principal still holds it.
    pub async fn authorize_key(
        &self,
        key: &VerifiedKey,
        permission: &Permission,
    ) -> Result<Decision, AuthError> {
        if !key.scopes.covers(permission) {
            return Ok(Decision::Deny);
        }
        self.authz
            .authorize(key.principal_id, key.tenant_id, permission)
            .await
    }

    pub async fn revoke_key(&self, principal_id: Uuid, key_id: Uuid) -> Result<(), AuthError> {
        let revoked = bounded(
            self.timeout,
            self.keys.revoke_key(principal_id, key_id, Utc::now()),
        )
        .await?;
        if !revoked {
            return Err(AuthError::NotFound(format!("api key {}", key_id)));
        }
        tracing::info!(key_id = %key_id, principal_id = %principal_id, "API key revoked");
        Ok(())
    }

    pub async fn list_keys(&self, principal_id: Uuid) -> Result<Vec<ApiKeyInfo>, AuthError> {
        let keys = bounded(self.timeout, self.keys.list_keys(principal_id)).await?;
        Ok(keys.into_iter().map(ApiKeyInfo::from).collect())
    }
}
