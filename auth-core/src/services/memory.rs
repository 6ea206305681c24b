//! In-memory implementation of the durable stores, for tests and
//! single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{
    ApiKey, FailedLogin, LockoutPolicy, MfaEnrollment, Principal, PrincipalStatus, Role,
};
use crate::services::error::AuthError;
use crate::services::store::{ApiKeyStore, CredentialStore, RoleStore};

#[derive(Default)]
pub struct InMemoryStore {
    principals: DashMap<Uuid, Principal>,
    /// (tenant, lowercased username) -> principal id
    usernames: DashMap<(Uuid, String), Uuid>,
    roles: DashMap<Uuid, Role>,
    api_keys: DashMap<Uuid, ApiKey>,
    mfa: DashMap<Uuid, MfaEnrollment>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_principal<T>(
        &self,
        principal_id: Uuid,
        f: impl FnOnce(&mut Principal) -> T,
    ) -> Result<T, AuthError> {
        let mut principal = self
            .principals
            .get_mut(&principal_id)
            .ok_or_else(|| AuthError::NotFound(format!("principal {}", principal_id)))?;
        let out = f(&mut principal);
        principal.updated_utc = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn insert_principal(&self, principal: &Principal) -> Result<(), AuthError> {
        let key = (principal.tenant_id, principal.username.to_lowercase());
        match self.usernames.entry(key) {
            Entry::Occupied(_) => Err(AuthError::Conflict("username already taken".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(principal.principal_id);
                self.principals
                    .insert(principal.principal_id, principal.clone());
                Ok(())
            }
        }
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, AuthError> {
        Ok(self.principals.get(&principal_id).map(|p| p.value().clone()))
    }

    async fn find_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<Principal>, AuthError> {
        let id = self
            .usernames
            .get(&(tenant_id, username.to_lowercase()))
            .map(|id| *id);
        match id {
            Some(id) => self.find_principal(id).await,
            None => Ok(None),
        }
    }

    async fn update_lockout(&self, principal: &Principal) -> Result<(), AuthError> {
        self.with_principal(principal.principal_id, |p| {
            p.failed_attempts = principal.failed_attempts;
            p.lockout_count = principal.lockout_count;
            p.locked_until = principal.locked_until;
        })
    }

    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailedLogin, AuthError> {
        // The shard write lock is held across the read-modify-write
        self.with_principal(principal_id, |p| p.apply_failed_login(policy, now))
    }

    async fn update_credential(
        &self,
        principal_id: Uuid,
        credential_hash: &str,
    ) -> Result<(), AuthError> {
        self.with_principal(principal_id, |p| {
            p.credential_hash = credential_hash.to_string();
        })
    }

    async fn set_status(
        &self,
        principal_id: Uuid,
        status: PrincipalStatus,
    ) -> Result<(), AuthError> {
        self.with_principal(principal_id, |p| p.status = status)
    }

    async fn grant_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        self.with_principal(principal_id, |p| {
            p.roles.insert(role_id);
        })
    }

    async fn revoke_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        self.with_principal(principal_id, |p| {
            p.roles.remove(&role_id);
        })
    }

    async fn get_mfa_enrollment(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<MfaEnrollment>, AuthError> {
        Ok(self.mfa.get(&principal_id).map(|e| e.value().clone()))
    }

    async fn put_mfa_enrollment(&self, enrollment: &MfaEnrollment) -> Result<(), AuthError> {
        self.mfa.insert(enrollment.principal_id, enrollment.clone());
        Ok(())
    }

    async fn delete_mfa_enrollment(&self, principal_id: Uuid) -> Result<(), AuthError> {
        self.mfa.remove(&principal_id);
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, AuthError> {
        Ok(self
            .mfa
            .get_mut(&principal_id)
            .map(|mut e| e.backup_code_hashes.remove(code_hash))
            .unwrap_or(false))
    }

    async fn health_check(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn insert_role(&self, role: &Role) -> Result<(), AuthError> {
        let duplicate = self
            .roles
            .iter()
            .any(|r| r.tenant_id == role.tenant_id && r.name == role.name);
        if duplicate {
            return Err(AuthError::Conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        self.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthError> {
        Ok(self.roles.get(&role_id).map(|r| r.value().clone()))
    }

    async fn find_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, AuthError> {
        Ok(self
            .roles
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.name == name)
            .map(|r| r.value().clone()))
    }

    async fn find_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, AuthError> {
        Ok(role_ids
            .iter()
            .filter_map(|id| self.roles.get(id).map(|r| r.value().clone()))
            .collect())
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), AuthError> {
        self.api_keys.insert(key.key_id, key.clone());
        Ok(())
    }

    async fn find_key(&self, key_id: Uuid) -> Result<Option<ApiKey>, AuthError> {
        Ok(self.api_keys.get(&key_id).map(|k| k.value().clone()))
    }

    async fn list_keys(&self, principal_id: Uuid) -> Result<Vec<ApiKey>, AuthError> {
        let mut keys: Vec<ApiKey> = self
            .api_keys
            .iter()
            .filter(|k| k.principal_id == principal_id)
            .map(|k| k.value().clone())
            .collect();
        keys.sort_by_key(|k| k.created_utc);
        Ok(keys)
    }

    async fn revoke_key(
        &self,
        principal_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        match self.api_keys.get_mut(&key_id) {
            Some(mut key) if key.principal_id == principal_id && key.revoked_utc.is_none() => {
                key.revoked_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_key(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(mut key) = self.api_keys.get_mut(&key_id) {
            key.last_used_utc = Some(at);
        }
        Ok(())
    }
}
