//! Persistence seams. Postgres (`Database`) and in-memory (`InMemoryStore`)
//! implement the durable stores; sessions and revocations live in
//! `SessionStore` (Redis or in-memory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{
    ApiKey, FailedLogin, LockoutPolicy, MfaEnrollment, Principal, PrincipalStatus, Role,
};
use crate::services::error::AuthError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with `Conflict` when the username is taken within the tenant.
    async fn insert_principal(&self, principal: &Principal) -> Result<(), AuthError>;
    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, AuthError>;
    async fn find_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<Principal>, AuthError>;
    /// Overwrite failed attempts, lockout count and lock expiry. Used for
    /// resets; failures go through `record_failed_attempt`.
    async fn update_lockout(&self, principal: &Principal) -> Result<(), AuthError>;
    /// Apply one failed attempt to the stored record atomically, so parallel
    /// failures across requests and instances all count.
    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailedLogin, AuthError>;
    async fn update_credential(
        &self,
        principal_id: Uuid,
        credential_hash: &str,
    ) -> Result<(), AuthError>;
    async fn set_status(&self, principal_id: Uuid, status: PrincipalStatus)
        -> Result<(), AuthError>;
    async fn grant_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError>;
    async fn revoke_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError>;

    async fn get_mfa_enrollment(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<MfaEnrollment>, AuthError>;
    async fn put_mfa_enrollment(&self, enrollment: &MfaEnrollment) -> Result<(), AuthError>;
    async fn delete_mfa_enrollment(&self, principal_id: Uuid) -> Result<(), AuthError>;
    /// Atomically remove a backup code hash. True only for the first caller.
    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, AuthError>;

    async fn health_check(&self) -> Result<(), AuthError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn insert_role(&self, role: &Role) -> Result<(), AuthError>;
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthError>;
    /// `tenant_id` of `None` looks up system roles.
    async fn find_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, AuthError>;
    /// Unknown ids are skipped.
    async fn find_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, AuthError>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), AuthError>;
    async fn find_key(&self, key_id: Uuid) -> Result<Option<ApiKey>, AuthError>;
    async fn list_keys(&self, principal_id: Uuid) -> Result<Vec<ApiKey>, AuthError>;
    /// Returns false when no unrevoked key with that id belongs to the principal.
    async fn revoke_key(
        &self,
        principal_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AuthError>;
    async fn touch_key(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;
}

/// Run a backend call under a deadline; timeouts become `BackendUnavailable`.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    tokio::time::timeout(timeout, fut).await?
}

/// Detached backend write under the same deadline as a foreground call.
pub fn spawn_bounded<F>(timeout: Duration, task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), AuthError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = bounded(timeout, fut).await {
            tracing::warn!(error = %e, task, "Background store write failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), AuthError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, AuthError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_spawn_bounded_gives_up_on_hung_backend() {
        let handle = spawn_bounded(
            Duration::from_millis(10),
            "touch",
            std::future::pending::<Result<(), AuthError>>(),
        );
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("background task outlived its deadline")
            .unwrap();
    }
}
