//! Authorization engine. Default deny: a request is allowed only when some
//! role the principal holds in the tenant grants the permission, exactly or
//! through a `resource:*` wildcard. The system `superadmin` role allows
//! everything in every tenant.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{
    effective_permissions, parse_permissions, Permission, PermissionSet, Principal, Role,
    SUPERADMIN_ROLE,
};
use crate::services::error::AuthError;
use crate::services::metrics;
use crate::services::store::{bounded, CredentialStore, RoleStore};
use crate::services::token::AccessTokenClaims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Clone)]
pub struct AuthorizationEngine {
    credentials: Arc<dyn CredentialStore>,
    roles: Arc<dyn RoleStore>,
    timeout: Duration,
}

impl AuthorizationEngine {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        roles: Arc<dyn RoleStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            roles,
            timeout,
        }
    }

    async fn active_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, AuthError> {
        Ok(bounded(self.timeout, self.credentials.find_principal(principal_id))
            .await?
            .filter(Principal::is_active))
    }

    async fn permissions_for_roles(
        &self,
        role_ids: &[Uuid],
        tenant_id: Uuid,
    ) -> Result<PermissionSet, AuthError> {
        let roles = bounded(self.timeout, self.roles.find_roles(role_ids)).await?;
        Ok(effective_permissions(&roles, tenant_id))
    }

    /// Live permission set of a principal within a tenant. Disabled or
    /// unknown principals have none.
    pub async fn effective_permissions(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<PermissionSet, AuthError> {
        let Some(principal) = self.active_principal(principal_id).await? else {
            return Ok(PermissionSet::default());
        };
        let role_ids: Vec<Uuid> = principal.roles.iter().copied().collect();
        self.permissions_for_roles(&role_ids, tenant_id).await
    }

    /// Live decision: roles are read from the credential store on every call,
    /// so a revoked role is effective immediately.
    pub async fn authorize(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
        permission: &Permission,
    ) -> Result<Decision, AuthError> {
        let granted = self.effective_permissions(principal_id, tenant_id).await?;
        Ok(self.decide(&granted, principal_id, tenant_id, permission))
    }

    /// Decision from the token's `roles` claim. Advisory: a role revoked
    /// after issuance still counts until the token expires. Privilege
    /// sensitive checks use [`Self::authorize`].
    pub async fn authorize_claims(
        &self,
        claims: &AccessTokenClaims,
        permission: &Permission,
    ) -> Result<Decision, AuthError> {
        let granted = self
            .permissions_for_roles(&claims.roles, claims.tenant_id)
            .await?;
        Ok(self.decide(&granted, claims.sub, claims.tenant_id, permission))
    }

    fn decide(
        &self,
        granted: &PermissionSet,
        principal_id: Uuid,
        tenant_id: Uuid,
        permission: &Permission,
    ) -> Decision {
        let decision = if granted.covers(permission) {
            Decision::Allow
        } else {
            Decision::Deny
        };
        metrics::record_decision(decision.is_allow());
        tracing::debug!(
            principal_id = %principal_id,
            tenant_id = %tenant_id,
            permission = %permission,
            decision = ?decision,
            "Authorization decision"
        );
        decision
    }

    /// `authorize`, with `Deny` turned into `PermissionDenied`.
    pub async fn require(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
        permission: &Permission,
    ) -> Result<(), AuthError> {
        match self.authorize(principal_id, tenant_id, permission).await? {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(AuthError::PermissionDenied),
        }
    }

    pub async fn create_role(
        &self,
        tenant_id: Uuid,
        name: &str,
        permissions: &[String],
    ) -> Result<Role, AuthError> {
        let name = name.trim();
        if name.is_empty() || name.len() > 64 {
            return Err(AuthError::Validation(
                "role name must be 1-64 characters".to_string(),
            ));
        }
        if name.eq_ignore_ascii_case(SUPERADMIN_ROLE) {
            return Err(AuthError::Validation(format!(
                "'{}' is a reserved role name",
                SUPERADMIN_ROLE
            )));
        }

        let role = Role::new(tenant_id, name.to_string(), parse_permissions(permissions)?);
        bounded(self.timeout, self.roles.insert_role(&role)).await?;
        tracing::info!(role_id = %role.role_id, tenant_id = %tenant_id, name = %role.name, "Role created");
        Ok(role)
    }

    /// The system superadmin role, created on first use.
    pub async fn ensure_superadmin_role(&self) -> Result<Role, AuthError> {
        if let Some(role) =
            bounded(self.timeout, self.roles.find_role_by_name(None, SUPERADMIN_ROLE)).await?
        {
            return Ok(role);
        }

        let role = Role::superadmin();
        match bounded(self.timeout, self.roles.insert_role(&role)).await {
            Ok(()) => {
                tracing::info!(role_id = %role.role_id, "Created superadmin role");
                Ok(role)
            }
            // Another instance created it first
            Err(AuthError::Conflict(_)) => {
                bounded(self.timeout, self.roles.find_role_by_name(None, SUPERADMIN_ROLE))
                    .await?
                    .ok_or_else(|| AuthError::Internal("superadmin role vanished".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Roles are only granted within the principal's own tenant; the
    /// superadmin system role is the exception.
    /// Every role must exist and be usable in `tenant_id`.
    pub async fn check_assignable(
        &self,
        tenant_id: Uuid,
        role_ids: &[Uuid],
    ) -> Result<(), AuthError> {
        if role_ids.is_empty() {
            return Ok(());
        }
        let found = bounded(self.timeout, self.roles.find_roles(role_ids)).await?;
        for role_id in role_ids {
            let role = found
                .iter()
                .find(|r| r.role_id == *role_id)
                .ok_or_else(|| AuthError::NotFound(format!("role {}", role_id)))?;
            if !role.is_superadmin() && !role.applies_to(tenant_id) {
                return Err(AuthError::Validation(
                    "role belongs to another tenant".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub async fn grant_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        let principal = bounded(self.timeout, self.credentials.find_principal(principal_id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("principal {}", principal_id)))?;
        self.check_assignable(principal.tenant_id, &[role_id]).await?;

        bounded(self.timeout, self.credentials.grant_role(principal_id, role_id)).await?;
        tracing::info!(principal_id = %principal_id, role_id = %role_id, "Role granted");
        Ok(())
    }

    pub async fn revoke_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        bounded(self.timeout, self.credentials.revoke_role(principal_id, role_id)).await?;
        tracing::info!(principal_id = %principal_id, role_id = %role_id, "Role revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrincipalStatus;
    use crate::services::memory::InMemoryStore;

    fn perm(raw: &str) -> Permission {
        Permission::parse(raw).unwrap()
    }

    async fn setup() -> (AuthorizationEngine, Arc<InMemoryStore>, Principal) {
        let store = Arc::new(InMemoryStore::new());
        let principal = Principal::new(Uuid::new_v4(), "bob".to_string(), "hash".to_string());
        store.insert_principal(&principal).await.unwrap();
        let engine = AuthorizationEngine::new(store.clone(), store.clone(), Duration::from_secs(1));
        (engine, store, principal)
    }

    #[tokio::test]
    async fn test_default_deny() {
        let (engine, _, p) = setup().await;
        for raw in ["project:read", "project:write", "billing:*"] {
            assert_eq!(
                engine.authorize(p.principal_id, p.tenant_id, &perm(raw)).await.unwrap(),
                Decision::Deny
            );
        }
    }

    #[tokio::test]
    async fn test_exact_and_wildcard_grants() {
        let (engine, _, p) = setup().await;
        let role = engine
            .create_role(
                p.tenant_id,
                "editor",
                &["project:read".to_string(), "docs:*".to_string()],
            )
            .await
            .unwrap();
        engine.grant_role(p.principal_id, role.role_id).await.unwrap();

        let check = |raw: &'static str| {
            let engine = engine.clone();
            async move {
                engine
                    .authorize(p.principal_id, p.tenant_id, &perm(raw))
                    .await
                    .unwrap()
            }
        };
        assert_eq!(check("project:read").await, Decision::Allow);
        assert_eq!(check("project:write").await, Decision::Deny);
        assert_eq!(check("docs:delete").await, Decision::Allow);

        // Same role, other tenant
        assert_eq!(
            engine
                .authorize(p.principal_id, Uuid::new_v4(), &perm("project:read"))
                .await
                .unwrap(),
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn test_revoked_role_denies_immediately() {
        let (engine, _, p) = setup().await;
        let role = engine
            .create_role(p.tenant_id, "reader", &["project:read".to_string()])
            .await
            .unwrap();
        engine.grant_role(p.principal_id, role.role_id).await.unwrap();
        engine.require(p.principal_id, p.tenant_id, &perm("project:read")).await.unwrap();

        engine.revoke_role(p.principal_id, role.role_id).await.unwrap();
        assert!(matches!(
            engine.require(p.principal_id, p.tenant_id, &perm("project:read")).await,
            Err(AuthError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_superadmin_allows_everywhere() {
        let (engine, _, p) = setup().await;
        let role = engine.ensure_superadmin_role().await.unwrap();
        assert_eq!(engine.ensure_superadmin_role().await.unwrap().role_id, role.role_id);
        engine.grant_role(p.principal_id, role.role_id).await.unwrap();

        assert!(engine
            .authorize(p.principal_id, Uuid::new_v4(), &perm("anything:delete"))
            .await
            .unwrap()
            .is_allow());
    }

    #[tokio::test]
    async fn test_disabled_principal_denied() {
        let (engine, store, p) = setup().await;
        let role = engine
            .create_role(p.tenant_id, "reader", &["project:read".to_string()])
            .await
            .unwrap();
        engine.grant_role(p.principal_id, role.role_id).await.unwrap();
        store
            .set_status(p.principal_id, PrincipalStatus::Disabled)
            .await
            .unwrap();

        assert_eq!(
            engine
                .authorize(p.principal_id, p.tenant_id, &perm("project:read"))
                .await
                .unwrap(),
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn test_cross_tenant_grant_rejected() {
        let (engine, _, p) = setup().await;
        let foreign = engine
            .create_role(Uuid::new_v4(), "reader", &["project:read".to_string()])
            .await
            .unwrap();
        assert!(matches!(
            engine.grant_role(p.principal_id, foreign.role_id).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_role_validation() {
        let (engine, _, p) = setup().await;
        assert!(matches!(
            engine.create_role(p.tenant_id, "superadmin", &[]).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            engine
                .create_role(p.tenant_id, "bad", &["Project:Read".to_string()])
                .await,
            Err(AuthError::Validation(_))
        ));
        engine.create_role(p.tenant_id, "dup", &[]).await.unwrap();
        assert!(matches!(
            engine.create_role(p.tenant_id, "dup", &[]).await,
            Err(AuthError::Conflict(_))
        ));
    }
}
