use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::dtos::auth::{LoginRequest, VerifyResponse};
use crate::models::{LockoutPolicy, LoginGate, Principal, PrincipalStatus, SessionInfo};
use crate::services::authz::AuthorizationEngine;
use crate::services::error::AuthError;
use crate::services::metrics;
use crate::services::mfa::{MfaSetup, MfaVerifier};
use crate::services::redis::SessionStore;
use crate::services::security_audit::{SecurityAuditLog, SecurityAuditService, SecurityEventType};
use crate::services::store::{bounded, spawn_bounded, CredentialStore};
use crate::services::throttle::LoginThrottle;
use crate::services::token::{AccessTokenClaims, TokenPair, TokenService};
use crate::utils::{ensure_strong_password, hash_password, verify_dummy, verify_password, Password};

/// Argon2 runs on the blocking pool.
async fn check_password(password: Password, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Internal(format!("password task failed: {}", e)))?
}

async fn burn_password(password: Password) {
    let _ = tokio::task::spawn_blocking(move || verify_dummy(&password)).await;
}

async fn new_credential_hash(password: Password) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("password task failed: {}", e)))?
}

/// Login orchestration plus the principal lifecycle around it.
#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    tokens: TokenService,
    mfa: MfaVerifier,
    authz: AuthorizationEngine,
    throttle: LoginThrottle,
    audit: SecurityAuditService,
    lockout: LockoutPolicy,
    timeout: Duration,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        tokens: TokenService,
        mfa: MfaVerifier,
        authz: AuthorizationEngine,
        throttle: LoginThrottle,
        audit: SecurityAuditService,
        lockout: LockoutPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            sessions,
            tokens,
            mfa,
            authz,
            throttle,
            audit,
            lockout,
            timeout,
        }
    }

    pub async fn get_principal(&self, principal_id: Uuid) -> Result<Principal, AuthError> {
        bounded(self.timeout, self.credentials.find_principal(principal_id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("principal {}", principal_id)))
    }

    /// Password (and second factor when enrolled) for a new session.
    ///
    /// Every credential failure the caller sees is one of `InvalidCredentials`,
    /// `AccountLocked`, `MFARequired` or `MFAInvalid`; the security audit log
    /// records the underlying cause.
    pub async fn login(
        &self,
        req: LoginRequest,
        source: Option<IpAddr>,
    ) -> Result<TokenPair, AuthError> {
        let result = self.login_inner(req, source).await;
        metrics::record_login(&result);
        result
    }

    async fn login_inner(
        &self,
        req: LoginRequest,
        source: Option<IpAddr>,
    ) -> Result<TokenPair, AuthError> {
        if let Err(e) = self.throttle.check_login(req.tenant_id, &req.username, source) {
            self.audit.log_async(
                SecurityAuditLog::new(
                    SecurityEventType::BruteForceAttempt,
                    serde_json::json!({ "tenant_id": req.tenant_id, "username": req.username }),
                )
                .ip(source.map(|ip| ip.to_string())),
            );
            return Err(e);
        }

        let password = Password::new(req.password);
        let found = bounded(
            self.timeout,
            self.credentials.find_by_username(req.tenant_id, &req.username),
        )
        .await?;

        let mut principal = match found {
            Some(p) if p.status == PrincipalStatus::Active => p,
            Some(p) => {
                tracing::info!(principal_id = %p.principal_id, "Login attempt for disabled principal");
                burn_password(password).await;
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                burn_password(password).await;
                return Err(AuthError::InvalidCredentials);
            }
        };

        let now = Utc::now();
        match principal.login_gate(now) {
            LoginGate::Locked { until } => {
                tracing::info!(principal_id = %principal.principal_id, locked_until = %until, "Login attempt while locked");
                return Err(AuthError::AccountLocked);
            }
            // An expired lock is cleared in the store by the next recorded
            // failure or success
            LoginGate::Unlocked | LoginGate::Open => {}
        }

        if !check_password(password, principal.credential_hash.clone()).await? {
            self.record_failure(&principal, source).await?;
            return Err(AuthError::InvalidCredentials);
        }

        if self.mfa.is_enrolled(principal.principal_id).await? {
            let code = req.mfa_code.as_deref().map(str::trim).unwrap_or_default();
            if code.is_empty() {
                return Err(AuthError::MfaRequired);
            }
            self.throttle.check_mfa(principal.principal_id)?;

            if !self.mfa.verify_code(principal.principal_id, code).await? {
                self.audit.log_async(
                    SecurityAuditLog::new(SecurityEventType::MfaFailure, serde_json::json!({}))
                        .principal(principal.principal_id, principal.tenant_id)
                        .ip(source.map(|ip| ip.to_string())),
                );
                self.record_failure(&principal, source).await?;
                return Err(AuthError::MfaInvalid);
            }
        }

        if principal.record_successful_login(Utc::now()) {
            bounded(self.timeout, self.credentials.update_lockout(&principal)).await?;
        }

        let fingerprint = req.device_fingerprint.unwrap_or_default();
        let session = bounded(
            self.timeout,
            self.sessions
                .create_session(principal.principal_id, principal.tenant_id, &fingerprint),
        )
        .await?;
        let pair = self.tokens.issue_token_pair(&principal, &session).await?;

        tracing::info!(
            principal_id = %principal.principal_id,
            tenant_id = %principal.tenant_id,
            session_id = %session.session_id,
            "Login succeeded"
        );
        Ok(pair)
    }

    async fn record_failure(
        &self,
        principal: &Principal,
        source: Option<IpAddr>,
    ) -> Result<(), AuthError> {
        let outcome = bounded(
            self.timeout,
            self.credentials
                .record_failed_attempt(principal.principal_id, &self.lockout, Utc::now()),
        )
        .await?;

        if let (true, Some(until)) = (outcome.locked_now, outcome.locked_until) {
            tracing::warn!(
                principal_id = %principal.principal_id,
                lockout_count = outcome.lockout_count,
                locked_until = %until,
                "Account locked"
            );
            self.audit.log_async(
                SecurityAuditLog::account_locked(
                    principal.principal_id,
                    principal.tenant_id,
                    outcome.lockout_count,
                    until,
                )
                .ip(source.map(|ip| ip.to_string())),
            );
        }
        Ok(())
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.tokens.refresh(refresh_token).await
    }

    /// End one of the caller's own sessions. Unknown sessions succeed.
    pub async fn logout(
        &self,
        caller: &AccessTokenClaims,
        session_id: Uuid,
    ) -> Result<(), AuthError> {
        let session = bounded(self.timeout, self.sessions.get_session(session_id)).await?;
        match session {
            Some(s) if s.principal_id != caller.sub => Err(AuthError::PermissionDenied),
            Some(_) => {
                self.tokens.revoke_session(session_id).await?;
                tracing::info!(principal_id = %caller.sub, session_id = %session_id, "Logged out");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Verify an access token and mark its session as seen.
    pub async fn introspect(&self, token: &str) -> Result<VerifyResponse, AuthError> {
        let claims = match self.tokens.verify_access_token(token).await {
            Ok(claims) => claims,
            Err(e) => {
                if matches!(e, AuthError::TokenRevoked) {
                    self.audit.log_async(SecurityAuditLog::new(
                        SecurityEventType::InvalidTokenUsage,
                        serde_json::json!({ "reason": e.kind() }),
                    ));
                }
                return Err(e);
            }
        };

        let sessions = self.sessions.clone();
        let session_id = claims.sid;
        spawn_bounded(self.timeout, "session_touch", async move {
            sessions.touch(session_id, Utc::now()).await
        });

        Ok(VerifyResponse {
            active: true,
            claims,
        })
    }

    /// Create a principal. Roles must belong to the same tenant.
    pub async fn register(
        &self,
        tenant_id: Uuid,
        username: &str,
        password: Password,
        roles: &[Uuid],
    ) -> Result<Principal, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("username is required".to_string()));
        }
        ensure_strong_password(&password)?;

        self.authz.check_assignable(tenant_id, roles).await?;

        let hash = new_credential_hash(password).await?;
        let mut principal = Principal::new(tenant_id, username.to_string(), hash);
        principal.roles.extend(roles.iter().copied());
        bounded(self.timeout, self.credentials.insert_principal(&principal)).await?;

        tracing::info!(
            principal_id = %principal.principal_id,
            tenant_id = %tenant_id,
            "Principal registered"
        );
        Ok(principal)
    }

    /// Create the superadmin principal if the username is free. Returns the
    /// new principal, or `None` when it already existed.
    pub async fn bootstrap_superadmin(
        &self,
        tenant_id: Uuid,
        username: &str,
        password: Password,
    ) -> Result<Option<Principal>, AuthError> {
        if bounded(
            self.timeout,
            self.credentials.find_by_username(tenant_id, username),
        )
        .await?
        .is_some()
        {
            return Ok(None);
        }

        let role = self.authz.ensure_superadmin_role().await?;
        let principal = self
            .register(tenant_id, username, password, &[role.role_id])
            .await?;
        tracing::info!(principal_id = %principal.principal_id, "Bootstrapped superadmin");
        Ok(Some(principal))
    }

    /// Replace the password, clear lockout state and end every session.
    pub async fn change_password(
        &self,
        principal_id: Uuid,
        current: Password,
        new: Password,
    ) -> Result<(), AuthError> {
        let mut principal = self
            .get_principal(principal_id)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;

        if !check_password(current.clone(), principal.credential_hash.clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }
        if current.as_str() == new.as_str() {
            return Err(AuthError::Validation(
                "new password must differ from the current one".to_string(),
            ));
        }
        ensure_strong_password(&new)?;

        let hash = new_credential_hash(new).await?;
        bounded(
            self.timeout,
            self.credentials.update_credential(principal_id, &hash),
        )
        .await?;

        principal.clear_lockout(Utc::now());
        bounded(self.timeout, self.credentials.update_lockout(&principal)).await?;

        let revoked = self.tokens.revoke_all_for_principal(principal_id).await?;
        tracing::info!(principal_id = %principal_id, revoked, "Password changed");
        Ok(())
    }

    /// Soft-disable. The record is kept; every session ends.
    pub async fn disable_principal(&self, principal_id: Uuid) -> Result<(), AuthError> {
        bounded(
            self.timeout,
            self.credentials
                .set_status(principal_id, PrincipalStatus::Disabled),
        )
        .await?;
        let revoked = self.tokens.revoke_all_for_principal(principal_id).await?;
        tracing::info!(principal_id = %principal_id, revoked, "Principal disabled");
        Ok(())
    }

    pub async fn unlock_principal(&self, principal_id: Uuid) -> Result<(), AuthError> {
        let mut principal = self.get_principal(principal_id).await?;
        principal.clear_lockout(Utc::now());
        bounded(self.timeout, self.credentials.update_lockout(&principal)).await?;
        tracing::info!(principal_id = %principal_id, "Principal unlocked");
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        principal_id: Uuid,
        current_session: Uuid,
    ) -> Result<Vec<SessionInfo>, AuthError> {
        let sessions = bounded(self.timeout, self.sessions.list_sessions(principal_id)).await?;
        Ok(sessions
            .into_iter()
            .map(|s| {
                let is_current = s.session_id == current_session;
                let mut info = SessionInfo::from(s);
                info.is_current = is_current;
                info
            })
            .collect())
    }

    pub async fn begin_mfa_enrollment(&self, principal_id: Uuid) -> Result<MfaSetup, AuthError> {
        let principal = self.get_principal(principal_id).await?;
        self.mfa.begin_enrollment(&principal).await
    }

    pub async fn confirm_mfa_enrollment(
        &self,
        principal_id: Uuid,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        self.throttle.check_mfa(principal_id)?;
        self.mfa.confirm_enrollment(principal_id, code).await
    }

    /// Turning MFA off needs the password again.
    pub async fn disable_mfa(&self, principal_id: Uuid, password: Password) -> Result<(), AuthError> {
        let principal = self
            .get_principal(principal_id)
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;
        if !check_password(password, principal.credential_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }
        self.mfa.disable(principal_id).await
    }

    pub async fn health(&self) -> Result<(), AuthError> {
        bounded(self.timeout, self.credentials.health_check()).await?;
        bounded(self.timeout, self.sessions.health_check()).await
    }
}
