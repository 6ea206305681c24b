//! Security audit trail.
//!
//! Client-facing errors are deliberately uniform. This log is where the real
//! cause of a rejected login or refresh is recorded:
//! - Refresh token reuse
//! - Account lockouts and brute force bursts
//! - MFA failures
//! - Attempts to mint API keys beyond the caller's permissions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Security audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// A rotated-out refresh token was presented again
    TokenReuseDetected,
    /// Failed attempts crossed the lockout threshold
    AccountLocked,
    /// Throttle rejected a burst of login attempts
    BruteForceAttempt,
    /// Expired, malformed or revoked token presented
    InvalidTokenUsage,
    /// Wrong TOTP or backup code
    MfaFailure,
    /// Key issuance requested scopes the caller does not hold
    PrivilegeEscalationAttempt,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::TokenReuseDetected => "token_reuse_detected",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::BruteForceAttempt => "brute_force_attempt",
            SecurityEventType::InvalidTokenUsage => "invalid_token_usage",
            SecurityEventType::MfaFailure => "mfa_failure",
            SecurityEventType::PrivilegeEscalationAttempt => "privilege_escalation_attempt",
        }
    }

    fn severity(&self) -> &'static str {
        match self {
            SecurityEventType::TokenReuseDetected
            | SecurityEventType::PrivilegeEscalationAttempt => "critical",
            SecurityEventType::AccountLocked | SecurityEventType::BruteForceAttempt => "warning",
            SecurityEventType::InvalidTokenUsage | SecurityEventType::MfaFailure => "info",
        }
    }
}

/// Security audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAuditLog {
    pub event_id: Uuid,
    pub event_type: SecurityEventType,
    /// info, warning or critical
    pub severity: String,
    pub principal_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl SecurityAuditLog {
    pub fn new(event_type: SecurityEventType, details: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            severity: event_type.severity().to_string(),
            principal_id: None,
            tenant_id: None,
            session_id: None,
            ip_address: None,
            details,
            created_utc: Utc::now(),
        }
    }

    pub fn principal(mut self, principal_id: Uuid, tenant_id: Uuid) -> Self {
        self.principal_id = Some(principal_id);
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn token_reuse(principal_id: Uuid, tenant_id: Uuid, session_id: Uuid) -> Self {
        Self::new(
            SecurityEventType::TokenReuseDetected,
            serde_json::json!({ "action": "session_revoked" }),
        )
        .principal(principal_id, tenant_id)
        .session(session_id)
    }

    pub fn account_locked(
        principal_id: Uuid,
        tenant_id: Uuid,
        lockout_count: u32,
        until: DateTime<Utc>,
    ) -> Self {
        Self::new(
            SecurityEventType::AccountLocked,
            serde_json::json!({ "lockout_count": lockout_count, "locked_until": until }),
        )
        .principal(principal_id, tenant_id)
    }
}

/// Security audit service. Events always go to the `security_audit` tracing
/// target; with a pool they are also persisted.
#[derive(Clone, Default)]
pub struct SecurityAuditService {
    pool: Option<PgPool>,
}

impl SecurityAuditService {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self { pool }
    }

    /// Log a security event asynchronously (non-blocking).
    pub fn log_async(&self, log: SecurityAuditLog) {
        emit(&log);

        let Some(pool) = self.pool.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = insert(&pool, &log).await {
                tracing::error!(
                    error = %e,
                    event_type = log.event_type.as_str(),
                    "Failed to write security audit log"
                );
            }
        });
    }

    /// Log a security event synchronously.
    pub async fn log(&self, log: SecurityAuditLog) -> Result<(), sqlx::Error> {
        emit(&log);
        if let Some(pool) = &self.pool {
            insert(pool, &log).await?;
        }
        Ok(())
    }
}

fn emit(log: &SecurityAuditLog) {
    tracing::warn!(
        target: "security_audit",
        event_id = %log.event_id,
        event_type = log.event_type.as_str(),
        severity = %log.severity,
        principal_id = ?log.principal_id,
        tenant_id = ?log.tenant_id,
        session_id = ?log.session_id,
        ip_address = ?log.ip_address,
        details = %log.details,
        "Security event"
    );
}

async fn insert(pool: &PgPool, log: &SecurityAuditLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO security_audit_log
            (event_id, event_type, severity, principal_id, tenant_id, session_id,
             ip_address, details, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(log.event_id)
    .bind(log.event_type.as_str())
    .bind(&log.severity)
    .bind(log.principal_id)
    .bind(log.tenant_id)
    .bind(log.session_id)
    .bind(&log.ip_address)
    .bind(&log.details)
    .bind(log.created_utc)
    .execute(pool)
    .await?;
    Ok(())
}
