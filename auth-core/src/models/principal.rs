//! Principal model - a tenant-scoped identity with credentials and lockout state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

/// Principal state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    Active,
    Disabled,
}

impl PrincipalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Active => "active",
            PrincipalStatus::Disabled => "disabled",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "active" => PrincipalStatus::Active,
            _ => PrincipalStatus::Disabled,
        }
    }
}

/// Lockout tuning. Backoff doubles with every consecutive lockout.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            base_backoff: Duration::minutes(30),
            max_backoff: Duration::hours(24),
        }
    }
}

impl LockoutPolicy {
    /// Backoff for the n-th consecutive lockout (1-based).
    pub fn backoff_for(&self, lockout_count: u32) -> Duration {
        let exponent = lockout_count.saturating_sub(1).min(20);
        let factor = 1i32 << exponent;
        let backoff = self
            .base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff);
        backoff.min(self.max_backoff)
    }
}

/// Outcome of checking whether a login may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginGate {
    Open,
    /// Lock expired and was cleared; the record must be persisted.
    Unlocked,
    Locked { until: DateTime<Utc> },
}

/// Lockout state after a failed attempt has been applied to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub failed_attempts: u32,
    pub lockout_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// This attempt crossed the threshold.
    pub locked_now: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub roles: BTreeSet<Uuid>,
    pub failed_attempts: u32,
    pub lockout_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub status: PrincipalStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Principal {
    pub fn new(tenant_id: Uuid, username: String, credential_hash: String) -> Self {
        let now = Utc::now();
        Self {
            principal_id: Uuid::new_v4(),
            tenant_id,
            username,
            credential_hash,
            roles: BTreeSet::new(),
            failed_attempts: 0,
            lockout_count: 0,
            locked_until: None,
            status: PrincipalStatus::Active,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PrincipalStatus::Active
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// Lazily clears an expired lock. A lock that expired still leaves
    /// `lockout_count` in place so the next lockout backs off further.
    pub fn login_gate(&mut self, now: DateTime<Utc>) -> LoginGate {
        match self.locked_until {
            Some(until) if until > now => LoginGate::Locked { until },
            Some(_) => {
                self.locked_until = None;
                self.failed_attempts = 0;
                self.updated_utc = now;
                LoginGate::Unlocked
            }
            None => LoginGate::Open,
        }
    }

    /// Record a failed attempt. Returns the lock expiry when this attempt
    /// crossed the threshold. Attempts landing while a lock is active do not
    /// count toward the next cycle.
    pub fn record_failed_login(
        &mut self,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if let LoginGate::Locked { .. } = self.login_gate(now) {
            return None;
        }
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.updated_utc = now;

        if self.failed_attempts >= policy.threshold.max(1) {
            self.lockout_count = self.lockout_count.saturating_add(1);
            let until = now + policy.backoff_for(self.lockout_count);
            self.locked_until = Some(until);
            self.failed_attempts = 0;
            return Some(until);
        }
        None
    }

    /// `record_failed_login` plus a snapshot of the resulting state, for stores
    /// that apply it under their own lock.
    pub fn apply_failed_login(
        &mut self,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> FailedLogin {
        let locked_now = self.record_failed_login(policy, now).is_some();
        FailedLogin {
            failed_attempts: self.failed_attempts,
            lockout_count: self.lockout_count,
            locked_until: self.locked_until,
            locked_now,
        }
    }

    /// Returns true when any lockout state changed.
    pub fn record_successful_login(&mut self, now: DateTime<Utc>) -> bool {
        let dirty =
            self.failed_attempts != 0 || self.lockout_count != 0 || self.locked_until.is_some();
        if dirty {
            self.failed_attempts = 0;
            self.lockout_count = 0;
            self.locked_until = None;
            self.updated_utc = now;
        }
        dirty
    }

    /// Administrative unlock.
    pub fn clear_lockout(&mut self, now: DateTime<Utc>) {
        self.failed_attempts = 0;
        self.lockout_count = 0;
        self.locked_until = None;
        self.updated_utc = now;
    }

    pub fn sanitized(&self) -> PrincipalResponse {
        PrincipalResponse::from(self.clone())
    }
}

/// Principal response for API (without credential hash).
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalResponse {
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub roles: Vec<Uuid>,
    pub status: PrincipalStatus,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<Principal> for PrincipalResponse {
    fn from(p: Principal) -> Self {
        Self {
            principal_id: p.principal_id,
            tenant_id: p.tenant_id,
            username: p.username,
            roles: p.roles.into_iter().collect(),
            status: p.status,
            locked_until: p.locked_until,
            created_utc: p.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal::new(Uuid::new_v4(), "alice".to_string(), "hash".to_string())
    }

    #[test]
    fn test_locks_on_threshold() {
        let policy = LockoutPolicy::default();
        let mut p = principal();
        let now = Utc::now();

        for _ in 0..4 {
            assert!(p.record_failed_login(&policy, now).is_none());
            assert!(!p.is_locked(now));
        }
        let until = p.record_failed_login(&policy, now).unwrap();
        assert_eq!(until, now + Duration::minutes(30));
        assert!(p.is_locked(now));
        assert_eq!(p.login_gate(now), LoginGate::Locked { until });
    }

    #[test]
    fn test_lock_expires_lazily() {
        let policy = LockoutPolicy::default();
        let mut p = principal();
        let now = Utc::now();
        for _ in 0..5 {
            p.record_failed_login(&policy, now);
        }

        let later = now + Duration::minutes(31);
        assert_eq!(p.login_gate(later), LoginGate::Unlocked);
        assert!(p.locked_until.is_none());
        assert_eq!(p.failed_attempts, 0);
        assert_eq!(p.lockout_count, 1);
        assert_eq!(p.login_gate(later), LoginGate::Open);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::minutes(30));
        assert_eq!(policy.backoff_for(2), Duration::minutes(60));
        assert_eq!(policy.backoff_for(3), Duration::minutes(120));
        assert_eq!(policy.backoff_for(40), Duration::hours(24));
    }

    #[test]
    fn test_second_lockout_is_longer() {
        let policy = LockoutPolicy::default();
        let mut p = principal();
        let t0 = Utc::now();
        for _ in 0..5 {
            p.record_failed_login(&policy, t0);
        }
        let t1 = t0 + Duration::minutes(31);
        p.login_gate(t1);
        let mut second = None;
        for _ in 0..5 {
            second = p.record_failed_login(&policy, t1);
        }
        assert_eq!(second, Some(t1 + Duration::minutes(60)));
    }

    #[test]
    fn test_failures_during_lock_are_ignored() {
        let policy = LockoutPolicy::default();
        let mut p = principal();
        let now = Utc::now();
        for _ in 0..5 {
            p.record_failed_login(&policy, now);
        }
        let until = p.locked_until;

        for _ in 0..10 {
            let outcome = p.apply_failed_login(&policy, now + Duration::minutes(1));
            assert!(!outcome.locked_now);
            assert_eq!(outcome.locked_until, until);
            assert_eq!(outcome.lockout_count, 1);
            assert_eq!(outcome.failed_attempts, 0);
        }
    }

    #[test]
    fn test_failure_after_expiry_starts_new_count() {
        let policy = LockoutPolicy::default();
        let mut p = principal();
        let now = Utc::now();
        for _ in 0..5 {
            p.record_failed_login(&policy, now);
        }

        let outcome = p.apply_failed_login(&policy, now + Duration::minutes(31));
        assert!(!outcome.locked_now);
        assert_eq!(outcome.failed_attempts, 1);
        assert_eq!(outcome.locked_until, None);
    }

    #[test]
    fn test_success_resets_counters() {
        let policy = LockoutPolicy::default();
        let mut p = principal();
        let now = Utc::now();
        p.record_failed_login(&policy, now);
        p.record_failed_login(&policy, now);

        assert!(p.record_successful_login(now));
        assert_eq!(p.failed_attempts, 0);
        assert!(!p.record_successful_login(now));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PrincipalStatus::from_code("active"), PrincipalStatus::Active);
        assert_eq!(PrincipalStatus::from_code("disabled"), PrincipalStatus::Disabled);
        assert_eq!(PrincipalStatus::from_code("garbage"), PrincipalStatus::Disabled);
    }
}
