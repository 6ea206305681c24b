//! Login and MFA throttling, applied before any lockout accounting so that
//! bursts are rejected without touching the credential store.
//!
//! Limits are per instance. Lockout state in the credential store is the
//! cross-instance backstop.

use service_core::middleware::{check_key, create_keyed_rate_limiter, KeyedRateLimiter};
use std::net::IpAddr;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::services::error::AuthError;

#[derive(Clone)]
pub struct LoginThrottle {
    per_principal: KeyedRateLimiter<String>,
    per_source: KeyedRateLimiter<IpAddr>,
    mfa: KeyedRateLimiter<Uuid>,
}

fn limited(retry_after_secs: u64) -> AuthError {
    AuthError::RateLimited { retry_after_secs }
}

impl LoginThrottle {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            per_principal: create_keyed_rate_limiter(
                config.principal_attempts,
                config.principal_window_seconds,
            ),
            per_source: create_keyed_rate_limiter(
                config.login_attempts,
                config.login_window_seconds,
            ),
            mfa: create_keyed_rate_limiter(config.mfa_attempts, config.mfa_window_seconds),
        }
    }

    /// One login attempt for `username` in `tenant_id`, from `source` if known.
    pub fn check_login(
        &self,
        tenant_id: Uuid,
        username: &str,
        source: Option<IpAddr>,
    ) -> Result<(), AuthError> {
        if let Some(ip) = source {
            check_key(&self.per_source, &ip).map_err(limited)?;
        }
        let key = format!("{}:{}", tenant_id, username.to_lowercase());
        check_key(&self.per_principal, &key).map_err(limited)
    }

    /// One second-factor attempt for a principal.
    pub fn check_mfa(&self, principal_id: Uuid) -> Result<(), AuthError> {
        check_key(&self.mfa, &principal_id).map_err(limited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 60,
            principal_attempts: 2,
            principal_window_seconds: 900,
            mfa_attempts: 1,
            mfa_window_seconds: 300,
            global_ip_limit: 100,
            global_ip_window_seconds: 60,
        }
    }

    #[test]
    fn test_principal_limit_ignores_case() {
        let throttle = LoginThrottle::new(&config());
        let tenant = Uuid::new_v4();
        throttle.check_login(tenant, "Alice", None).unwrap();
        throttle.check_login(tenant, "alice", None).unwrap();
        assert!(matches!(
            throttle.check_login(tenant, "ALICE", None),
            Err(AuthError::RateLimited { retry_after_secs }) if retry_after_secs >= 1
        ));
        // Other tenant, same name
        assert!(throttle.check_login(Uuid::new_v4(), "alice", None).is_ok());
    }

    #[test]
    fn test_source_limit_spans_usernames() {
        let throttle = LoginThrottle::new(&config());
        let tenant = Uuid::new_v4();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for i in 0..5 {
            throttle.check_login(tenant, &format!("user{}", i), Some(ip)).unwrap();
        }
        assert!(throttle.check_login(tenant, "fresh", Some(ip)).is_err());
    }

    #[test]
    fn test_mfa_limit() {
        let throttle = LoginThrottle::new(&config());
        let id = Uuid::new_v4();
        throttle.check_mfa(id).unwrap();
        assert!(throttle.check_mfa(id).is_err());
    }
}
