use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_env_parse};
use service_core::error::AppError;
use std::env;
use uuid::Uuid;

use crate::models::LockoutPolicy;
use crate::services::redis::SessionPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Absent outside production: durable state is kept in memory.
    pub database: Option<DatabaseConfig>,
    /// Absent outside production: sessions are kept in memory.
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub lockout: LockoutConfig,
    pub mfa: MfaConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub backend_timeout_ms: u64,
    /// Superadmin created at startup when the username is free.
    pub bootstrap: Option<BootstrapConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub issuer: String,
    pub key_id: String,
    pub private_key_path: String,
    pub public_key_path: String,
    /// Verification-only key kept through a rotation grace period.
    pub previous_key_id: Option<String>,
    pub previous_public_key_path: Option<String>,
    pub rotation_grace_minutes: i64,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_sessions_per_principal: usize,
    /// Sessions unused for longer than this cannot be refreshed.
    pub idle_timeout_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub threshold: u32,
    pub base_backoff_minutes: i64,
    pub max_backoff_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    pub issuer: String,
    /// Base64 of the 32-byte key sealing TOTP seeds at rest.
    pub encryption_key: Secret<String>,
    /// Keys the backup code hashes.
    pub backup_code_pepper: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub tenant_id: Uuid,
    pub username: String,
    pub password: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Per source IP, across all usernames.
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    /// Per tenant + username, applied before lockout accounting.
    pub principal_attempts: u32,
    pub principal_window_seconds: u64,
    pub mfa_attempts: u32,
    pub mfa_window_seconds: u64,
    /// Coarse per-IP limit across every route.
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

const DEV_MFA_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: get_env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: get_env_parse("DATABASE_MIN_CONNECTIONS", 1)?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production"
                )))
            }
            Err(_) => None,
        };

        let redis = match env::var("REDIS_URL") {
            Ok(url) => Some(RedisConfig { url }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "REDIS_URL is required in production"
                )))
            }
            Err(_) => None,
        };

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env_parse("SERVICE_NAME", "auth-core".to_string())?,
            service_version: get_env_parse(
                "SERVICE_VERSION",
                env!("CARGO_PKG_VERSION").to_string(),
            )?,
            log_level: get_env_parse("LOG_LEVEL", "info".to_string())?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database,
            redis,
            jwt: JwtConfig {
                issuer: get_env_parse("JWT_ISSUER", "auth-core".to_string())?,
                key_id: get_env("JWT_KEY_ID", Some("dev-1"), is_prod)?,
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                previous_key_id: env::var("JWT_PREVIOUS_KEY_ID").ok(),
                previous_public_key_path: env::var("JWT_PREVIOUS_PUBLIC_KEY_PATH").ok(),
                rotation_grace_minutes: get_env_parse("JWT_ROTATION_GRACE_MINUTES", 60)?,
                access_token_expiry_minutes: get_env_parse("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", 15)?,
                refresh_token_expiry_days: get_env_parse("JWT_REFRESH_TOKEN_EXPIRY_DAYS", 30)?,
            },
            session: SessionConfig {
                max_sessions_per_principal: get_env_parse("SESSION_MAX_PER_PRINCIPAL", 5)?,
                idle_timeout_minutes: match env::var("SESSION_IDLE_TIMEOUT_MINUTES") {
                    Ok(v) => Some(v.parse().map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "Invalid SESSION_IDLE_TIMEOUT_MINUTES: {}",
                            e
                        ))
                    })?),
                    Err(_) => None,
                },
            },
            lockout: LockoutConfig {
                threshold: get_env_parse("LOCKOUT_THRESHOLD", 5)?,
                base_backoff_minutes: get_env_parse("LOCKOUT_BASE_BACKOFF_MINUTES", 30)?,
                max_backoff_minutes: get_env_parse("LOCKOUT_MAX_BACKOFF_MINUTES", 24 * 60)?,
            },
            mfa: MfaConfig {
                issuer: get_env_parse("MFA_ISSUER", "auth-core".to_string())?,
                encryption_key: Secret::new(get_env(
                    "MFA_ENCRYPTION_KEY",
                    Some(DEV_MFA_KEY),
                    is_prod,
                )?),
                backup_code_pepper: Secret::new(get_env(
                    "MFA_BACKUP_CODE_PEPPER",
                    Some("dev-pepper"),
                    is_prod,
                )?),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_env_parse("RATE_LIMIT_LOGIN_ATTEMPTS", 20)?,
                login_window_seconds: get_env_parse("RATE_LIMIT_LOGIN_WINDOW_SECONDS", 60)?,
                principal_attempts: get_env_parse("RATE_LIMIT_PRINCIPAL_ATTEMPTS", 10)?,
                principal_window_seconds: get_env_parse(
                    "RATE_LIMIT_PRINCIPAL_WINDOW_SECONDS",
                    900,
                )?,
                mfa_attempts: get_env_parse("RATE_LIMIT_MFA_ATTEMPTS", 5)?,
                mfa_window_seconds: get_env_parse("RATE_LIMIT_MFA_WINDOW_SECONDS", 300)?,
                global_ip_limit: get_env_parse("RATE_LIMIT_GLOBAL_IP_LIMIT", 600)?,
                global_ip_window_seconds: get_env_parse("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", 60)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            backend_timeout_ms: get_env_parse("BACKEND_TIMEOUT_MS", 2000)?,
            bootstrap: Self::bootstrap_from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn bootstrap_from_env() -> Result<Option<BootstrapConfig>, AppError> {
        let Ok(username) = env::var("BOOTSTRAP_ADMIN_USERNAME") else {
            return Ok(None);
        };
        let tenant_id = get_env("BOOTSTRAP_TENANT_ID", None, false)?
            .parse::<Uuid>()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid BOOTSTRAP_TENANT_ID: {}", e))
            })?;
        let password = get_env("BOOTSTRAP_ADMIN_PASSWORD", None, false)?;
        Ok(Some(BootstrapConfig {
            tenant_id,
            username,
            password: Secret::new(password),
        }))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.jwt.previous_key_id.is_some() != self.jwt.previous_public_key_path.is_some() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_PREVIOUS_KEY_ID and JWT_PREVIOUS_PUBLIC_KEY_PATH must be set together"
            )));
        }

        if self.session.max_sessions_per_principal == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_MAX_PER_PRINCIPAL must be at least 1"
            )));
        }

        if self.lockout.threshold == 0 || self.lockout.base_backoff_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOCKOUT_THRESHOLD and LOCKOUT_BASE_BACKOFF_MINUTES must be positive"
            )));
        }

        self.mfa_key()?;

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        if self.environment == Environment::Prod
            && self.mfa.encryption_key.expose_secret() == DEV_MFA_KEY
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MFA_ENCRYPTION_KEY must not use the development key in production"
            )));
        }

        Ok(())
    }

    /// Decoded MFA sealing key.
    pub fn mfa_key(&self) -> Result<[u8; 32], AppError> {
        let raw = STANDARD
            .decode(self.mfa.encryption_key.expose_secret().trim())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid MFA_ENCRYPTION_KEY: {}", e)))?;
        raw.try_into().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("MFA_ENCRYPTION_KEY must decode to 32 bytes"))
        })
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            threshold: self.lockout.threshold,
            base_backoff: Duration::minutes(self.lockout.base_backoff_minutes),
            max_backoff: Duration::minutes(self.lockout.max_backoff_minutes),
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_sessions_per_principal: self.session.max_sessions_per_principal,
            session_ttl: Duration::days(self.jwt.refresh_token_expiry_days),
            revocation_ttl: Duration::minutes(self.jwt.access_token_expiry_minutes),
        }
    }

    pub fn backend_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.backend_timeout_ms)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_dev_mfa_key_decodes() {
        let raw = STANDARD.decode(DEV_MFA_KEY).unwrap();
        assert_eq!(raw.len(), 32);
    }
}
