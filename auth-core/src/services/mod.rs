//! Services layer for auth-core.
//!
//! Business logic for credentials, sessions, tokens, authorization, MFA and
//! API keys, plus the storage backends behind them.

pub mod api_keys;
pub mod auth;
pub mod authz;
mod database;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod mfa;
pub mod redis;
pub mod security_audit;
pub mod store;
pub mod throttle;
pub mod token;

pub use api_keys::{ApiKeyManager, IssuedKey, VerifiedKey};
pub use auth::AuthService;
pub use authz::{AuthorizationEngine, Decision};
pub use database::Database;
pub use error::{AuthError, ErrorKind};
pub use memory::InMemoryStore;
pub use mfa::{MfaSetup, MfaVerifier};
pub use redis::{InMemorySessionStore, RedisSessionStore, SessionPolicy, SessionStore};
pub use security_audit::{SecurityAuditLog, SecurityAuditService, SecurityEventType};
pub use store::{ApiKeyStore, CredentialStore, RoleStore};
pub use throttle::LoginThrottle;
pub use token::{
    AccessTokenClaims, Jwk, Jwks, KeyMaterial, KeyRing, RefreshTokenClaims, TokenPair,
    TokenService, TokenSettings,
};
