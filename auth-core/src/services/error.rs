use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

/// Stable, machine-readable error codes returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidCredentials,
    AccountLocked,
    #[serde(rename = "MFARequired")]
    MfaRequired,
    #[serde(rename = "MFAInvalid")]
    MfaInvalid,
    TokenExpired,
    TokenRevoked,
    TokenMalformed,
    TokenReuseDetected,
    ConcurrentRotation,
    PermissionDenied,
    RateLimited,
    NotFound,
    Conflict,
    Validation,
    BackendUnavailable,
    SigningError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCredentials => "InvalidCredentials",
            ErrorKind::AccountLocked => "AccountLocked",
            ErrorKind::MfaRequired => "MFARequired",
            ErrorKind::MfaInvalid => "MFAInvalid",
            ErrorKind::TokenExpired => "TokenExpired",
            ErrorKind::TokenRevoked => "TokenRevoked",
            ErrorKind::TokenMalformed => "TokenMalformed",
            ErrorKind::TokenReuseDetected => "TokenReuseDetected",
            ErrorKind::ConcurrentRotation => "ConcurrentRotation",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Validation => "Validation",
            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::SigningError => "SigningError",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked")]
    AccountLocked,

    #[error("MFA code required")]
    MfaRequired,

    #[error("MFA code invalid")]
    MfaInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token malformed")]
    TokenMalformed,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Refresh token rotated concurrently")]
    ConcurrentRotation,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AuthError::AccountLocked => ErrorKind::AccountLocked,
            AuthError::MfaRequired => ErrorKind::MfaRequired,
            AuthError::MfaInvalid => ErrorKind::MfaInvalid,
            AuthError::TokenExpired => ErrorKind::TokenExpired,
            AuthError::TokenRevoked => ErrorKind::TokenRevoked,
            AuthError::TokenMalformed => ErrorKind::TokenMalformed,
            AuthError::TokenReuseDetected => ErrorKind::TokenReuseDetected,
            AuthError::ConcurrentRotation => ErrorKind::ConcurrentRotation,
            AuthError::PermissionDenied => ErrorKind::PermissionDenied,
            AuthError::RateLimited { .. } => ErrorKind::RateLimited,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Conflict(_) => ErrorKind::Conflict,
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            AuthError::SigningError(_) => ErrorKind::SigningError,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::BackendUnavailable(format!("database: {}", err))
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        AuthError::BackendUnavailable(format!("redis: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for AuthError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AuthError::BackendUnavailable("backend call timed out".to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let kind = err.kind();
        match err {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked
            | AuthError::MfaRequired
            | AuthError::MfaInvalid
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::TokenMalformed
            | AuthError::TokenReuseDetected => AppError::Unauthorized(kind.to_string()),
            AuthError::ConcurrentRotation => AppError::Conflict(anyhow::anyhow!(kind.as_str())),
            AuthError::PermissionDenied => AppError::Forbidden(kind.to_string()),
            AuthError::RateLimited { retry_after_secs } => {
                AppError::TooManyRequests(kind.to_string(), Some(retry_after_secs))
            }
            AuthError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            AuthError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            AuthError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AuthError::BackendUnavailable(msg) => {
                tracing::error!(error = %msg, "Backend unavailable");
                AppError::ServiceUnavailable(kind.to_string())
            }
            AuthError::SigningError(msg) | AuthError::Internal(msg) => {
                AppError::InternalError(anyhow::anyhow!(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfa_kinds_use_wire_spelling() {
        assert_eq!(AuthError::MfaRequired.kind().as_str(), "MFARequired");
        assert_eq!(
            serde_json::to_string(&ErrorKind::MfaInvalid).unwrap(),
            "\"MFAInvalid\""
        );
    }

    #[test]
    fn token_errors_become_unauthorized_with_kind() {
        match AppError::from(AuthError::TokenReuseDetected) {
            AppError::Unauthorized(code) => assert_eq!(code, "TokenReuseDetected"),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn backend_failures_are_503() {
        let err: AuthError = redis::RedisError::from((redis::ErrorKind::IoError, "down")).into();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(matches!(
            AppError::from(err),
            AppError::ServiceUnavailable(_)
        ));
    }
}
