use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::AccessTokenClaims;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[schema(example = "2f0c6a4e-8d7a-4b8e-9a53-1c9d1f0e2b77")]
    pub tenant_id: Uuid,

    #[validate(length(min = 1, max = 128, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 1, max = 1024, message = "Password is required"))]
    #[schema(example = "correct horse battery staple")]
    pub password: String,

    /// TOTP code or backup code; required once MFA is enrolled
    #[validate(length(max = 32))]
    #[schema(example = "123456")]
    pub mfa_code: Option<String>,

    #[validate(length(max = 256))]
    #[schema(example = "firefox-macos")]
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub tenant_id: Uuid,

    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 8, max = 1024, message = "Password must be at least 8 characters"))]
    #[schema(min_length = 8)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    /// Defaults to the session of the presented access token
    pub session_id: Option<Uuid>,
}

/// Result of verifying an access token.
#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    #[schema(example = true)]
    pub active: bool,
    pub claims: AccessTokenClaims,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, max = 1024, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaCodeRequest {
    #[validate(length(min = 6, max = 32, message = "Code is required"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MfaConfirmResponse {
    /// Shown once; each code works a single time
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaDisableRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AuthorizeRequest {
    #[validate(length(min = 3, max = 128))]
    #[schema(example = "project:read")]
    pub permission: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizeResponse {
    pub decision: crate::services::Decision,
}
