use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{MfaCodeRequest, MfaConfirmResponse, MfaDisableRequest},
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Start TOTP enrollment. Returns the seed for the authenticator app.
#[utoipa::path(
    post,
    path = "/auth/mfa/enroll",
    responses(
        (status = 200, description = "Pending enrollment created", body = MfaSetup),
        (status = 409, description = "MFA already enabled", body = ErrorResponse)
    ),
    tag = "MFA",
    security(("bearer_auth" = []))
)]
pub async fn enroll(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let setup = state.auth_service.begin_mfa_enrollment(claims.sub).await?;
    Ok((StatusCode::OK, Json(setup)))
}

/// Confirm enrollment with a current code. Backup codes are shown once.
#[utoipa::path(
    post,
    path = "/auth/mfa/confirm",
    request_body = MfaCodeRequest,
    responses(
        (status = 200, description = "MFA enabled", body = MfaConfirmResponse),
        (status = 401, description = "MFAInvalid", body = ErrorResponse),
        (status = 404, description = "No pending enrollment", body = ErrorResponse)
    ),
    tag = "MFA",
    security(("bearer_auth" = []))
)]
pub async fn confirm(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<MfaCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let backup_codes = state
        .auth_service
        .confirm_mfa_enrollment(claims.sub, &req.code)
        .await?;
    Ok(Json(MfaConfirmResponse { backup_codes }))
}

/// Turn MFA off. Requires the password.
#[utoipa::path(
    post,
    path = "/auth/mfa/disable",
    request_body = MfaDisableRequest,
    responses(
        (status = 204, description = "MFA disabled"),
        (status = 401, description = "InvalidCredentials", body = ErrorResponse)
    ),
    tag = "MFA",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<MfaDisableRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .disable_mfa(claims.sub, Password::new(req.password))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
