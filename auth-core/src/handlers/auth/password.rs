use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::ChangePasswordRequest,
    middleware::AuthUser,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Change the caller's password. Every session of the caller ends.
#[utoipa::path(
    post,
    path = "/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed, sessions revoked"),
        (status = 400, description = "Weak password", body = ErrorResponse),
        (status = 401, description = "Current password wrong", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .change_password(
            claims.sub,
            Password::new(req.current_password),
            Password::new(req.new_password),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's own principal record
#[utoipa::path(
    get,
    path = "/auth/me",
    responses((status = 200, description = "Principal", body = PrincipalResponse)),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let principal = state.auth_service.get_principal(claims.sub).await?;
    Ok(Json(principal.sanitized()))
}
