use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{dtos::auth::RegisterRequest, utils::{Password, ValidatedJson}, AppState};

/// Register a principal in a tenant. Self-registration never grants roles.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Principal created", body = PrincipalResponse),
        (status = 400, description = "Weak password", body = ErrorResponse),
        (status = 409, description = "Username taken", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let principal = state
        .auth_service
        .register(req.tenant_id, &req.username, Password::new(req.password), &[])
        .await?;
    Ok((StatusCode::CREATED, Json(principal.sanitized())))
}
