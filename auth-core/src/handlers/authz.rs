use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{AuthorizeRequest, AuthorizeResponse},
    middleware::AuthUser,
    models::Permission,
    utils::ValidatedJson,
    AppState,
};

/// Live decision for the caller in the caller's tenant.
#[utoipa::path(
    post,
    path = "/authz/check",
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Decision", body = AuthorizeResponse),
        (status = 400, description = "Malformed permission", body = ErrorResponse)
    ),
    tag = "Authorization",
    security(("bearer_auth" = []))
)]
pub async fn check(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let permission = Permission::parse(&req.permission)?;
    let decision = state
        .authz
        .authorize(claims.sub, claims.tenant_id, &permission)
        .await?;
    Ok(Json(AuthorizeResponse { decision }))
}
