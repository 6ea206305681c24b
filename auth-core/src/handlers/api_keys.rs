use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::api_keys::{CreateApiKeyRequest, VerifyApiKeyRequest, VerifyApiKeyResponse},
    middleware::AuthUser,
    models::Permission,
    utils::ValidatedJson,
    AppState,
};

/// Issue an API key for the caller. The secret is returned only here.
#[utoipa::path(
    post,
    path = "/apikeys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key issued", body = IssuedKey),
        (status = 400, description = "Bad scopes or expiry", body = ErrorResponse),
        (status = 403, description = "Scopes exceed the caller's permissions", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn create_key(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .api_keys
        .issue_key(
            claims.sub,
            claims.tenant_id,
            &req.name,
            &req.scopes,
            req.expires_at,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// The caller's keys, revoked ones included. Secrets are never listed.
#[utoipa::path(
    get,
    path = "/apikeys",
    responses((status = 200, description = "Keys", body = [ApiKeyInfo])),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn list_keys(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.api_keys.list_keys(claims.sub).await?))
}

#[utoipa::path(
    delete,
    path = "/apikeys/{key_id}",
    params(("key_id" = Uuid, Path, description = "Key to revoke")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "No such active key", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn revoke_key(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(key_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.api_keys.revoke_key(claims.sub, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Verify a presented key (service to service), optionally deciding one
/// permission for it.
#[utoipa::path(
    post,
    path = "/apikeys/verify",
    request_body = VerifyApiKeyRequest,
    responses(
        (status = 200, description = "Key is valid", body = VerifyApiKeyResponse),
        (status = 401, description = "InvalidCredentials", body = ErrorResponse)
    ),
    tag = "API Keys"
)]
pub async fn verify_key(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let permission = req
        .permission
        .as_deref()
        .map(Permission::parse)
        .transpose()?;

    let key = state.api_keys.verify_key(req.key_id, &req.secret).await?;
    let decision = match permission {
        Some(p) => Some(state.api_keys.authorize_key(&key, &p).await?),
        None => None,
    };

    Ok(Json(VerifyApiKeyResponse {
        key_id: key.key_id,
        principal_id: key.principal_id,
        tenant_id: key.tenant_id,
        scopes: key.scopes.iter().map(|s| s.to_string()).collect(),
        decision,
    }))
}
