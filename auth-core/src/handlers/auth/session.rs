use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, LogoutRequest, RefreshRequest, VerifyResponse},
    middleware::{auth::bearer_token, AuthUser, ClientIp},
    utils::ValidatedJson,
    AppState,
};

/// Login with username and password, plus a second factor once enrolled
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenPair),
        (status = 401, description = "InvalidCredentials, AccountLocked, MFARequired or MFAInvalid", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(source): ClientIp,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state.auth_service.login(req, source).await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// Redeem a refresh token for a new pair. Each refresh token works once.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenPair),
        (status = 401, description = "TokenReuseDetected, TokenExpired, TokenRevoked or TokenMalformed", body = ErrorResponse),
        (status = 409, description = "ConcurrentRotation", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pair = state.auth_service.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// End a session of the caller. Defaults to the current one.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 403, description = "Session belongs to someone else", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    body: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = body
        .and_then(|Json(req)| req.session_id)
        .unwrap_or(claims.sid);
    state.auth_service.logout(&claims, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Verify an access token (service to service)
#[utoipa::path(
    get,
    path = "/auth/verify",
    responses(
        (status = 200, description = "Token is valid", body = VerifyResponse),
        (status = 401, description = "TokenExpired, TokenRevoked or TokenMalformed", body = ErrorResponse),
        (status = 503, description = "Revocation status unavailable", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VerifyResponse>, AppError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("TokenMalformed".to_string()))?;
    let res = state.auth_service.introspect(token).await?;
    Ok(Json(res))
}

/// Live sessions of the caller
#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Sessions, least recently seen first", body = [SessionInfo])
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state
        .auth_service
        .list_sessions(claims.sub, claims.sid)
        .await?;
    Ok(Json(sessions))
}
