use crate::AppState;
use axum::{extract::State, http::header, response::IntoResponse, Json};
use service_core::error::AppError;

/// Public keys for verifying access tokens
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    responses(
        (status = 200, description = "Public JWKS returned", body = Jwks)
    ),
    tag = "Well-Known"
)]
pub async fn jwks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let jwks = state.tokens.jwks()?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            // Short enough that a rotated-out key disappears within its grace period
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        Json(jwks),
    ))
}
