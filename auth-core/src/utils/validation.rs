use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// JSON body that has passed its `validator` rules.
///
/// Malformed bodies are 400, rule violations are 422. Request bodies on this
/// service carry secrets, so rejection text never echoes the payload.
pub struct ValidatedJson<T>(pub T);

fn describe(rejection: &JsonRejection) -> &'static str {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => "Expected Content-Type: application/json",
        JsonRejection::JsonSyntaxError(_) => "Request body is not valid JSON",
        JsonRejection::JsonDataError(_) => "Request body does not match the expected shape",
        _ => "Request body could not be read",
    }
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                tracing::debug!(status = %rejection.status(), "Rejected request body");
                AppError::BadRequest(anyhow::anyhow!(describe(&rejection)))
            })?;

        value.validate()?;
        Ok(ValidatedJson(value))
    }
}
