use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::Decision;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    #[schema(example = "ci-deploy")]
    pub name: String,

    #[validate(length(min = 1, message = "At least one scope is required"))]
    #[schema(example = json!(["project:read"]))]
    pub scopes: Vec<String>,

    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyApiKeyRequest {
    pub key_id: Uuid,
    #[validate(length(min = 1, max = 256))]
    pub secret: String,
    /// When present, the response also carries the decision for it
    #[schema(example = "project:read")]
    pub permission: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyApiKeyResponse {
    pub key_id: Uuid,
    pub principal_id: Uuid,
    pub tenant_id: Uuid,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}
