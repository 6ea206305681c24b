use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    /// Defaults to the caller's tenant
    pub tenant_id: Option<Uuid>,

    #[validate(length(min = 1, max = 64, message = "Role name must be 1-64 characters"))]
    #[schema(example = "editor")]
    pub name: String,

    #[schema(example = json!(["project:read", "docs:*"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrincipalRequest {
    /// Defaults to the caller's tenant
    pub tenant_id: Option<Uuid>,

    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    pub username: String,

    #[validate(length(min = 8, max = 1024, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[serde(default)]
    pub roles: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentRequest {
    pub role_id: Uuid,
}

/// Paths are read on the server; key material never travels over the API.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RotateSigningKeyRequest {
    #[validate(length(min = 1, max = 64))]
    pub key_id: String,
    #[validate(length(min = 1))]
    pub private_key_path: String,
    #[validate(length(min = 1))]
    pub public_key_path: String,
}
