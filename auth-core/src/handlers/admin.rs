//! Tenant administration. Every route needs a live permission in the target
//! tenant; a denied attempt is recorded as a privilege escalation attempt.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::admin::{
        CreatePrincipalRequest, CreateRoleRequest, RoleAssignmentRequest, RotateSigningKeyRequest,
    },
    middleware::AuthUser,
    models::{Permission, RoleResponse},
    services::{AccessTokenClaims, AuthError, KeyMaterial, SecurityAuditLog, SecurityEventType},
    utils::{Password, ValidatedJson},
    AppState,
};

async fn require(
    state: &AppState,
    caller: &AccessTokenClaims,
    tenant_id: Uuid,
    permission: &str,
) -> Result<(), AppError> {
    let permission = Permission::parse(permission)?;
    match state.authz.require(caller.sub, tenant_id, &permission).await {
        Err(AuthError::PermissionDenied) => {
            tracing::warn!(
                principal_id = %caller.sub,
                tenant_id = %tenant_id,
                permission = %permission,
                "Administrative action denied"
            );
            state.audit.log_async(
                SecurityAuditLog::new(
                    SecurityEventType::PrivilegeEscalationAttempt,
                    serde_json::json!({ "permission": permission.as_str(), "target_tenant": tenant_id }),
                )
                .principal(caller.sub, caller.tenant_id)
                .session(caller.sid),
            );
            Err(AuthError::PermissionDenied.into())
        }
        other => other.map_err(AppError::from),
    }
}

/// Permission check against the tenant the target principal lives in.
async fn require_for_principal(
    state: &AppState,
    caller: &AccessTokenClaims,
    principal_id: Uuid,
    permission: &str,
) -> Result<(), AppError> {
    let target = state.auth_service.get_principal(principal_id).await?;
    require(state, caller, target.tenant_id, permission).await
}

#[utoipa::path(
    post,
    path = "/admin/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 403, description = "PermissionDenied", body = ErrorResponse),
        (status = 409, description = "Role name taken", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = req.tenant_id.unwrap_or(claims.tenant_id);
    require(&state, &claims, tenant_id, "role:create").await?;

    let role = state
        .authz
        .create_role(tenant_id, &req.name, &req.permissions)
        .await?;
    Ok((StatusCode::CREATED, Json(RoleResponse::from(role))))
}

#[utoipa::path(
    post,
    path = "/admin/principals",
    request_body = CreatePrincipalRequest,
    responses(
        (status = 201, description = "Principal created", body = PrincipalResponse),
        (status = 403, description = "PermissionDenied", body = ErrorResponse),
        (status = 409, description = "Username taken", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn create_principal(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<CreatePrincipalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = req.tenant_id.unwrap_or(claims.tenant_id);
    require(&state, &claims, tenant_id, "principal:create").await?;
    if !req.roles.is_empty() {
        require(&state, &claims, tenant_id, "role:grant").await?;
    }

    let principal = state
        .auth_service
        .register(tenant_id, &req.username, Password::new(req.password), &req.roles)
        .await?;
    Ok((StatusCode::CREATED, Json(principal.sanitized())))
}

#[utoipa::path(
    post,
    path = "/admin/principals/{principal_id}/roles",
    params(("principal_id" = Uuid, Path, description = "Principal")),
    request_body = RoleAssignmentRequest,
    responses(
        (status = 204, description = "Role granted"),
        (status = 400, description = "Role belongs to another tenant", body = ErrorResponse),
        (status = 403, description = "PermissionDenied", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn grant_role(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(principal_id): Path<Uuid>,
    Json(req): Json<RoleAssignmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_for_principal(&state, &claims, principal_id, "role:grant").await?;
    state.authz.grant_role(principal_id, req.role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Takes effect on the principal's next request.
#[utoipa::path(
    delete,
    path = "/admin/principals/{principal_id}/roles/{role_id}",
    params(
        ("principal_id" = Uuid, Path, description = "Principal"),
        ("role_id" = Uuid, Path, description = "Role to revoke")
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 403, description = "PermissionDenied", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path((principal_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    require_for_principal(&state, &claims, principal_id, "role:revoke").await?;
    state.authz.revoke_role(principal_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/admin/principals/{principal_id}/disable",
    params(("principal_id" = Uuid, Path, description = "Principal")),
    responses(
        (status = 204, description = "Principal disabled, sessions revoked"),
        (status = 403, description = "PermissionDenied", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn disable_principal(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(principal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_for_principal(&state, &claims, principal_id, "principal:disable").await?;
    state.auth_service.disable_principal(principal_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/admin/principals/{principal_id}/unlock",
    params(("principal_id" = Uuid, Path, description = "Principal")),
    responses(
        (status = 204, description = "Lockout cleared"),
        (status = 403, description = "PermissionDenied", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn unlock_principal(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(principal_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    require_for_principal(&state, &claims, principal_id, "principal:unlock").await?;
    state.auth_service.unlock_principal(principal_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Install a new signing key. The old one stays published for the grace
/// period. Key files are read from this host.
#[utoipa::path(
    post,
    path = "/admin/signing-keys/rotate",
    request_body = RotateSigningKeyRequest,
    responses(
        (status = 200, description = "Rotated; new JWKS returned", body = Jwks),
        (status = 400, description = "Unreadable or mismatched key pair", body = ErrorResponse),
        (status = 403, description = "PermissionDenied", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn rotate_signing_key(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<RotateSigningKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    // No tenant role covers the nil tenant, so this needs superadmin
    require(&state, &claims, Uuid::nil(), "signing_key:rotate").await?;

    let material =
        KeyMaterial::from_files(&req.key_id, &req.private_key_path, &req.public_key_path)
            .map_err(AppError::BadRequest)?;
    state.tokens.rotate_signing_key(&material)?;

    tracing::info!(principal_id = %claims.sub, kid = %req.key_id, "Signing key rotated via admin API");
    Ok(Json(state.tokens.jwks()?))
}
