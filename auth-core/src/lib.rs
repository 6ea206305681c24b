pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::middleware::{
    create_ip_rate_limiter, ip_rate_limit_middleware, metrics_middleware, request_id_middleware,
    IpRateLimiter, REQUEST_ID_HEADER,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};

use crate::config::AuthConfig;
use crate::services::{
    ApiKeyManager, ApiKeyStore, AuthService, AuthorizationEngine, CredentialStore, Database,
    InMemorySessionStore, InMemoryStore, KeyRing, LoginThrottle, MfaVerifier, RoleStore,
    SecurityAuditService, SessionStore, TokenService, TokenSettings,
};
use crate::utils::SecretCipher;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::well_known::jwks,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::session::verify,
        handlers::auth::session::list_sessions,
        handlers::auth::registration::register,
        handlers::auth::password::change_password,
        handlers::auth::password::me,
        handlers::auth::mfa::enroll,
        handlers::auth::mfa::confirm,
        handlers::auth::mfa::disable,
        handlers::api_keys::create_key,
        handlers::api_keys::list_keys,
        handlers::api_keys::revoke_key,
        handlers::api_keys::verify_key,
        handlers::authz::check,
        handlers::admin::create_role,
        handlers::admin::create_principal,
        handlers::admin::grant_role,
        handlers::admin::revoke_role,
        handlers::admin::disable_principal,
        handlers::admin::unlock_principal,
        handlers::admin::rotate_signing_key,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RegisterRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::VerifyResponse,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::MfaCodeRequest,
            dtos::auth::MfaConfirmResponse,
            dtos::auth::MfaDisableRequest,
            dtos::auth::AuthorizeRequest,
            dtos::auth::AuthorizeResponse,
            dtos::api_keys::CreateApiKeyRequest,
            dtos::api_keys::VerifyApiKeyRequest,
            dtos::api_keys::VerifyApiKeyResponse,
            dtos::admin::CreateRoleRequest,
            dtos::admin::CreatePrincipalRequest,
            dtos::admin::RoleAssignmentRequest,
            dtos::admin::RotateSigningKeyRequest,
            services::TokenPair,
            services::AccessTokenClaims,
            services::Jwk,
            services::Jwks,
            services::IssuedKey,
            services::MfaSetup,
            services::Decision,
            models::PrincipalResponse,
            models::PrincipalStatus,
            models::RoleResponse,
            models::SessionInfo,
            models::ApiKeyInfo,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, sessions and token management"),
        (name = "MFA", description = "TOTP enrollment"),
        (name = "API Keys", description = "Long-lived machine credentials"),
        (name = "Authorization", description = "Permission decisions"),
        (name = "Admin", description = "Tenant administration"),
        (name = "Well-Known", description = "Public service metadata"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Storage the service runs on. Postgres + Redis in production, in-memory
/// for tests and single-node development.
#[derive(Clone)]
pub struct Backends {
    pub credentials: Arc<dyn CredentialStore>,
    pub roles: Arc<dyn RoleStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub sessions: Arc<dyn SessionStore>,
    /// Security audit rows are written here when present.
    pub audit_pool: Option<PgPool>,
}

impl Backends {
    pub fn in_memory(config: &AuthConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            credentials: store.clone(),
            roles: store.clone(),
            api_keys: store,
            sessions: Arc::new(InMemorySessionStore::new(config.session_policy())),
            audit_pool: None,
        }
    }

    pub fn postgres(pool: PgPool, sessions: Arc<dyn SessionStore>) -> Self {
        let db = Arc::new(Database::new(pool.clone()));
        Self {
            credentials: db.clone(),
            roles: db.clone(),
            api_keys: db,
            sessions,
            audit_pool: Some(pool),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub auth_service: AuthService,
    pub tokens: TokenService,
    pub authz: AuthorizationEngine,
    pub api_keys: ApiKeyManager,
    pub audit: SecurityAuditService,
    pub backends: Backends,
    pub metrics: Option<PrometheusHandle>,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every service onto the given backends.
    pub fn new(
        config: AuthConfig,
        backends: Backends,
        keys: KeyRing,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        let timeout = config.backend_timeout();
        let audit = SecurityAuditService::new(backends.audit_pool.clone());

        let tokens = TokenService::new(
            keys,
            backends.sessions.clone(),
            backends.credentials.clone(),
            audit.clone(),
            TokenSettings::from_config(&config),
        );
        let authz = AuthorizationEngine::new(
            backends.credentials.clone(),
            backends.roles.clone(),
            timeout,
        );
        let mfa = MfaVerifier::new(
            backends.credentials.clone(),
            backends.sessions.clone(),
            SecretCipher::new(&config.mfa_key()?)?,
            config.mfa.backup_code_pepper.clone(),
            config.mfa.issuer.clone(),
            timeout,
        );
        let api_keys = ApiKeyManager::new(
            backends.api_keys.clone(),
            backends.credentials.clone(),
            authz.clone(),
            audit.clone(),
            timeout,
        );
        let auth_service = AuthService::new(
            backends.credentials.clone(),
            backends.sessions.clone(),
            tokens.clone(),
            mfa,
            authz.clone(),
            LoginThrottle::new(&config.rate_limit),
            audit.clone(),
            config.lockout_policy(),
            timeout,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config,
            auth_service,
            tokens,
            authz,
            api_keys,
            audit,
            backends,
            metrics,
            ip_rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/sessions", get(handlers::auth::list_sessions))
        .route("/auth/password", post(handlers::auth::change_password))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/mfa/enroll", post(handlers::auth::mfa::enroll))
        .route("/auth/mfa/confirm", post(handlers::auth::mfa::confirm))
        .route("/auth/mfa/disable", post(handlers::auth::mfa::disable))
        .route(
            "/apikeys",
            post(handlers::api_keys::create_key).get(handlers::api_keys::list_keys),
        )
        .route("/apikeys/:key_id", delete(handlers::api_keys::revoke_key))
        .route("/authz/check", post(handlers::authz::check))
        .route("/admin/roles", post(handlers::admin::create_role))
        .route("/admin/principals", post(handlers::admin::create_principal))
        .route(
            "/admin/principals/:principal_id/roles",
            post(handlers::admin::grant_role),
        )
        .route(
            "/admin/principals/:principal_id/roles/:role_id",
            delete(handlers::admin::revoke_role),
        )
        .route(
            "/admin/principals/:principal_id/disable",
            post(handlers::admin::disable_principal),
        )
        .route(
            "/admin/principals/:principal_id/unlock",
            post(handlers::admin::unlock_principal),
        )
        .route(
            "/admin/signing-keys/rotate",
            post(handlers::admin::rotate_signing_key),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/.well-known/jwks.json", get(handlers::well_known::jwks))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/verify", get(handlers::auth::verify))
        .route("/apikeys/verify", post(handlers::api_keys::verify_key))
        .merge(authenticated)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A backend is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.auth_service.health().await.map_err(|e| {
        tracing::error!(error = %e, "Health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "credential_store": "up",
            "session_store": "up"
        }
    })))
}
