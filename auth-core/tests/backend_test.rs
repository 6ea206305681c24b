//! Full service on PostgreSQL and Redis.
//!
//! Run with `DATABASE_URL` and `REDIS_URL` set and `cargo test -- --ignored`.

mod common;

use auth_core::{
    build_router,
    config::{DatabaseConfig, RedisConfig},
    db,
    services::{KeyRing, RedisSessionStore},
    AppState, Backends,
};
use axum::http::StatusCode;
use common::{key_file, test_config, PASSWORD, SIGNING_A, SIGNING_A_PUB};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

async fn backed_app() -> (axum::Router, AppState, Uuid, Vec<tempfile::NamedTempFile>) {
    dotenvy::dotenv().ok();
    let private = key_file(SIGNING_A);
    let public = key_file(SIGNING_A_PUB);
    let mut config = test_config(
        private.path().to_str().unwrap(),
        public.path().to_str().unwrap(),
    );
    let database = DatabaseConfig {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        max_connections: 5,
        min_connections: 1,
    };
    let redis = RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
    };
    config.database = Some(database.clone());
    config.redis = Some(redis.clone());

    let pool = db::create_pool(&database, config.backend_timeout()).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let sessions = RedisSessionStore::new(&redis, config.session_policy())
        .await
        .unwrap();

    let keys = KeyRing::from_config(&config.jwt).unwrap();
    let backends = Backends::postgres(pool, Arc::new(sessions));
    let state = AppState::new(config, backends, keys, None).unwrap();
    let router = build_router(state.clone());
    (router, state, Uuid::new_v4(), vec![private, public])
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_login_refresh_and_reuse_on_real_backends() {
    let (router, state, tenant_id, _keys) = backed_app().await;
    let username = format!("user-{}", Uuid::new_v4().simple());
    state
        .auth_service
        .register(tenant_id, &username, auth_core::utils::Password::new(PASSWORD), &[])
        .await
        .unwrap();

    let call = |path: &'static str, body: serde_json::Value| {
        let router = router.clone();
        async move {
            use tower::ServiceExt;
            let req = axum::http::Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string()))
                .unwrap();
            let res = router.oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice::<serde_json::Value>(&bytes).unwrap_or_default())
        }
    };

    let (status, body) = call(
        "/auth/login",
        json!({ "tenantId": tenant_id, "username": username, "password": PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first = common::token_pair(&body);

    let (status, _) = call("/auth/refresh", json!({ "refreshToken": first.refresh_token })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        call("/auth/refresh", json!({ "refreshToken": first.refresh_token })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenReuseDetected");

    let err = state
        .tokens
        .verify_access_token(&first.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind().as_str(), "TokenRevoked");
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_health_reports_both_backends() {
    let (_router, state, _tenant, _keys) = backed_app().await;

    state.auth_service.health().await.unwrap();
}
