//! Test harness for auth-core integration tests.
//!
//! Builds the full router on in-memory backends with the fixture signing keys
//! written to temp files, and drives it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use auth_core::{
    build_router,
    config::{
        AuthConfig, Environment, JwtConfig, LockoutConfig, MfaConfig, RateLimitConfig,
        SecurityConfig, SessionConfig,
    },
    models::Principal,
    services::{KeyMaterial, KeyRing, TokenPair},
    utils::Password,
    AppState, Backends,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use secrecy::Secret;
use serde_json::Value;
use std::io::Write;
use tempfile::NamedTempFile;
use totp_rs::{Algorithm, Secret as TotpSecret, TOTP};
use tower::ServiceExt;
use uuid::Uuid;

pub const SIGNING_A: &str = include_str!("../fixtures/signing_a.pem");
pub const SIGNING_A_PUB: &str = include_str!("../fixtures/signing_a.pub.pem");
pub const SIGNING_B: &str = include_str!("../fixtures/signing_b.pem");
pub const SIGNING_B_PUB: &str = include_str!("../fixtures/signing_b.pub.pem");

pub const PASSWORD: &str = "Corr3ct-Horse!";

pub fn key_file(pem: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(pem.as_bytes()).unwrap();
    file
}

pub fn test_config(private_key_path: &str, public_key_path: &str) -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        environment: Environment::Dev,
        service_name: "auth-core-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: None,
        redis: None,
        jwt: JwtConfig {
            issuer: "auth-core-test".to_string(),
            key_id: "key-a".to_string(),
            private_key_path: private_key_path.to_string(),
            public_key_path: public_key_path.to_string(),
            previous_key_id: None,
            previous_public_key_path: None,
            rotation_grace_minutes: 60,
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 30,
        },
        session: SessionConfig {
            max_sessions_per_principal: 5,
            idle_timeout_minutes: None,
        },
        lockout: LockoutConfig {
            threshold: 5,
            base_backoff_minutes: 30,
            max_backoff_minutes: 24 * 60,
        },
        mfa: MfaConfig {
            issuer: "auth-core-test".to_string(),
            encryption_key: Secret::new("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string()),
            backup_code_pepper: Secret::new("test-pepper".to_string()),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            principal_attempts: 1000,
            principal_window_seconds: 60,
            mfa_attempts: 1000,
            mfa_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        backend_timeout_ms: 2000,
        bootstrap: None,
    }
}

/// Full service on in-memory backends.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tenant_id: Uuid,
    _key_files: (NamedTempFile, NamedTempFile),
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AuthConfig)) -> Self {
        let private = key_file(SIGNING_A);
        let public = key_file(SIGNING_A_PUB);
        let mut config = test_config(
            private.path().to_str().unwrap(),
            public.path().to_str().unwrap(),
        );
        tweak(&mut config);

        let keys = KeyRing::from_config(&config.jwt).unwrap();
        let backends = Backends::in_memory(&config);
        let state = AppState::new(config, backends, keys, None).unwrap();
        let router = build_router(state.clone());

        Self {
            router,
            state,
            tenant_id: Uuid::new_v4(),
            _key_files: (private, public),
        }
    }

    pub async fn register(&self, username: &str) -> Principal {
        self.state
            .auth_service
            .register(self.tenant_id, username, Password::new(PASSWORD), &[])
            .await
            .unwrap()
    }

    /// Register a principal holding one role with `permissions`.
    pub async fn register_with(&self, username: &str, permissions: &[&str]) -> Principal {
        let principal = self.register(username).await;
        let permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
        let role = self
            .state
            .authz
            .create_role(self.tenant_id, &format!("{}-role", username), &permissions)
            .await
            .unwrap();
        self.state
            .authz
            .grant_role(principal.principal_id, role.role_id)
            .await
            .unwrap();
        principal
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    pub async fn post(&self, path: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, bearer, Some(body)).await
    }

    pub async fn get(&self, path: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, path, bearer, None).await
    }

    pub async fn login_raw(
        &self,
        username: &str,
        password: &str,
        mfa_code: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut body = serde_json::json!({
            "tenantId": self.tenant_id,
            "username": username,
            "password": password,
        });
        if let Some(code) = mfa_code {
            body["mfaCode"] = Value::String(code.to_string());
        }
        self.post("/auth/login", None, body).await
    }

    pub async fn login(&self, username: &str) -> TokenPair {
        let (status, body) = self.login_raw(username, PASSWORD, None).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        token_pair(&body)
    }
}

pub fn token_pair(body: &Value) -> TokenPair {
    TokenPair {
        access_token: body["accessToken"].as_str().unwrap().to_string(),
        refresh_token: body["refreshToken"].as_str().unwrap().to_string(),
        token_type: body["tokenType"].as_str().unwrap().to_string(),
        expires_in: body["expiresIn"].as_i64().unwrap(),
        session_id: body["sessionId"].as_str().unwrap().parse().unwrap(),
    }
}

pub fn key_b() -> KeyMaterial {
    KeyMaterial {
        kid: "key-b".to_string(),
        private_pem: SIGNING_B.to_string(),
        public_pem: SIGNING_B_PUB.to_string(),
    }
}

fn authenticator(secret_base32: &str) -> TOTP {
    let seed = TotpSecret::Encoded(secret_base32.to_string())
        .to_bytes()
        .unwrap();
    TOTP::new(Algorithm::SHA1, 6, 1, 30, seed, None, "test".to_string()).unwrap()
}

/// Current TOTP code for an enrollment secret.
pub fn totp_now(secret_base32: &str) -> String {
    authenticator(secret_base32).generate_current().unwrap()
}

/// Code for the next 30 second step, still inside the accepted skew.
pub fn totp_next(secret_base32: &str) -> String {
    let now = chrono::Utc::now().timestamp() as u64;
    authenticator(secret_base32).generate(now + 30)
}

/// Code for the previous 30 second step.
pub fn totp_previous(secret_base32: &str) -> String {
    let now = chrono::Utc::now().timestamp() as u64;
    authenticator(secret_base32).generate(now - 30)
}

/// Enroll and confirm MFA for a logged in principal. Returns the base32
/// secret and the backup codes.
pub async fn enable_mfa(app: &TestApp, access_token: &str) -> (String, Vec<String>) {
    let (status, setup) = app
        .request(Method::POST, "/auth/mfa/enroll", Some(access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "enroll failed: {}", setup);
    let secret = setup["secretBase32"].as_str().unwrap().to_string();

    let (status, confirmed) = app
        .post(
            "/auth/mfa/confirm",
            Some(access_token),
            serde_json::json!({ "code": totp_now(&secret) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "confirm failed: {}", confirmed);
    let backup_codes = confirmed["backupCodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect();
    (secret, backup_codes)
}
