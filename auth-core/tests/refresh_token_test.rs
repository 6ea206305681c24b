mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn test_refresh_rotates_both_tokens() {
    let app = TestApp::new().await;
    app.register("alice").await;
    let first = app.login("alice").await;

    let (status, body) = app
        .post(
            "/auth/refresh",
            None,
            json!({ "refreshToken": first.refresh_token }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let second = common::token_pair(&body);
    assert_eq!(second.session_id, first.session_id);
    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token, first.refresh_token);

    let (status, _) = app.get("/auth/verify", Some(&second.access_token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_token_reuse_revokes_session() {
    let app = TestApp::new().await;
    app.register("alice").await;
    let first = app.login("alice").await;

    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refreshToken": first.refresh_token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let second = common::token_pair(&body);

    // Replaying the rotated-out token kills the whole session
    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refreshToken": first.refresh_token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenReuseDetected");

    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refreshToken": second.refresh_token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenRevoked");

    let (status, body) = app.get("/auth/verify", Some(&second.access_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenRevoked");
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let app = TestApp::new().await;
    app.register("alice").await;
    let pair = app.login("alice").await;

    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refreshToken": pair.access_token }))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenMalformed");
}

#[tokio::test]
async fn test_garbage_refresh_token_is_malformed() {
    let app = TestApp::new().await;

    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refreshToken": "not.a.jwt" }))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenMalformed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_exactly_one_winner() {
    let app = TestApp::new().await;
    app.register("alice").await;
    let pair = app.login("alice").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tokens = app.state.tokens.clone();
        let refresh_token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move {
            tokens.refresh(&refresh_token).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => {
                let kind = e.kind().as_str();
                assert!(
                    ["ConcurrentRotation", "TokenReuseDetected", "TokenRevoked"].contains(&kind),
                    "unexpected error {}",
                    kind
                );
            }
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_logout_revokes_current_session() {
    let app = TestApp::new().await;
    app.register("alice").await;
    let pair = app.login("alice").await;

    let (status, body) = app.get("/auth/verify", Some(&pair.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["claims"]["sid"], pair.session_id.to_string());

    let (status, _) = app
        .request(Method::POST, "/auth/logout", Some(&pair.access_token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.get("/auth/verify", Some(&pair.access_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenRevoked");

    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refreshToken": pair.refresh_token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenRevoked");
}

#[tokio::test]
async fn test_logout_of_other_session_by_id() {
    let app = TestApp::new().await;
    app.register("alice").await;
    let laptop = app.login("alice").await;
    let phone = app.login("alice").await;

    let (status, _) = app
        .post(
            "/auth/logout",
            Some(&laptop.access_token),
            json!({ "sessionId": phone.session_id }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/auth/verify", Some(&laptop.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/auth/verify", Some(&phone.access_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cannot_logout_someone_elses_session() {
    let app = TestApp::new().await;
    app.register("alice").await;
    app.register("bob").await;
    let alice = app.login("alice").await;
    let bob = app.login("bob").await;

    let (status, body) = app
        .post(
            "/auth/logout",
            Some(&alice.access_token),
            json!({ "sessionId": bob.session_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "PermissionDenied");

    let (status, _) = app.get("/auth/verify", Some(&bob.access_token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_session_cap_evicts_least_recently_seen() {
    let app = TestApp::with_config(|c| c.session.max_sessions_per_principal = 3).await;
    app.register("alice").await;

    let oldest = app.login("alice").await;
    let mut newer = Vec::new();
    for _ in 0..3 {
        newer.push(app.login("alice").await);
    }

    let (status, body) = app.get("/auth/verify", Some(&oldest.access_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenRevoked");

    let (status, body) = app
        .get("/auth/sessions", Some(&newer[2].access_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body.as_array().unwrap();
    assert_eq!(sessions.len(), 3);
    assert!(sessions
        .iter()
        .all(|s| s["sessionId"] != oldest.session_id.to_string()));
    assert_eq!(
        sessions.iter().filter(|s| s["isCurrent"] == true).count(),
        1
    );
}

#[tokio::test]
async fn test_protected_route_requires_bearer_token() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/auth/sessions", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenMalformed");

    let (status, body) = app.get("/auth/sessions", Some("abc.def.ghi")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenMalformed");
}
