use std::{collections::HashMap, sync::Arc};

use appetite::{
    app::build_app,
    auth::{
        ids::EntityKind,
        repo::{DirectoryError, UserDirectory},
        repo_types::User,
    },
    config::AppConfig,
    state::AppState,
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tower::ServiceExt; // for .oneshot()

fn test_config() -> AppConfig {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "postgres://unused/appetite"),
        ("JWT_SECRET", "http-test-secret-0123456789abcdef0123"),
        ("ARGON2_MEMORY_KIB", "1024"),
        ("ARGON2_ITERATIONS", "1"),
    ]);
    AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).expect("test config")
}

fn test_app() -> (Router, AppState) {
    let state = AppState::in_memory(test_config()).expect("state");
    (build_app(state.clone()), state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn register_and_login_over_http() {
    let (app, state) = test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/auth/register",
        Some(json!({
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "password": "analytical",
            "organizationId": "org-001",
            "organizationName": "Acme Insurance"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], "usr-001");
    assert_eq!(body["user"]["organizationName"], "Acme Insurance");
    assert!(body["user"].get("passwordHash").is_none());

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        Some(json!({"email": "ada@example.com", "password": "analytical"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Ada Lovelace");
    assert_eq!(body["user"]["roles"], "User");

    let token = body["token"].as_str().expect("token");
    let tokens = state.auth.tokens();
    assert_eq!(tokens.validate(token).unwrap().sub, "usr-001");

    let (status, me) = send(&app, "GET", "/auth/me", None, Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], "usr-001");
    assert_eq!(me["organizationId"], "org-001");
}

#[tokio::test]
async fn unknown_user_gets_generic_401() {
    let (app, _) = test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/auth/login",
        Some(json!({"email": "nouser@x.com", "password": "whatever"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
    assert_eq!(body["message"], "Invalid email or password");
    assert_eq!(body.as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_fields_are_400() {
    let (app, _) = test_app();
    let (status, body) = send(&app, "POST", "/auth/login", Some(json!({"email": "a@example.com"})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, _) = send(&app, "POST", "/auth/register", Some(json!({})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let (app, _) = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_registration_is_400() {
    let (app, _) = test_app();
    let payload = json!({"email": "dup@example.com", "password": "pw"});
    let (status, _) = send(&app, "POST", "/auth/register", Some(payload.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, "POST", "/auth/register", Some(payload), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "duplicate_email");
}

#[tokio::test]
async fn lockout_has_its_own_message() {
    let (app, _) = test_app();
    send(
        &app,
        "POST",
        "/auth/register",
        Some(json!({"email": "lock@example.com", "password": "right"})),
        None,
    )
    .await;

    for _ in 0..5 {
        let (status, body) = send(
            &app,
            "POST",
            "/auth/login",
            Some(json!({"email": "lock@example.com", "password": "wrong"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_credentials");
    }

    let (status, body) = send(
        &app,
        "POST",
        "/auth/login",
        Some(json!({"email": "lock@example.com", "password": "right"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "account_locked");
    assert_eq!(body["message"], "Account is temporarily locked");
}

#[tokio::test]
async fn me_requires_a_valid_token() {
    let (app, _) = test_app();
    let (status, _) = send(&app, "GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(&app, "GET", "/auth/me", None, Some("abc.def.ghi")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn only_admins_create_users() {
    let (app, state) = test_app();
    let (_, body) = send(
        &app,
        "POST",
        "/auth/register",
        Some(json!({"email": "plain@example.com", "password": "pw"})),
        None,
    )
    .await;
    let user_token = body["token"].as_str().unwrap().to_string();

    let new_user = json!({"email": "uw@example.com", "password": "pw", "roles": "carrier"});
    let (status, _) = send(&app, "POST", "/auth/users", Some(new_user.clone()), Some(&user_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin_token = state.auth.tokens()
        .issue("usr-900", "root@example.com", "admin", None, OffsetDateTime::now_utc())
        .unwrap();
    let (status, body) = send(&app, "POST", "/api/auth/users", Some(new_user), Some(&admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "usr-002");
    assert_eq!(body["roles"], "carrier");
}

#[tokio::test]
async fn health_and_database_status() {
    let (app, _) = test_app();

    let (status, body) = send(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["env"], "development");

    let (status, body) = send(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    send(
        &app,
        "POST",
        "/auth/register",
        Some(json!({"email": "count@example.com", "password": "pw"})),
        None,
    )
    .await;
    let (status, body) = send(&app, "GET", "/api/database/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["databaseConnected"], true);
    assert_eq!(body["tables"]["users"], 1);
    assert_eq!(body["tables"]["carriers"], 0);
}

struct Unreachable;

#[async_trait]
impl UserDirectory for Unreachable {
    async fn find_by_email(&self, _email: &str) -> Result<Option<User>, DirectoryError> {
        Err(DirectoryError::Database(sqlx::Error::PoolClosed))
    }
    async fn insert(&self, _user: &User) -> Result<(), DirectoryError> {
        Err(DirectoryError::Database(sqlx::Error::PoolClosed))
    }
    async fn update(&self, _user: &User) -> Result<User, DirectoryError> {
        Err(DirectoryError::Database(sqlx::Error::PoolClosed))
    }
    async fn count_by_kind(&self, _kind: EntityKind) -> Result<i64, DirectoryError> {
        Err(DirectoryError::Database(sqlx::Error::PoolClosed))
    }
}

#[tokio::test]
async fn database_status_hides_store_failures() {
    let state = AppState::from_parts(test_config(), Arc::new(Unreachable)).expect("state");
    let app = build_app(state);

    let (status, body) = send(&app, "GET", "/database/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["databaseConnected"], false);
    assert_eq!(body["error"], "database unavailable");
    assert!(body.get("tables").is_none());
    assert!(body["lastChecked"].is_string());
}
