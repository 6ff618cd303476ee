mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use gateway_service::models::role::perms;
use gateway_service::models::{EdgeState, ManagementEdge, Role};
use gateway_service::services::CredentialStore;
use serde_json::json;

fn api_request(uri: &str, full_key: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", full_key))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn api_key_reads_own_account_with_quota_headers() {
    let app = spawn_app(test_config()).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, full_key) = app
        .state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    let response = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers.contains_key("x-ratelimit-limit"));
    assert!(headers.contains_key("x-ratelimit-remaining"));
    assert!(headers.contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["userId"], user.user_id);
}

#[tokio::test]
async fn api_key_without_required_permission_is_403() {
    let app = spawn_app(test_config()).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    // Key scoped to links only; getAccount needs profile:read
    let (_, full_key) = app
        .state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::LINKS_READ.to_string()])
        .await
        .unwrap();

    let response = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bad_api_key_is_401_with_www_authenticate() {
    let app = spawn_app(test_config()).await;

    let response = send(
        &app.router,
        api_request(
            "/api/v1/getAccount",
            "ltm_aaaaaaaa_bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    drain_background_tasks().await;
    assert!(!app.store.security_events().is_empty());
}

#[tokio::test]
async fn missing_credential_on_api_route_is_401() {
    let app = spawn_app(test_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/getAccount")
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoked_key_is_401() {
    let app = spawn_app(test_config()).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (record, full_key) = app
        .state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    app.state
        .api_keys
        .disable(&record.key_id, "revoked by owner")
        .await
        .unwrap();

    let response = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delegated_read_works_within_key_scope() {
    let app = spawn_app(test_config()).await;
    let mut manager =
        seed_user(&app.store, "manager@example.com", "correct-password-1", Role::User).await;
    manager.is_delegate_manager = true;
    app.store.insert_user(&manager).await.unwrap();
    let managed =
        seed_user(&app.store, "managed@example.com", "correct-password-1", Role::User).await;

    let mut edge = ManagementEdge::new(
        manager.user_id.clone(),
        managed.user_id.clone(),
        Role::User,
    );
    edge.state = EdgeState::Accepted;
    app.store.insert_management_edge(&edge).await.unwrap();

    let (_, full_key) = app
        .state
        .api_keys
        .issue(&manager.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    let uri = format!("/api/v1/getAccount?contextUserId={}", managed.user_id);
    let response = send(&app.router, api_request(&uri, &full_key)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], managed.user_id);
}

#[tokio::test]
async fn delegation_without_edge_is_403() {
    let app = spawn_app(test_config()).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let other = seed_user(&app.store, "other@example.com", "correct-password-1", Role::User).await;

    let (_, full_key) = app
        .state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    let uri = format!("/api/v1/getAccount?contextUserId={}", other.user_id);
    let response = send(&app.router, api_request(&uri, &full_key)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn session_can_manage_api_keys_end_to_end() {
    let app = spawn_app(test_config()).await;
    seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, cookie) = login(&app.router, "owner@example.com", "correct-password-1").await;

    // Create
    let request = browser_request("POST", "/admin/createApiKey")
        .header(header::COOKIE, cookie.clone())
        .body(Body::from(
            json!({ "name": "deploy bot", "permissions": [perms::LINKS_READ] }).to_string(),
        ))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let full_key = created["apiKey"].as_str().unwrap().to_string();
    let key_id = created["keyId"].as_str().unwrap().to_string();
    assert!(full_key.starts_with("ltm_"));

    // List never exposes the secret
    let request = browser_request("POST", "/admin/listApiKeys")
        .header(header::COOKIE, cookie.clone())
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["keyId"], key_id);
    assert!(listed[0].get("secretHash").is_none());

    // Revoke, then the key stops working
    let request = browser_request("POST", "/admin/revokeApiKey")
        .header(header::COOKIE, cookie)
        .body(Body::from(json!({ "keyId": key_id }).to_string()))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn key_permissions_can_be_narrowed_and_rewidened_within_grant() {
    let app = spawn_app(test_config()).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (record, _) = app
        .state
        .api_keys
        .issue(
            &user.user_id,
            "ci",
            vec![perms::PROFILE_READ.to_string(), perms::LINKS_READ.to_string()],
        )
        .await
        .unwrap();
    let (_, cookie) = login(&app.router, "owner@example.com", "correct-password-1").await;

    let request = browser_request("POST", "/admin/updateApiKey")
        .header(header::COOKIE, cookie.clone())
        .body(Body::from(
            json!({ "keyId": record.key_id, "permissions": [perms::LINKS_READ] }).to_string(),
        ))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["permissions"], json!([perms::LINKS_READ]));

    // Widening past the owner's own grant is refused
    let request = browser_request("POST", "/admin/updateApiKey")
        .header(header::COOKIE, cookie)
        .body(Body::from(
            json!({ "keyId": record.key_id, "permissions": [perms::USERS_MANAGE] }).to_string(),
        ))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn created_key_cannot_exceed_owner_grant() {
    let app = spawn_app(test_config()).await;
    // Sub-accounts have no apikeys:manage at all, so use a normal user and
    // request a permission outside their role grant
    seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, cookie) = login(&app.router, "owner@example.com", "correct-password-1").await;

    let request = browser_request("POST", "/admin/createApiKey")
        .header(header::COOKIE, cookie)
        .body(Body::from(
            json!({ "name": "too wide", "permissions": [perms::ADMIN_PANEL] }).to_string(),
        ))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unmapped_api_endpoint_fails_closed() {
    use async_trait::async_trait;
    use axum::response::{IntoResponse, Response};
    use gateway_service::dispatch::registry::{EndpointHandler, RequestContext};
    use service_core::error::AppError;
    use std::sync::Arc;

    struct GhostHandler;

    #[async_trait]
    impl EndpointHandler for GhostHandler {
        async fn call(&self, _ctx: RequestContext) -> Result<Response, AppError> {
            Ok("should never run".into_response())
        }
    }

    let config = test_config();
    let store = Arc::new(gateway_service::services::MemoryStore::new());
    let counters = Arc::new(gateway_service::services::MemoryCounterStore::new());
    let mut state =
        gateway_service::AppState::new(config, store.clone(), counters).unwrap();

    // A handler that exists but has no permission mapping
    let mut registry = gateway_service::build_registry();
    registry.register("admin/ghost", Arc::new(GhostHandler));
    state.registry = Arc::new(registry);

    let router = gateway_service::build_router(state.clone()).await.unwrap();

    let user = seed_user(&store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, full_key) = state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    let response = send(&router, api_request("/api/v1/ghost", &full_key)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Same fail-closed behavior on the session path
    let (_, cookie) = login(&router, "owner@example.com", "correct-password-1").await;
    let request = browser_request("POST", "/admin/ghost")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
