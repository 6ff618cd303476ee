mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use gateway_service::models::role::perms;
use gateway_service::models::{Role, TierLimits};
use serde_json::json;

#[tokio::test]
async fn login_attempts_from_one_ip_are_capped() {
    let mut config = test_config();
    config.rate_limit.login_attempts = 3;
    config.rate_limit.login_window_seconds = 900;
    let app = spawn_app(config).await;
    seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;

    for _ in 0..3 {
        let response = post_json(
            &app.router,
            "/public/login",
            json!({ "email": "owner@example.com", "password": "wrong-password-1" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = post_json(
        &app.router,
        "/public/login",
        json!({ "email": "owner@example.com", "password": "correct-password-1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .expect("429 must carry Retry-After")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);
}

#[tokio::test]
async fn different_ips_do_not_share_login_windows() {
    let mut config = test_config();
    config.rate_limit.login_attempts = 1;
    let app = spawn_app(config).await;

    let request = browser_request("POST", "/public/login")
        .header("x-forwarded-for", "203.0.113.1")
        .body(Body::from(
            json!({ "email": "a@example.com", "password": "x" }).to_string(),
        ))
        .unwrap();
    assert_eq!(
        send(&app.router, request).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let request = browser_request("POST", "/public/login")
        .header("x-forwarded-for", "203.0.113.1")
        .body(Body::from(
            json!({ "email": "a@example.com", "password": "x" }).to_string(),
        ))
        .unwrap();
    assert_eq!(
        send(&app.router, request).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // A different client address still has its slot
    let request = browser_request("POST", "/public/login")
        .header("x-forwarded-for", "203.0.113.2")
        .body(Body::from(
            json!({ "email": "a@example.com", "password": "x" }).to_string(),
        ))
        .unwrap();
    assert_eq!(
        send(&app.router, request).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

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
async fn api_key_minute_quota_is_enforced_per_tier() {
    let mut config = test_config();
    config.tiers.free = TierLimits {
        requests_per_minute: 2,
        requests_per_day: -1,
    };
    let app = spawn_app(config).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, full_key) = app
        .state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    let first = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "2");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");

    let second = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    let third = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(third.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(third.headers()["x-ratelimit-remaining"], "0");
}

#[tokio::test]
async fn daily_quota_spans_all_keys_of_the_owner() {
    let mut config = test_config();
    config.tiers.free = TierLimits {
        requests_per_minute: 100,
        requests_per_day: 2,
    };
    let app = spawn_app(config).await;
    let user = seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, key_a) = app
        .state
        .api_keys
        .issue(&user.user_id, "a", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();
    let (_, key_b) = app
        .state
        .api_keys
        .issue(&user.user_id, "b", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    assert_eq!(
        send(&app.router, api_request("/api/v1/getAccount", &key_a)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app.router, api_request("/api/v1/getAccount", &key_b)).await.status(),
        StatusCode::OK
    );

    // Third request of the day is over quota regardless of which key
    assert_eq!(
        send(&app.router, api_request("/api/v1/getAccount", &key_a)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn pro_tier_reads_its_own_row_of_the_table() {
    let mut config = test_config();
    config.tiers.free = TierLimits {
        requests_per_minute: 1,
        requests_per_day: -1,
    };
    config.tiers.pro = TierLimits {
        requests_per_minute: 5,
        requests_per_day: -1,
    };
    let app = spawn_app(config).await;
    let user = seed_pro_user(&app.store, "pro@example.com", "correct-password-1").await;
    let (_, full_key) = app
        .state
        .api_keys
        .issue(&user.user_id, "ci", vec![perms::PROFILE_READ.to_string()])
        .await
        .unwrap();

    let response = send(&app.router, api_request("/api/v1/getAccount", &full_key)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
}

#[tokio::test]
async fn session_routes_have_a_flat_per_user_limit() {
    let mut config = test_config();
    config.rate_limit.session_requests_per_minute = 2;
    let app = spawn_app(config).await;
    seed_user(&app.store, "owner@example.com", "correct-password-1", Role::User).await;
    let (_, cookie) = login(&app.router, "owner@example.com", "correct-password-1").await;

    for _ in 0..2 {
        let request = browser_request("POST", "/admin/getAccount")
            .header(header::COOKIE, cookie.clone())
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app.router, request).await.status(), StatusCode::OK);
    }

    let request = browser_request("POST", "/admin/getAccount")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}
