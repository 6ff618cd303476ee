#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::util::ServiceExt;

use gateway_service::config::{
    BotConfig, BotPolicy, Environment, GatewayConfig, JwtConfig, MongoConfig, RateLimitConfig,
    RedisConfig, SecurityConfig, TierTable,
};
use gateway_service::models::{Role, SubscriptionTier, TierLimits, User};
use gateway_service::services::{MemoryCounterStore, MemoryStore};
use gateway_service::utils::password::hash_password;
use gateway_service::{build_router, AppState};

pub const TEST_ORIGIN: &str = "https://app.linkto.me";

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        common: service_core::config::Config { port: 8080 },
        environment: Environment::Dev,
        service_name: "gateway-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        mongodb: MongoConfig {
            uri: "mongodb://unused".to_string(),
            database: "unused".to_string(),
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            signing_secret:
                "integration-test-signing-secret-integration-test-signing-secret!!".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 30,
            issuer: "linktome".to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec![TEST_ORIGIN.to_string()],
            session_cookie_name: "ltm_session".to_string(),
        },
        bot: BotConfig {
            score_threshold: 200,
            policy: BotPolicy::Block,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 900,
            signup_attempts: 100,
            signup_window_seconds: 3600,
            refresh_attempts: 100,
            refresh_window_seconds: 900,
            suspect_attempts: 2,
            session_requests_per_minute: 1000,
        },
        tiers: TierTable {
            free: TierLimits {
                requests_per_minute: 1000,
                requests_per_day: -1,
            },
            pro: TierLimits {
                requests_per_minute: 1000,
                requests_per_day: -1,
            },
            business: TierLimits {
                requests_per_minute: 1000,
                requests_per_day: -1,
            },
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub async fn spawn_app(config: GatewayConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let counters = Arc::new(MemoryCounterStore::new());
    let state = AppState::new(config, store.clone(), counters).expect("failed to build state");
    let router = build_router(state.clone())
        .await
        .expect("failed to build router");

    TestApp {
        router,
        state,
        store,
    }
}

/// Insert a user with the given password and return it.
pub async fn seed_user(store: &MemoryStore, email: &str, password: &str, role: Role) -> User {
    use gateway_service::services::CredentialStore;

    let user = User::new(
        email.to_string(),
        email.split('@').next().unwrap().to_string(),
        hash_password(password).unwrap(),
        role,
    );
    store.insert_user(&user).await.unwrap();
    user
}

pub async fn seed_pro_user(store: &MemoryStore, email: &str, password: &str) -> User {
    use gateway_service::services::CredentialStore;

    let mut user = User::new(
        email.to_string(),
        email.split('@').next().unwrap().to_string(),
        hash_password(password).unwrap(),
        Role::User,
    );
    user.subscription_tier = SubscriptionTier::Pro;
    store.insert_user(&user).await.unwrap();
    user
}

/// Request builder carrying the full ordinary-browser header shape, so the
/// suspicion scorer stays quiet unless a test removes something.
pub fn browser_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::USER_AGENT,
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        )
        .header("sec-fetch-site", "same-origin")
        .header("sec-fetch-mode", "cors")
        .header(header::ORIGIN, TEST_ORIGIN)
        .header(header::REFERER, format!("{}/login", TEST_ORIGIN))
        .header(header::ACCEPT, "application/json")
        .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .header(header::ACCEPT_ENCODING, "gzip, deflate, br")
        .header(header::CONTENT_TYPE, "application/json")
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("request failed")
}

pub async fn post_json(
    router: &Router,
    uri: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = browser_request("POST", uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body was not JSON")
}

/// Log in through the public endpoint and return `(token_response,
/// session_cookie)`.
pub async fn login(
    router: &Router,
    email: &str,
    password: &str,
) -> (serde_json::Value, String) {
    let response = post_json(
        router,
        "/public/login",
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK, "login failed");

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login did not set a session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    (body_json(response).await, cookie)
}

/// Let spawned fire-and-forget tasks (audit writes, key touches) settle.
pub async fn drain_background_tasks() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
