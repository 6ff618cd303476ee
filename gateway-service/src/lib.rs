pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::dispatch::registry::HandlerRegistry;
use crate::handlers::{
    CreateApiKeyHandler, GetAccountHandler, ListApiKeysHandler, LoginHandler, LogoutHandler,
    RefreshHandler, RevokeApiKeyHandler, SignupHandler, UpdateApiKeyHandler,
};
use crate::services::{
    ApiKeyService, CounterStore, CredentialStore, RateLimitService, RefreshTokenService,
    SecurityAuditService, TokenService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<dyn CredentialStore>,
    pub counters: Arc<dyn CounterStore>,
    pub tokens: TokenService,
    pub refresh: RefreshTokenService,
    pub api_keys: ApiKeyService,
    pub limiter: RateLimitService,
    pub audit: SecurityAuditService,
    pub registry: Arc<HandlerRegistry>,
}

impl AppState {
    /// Wire every service onto the two stores and validate the endpoint
    /// registry before any traffic is accepted.
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn CredentialStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Result<Self, AppError> {
        let registry = build_registry();
        registry.validate_permission_table()?;

        Ok(Self {
            tokens: TokenService::new(&config.jwt),
            refresh: RefreshTokenService::new(store.clone(), config.jwt.refresh_token_ttl_days),
            api_keys: ApiKeyService::new(store.clone()),
            limiter: RateLimitService::new(counters.clone()),
            audit: SecurityAuditService::new(store.clone()),
            registry: Arc::new(registry),
            config,
            store,
            counters,
        })
    }
}

/// Register every endpoint handler under its canonical name. The names
/// here and the permission table in `dispatch::endpoints` move together.
pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("public/login", Arc::new(LoginHandler));
    registry.register("public/signup", Arc::new(SignupHandler));
    registry.register("public/refresh", Arc::new(RefreshHandler));
    registry.register("admin/logout", Arc::new(LogoutHandler));
    registry.register("admin/getAccount", Arc::new(GetAccountHandler));
    registry.register("admin/createApiKey", Arc::new(CreateApiKeyHandler));
    registry.register("admin/listApiKeys", Arc::new(ListApiKeysHandler));
    registry.register("admin/updateApiKey", Arc::new(UpdateApiKeyHandler));
    registry.register("admin/revokeApiKey", Arc::new(RevokeApiKeyHandler));
    registry
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = Router::new()
        .route("/health", get(health_check))
        .fallback(dispatch::dispatch)
        .with_state(state)
        // Tracing span per request
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::HeaderName::from_static("x-api-key"),
                ])
                .allow_credentials(true),
        );

    Ok(app)
}

/// Service health check: both stores must answer.
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Credential store health check failed");
        AppError::InternalError(e)
    })?;

    state.counters.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Counter store health check failed");
        AppError::InternalError(e)
    })?;

    Ok(axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
    })))
}
