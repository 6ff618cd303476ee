//! Request dispatcher.
//!
//! One entry point for the three route families. Every request runs the
//! same gauntlet in a fixed order: classify, authenticate, rate-limit,
//! authorize, invoke. Each gate returns a typed verdict; a failed gate
//! short-circuits into an HTTP-shaped error response that never leaks
//! internal detail outside development.

pub mod endpoints;
pub mod registry;
pub mod suspicion;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::config::{BotPolicy, Environment, GatewayConfig};
use crate::models::{EndpointClass, Principal};
use crate::services::permission::{evaluate, AccessContext, AccessDecision};
use crate::services::rate_limit::RateLimitDecision;
use crate::services::{ApiKeyError, EventDetails, SecurityEvent, SecurityEventType};
use crate::AppState;
use endpoints::{classify, required_permissions, RouteClass, SensitiveAuthPath};
use registry::RequestContext;

const BODY_LIMIT: usize = 1024 * 1024;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// JSON blob stored in the session cookie.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ContextParams {
    #[serde(rename = "contextUserId")]
    context_user_id: Option<String>,
    #[serde(rename = "contextCompanyId")]
    context_company_id: Option<String>,
}

/// Fallback handler wired under the router; everything that is not
/// `/health` lands here.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let Some(route) = classify(&path) else {
        return error_response(
            &state.config,
            StatusCode::NOT_FOUND,
            "not_found",
            "Resource not found",
            None,
        );
    };

    let context: ContextParams = req
        .uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let client_ip = client_ip(req.headers(), req.extensions().get::<ConnectInfo<SocketAddr>>());

    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(
                &state.config,
                StatusCode::BAD_REQUEST,
                "bad_request",
                "Request body could not be read",
                None,
            )
        }
    };

    let ctx = RequestContext {
        state: state.clone(),
        endpoint: route.endpoint.clone(),
        principal: None,
        context_user_id: context.context_user_id,
        context_company_id: context.context_company_id,
        headers: parts.headers,
        body,
        client_ip,
    };

    match route.class {
        RouteClass::Public { sensitive } => handle_public(state, ctx, sensitive).await,
        RouteClass::Api => handle_api(state, ctx).await,
        RouteClass::Admin => handle_admin(state, ctx).await,
    }
}

/// Public routes. The sensitive auth endpoints get suspicion scoring and
/// per-IP counters before their handler runs; other public endpoints go
/// straight through.
async fn handle_public(
    state: AppState,
    ctx: RequestContext,
    sensitive: Option<SensitiveAuthPath>,
) -> Response {
    if let Some(sensitive) = sensitive {
        let report = suspicion::score_request(&ctx.headers, &state.config.security.allowed_origins);
        let likely_bot = report.is_likely_bot(state.config.bot.score_threshold);

        if likely_bot {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::LikelyBot,
                EventDetails {
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    metadata: Some(json!({
                        "score": report.score,
                        "signals": report.signals,
                    })),
                    ..Default::default()
                },
            ));

            if state.config.bot.policy == BotPolicy::Block {
                return error_response(
                    &state.config,
                    StatusCode::BAD_REQUEST,
                    "bad_request",
                    "Request could not be processed",
                    Some(format!("suspicion score {}", report.score)),
                );
            }
        }

        let limits = &state.config.rate_limit;
        let (max_requests, window_seconds) = match sensitive {
            SensitiveAuthPath::Login => (limits.login_attempts, limits.login_window_seconds),
            SensitiveAuthPath::Signup => (limits.signup_attempts, limits.signup_window_seconds),
            SensitiveAuthPath::Refresh => (limits.refresh_attempts, limits.refresh_window_seconds),
        };
        // A throttled likely-bot shares the window but gets far fewer slots
        let max_requests = if likely_bot {
            limits.suspect_attempts.min(max_requests)
        } else {
            max_requests
        };

        let decision = state
            .limiter
            .check(
                sensitive.endpoint_class(),
                &ctx.client_ip,
                max_requests,
                window_seconds,
            )
            .await;
        if !decision.allowed {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::RateLimitExceeded,
                EventDetails {
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    ..Default::default()
                },
            ));
            return rate_limited_response(&state.config, &decision, false);
        }
    }

    invoke(state, ctx).await
}

/// API-key routes: resolve the key, run the tiered limiter, authorize, and
/// stamp quota headers onto successful responses.
async fn handle_api(state: AppState, mut ctx: RequestContext) -> Response {
    let resolved = match state.api_keys.resolve(&ctx.headers, &ctx.client_ip).await {
        Ok(resolved) => resolved,
        Err(e) => return api_key_failure(&state, &ctx, e),
    };

    let limits = state.config.tiers.limits_for(resolved.tier);
    let decision = state
        .limiter
        .check_api(&resolved.key.key_id, &resolved.owner.user_id, &limits)
        .await;
    if !decision.allowed {
        state.audit.record(SecurityEvent::new(
            SecurityEventType::RateLimitExceeded,
            EventDetails {
                user_id: Some(&resolved.owner.user_id),
                ip_address: Some(&ctx.client_ip),
                endpoint: Some(&ctx.endpoint),
                metadata: Some(json!({ "keyId": resolved.key.key_id })),
                ..Default::default()
            },
        ));
        return rate_limited_response(&state.config, &decision, true);
    }

    // Unmapped endpoints fail closed on credentialed routes
    let Some(required) = required_permissions(&ctx.endpoint) else {
        return forbidden_response(
            &state.config,
            Some(format!("endpoint {} has no permission mapping", ctx.endpoint)),
        );
    };

    let principal = resolved.into_principal();
    if let Some(response) = authorize(&state, &ctx, &principal, required) {
        return response;
    }

    ctx.principal = Some(principal);
    let mut response = invoke(state, ctx).await;
    if response.status().is_success() {
        attach_rate_limit_headers(&mut response, &decision);
    }
    response
}

/// Session routes: token from the auth cookie, flat per-user limiter, then
/// authorization.
async fn handle_admin(state: AppState, mut ctx: RequestContext) -> Response {
    let token = session_token_from_headers(&ctx.headers, &state.config.security.session_cookie_name);
    let Some(token) = token else {
        state.audit.record(SecurityEvent::new(
            SecurityEventType::InvalidToken,
            EventDetails {
                ip_address: Some(&ctx.client_ip),
                endpoint: Some(&ctx.endpoint),
                metadata: Some(json!({ "reason": "missing session cookie" })),
                ..Default::default()
            },
        ));
        return unauthorized_response(&state.config, "Authentication required", None, false);
    };

    let claims = match state.tokens.validate(&token) {
        Ok(claims) => claims,
        Err(invalid) => {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::InvalidToken,
                EventDetails {
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    metadata: Some(json!({ "reason": invalid.reason })),
                    ..Default::default()
                },
            ));
            return unauthorized_response(&state.config, "Invalid or expired session", None, false);
        }
    };

    let principal = match claims.into_principal() {
        Ok(principal) => principal,
        Err(unknown) => {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::PermissionDenied,
                EventDetails {
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    metadata: Some(json!({ "reason": unknown.to_string() })),
                    ..Default::default()
                },
            ));
            return forbidden_response(&state.config, Some(unknown.to_string()));
        }
    };

    let decision = state
        .limiter
        .check(
            EndpointClass::Session,
            &principal.user_id,
            state.config.rate_limit.session_requests_per_minute,
            60,
        )
        .await;
    if !decision.allowed {
        return rate_limited_response(&state.config, &decision, false);
    }

    let Some(required) = required_permissions(&ctx.endpoint) else {
        return forbidden_response(
            &state.config,
            Some(format!("endpoint {} has no permission mapping", ctx.endpoint)),
        );
    };

    if let Some(response) = authorize(&state, &ctx, &principal, required) {
        return response;
    }

    ctx.principal = Some(principal);
    invoke(state, ctx).await
}

/// Shared permission gate; `Some(response)` is a denial.
fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    principal: &Principal,
    required: &[&str],
) -> Option<Response> {
    let access = AccessContext {
        context_user_id: ctx.context_user_id.as_deref(),
        context_company_id: ctx.context_company_id.as_deref(),
    };

    match evaluate(principal, required, access) {
        AccessDecision::Granted => None,
        AccessDecision::Denied { reason } => {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::PermissionDenied,
                EventDetails {
                    user_id: Some(&principal.user_id),
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    metadata: Some(json!({ "reason": reason })),
                    ..Default::default()
                },
            ));
            Some(forbidden_response(&state.config, Some(reason)))
        }
    }
}

/// Look up the handler and run it. Handler faults become generic 500s.
async fn invoke(state: AppState, ctx: RequestContext) -> Response {
    let Some(handler) = state.registry.get(&ctx.endpoint) else {
        return error_response(
            &state.config,
            StatusCode::NOT_FOUND,
            "not_found",
            "Resource not found",
            None,
        );
    };

    match handler.call(ctx).await {
        Ok(response) => response,
        Err(e) => render_app_error(&state.config, e),
    }
}

fn api_key_failure(state: &AppState, ctx: &RequestContext, error: ApiKeyError) -> Response {
    match error {
        ApiKeyError::Store(e) => {
            tracing::error!(error = %e, "Credential store failure during API key resolution");
            error_response(
                &state.config,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
                None,
            )
        }
        ApiKeyError::OwnerRoleInvalid(e) => {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::PermissionDenied,
                EventDetails {
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    metadata: Some(json!({ "reason": e.to_string() })),
                    ..Default::default()
                },
            ));
            forbidden_response(&state.config, Some(e.to_string()))
        }
        e => {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::InvalidApiKey,
                EventDetails {
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    metadata: Some(json!({ "reason": e.to_string() })),
                    ..Default::default()
                },
            ));
            unauthorized_response(&state.config, "Invalid API key", Some(e.to_string()), true)
        }
    }
}

/// First address in `X-Forwarded-For`, else the socket peer, else
/// "unknown" (which still rate-limits, just coarsely).
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn session_token_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    let raw = jar.get(cookie_name)?.value().to_string();
    let decoded = urlencoding::decode(&raw).ok()?;
    let blob: SessionCookie = serde_json::from_str(&decoded).ok()?;
    Some(blob.access_token)
}

/// HTTP-shaped error. Development responses carry a structured body with
/// diagnostic detail; production responses are a bare safe message.
fn error_response(
    config: &GatewayConfig,
    status: StatusCode,
    code: &str,
    message: &str,
    detail: Option<String>,
) -> Response {
    let body = match config.environment {
        Environment::Dev => json!({
            "error": {
                "code": code,
                "message": message,
                "detail": detail,
            }
        }),
        Environment::Prod => json!({ "error": message }),
    };
    (status, Json(body)).into_response()
}

fn unauthorized_response(
    config: &GatewayConfig,
    message: &str,
    detail: Option<String>,
    api_route: bool,
) -> Response {
    let mut response =
        error_response(config, StatusCode::UNAUTHORIZED, "unauthorized", message, detail);
    if api_route {
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"api\""),
        );
    }
    response
}

fn forbidden_response(config: &GatewayConfig, detail: Option<String>) -> Response {
    error_response(
        config,
        StatusCode::FORBIDDEN,
        "forbidden",
        "Access denied",
        detail,
    )
}

fn rate_limited_response(
    config: &GatewayConfig,
    decision: &RateLimitDecision,
    api_route: bool,
) -> Response {
    let mut response = error_response(
        config,
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        "Too many requests. Please try again later.",
        None,
    );
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_seconds.max(1) as u64),
    );
    if api_route {
        attach_rate_limit_headers(&mut response, decision);
    }
    response
}

fn attach_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        RATE_LIMIT_RESET,
        HeaderValue::from(decision.window_reset_at.timestamp().max(0) as u64),
    );
}

/// Map a handler error onto the wire contract with environment-appropriate
/// detail.
fn render_app_error(config: &GatewayConfig, error: AppError) -> Response {
    let (status, code, message) = match &error {
        AppError::ValidationError(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "Validation error",
        ),
        AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", "Bad request"),
        AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", "Resource not found"),
        AppError::Unauthorized(_) | AppError::InvalidToken(_) => (
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Authentication required",
        ),
        AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", "Access denied"),
        AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict", "Conflict"),
        AppError::TooManyRequests(_, retry) => {
            let retry = retry.unwrap_or(1);
            let mut response = error_response(
                config,
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.",
                None,
            );
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry));
            return response;
        }
        _ => {
            tracing::error!(error = %error, "Handler failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            )
        }
    };

    error_response(config, status, code, message, Some(error.to_string()))
}
