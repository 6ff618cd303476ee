//! Session lifecycle: login, signup, refresh rotation, logout.

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::config::{Environment, GatewayConfig};
use crate::dispatch::registry::{EndpointHandler, RequestContext};
use crate::dispatch::SessionCookie;
use crate::models::{ManagementLink, MembershipClaim, Role, User};
use crate::services::jwt::TokenIdentity;
use crate::services::{EventDetails, SecurityEvent, SecurityEventType};
use crate::utils::password::{hash_password, verify_password};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 10, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Snapshot the user's current grants into token claims.
pub async fn build_token_identity(
    state: &AppState,
    user: &User,
) -> Result<TokenIdentity, AppError> {
    let role = user
        .canonical_role()
        .map_err(|e| AppError::Forbidden(anyhow::anyhow!(e)))?;

    let management_links: Vec<ManagementLink> = if user.is_delegate_manager {
        state
            .store
            .find_accepted_edges_for_manager(&user.user_id)
            .await?
            .iter()
            .filter_map(ManagementLink::from_edge)
            .collect()
    } else {
        Vec::new()
    };

    let company_memberships: Vec<MembershipClaim> = state
        .store
        .find_company_memberships(&user.user_id)
        .await?
        .into_iter()
        .map(|m| MembershipClaim {
            company_id: m.company_id,
            role: m.role,
            permissions: m.permissions,
        })
        .collect();

    Ok(TokenIdentity {
        user_id: user.user_id.clone(),
        email: user.email.clone(),
        username: user.username.clone(),
        role,
        permissions: role.permission_strings(),
        management_links,
        company_memberships,
        is_sub_account: user.is_sub_account,
    })
}

/// Issue the access/refresh pair plus the session cookie header.
async fn issue_session(
    state: &AppState,
    user: &User,
) -> Result<(TokenResponse, HeaderValue), AppError> {
    let identity = build_token_identity(state, user).await?;
    let expires_in = state.tokens.default_ttl_seconds();
    let access_token = state.tokens.issue(&identity, expires_in)?;
    let refresh_token = state
        .refresh
        .issue(&user.user_id)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

    let cookie = session_cookie_header(&state.config, &access_token)?;

    Ok((
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        },
        cookie,
    ))
}

fn session_cookie_header(
    config: &GatewayConfig,
    access_token: &str,
) -> Result<HeaderValue, AppError> {
    let blob = serde_json::to_string(&SessionCookie {
        access_token: access_token.to_string(),
    })
    .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        config.security.session_cookie_name,
        urlencoding::encode(&blob)
    );
    if config.environment == Environment::Prod {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie).map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
}

fn clear_session_cookie_header(config: &GatewayConfig) -> HeaderValue {
    let cookie = format!(
        "{}=; Path=/; Max-Age=0; HttpOnly",
        config.security.session_cookie_name
    );
    HeaderValue::from_str(&cookie).expect("static cookie header is always valid")
}

fn with_cookie(mut response: Response, cookie: HeaderValue) -> Response {
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    response
}

pub struct LoginHandler;

#[async_trait]
impl EndpointHandler for LoginHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let payload: LoginRequest = ctx.parse_json()?;
        payload.validate()?;

        let state = &ctx.state;
        let user = state.store.find_user_by_email(&payload.email).await?;

        let Some(user) = user.filter(|u| u.active) else {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::LoginFailed,
                EventDetails {
                    email: Some(&payload.email),
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    ..Default::default()
                },
            ));
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid email or password"
            )));
        };

        if !verify_password(&payload.password, &user.password_hash) {
            state.audit.record(SecurityEvent::new(
                SecurityEventType::LoginFailed,
                EventDetails {
                    user_id: Some(&user.user_id),
                    email: Some(&payload.email),
                    ip_address: Some(&ctx.client_ip),
                    endpoint: Some(&ctx.endpoint),
                    ..Default::default()
                },
            ));
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid email or password"
            )));
        }

        let (tokens, cookie) = issue_session(state, &user).await?;
        tracing::info!(user_id = %user.user_id, "User logged in");
        Ok(with_cookie(Json(tokens).into_response(), cookie))
    }
}

pub struct SignupHandler;

#[async_trait]
impl EndpointHandler for SignupHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let payload: SignupRequest = ctx.parse_json()?;
        payload.validate()?;

        let state = &ctx.state;
        if state
            .store
            .find_user_by_email(&payload.email)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Email already registered"
            )));
        }

        let password_hash = hash_password(&payload.password)?;
        let user = User::new(
            payload.email.clone(),
            payload.username.clone(),
            password_hash,
            Role::User,
        );
        state.store.insert_user(&user).await?;

        let (tokens, cookie) = issue_session(state, &user).await?;
        tracing::info!(user_id = %user.user_id, "User signed up");
        Ok(with_cookie(
            (StatusCode::CREATED, Json(tokens)).into_response(),
            cookie,
        ))
    }
}

pub struct RefreshHandler;

#[async_trait]
impl EndpointHandler for RefreshHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let payload: RefreshRequest = ctx.parse_json()?;
        let state = &ctx.state;

        let record = match state.refresh.validate(&payload.refresh_token).await {
            Ok(record) => record,
            Err(e) => {
                state.audit.record(SecurityEvent::new(
                    SecurityEventType::InvalidToken,
                    EventDetails {
                        ip_address: Some(&ctx.client_ip),
                        endpoint: Some(&ctx.endpoint),
                        metadata: Some(serde_json::json!({ "reason": e.to_string() })),
                        ..Default::default()
                    },
                ));
                return Err(AppError::Unauthorized(anyhow::anyhow!(
                    "Invalid refresh token"
                )));
            }
        };

        let user = state
            .store
            .find_user_by_id(&record.owner_user_id)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid refresh token")))?;

        // Rotation: the presented token dies with this exchange
        state
            .refresh
            .invalidate(&payload.refresh_token)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        let (tokens, cookie) = issue_session(state, &user).await?;
        Ok(with_cookie(Json(tokens).into_response(), cookie))
    }
}

pub struct LogoutHandler;

#[async_trait]
impl EndpointHandler for LogoutHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let state = &ctx.state;
        let payload: LogoutRequest = if ctx.body.is_empty() {
            LogoutRequest::default()
        } else {
            ctx.parse_json()?
        };

        if let Some(refresh_token) = &payload.refresh_token {
            state
                .refresh
                .invalidate(refresh_token)
                .await
                .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        }

        let principal = ctx.principal()?;
        tracing::info!(user_id = %principal.user_id, "User logged out");

        Ok(with_cookie(
            Json(serde_json::json!({ "loggedOut": true })).into_response(),
            clear_session_cookie_header(&state.config),
        ))
    }
}
