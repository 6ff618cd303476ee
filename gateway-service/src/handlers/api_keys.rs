//! API key management for the owning account.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::dispatch::registry::{EndpointHandler, RequestContext};
use crate::models::role::has_permission;
use crate::models::ApiKey;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeApiKeyRequest {
    pub key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApiKeyRequest {
    pub key_id: String,
    pub permissions: Vec<String>,
}

/// Returned once, at creation: the only moment the full key exists.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKeyResponse {
    pub api_key: String,
    pub key_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySummary {
    pub key_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKey> for ApiKeySummary {
    fn from(key: ApiKey) -> Self {
        Self {
            key_id: key.key_id,
            name: key.name,
            permissions: key.permissions,
            active: key.active,
            disabled_reason: key.disabled_reason,
            created_at: key.created_at,
            last_used_at: key.last_used_at,
        }
    }
}

pub struct CreateApiKeyHandler;

#[async_trait]
impl EndpointHandler for CreateApiKeyHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let payload: CreateApiKeyRequest = ctx.parse_json()?;
        payload.validate()?;

        let principal = ctx.principal()?;

        // A key can never be issued wider than the issuer's own grant
        for requested in &payload.permissions {
            if !has_permission(&principal.permissions, requested) {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Requested permission {} exceeds your own grant",
                    requested
                )));
            }
        }

        let (record, full_key) = ctx
            .state
            .api_keys
            .issue(&principal.user_id, &payload.name, payload.permissions)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        Ok((
            StatusCode::CREATED,
            Json(CreatedApiKeyResponse {
                api_key: full_key,
                key_id: record.key_id,
                name: record.name,
                permissions: record.permissions,
                created_at: record.created_at,
            }),
        )
            .into_response())
    }
}

pub struct ListApiKeysHandler;

#[async_trait]
impl EndpointHandler for ListApiKeysHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let principal = ctx.principal()?;

        let keys = ctx
            .state
            .api_keys
            .list_for_owner(&principal.user_id)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        let summaries: Vec<ApiKeySummary> = keys.into_iter().map(ApiKeySummary::from).collect();
        Ok(Json(summaries).into_response())
    }
}

pub struct UpdateApiKeyHandler;

#[async_trait]
impl EndpointHandler for UpdateApiKeyHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let payload: UpdateApiKeyRequest = ctx.parse_json()?;
        let principal = ctx.principal()?;

        for requested in &payload.permissions {
            if !has_permission(&principal.permissions, requested) {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Requested permission {} exceeds your own grant",
                    requested
                )));
            }
        }

        let key = ctx
            .state
            .store
            .find_api_key(&payload.key_id)
            .await?
            .filter(|k| k.owner_user_id == principal.user_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("API key not found")))?;

        ctx.state
            .store
            .update_api_key_permissions(&key.key_id, &payload.permissions)
            .await?;

        let updated = ApiKeySummary {
            permissions: payload.permissions,
            ..ApiKeySummary::from(key)
        };
        Ok(Json(updated).into_response())
    }
}

pub struct RevokeApiKeyHandler;

#[async_trait]
impl EndpointHandler for RevokeApiKeyHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let payload: RevokeApiKeyRequest = ctx.parse_json()?;
        let principal = ctx.principal()?;

        // Same response for a missing key and someone else's key
        let key = ctx
            .state
            .store
            .find_api_key(&payload.key_id)
            .await?
            .filter(|k| k.owner_user_id == principal.user_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("API key not found")))?;

        ctx.state
            .api_keys
            .disable(&key.key_id, "revoked by owner")
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        tracing::info!(key_id = %key.key_id, user_id = %principal.user_id, "API key revoked");
        Ok(Json(serde_json::json!({ "revoked": true })).into_response())
    }
}
