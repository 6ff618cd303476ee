//! Endpoint handler registry.
//!
//! Handlers are registered once at startup under their canonical endpoint
//! names and the registry is checked against the permission table before
//! the service accepts traffic, so a mapped endpoint can never point at
//! nothing.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;

use super::endpoints::permission_mapped_endpoints;
use crate::models::Principal;
use crate::AppState;

/// Everything a handler gets to see about the request.
pub struct RequestContext {
    pub state: AppState,
    pub endpoint: String,
    /// Present on authenticated routes, absent on public ones
    pub principal: Option<Principal>,
    pub context_user_id: Option<String>,
    pub context_company_id: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
}

impl RequestContext {
    /// The authenticated principal; calling this on a public route is a
    /// wiring bug.
    pub fn principal(&self) -> Result<&Principal, AppError> {
        self.principal.as_ref().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "handler for {} expected an authenticated principal",
                self.endpoint
            ))
        })
    }

    /// The user whose data the request acts on: the context target when
    /// supplied, the caller otherwise.
    pub fn target_user_id(&self) -> Result<&str, AppError> {
        match &self.context_user_id {
            Some(target) => Ok(target),
            None => Ok(&self.principal()?.user_id),
        }
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e)))
    }
}

#[async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EndpointHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: &str, handler: Arc<dyn EndpointHandler>) {
        if self
            .handlers
            .insert(endpoint.to_string(), handler)
            .is_some()
        {
            tracing::warn!(endpoint = %endpoint, "Endpoint handler registered twice; keeping the later one");
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<Arc<dyn EndpointHandler>> {
        self.handlers.get(endpoint).cloned()
    }

    /// Startup check: every endpoint in the permission table must resolve
    /// to a registered handler.
    pub fn validate_permission_table(&self) -> Result<(), AppError> {
        for endpoint in permission_mapped_endpoints() {
            if !self.handlers.contains_key(endpoint) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "endpoint {} is permission-mapped but has no registered handler",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}
