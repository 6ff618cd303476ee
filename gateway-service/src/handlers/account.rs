use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::Json;
use service_core::error::AppError;

use crate::dispatch::registry::{EndpointHandler, RequestContext};
use crate::models::SanitizedUser;

/// Return the sanitized account record for the caller, or for a managed
/// user when a context target was supplied (authorization already ran in
/// the dispatcher).
pub struct GetAccountHandler;

#[async_trait]
impl EndpointHandler for GetAccountHandler {
    async fn call(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let target_user_id = ctx.target_user_id()?.to_string();

        let user = ctx
            .state
            .store
            .find_user_by_id(&target_user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User not found")))?;

        let role = user
            .canonical_role()
            .map_err(|e| AppError::Forbidden(anyhow::anyhow!(e)))?;

        Ok(Json(SanitizedUser::from_user(&user, role)).into_response())
    }
}
