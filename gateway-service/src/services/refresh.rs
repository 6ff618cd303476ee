use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use thiserror::Error;

use crate::models::RefreshToken;
use crate::services::store::CredentialStore;

/// Opaque refresh-token lifecycle against the credential store.
#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn CredentialStore>,
    ttl_days: i64,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh token not found")]
    NotFound,
    #[error("refresh token has been invalidated")]
    Invalidated,
    #[error("refresh token has expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn CredentialStore>, ttl_days: i64) -> Self {
        Self { store, ttl_days }
    }

    /// Generate and persist a refresh token for the user. The value is 64
    /// bytes from the OS CSPRNG, base64url encoded without padding so it is
    /// safe to use directly as a lookup key.
    pub async fn issue(&self, user_id: &str) -> Result<String, RefreshError> {
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let record = RefreshToken::new(token.clone(), user_id.to_string(), self.ttl_days);
        self.store.insert_refresh_token(&record).await?;

        Ok(token)
    }

    /// Look up and check a presented refresh token.
    pub async fn validate(&self, token: &str) -> Result<RefreshToken, RefreshError> {
        let record = self
            .store
            .find_refresh_token(token)
            .await?
            .ok_or(RefreshError::NotFound)?;

        if !record.valid {
            return Err(RefreshError::Invalidated);
        }
        if record.is_expired() {
            return Err(RefreshError::Expired);
        }

        Ok(record)
    }

    /// Soft-invalidate every row carrying this token value.
    pub async fn invalidate(&self, token: &str) -> Result<(), RefreshError> {
        let invalidated = self.store.invalidate_refresh_tokens(token).await?;
        if invalidated > 1 {
            tracing::warn!(rows = invalidated, "Invalidated duplicate refresh token rows");
        }
        Ok(())
    }

    /// Remove expired and invalidated rows; called from the maintenance
    /// scheduler.
    pub async fn sweep(&self) -> Result<u64, RefreshError> {
        Ok(self.store.sweep_refresh_tokens(Utc::now()).await?)
    }
}
