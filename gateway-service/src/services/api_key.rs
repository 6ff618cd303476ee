//! API key issuance and resolution.

use axum::http::{header, HeaderMap};
use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::api_key::{
    format_key, hash_secret, parse_key, random_key_segment, ApiKey, KEY_ID_LEN, KEY_SECRET_LEN,
};
use crate::models::{
    AuthMode, ManagementLink, Principal, Role, SubscriptionTier, UnknownRole, User,
};
use crate::services::store::CredentialStore;

const MAX_ID_ATTEMPTS: usize = 5;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error("no API key credential presented")]
    Missing,
    #[error("credential does not match the API key format")]
    Malformed,
    #[error("unknown API key id")]
    UnknownKey,
    #[error("API key secret mismatch")]
    WrongSecret,
    #[error("API key is disabled: {}", reason.as_deref().unwrap_or("no reason recorded"))]
    Disabled { reason: Option<String> },
    #[error("API key owner account is deactivated")]
    OwnerDeactivated,
    #[error(transparent)]
    OwnerRoleInvalid(#[from] UnknownRole),
    #[error("could not allocate a unique key id after {MAX_ID_ATTEMPTS} attempts")]
    IdSpaceExhausted,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Outcome of a successful key resolution.
#[derive(Debug, Clone)]
pub struct ResolvedApiKey {
    pub key: ApiKey,
    pub owner: User,
    pub owner_role: Role,
    pub tier: SubscriptionTier,
    pub management_links: Vec<ManagementLink>,
}

impl ResolvedApiKey {
    /// The principal an API key authenticates as: the owning user, scoped
    /// to the key's stored permissions.
    pub fn into_principal(self) -> Principal {
        Principal {
            user_id: self.owner.user_id,
            email: self.owner.email,
            username: self.owner.username,
            role: self.owner_role,
            permissions: self.key.permissions,
            management_links: self.management_links,
            company_memberships: Vec::new(),
            is_sub_account: self.owner.is_sub_account,
            auth_mode: AuthMode::ApiKey,
        }
    }
}

#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn CredentialStore>,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Create a key for the owner and return the record together with the
    /// full key string. The secret is stored only as a hash, so this is the
    /// single moment the full key exists.
    pub async fn issue(
        &self,
        owner_user_id: &str,
        name: &str,
        permissions: Vec<String>,
    ) -> Result<(ApiKey, String), ApiKeyError> {
        let mut key_id = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = random_key_segment(KEY_ID_LEN);
            if self.store.find_api_key(&candidate).await?.is_none() {
                key_id = Some(candidate);
                break;
            }
        }
        let key_id = key_id.ok_or(ApiKeyError::IdSpaceExhausted)?;

        let secret = random_key_segment(KEY_SECRET_LEN);
        let record = ApiKey::new(
            key_id.clone(),
            owner_user_id.to_string(),
            &secret,
            name.to_string(),
            permissions,
        );
        self.store.insert_api_key(&record).await?;

        tracing::info!(key_id = %key_id, owner = %owner_user_id, "Issued API key");
        Ok((record.clone(), format_key(&key_id, &secret)))
    }

    /// Pull the key credential out of the request headers. `Authorization:
    /// Bearer ltm_...` and the dedicated header are both accepted.
    fn extract_credential(headers: &HeaderMap) -> Result<String, ApiKeyError> {
        if let Some(value) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            if value.starts_with("ltm_") {
                return Ok(value.to_string());
            }
        }

        if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            return Ok(value.to_string());
        }

        Err(ApiKeyError::Missing)
    }

    /// Resolve a presented credential into the owning identity. The
    /// last-used metadata update is spawned off the request path and may
    /// fail silently.
    pub async fn resolve(
        &self,
        headers: &HeaderMap,
        client_ip: &str,
    ) -> Result<ResolvedApiKey, ApiKeyError> {
        let credential = Self::extract_credential(headers)?;
        let (key_id, secret) = parse_key(&credential).ok_or(ApiKeyError::Malformed)?;

        let key = self
            .store
            .find_api_key(key_id)
            .await?
            .ok_or(ApiKeyError::UnknownKey)?;

        let candidate_hash = hash_secret(secret);
        if key
            .secret_hash
            .as_bytes()
            .ct_eq(candidate_hash.as_bytes())
            .unwrap_u8()
            != 1
        {
            return Err(ApiKeyError::WrongSecret);
        }

        if !key.active {
            return Err(ApiKeyError::Disabled {
                reason: key.disabled_reason.clone(),
            });
        }

        let owner = self
            .store
            .find_user_by_id(&key.owner_user_id)
            .await?
            .ok_or(ApiKeyError::OwnerDeactivated)?;
        if !owner.active {
            return Err(ApiKeyError::OwnerDeactivated);
        }

        let owner_role = owner.canonical_role()?;
        let tier = owner.subscription_tier;

        let management_links = if owner.is_delegate_manager {
            self.store
                .find_accepted_edges_for_manager(&owner.user_id)
                .await?
                .iter()
                .filter_map(ManagementLink::from_edge)
                .collect()
        } else {
            Vec::new()
        };

        // Best-effort usage metadata; never on the response path
        let store = self.store.clone();
        let touched_key = key.key_id.clone();
        let ip = client_ip.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.touch_api_key(&touched_key, Utc::now(), &ip).await {
                tracing::warn!(error = %e, key_id = %touched_key, "Failed to update key usage metadata");
            }
        });

        Ok(ResolvedApiKey {
            key,
            owner,
            owner_role,
            tier,
            management_links,
        })
    }

    pub async fn list_for_owner(&self, owner_user_id: &str) -> Result<Vec<ApiKey>, ApiKeyError> {
        Ok(self.store.find_api_keys_by_owner(owner_user_id).await?)
    }

    /// Soft-disable; records stay for audit and possible re-enable.
    pub async fn disable(
        &self,
        key_id: &str,
        reason: &str,
    ) -> Result<(), ApiKeyError> {
        self.store
            .set_api_key_active(key_id, false, Some(reason))
            .await?;
        Ok(())
    }
}
