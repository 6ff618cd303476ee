//! Persistence contracts for the gateway.
//!
//! All shared mutable state (credentials, counters) lives behind these
//! traits and is updated with upsert-style writes keyed by a unique
//! identifier, so the pipeline itself stays lock-free. The in-memory
//! implementations back the test suite and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

use crate::models::{
    ApiKey, CompanyMembership, EdgeState, ManagementEdge, RateLimitCounter, RefreshToken, User,
};
use crate::services::security_audit::SecurityEvent;

/// Store of users, credentials and relationship edges.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;
    async fn insert_user(&self, user: &User) -> Result<(), anyhow::Error>;

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), anyhow::Error>;
    async fn find_api_key(&self, key_id: &str) -> Result<Option<ApiKey>, anyhow::Error>;
    async fn find_api_keys_by_owner(&self, owner_user_id: &str)
        -> Result<Vec<ApiKey>, anyhow::Error>;
    /// Metadata-only update on successful key use.
    async fn touch_api_key(
        &self,
        key_id: &str,
        used_at: DateTime<Utc>,
        ip: &str,
    ) -> Result<(), anyhow::Error>;
    async fn set_api_key_active(
        &self,
        key_id: &str,
        active: bool,
        reason: Option<&str>,
    ) -> Result<(), anyhow::Error>;
    async fn update_api_key_permissions(
        &self,
        key_id: &str,
        permissions: &[String],
    ) -> Result<(), anyhow::Error>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), anyhow::Error>;
    async fn find_refresh_token(&self, token: &str)
        -> Result<Option<RefreshToken>, anyhow::Error>;
    /// Mark every row with this token value invalid. Handles duplicate rows
    /// left behind by interrupted rotations.
    async fn invalidate_refresh_tokens(&self, token: &str) -> Result<u64, anyhow::Error>;
    /// Physically remove expired or invalidated refresh tokens.
    async fn sweep_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error>;

    async fn insert_management_edge(&self, edge: &ManagementEdge) -> Result<(), anyhow::Error>;
    /// Accepted edges where the given user is the manager.
    async fn find_accepted_edges_for_manager(
        &self,
        manager_user_id: &str,
    ) -> Result<Vec<ManagementEdge>, anyhow::Error>;

    async fn insert_company_membership(
        &self,
        membership: &CompanyMembership,
    ) -> Result<(), anyhow::Error>;
    async fn find_company_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompanyMembership>, anyhow::Error>;

    async fn insert_security_event(&self, event: &SecurityEvent) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Store of fixed-window rate-limit counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn fetch(&self, scope_key: &str) -> Result<Option<RateLimitCounter>, anyhow::Error>;
    /// Upsert keyed by scope; `ttl_seconds` bounds how long a stale counter
    /// may survive.
    async fn put(
        &self,
        scope_key: &str,
        counter: &RateLimitCounter,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error>;
    /// Drop counters whose window ended more than `max_window_seconds` ago.
    async fn sweep(&self, max_window_seconds: i64) -> Result<u64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    api_keys: DashMap<String, ApiKey>,
    refresh_tokens: DashMap<String, RefreshToken>,
    edges: DashMap<String, ManagementEdge>,
    memberships: DashMap<String, CompanyMembership>,
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded audit events, oldest first.
    pub fn security_events(&self) -> Vec<SecurityEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.clone()))
    }

    async fn insert_user(&self, user: &User) -> Result<(), anyhow::Error> {
        self.users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), anyhow::Error> {
        self.api_keys.insert(key.key_id.clone(), key.clone());
        Ok(())
    }

    async fn find_api_key(&self, key_id: &str) -> Result<Option<ApiKey>, anyhow::Error> {
        Ok(self.api_keys.get(key_id).map(|k| k.clone()))
    }

    async fn find_api_keys_by_owner(
        &self,
        owner_user_id: &str,
    ) -> Result<Vec<ApiKey>, anyhow::Error> {
        Ok(self
            .api_keys
            .iter()
            .filter(|k| k.owner_user_id == owner_user_id)
            .map(|k| k.clone())
            .collect())
    }

    async fn touch_api_key(
        &self,
        key_id: &str,
        used_at: DateTime<Utc>,
        ip: &str,
    ) -> Result<(), anyhow::Error> {
        if let Some(mut key) = self.api_keys.get_mut(key_id) {
            key.last_used_at = Some(used_at);
            key.last_used_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn set_api_key_active(
        &self,
        key_id: &str,
        active: bool,
        reason: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        if let Some(mut key) = self.api_keys.get_mut(key_id) {
            key.active = active;
            key.disabled_reason = reason.map(|r| r.to_string());
        }
        Ok(())
    }

    async fn update_api_key_permissions(
        &self,
        key_id: &str,
        permissions: &[String],
    ) -> Result<(), anyhow::Error> {
        if let Some(mut key) = self.api_keys.get_mut(key_id) {
            key.permissions = permissions.to_vec();
        }
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), anyhow::Error> {
        self.refresh_tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(self.refresh_tokens.get(token).map(|t| t.clone()))
    }

    async fn invalidate_refresh_tokens(&self, token: &str) -> Result<u64, anyhow::Error> {
        match self.refresh_tokens.get_mut(token) {
            Some(mut row) => {
                row.valid = false;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn sweep_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let before = self.refresh_tokens.len() as u64;
        self.refresh_tokens
            .retain(|_, t| t.valid && t.expires_at > now);
        Ok(before - self.refresh_tokens.len() as u64)
    }

    async fn insert_management_edge(&self, edge: &ManagementEdge) -> Result<(), anyhow::Error> {
        self.edges.insert(edge.edge_id.clone(), edge.clone());
        Ok(())
    }

    async fn find_accepted_edges_for_manager(
        &self,
        manager_user_id: &str,
    ) -> Result<Vec<ManagementEdge>, anyhow::Error> {
        Ok(self
            .edges
            .iter()
            .filter(|e| e.manager_user_id == manager_user_id && e.state == EdgeState::Accepted)
            .map(|e| e.clone())
            .collect())
    }

    async fn insert_company_membership(
        &self,
        membership: &CompanyMembership,
    ) -> Result<(), anyhow::Error> {
        self.memberships
            .insert(membership.membership_id.clone(), membership.clone());
        Ok(())
    }

    async fn find_company_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompanyMembership>, anyhow::Error> {
        Ok(self
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.clone())
            .collect())
    }

    async fn insert_security_event(&self, event: &SecurityEvent) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("event log poisoned: {}", e))?
            .push(event.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// In-memory counter store.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, RateLimitCounter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn fetch(&self, scope_key: &str) -> Result<Option<RateLimitCounter>, anyhow::Error> {
        Ok(self.counters.get(scope_key).map(|c| c.clone()))
    }

    async fn put(
        &self,
        scope_key: &str,
        counter: &RateLimitCounter,
        _ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.counters.insert(scope_key.to_string(), counter.clone());
        Ok(())
    }

    async fn sweep(&self, max_window_seconds: i64) -> Result<u64, anyhow::Error> {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_window_seconds);
        let before = self.counters.len() as u64;
        self.counters.retain(|_, c| c.window_start > cutoff);
        Ok(before - self.counters.len() as u64)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
