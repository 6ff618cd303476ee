use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rate_limit::SubscriptionTier;
use super::role::{Role, UnknownRole};

/// Account record, reduced to the fields the gateway needs to resolve a
/// principal. Profile content, billing state and page data live with the
/// business services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier for the user
    #[serde(rename = "_id")]
    pub user_id: String,

    pub email: String,

    pub username: String,

    /// Canonical role. Older records may carry `roles` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Legacy role list; only the first element is meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    /// Argon2 hash of the account password
    pub password_hash: String,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub is_sub_account: bool,

    /// Set when the user manages other accounts; gates loading of
    /// management edges during credential resolution.
    #[serde(default)]
    pub is_delegate_manager: bool,

    #[serde(default)]
    pub subscription_tier: SubscriptionTier,

    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(email: String, username: String, password_hash: String, role: Role) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            email,
            username,
            role: Some(role.as_str().to_string()),
            roles: None,
            password_hash,
            active: true,
            is_sub_account: role == Role::SubAccount,
            is_delegate_manager: false,
            subscription_tier: SubscriptionTier::Free,
            created_at: Utc::now(),
        }
    }

    /// Canonical role: the `role` field when present, else the first entry
    /// of the legacy `roles` list. Values outside the allow-list are an
    /// error.
    pub fn canonical_role(&self) -> Result<Role, UnknownRole> {
        if let Some(role) = &self.role {
            return Role::parse(role);
        }
        if let Some(first) = self.roles.as_ref().and_then(|r| r.first()) {
            return Role::parse(first);
        }
        Ok(Role::User)
    }
}

/// User representation safe to return to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedUser {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub role: String,
    pub is_sub_account: bool,
    pub subscription_tier: SubscriptionTier,
    pub created_at: DateTime<Utc>,
}

impl SanitizedUser {
    pub fn from_user(user: &User, role: Role) -> Self {
        Self {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            role: role.as_str().to_string(),
            is_sub_account: user.is_sub_account,
            subscription_tier: user.subscription_tier,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_user() -> User {
        User::new(
            "owner@example.com".to_string(),
            "owner".to_string(),
            "$argon2id$stub".to_string(),
            Role::User,
        )
    }

    #[test]
    fn canonical_role_prefers_role_field() {
        let mut user = base_user();
        user.role = Some("admin".to_string());
        user.roles = Some(vec!["user".to_string()]);
        assert_eq!(user.canonical_role().unwrap(), Role::Admin);
    }

    #[test]
    fn canonical_role_falls_back_to_legacy_list() {
        let mut user = base_user();
        user.role = None;
        user.roles = Some(vec!["support".to_string(), "user".to_string()]);
        assert_eq!(user.canonical_role().unwrap(), Role::Support);
    }

    #[test]
    fn canonical_role_defaults_to_user_when_absent() {
        let mut user = base_user();
        user.role = None;
        user.roles = None;
        assert_eq!(user.canonical_role().unwrap(), Role::User);
    }

    #[test]
    fn canonical_role_rejects_corrupt_value() {
        let mut user = base_user();
        user.role = Some("root".to_string());
        assert!(user.canonical_role().is_err());
    }
}
