//! Canonical roles and their permission grants.
//!
//! The role list is closed: any stored value outside it is a hard error so
//! that corrupted account data can never silently change privilege.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permission strings used across the endpoint and role tables.
pub mod perms {
    pub const PROFILE_READ: &str = "profile:read";
    pub const PROFILE_WRITE: &str = "profile:write";
    pub const LINKS_READ: &str = "links:read";
    pub const LINKS_WRITE: &str = "links:write";
    pub const APPEARANCE_READ: &str = "appearance:read";
    pub const APPEARANCE_WRITE: &str = "appearance:write";
    pub const ANALYTICS_READ: &str = "analytics:read";
    pub const BILLING_READ: &str = "billing:read";
    pub const BILLING_MANAGE: &str = "billing:manage";
    pub const API_KEYS_MANAGE: &str = "apikeys:manage";
    pub const USERS_MANAGE: &str = "users:manage";
    pub const ADMIN_PANEL: &str = "admin:panel";
}

#[derive(Debug, Error)]
#[error("role '{0}' is not in the allowed role list")]
pub struct UnknownRole(pub String);

/// Closed allow-list of account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "support")]
    Support,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "subAccount")]
    SubAccount,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Support => "support",
            Role::User => "user",
            Role::SubAccount => "subAccount",
        }
    }

    /// Parse a stored role value. Unknown values are an error, never a
    /// silent default.
    pub fn parse(value: &str) -> Result<Role, UnknownRole> {
        match value {
            "admin" => Ok(Role::Admin),
            "support" => Ok(Role::Support),
            "user" => Ok(Role::User),
            "subAccount" => Ok(Role::SubAccount),
            other => Err(UnknownRole(other.to_string())),
        }
    }

    /// Default permission grant for this role.
    pub fn permissions(&self) -> &'static [&'static str] {
        use perms::*;
        match self {
            Role::Admin => &[
                PROFILE_READ,
                PROFILE_WRITE,
                LINKS_READ,
                LINKS_WRITE,
                APPEARANCE_READ,
                APPEARANCE_WRITE,
                ANALYTICS_READ,
                BILLING_READ,
                BILLING_MANAGE,
                API_KEYS_MANAGE,
                USERS_MANAGE,
                ADMIN_PANEL,
            ],
            Role::Support => &[
                PROFILE_READ,
                LINKS_READ,
                APPEARANCE_READ,
                ANALYTICS_READ,
                USERS_MANAGE,
            ],
            Role::User => &[
                PROFILE_READ,
                PROFILE_WRITE,
                LINKS_READ,
                LINKS_WRITE,
                APPEARANCE_READ,
                APPEARANCE_WRITE,
                ANALYTICS_READ,
                BILLING_READ,
                BILLING_MANAGE,
                API_KEYS_MANAGE,
            ],
            // Sub-accounts never touch billing or key management
            Role::SubAccount => &[
                PROFILE_READ,
                PROFILE_WRITE,
                LINKS_READ,
                LINKS_WRITE,
                APPEARANCE_READ,
                APPEARANCE_WRITE,
                ANALYTICS_READ,
            ],
        }
    }

    pub fn permission_strings(&self) -> Vec<String> {
        self.permissions().iter().map(|p| p.to_string()).collect()
    }
}

/// Permissions that may be carried by a delegation edge, regardless of the
/// edge role. Billing and administration stay with the account owner.
const DELEGATE_GRANTABLE: &[&str] = &[
    perms::PROFILE_READ,
    perms::PROFILE_WRITE,
    perms::LINKS_READ,
    perms::LINKS_WRITE,
    perms::APPEARANCE_READ,
    perms::APPEARANCE_WRITE,
    perms::ANALYTICS_READ,
];

/// Permission grant for a delegation edge with the given role: the role's
/// normal grant scoped down to the delegate subset.
pub fn delegate_permissions(role: Role) -> Vec<String> {
    role.permissions()
        .iter()
        .filter(|p| DELEGATE_GRANTABLE.contains(p))
        .map(|p| p.to_string())
        .collect()
}

/// Exact-match permission lookup.
pub fn has_permission(granted: &[String], required: &str) -> bool {
    granted.iter().any(|g| g == required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_roles() {
        assert_eq!(Role::parse("admin").unwrap(), Role::Admin);
        assert_eq!(Role::parse("user").unwrap(), Role::User);
        assert_eq!(Role::parse("subAccount").unwrap(), Role::SubAccount);
    }

    #[test]
    fn parse_rejects_unknown_role() {
        let err = Role::parse("superadmin").unwrap_err();
        assert!(err.to_string().contains("superadmin"));
    }

    #[test]
    fn parse_is_case_sensitive() {
        // "Admin" is not in the allow-list; accepting it would widen the list
        assert!(Role::parse("Admin").is_err());
    }

    #[test]
    fn sub_account_has_no_billing_or_admin() {
        let grants = Role::SubAccount.permissions();
        assert!(!grants.contains(&perms::BILLING_READ));
        assert!(!grants.contains(&perms::BILLING_MANAGE));
        assert!(!grants.contains(&perms::API_KEYS_MANAGE));
        assert!(!grants.contains(&perms::ADMIN_PANEL));
    }

    #[test]
    fn delegate_subset_excludes_billing_even_for_admin() {
        let delegated = delegate_permissions(Role::Admin);
        assert!(delegated.contains(&perms::LINKS_WRITE.to_string()));
        assert!(!delegated.contains(&perms::BILLING_MANAGE.to_string()));
        assert!(!delegated.contains(&perms::USERS_MANAGE.to_string()));
        assert!(!delegated.contains(&perms::ADMIN_PANEL.to_string()));
    }

    #[test]
    fn has_permission_is_exact_match() {
        let granted = vec!["links:read".to_string()];
        assert!(has_permission(&granted, "links:read"));
        assert!(!has_permission(&granted, "links:write"));
        assert!(!has_permission(&granted, "links"));
    }
}
