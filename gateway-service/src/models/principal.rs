//! Resolved request identity.
//!
//! A [`Principal`] is built once per request from whichever credential
//! authenticated it and is immutable afterwards. Its permission list is
//! always bounded by the credential that produced it: a session token can
//! not grant more than its embedded claim, an API key not more than its
//! stored permissions.

use serde::{Deserialize, Serialize};

use super::management::{EdgeState, ManagementEdge};
use super::role::Role;

/// Which credential type authenticated the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Session,
    ApiKey,
}

/// Direction of a delegation link relative to the principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkDirection {
    /// The principal manages the linked account
    Manages,
    /// The linked account manages the principal
    ManagedBy,
}

/// Delegation link carried on a principal (and inside session claims).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementLink {
    pub managed_user_id: String,
    pub role: String,
    pub permissions: Vec<String>,
    pub direction: LinkDirection,
}

impl ManagementLink {
    /// Link as seen from the manager side of an accepted edge.
    pub fn from_edge(edge: &ManagementEdge) -> Option<Self> {
        if edge.state != EdgeState::Accepted {
            return None;
        }
        Some(Self {
            managed_user_id: edge.managed_user_id.clone(),
            role: edge.role.clone(),
            permissions: edge.permissions.clone(),
            direction: LinkDirection::Manages,
        })
    }
}

/// Company membership as carried on a principal (and inside claims).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipClaim {
    pub company_id: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// The resolved identity and permission set attached to a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub management_links: Vec<ManagementLink>,
    pub company_memberships: Vec<MembershipClaim>,
    pub is_sub_account: bool,
    pub auth_mode: AuthMode,
}
