use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::Role;

/// Membership of a user inside a company tenant. Permissions are scoped to
/// that company and checked instead of, not in addition to, the member's
/// global grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyMembership {
    #[serde(rename = "_id")]
    pub membership_id: String,

    pub company_id: String,

    pub user_id: String,

    pub role: String,

    pub permissions: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl CompanyMembership {
    pub fn new(company_id: String, user_id: String, role: Role) -> Self {
        Self {
            membership_id: Uuid::new_v4().to_string(),
            company_id,
            user_id,
            role: role.as_str().to_string(),
            permissions: role.permission_strings(),
            created_at: Utc::now(),
        }
    }
}
