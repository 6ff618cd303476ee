use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::{delegate_permissions, Role};

/// Lifecycle state of a delegation edge. Only accepted edges take part in
/// authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeState {
    Pending,
    Accepted,
    Rejected,
}

/// Directed delegation: `manager_user_id` acts on `managed_user_id`'s data
/// with the edge's permission subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementEdge {
    #[serde(rename = "_id")]
    pub edge_id: String,

    pub manager_user_id: String,

    pub managed_user_id: String,

    /// Role of the manager on the managed account, from the same allow-list
    /// as global roles
    pub role: String,

    /// Permission subset derived from the role at creation time
    pub permissions: Vec<String>,

    pub state: EdgeState,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ManagementEdge {
    pub fn new(manager_user_id: String, managed_user_id: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            edge_id: Uuid::new_v4().to_string(),
            manager_user_id,
            managed_user_id,
            role: role.as_str().to_string(),
            permissions: delegate_permissions(role),
            state: EdgeState::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
