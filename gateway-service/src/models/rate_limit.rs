use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical request classes counted independently per identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    AuthLogin,
    AuthSignup,
    AuthRefresh,
    Session,
    ApiMinute,
    ApiDay,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::AuthLogin => "auth:login",
            EndpointClass::AuthSignup => "auth:signup",
            EndpointClass::AuthRefresh => "auth:refresh",
            EndpointClass::Session => "session",
            EndpointClass::ApiMinute => "api:minute",
            EndpointClass::ApiDay => "api:day",
        }
    }

    /// Composite storage key for a counter.
    pub fn scope_key(&self, identifier: &str) -> String {
        format!("{}:{}", self.as_str(), identifier)
    }
}

/// Fixed-window counter persisted in the counter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub window_start: DateTime<Utc>,
    pub request_count: u32,
    pub last_request_at: DateTime<Utc>,
}

impl RateLimitCounter {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            request_count: 1,
            last_request_at: now,
        }
    }
}

/// Subscription tier of the owning account; drives API rate limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
    Business,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Business => "business",
        }
    }
}

/// Per-tier API limits. `requests_per_day = -1` disables the daily axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimits {
    pub requests_per_minute: u32,
    pub requests_per_day: i64,
}
