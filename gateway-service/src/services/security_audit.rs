//! Security audit sink.
//!
//! Records security-relevant events (credential failures, bot blocks,
//! permission denials) without ever failing the request that triggered
//! them. Email addresses are redacted before they leave the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::store::CredentialStore;

/// Security audit event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Invalid or expired session token presented
    InvalidToken,
    /// Invalid, disabled or mis-shaped API key presented
    InvalidApiKey,
    /// Request to a sensitive auth endpoint scored as a likely bot
    LikelyBot,
    /// A rate-limit gate denied the request
    RateLimitExceeded,
    /// Authorization denied by the permission resolver
    PermissionDenied,
    /// Password check failed at login
    LoginFailed,
}

/// One persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    #[serde(rename = "_id")]
    pub id: String,
    pub event_type: SecurityEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Already redacted; raw addresses never reach the sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Builder-style constructor keeps call sites short.
pub struct EventDetails<'a> {
    pub user_id: Option<&'a str>,
    pub email: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub endpoint: Option<&'a str>,
    pub metadata: Option<serde_json::Value>,
}

impl Default for EventDetails<'_> {
    fn default() -> Self {
        Self {
            user_id: None,
            email: None,
            ip_address: None,
            endpoint: None,
            metadata: None,
        }
    }
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: EventDetails<'_>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            user_id: details.user_id.map(|s| s.to_string()),
            email: details.email.map(redact_email),
            ip_address: details.ip_address.map(|s| s.to_string()),
            endpoint: details.endpoint.map(|s| s.to_string()),
            metadata: details.metadata,
            created_at: Utc::now(),
        }
    }
}

/// Redact an email address to its first three characters plus domain.
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let kept: String = local.chars().take(3).collect();
            format!("{}***@{}", kept, domain)
        }
        None => "***".to_string(),
    }
}

/// Fire-and-forget audit writer.
#[derive(Clone)]
pub struct SecurityAuditService {
    store: Arc<dyn CredentialStore>,
}

impl SecurityAuditService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Record an event without blocking the request path. A failed write is
    /// logged and otherwise swallowed.
    pub fn record(&self, event: SecurityEvent) {
        tracing::warn!(
            event_type = ?event.event_type,
            user_id = ?event.user_id,
            endpoint = ?event.endpoint,
            "Security event"
        );
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert_security_event(&event).await {
                tracing::error!(
                    error = %e,
                    event_type = ?event.event_type,
                    "Failed to write security audit event"
                );
            }
        });
    }
}
