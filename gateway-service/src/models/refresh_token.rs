use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Opaque refresh token. The token value doubles as the lookup key, so it
/// must be unguessable (64 random bytes, base64url encoded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The token value itself
    #[serde(rename = "_id")]
    pub token: String,

    pub owner_user_id: String,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    /// Cleared on logout or rotation; rows are physically removed later by
    /// the maintenance sweep.
    #[serde(default)]
    pub valid: bool,
}

impl RefreshToken {
    pub fn new(token: String, owner_user_id: String, ttl_days: i64) -> Self {
        let now = Utc::now();
        Self {
            token,
            owner_user_id,
            expires_at: now + Duration::days(ttl_days),
            created_at: now,
            valid: true,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_usable(&self) -> bool {
        self.valid && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_usable() {
        let token = RefreshToken::new("tok".to_string(), "user_1".to_string(), 30);
        assert!(token.is_usable());
        assert!(!token.is_expired());
    }

    #[test]
    fn invalidated_token_is_not_usable() {
        let mut token = RefreshToken::new("tok".to_string(), "user_1".to_string(), 30);
        token.valid = false;
        assert!(!token.is_usable());
    }

    #[test]
    fn expired_token_is_not_usable() {
        let mut token = RefreshToken::new("tok".to_string(), "user_1".to_string(), 30);
        token.expires_at = Utc::now() - Duration::seconds(1);
        assert!(token.is_expired());
        assert!(!token.is_usable());
    }
}
