//! API key record and the `ltm_` key format.
//!
//! A full key is `ltm_<8 char id>_<32 char secret>`, both segments lowercase
//! alphanumeric. Only the SHA-256 hash of the secret is ever stored; the
//! full key is shown to the owner exactly once at creation.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const KEY_PREFIX: &str = "ltm";
pub const KEY_ID_LEN: usize = 8;
pub const KEY_SECRET_LEN: usize = 32;

const KEY_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Stored API key. The secret itself never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Public 8-character key identifier
    #[serde(rename = "_id")]
    pub key_id: String,

    pub owner_user_id: String,

    /// SHA-256 of the 32-character secret, hex-encoded
    pub secret_hash: String,

    /// Owner-chosen label
    pub name: String,

    /// Permissions this key may exercise; a key never reaches past them
    pub permissions: Vec<String>,

    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_ip: Option<String>,
}

impl ApiKey {
    pub fn new(
        key_id: String,
        owner_user_id: String,
        secret: &str,
        name: String,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            key_id,
            owner_user_id,
            secret_hash: hash_secret(secret),
            name,
            permissions,
            active: true,
            disabled_reason: None,
            created_at: Utc::now(),
            last_used_at: None,
            last_used_ip: None,
        }
    }
}

/// Uniformly sample a lowercase alphanumeric string from the OS CSPRNG.
pub fn random_key_segment(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn format_key(key_id: &str, secret: &str) -> String {
    format!("{}_{}_{}", KEY_PREFIX, key_id, secret)
}

fn is_key_charset(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Split a presented credential into `(key_id, secret)`. Returns `None` for
/// anything that does not match the key shape exactly.
pub fn parse_key(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("ltm_")?;
    let (key_id, secret) = rest.split_once('_')?;
    if key_id.len() != KEY_ID_LEN || secret.len() != KEY_SECRET_LEN {
        return None;
    }
    if !is_key_charset(key_id) || !is_key_charset(secret) {
        return None;
    }
    Some((key_id, secret))
}
