use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::config::JwtConfig;
use crate::models::{AuthMode, ManagementLink, MembershipClaim, Principal, Role, UnknownRole};

/// Signed bearer-token service (HS256).
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl_minutes: i64,
    issuer: String,
}

/// Claims embedded in an access token.
///
/// `roles` is kept as a list for compatibility with older tokens that
/// carried several; only the first entry is meaningful. Both the singular
/// string shape and the list shape decode into the same list here, so no
/// caller ever branches on claim shape again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    pub username: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(
        default,
        rename = "userManagements",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub user_managements: Vec<ManagementLink>,
    #[serde(
        default,
        rename = "companyMemberships",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub company_memberships: Vec<MembershipClaim>,
    #[serde(default, rename = "isSubAccount")]
    pub is_sub_account: bool,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
}

/// Accept `"user"` and `["user"]` alike; normalize to a list at the decode
/// boundary.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StringOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrList::One(s)) => vec![s],
        Some(StringOrList::Many(v)) => v,
    })
}

/// Identity snapshot a token is issued for.
#[derive(Debug, Clone)]
pub struct TokenIdentity {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub management_links: Vec<ManagementLink>,
    pub company_memberships: Vec<MembershipClaim>,
    pub is_sub_account: bool,
}

/// A token that did not validate. The reason is for logs only and must not
/// be echoed to clients.
#[derive(Debug, Error)]
#[error("invalid token: {reason}")]
pub struct InvalidToken {
    pub reason: String,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            access_token_ttl_minutes: config.access_token_ttl_minutes,
            issuer: config.issuer.clone(),
        }
    }

    pub fn default_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_minutes * 60
    }

    /// Issue a signed access token for the identity, valid for
    /// `ttl_seconds` from now.
    pub fn issue(
        &self,
        identity: &TokenIdentity,
        ttl_seconds: i64,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            username: identity.username.clone(),
            roles: vec![identity.role.as_str().to_string()],
            permissions: identity.permissions.clone(),
            user_managements: identity.management_links.clone(),
            company_memberships: identity.company_memberships.clone(),
            is_sub_account: identity.is_sub_account,
            iat: now,
            exp: now + ttl_seconds,
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(token)
    }

    /// Validate signature and expiry, then decode claims. Every failure
    /// mode collapses into [`InvalidToken`]; nothing here panics or leaks
    /// decode details to clients.
    pub fn validate(&self, token: &str) -> Result<AccessTokenClaims, InvalidToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Expiry boundaries are exact; a token one second past exp is dead
        validation.leeway = 0;

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| InvalidToken {
                reason: e.to_string(),
            })
    }
}

impl AccessTokenClaims {
    /// Build the request principal from validated claims. An out-of-list
    /// role is a hard error so corrupted claims cannot shift privilege.
    pub fn into_principal(self) -> Result<Principal, UnknownRole> {
        let role = match self.roles.first() {
            Some(role) => Role::parse(role)?,
            None => Role::User,
        };
        Ok(Principal {
            user_id: self.sub,
            email: self.email,
            username: self.username,
            role,
            permissions: self.permissions,
            management_links: self.user_managements,
            company_memberships: self.company_memberships,
            is_sub_account: self.is_sub_account,
            auth_mode: AuthMode::Session,
        })
    }
}
