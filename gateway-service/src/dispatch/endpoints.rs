//! Path classification and the endpoint permission table.
//!
//! Routes come in three shapes: `/api/v1/<op>` (API-key credentials,
//! aliased onto the same endpoint names as the session routes),
//! `/public/<op>` (no identity), and `/admin/<op>` (session cookie).
//! Endpoint names resolve through explicit tables only; nothing is built
//! from strings at request time.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::models::role::perms;
use crate::models::EndpointClass;

/// Anonymous auth endpoints that get suspicion scoring and their own
/// counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitiveAuthPath {
    Login,
    Signup,
    Refresh,
}

impl SensitiveAuthPath {
    pub fn endpoint_class(&self) -> EndpointClass {
        match self {
            SensitiveAuthPath::Login => EndpointClass::AuthLogin,
            SensitiveAuthPath::Signup => EndpointClass::AuthSignup,
            SensitiveAuthPath::Refresh => EndpointClass::AuthRefresh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public { sensitive: Option<SensitiveAuthPath> },
    Api,
    Admin,
}

/// A request path resolved to its canonical endpoint name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub class: RouteClass,
    pub endpoint: String,
}

/// Match a request path against the three route shapes. Anything else is a
/// 404 for the dispatcher.
pub fn classify(path: &str) -> Option<ResolvedRoute> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        ["public", op] if !op.is_empty() => {
            let sensitive = match *op {
                "login" => Some(SensitiveAuthPath::Login),
                "signup" => Some(SensitiveAuthPath::Signup),
                "refresh" => Some(SensitiveAuthPath::Refresh),
                _ => None,
            };
            Some(ResolvedRoute {
                class: RouteClass::Public { sensitive },
                endpoint: format!("public/{}", op),
            })
        }
        // API routes share handler names with the session routes
        ["api", "v1", op] if !op.is_empty() => Some(ResolvedRoute {
            class: RouteClass::Api,
            endpoint: format!("admin/{}", op),
        }),
        ["admin", op] if !op.is_empty() => Some(ResolvedRoute {
            class: RouteClass::Admin,
            endpoint: format!("admin/{}", op),
        }),
        _ => None,
    }
}

/// Required permissions per authenticated endpoint. An endpoint missing
/// from this table is denied outright on both authenticated paths; an
/// empty list means authentication alone is enough.
static ENDPOINT_PERMISSIONS: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| {
        let mut table: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        table.insert("admin/getAccount", &[perms::PROFILE_READ]);
        table.insert("admin/logout", &[]);
        table.insert("admin/createApiKey", &[perms::API_KEYS_MANAGE]);
        table.insert("admin/listApiKeys", &[perms::API_KEYS_MANAGE]);
        table.insert("admin/updateApiKey", &[perms::API_KEYS_MANAGE]);
        table.insert("admin/revokeApiKey", &[perms::API_KEYS_MANAGE]);
        table
    });

pub fn required_permissions(endpoint: &str) -> Option<&'static [&'static str]> {
    ENDPOINT_PERMISSIONS.get(endpoint).copied()
}

/// Endpoints the permission table knows about; the registry is validated
/// against this at startup.
pub fn permission_mapped_endpoints() -> impl Iterator<Item = &'static str> {
    ENDPOINT_PERMISSIONS.keys().copied()
}
