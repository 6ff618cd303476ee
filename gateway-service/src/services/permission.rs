//! Effective-permission resolution.
//!
//! Pure decision logic: given the resolved principal, the permissions an
//! endpoint requires and the requested context (own data, a managed user,
//! or a company), decide allow or deny. Deny reasons are for the audit log;
//! clients only ever see a generic message.

use crate::models::role::has_permission;
use crate::models::{AuthMode, LinkDirection, Principal};

/// Context the request wants to act in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessContext<'a> {
    pub context_user_id: Option<&'a str>,
    pub context_company_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied { reason: String },
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    fn denied(reason: impl Into<String>) -> Self {
        AccessDecision::Denied {
            reason: reason.into(),
        }
    }
}

/// Evaluate the required permissions against the principal in the given
/// context. Evaluation order is fixed: company context, then delegated
/// context, then the principal's own grant.
pub fn evaluate(
    principal: &Principal,
    required: &[&str],
    context: AccessContext<'_>,
) -> AccessDecision {
    // 1. Company context replaces the global check entirely
    if let Some(company_id) = context.context_company_id {
        let membership = match principal
            .company_memberships
            .iter()
            .find(|m| m.company_id == company_id)
        {
            Some(m) => m,
            None => {
                return AccessDecision::denied(format!(
                    "no membership in company {}",
                    company_id
                ))
            }
        };

        for permission in required {
            if !has_permission(&membership.permissions, permission) {
                return AccessDecision::denied(format!(
                    "company membership lacks permission {}",
                    permission
                ));
            }
        }
        return AccessDecision::Granted;
    }

    // 2. Acting on another user's data requires an accepted delegation
    if let Some(target) = context.context_user_id {
        if target != principal.user_id {
            let link = match principal
                .management_links
                .iter()
                .find(|l| l.direction == LinkDirection::Manages && l.managed_user_id == target)
            {
                Some(l) => l,
                None => return AccessDecision::denied("no management relationship"),
            };

            for permission in required {
                if !has_permission(&link.permissions, permission) {
                    return AccessDecision::denied(format!(
                        "management relationship lacks permission {}",
                        permission
                    ));
                }
                // An API key never reaches past its own scope, even through
                // a delegation that grants more
                if principal.auth_mode == AuthMode::ApiKey
                    && !has_permission(&principal.permissions, permission)
                {
                    return AccessDecision::denied(format!(
                        "API key scope lacks permission {}",
                        permission
                    ));
                }
            }
            return AccessDecision::Granted;
        }
    }

    // 3. Own data: check the principal's own grant
    for permission in required {
        if !has_permission(&principal.permissions, permission) {
            return AccessDecision::denied(format!("missing permission {}", permission));
        }
    }
    AccessDecision::Granted
}
