//! Projection of upstream identities into downstream sessions.
//!
//! This module owns the scope auto-grant policy, the subject/username/groups
//! mapping for both upstream kinds, and the provider-typed session payload
//! persisted alongside the downstream session for future refreshes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::error::CommonError;

use crate::logic::UpstreamType;
use crate::logic::upstream_ldap::{LdapAuthResponse, LdapIdentityProvider};
use crate::logic::upstream_oidc::{OidcIdentityProvider, UpstreamToken};
use crate::oauth::AuthorizeRequester;

pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_OFFLINE_ACCESS: &str = "offline_access";
pub const SCOPE_REQUEST_AUDIENCE: &str = "pinniped:request-audience";

/// Scopes granted automatically when (and only when) the client requested
/// them. Everything else is policed by the authorization server.
const AUTO_GRANTED_SCOPES: [&str; 3] = [SCOPE_OPENID, SCOPE_OFFLINE_ACCESS, SCOPE_REQUEST_AUDIENCE];

/// Grant the well-known scopes the supervisor always honors, iff requested.
/// Applying this twice is the same as applying it once.
pub fn grant_scopes_if_requested(requester: &mut AuthorizeRequester) {
    for scope in AUTO_GRANTED_SCOPES {
        if requester.was_scope_requested(scope) {
            requester.grant_scope(scope);
        }
    }
}

// ============================================
// Identity projection
// ============================================

/// The downstream identity minted for a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamIdentity {
    pub subject: String,
    pub username: String,
    pub groups: Vec<String>,
}

/// Project an upstream OIDC ID token into the downstream identity.
///
/// The subject is the upstream issuer plus the upstream subject, so it stays
/// stable across username changes. The username comes from the provider's
/// configured claim, falling back to `email` when that claim is absent from
/// the token. A missing groups claim projects to no groups; a single-string
/// groups value projects to a one-element list.
pub fn identity_from_upstream_id_token(
    provider: &dyn OidcIdentityProvider,
    claims: &Map<String, Value>,
) -> Result<DownstreamIdentity, CommonError> {
    let issuer = require_string_claim(claims, "iss")?;
    let upstream_subject = require_string_claim(claims, "sub")?;
    // Plain string concatenation, not URL building: the subject is an
    // opaque stable identifier, so the upstream value rides along verbatim.
    let subject = format!("{issuer}?sub={upstream_subject}");

    let username_claim = provider.username_claim();
    let username = claims
        .get(username_claim)
        .and_then(|v| v.as_str())
        .or_else(|| claims.get("email").and_then(|v| v.as_str()))
        .ok_or_else(|| {
            CommonError::unprocessable(format!(
                "required claim \"{username_claim}\" in upstream ID token missing"
            ))
        })?
        .to_string();

    let groups = match provider.groups_claim() {
        Some(claim) => claims.get(claim).map(groups_from_claim_value).unwrap_or_default(),
        None => vec![],
    };

    Ok(DownstreamIdentity {
        subject,
        username,
        groups,
    })
}

/// Project an authenticated directory bind into the downstream identity.
/// The subject appends `sub` to the provider URL's existing query string.
pub fn identity_from_upstream_ldap(
    provider: &dyn LdapIdentityProvider,
    response: &LdapAuthResponse,
) -> DownstreamIdentity {
    let subject = format!("{}&sub={}", provider.url(), response.user.uid);

    DownstreamIdentity {
        subject,
        username: response.user.name.clone(),
        groups: response.user.groups.clone(),
    }
}

fn require_string_claim<'a>(
    claims: &'a Map<String, Value>,
    claim: &str,
) -> Result<&'a str, CommonError> {
    claims.get(claim).and_then(|v| v.as_str()).ok_or_else(|| {
        CommonError::unprocessable(format!(
            "required claim \"{claim}\" in upstream ID token missing"
        ))
    })
}

fn groups_from_claim_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.to_string())
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => vec![],
    }
}

// ============================================
// Session payloads
// ============================================

/// Provider-specific refresh data, keyed by the provider type that minted
/// the session. Exactly one variant exists per session by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider_type", rename_all = "lowercase")]
pub enum ProviderSessionData {
    Oidc(OidcSessionData),
    Ldap(LdapSessionData),
    ActiveDirectory(ActiveDirectorySessionData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcSessionData {
    pub upstream_issuer: String,
    pub upstream_subject: String,
    /// Username claim value observed at bind time.
    pub upstream_username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapSessionData {
    pub user_dn: String,
    pub extra_refresh_attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveDirectorySessionData {
    pub user_dn: String,
    pub extra_refresh_attributes: HashMap<String, String>,
}

/// Session payload persisted with the downstream session to drive future
/// refreshes against the same upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSessionData {
    pub provider_uid: String,
    pub provider_name: String,
    #[serde(flatten)]
    pub provider: ProviderSessionData,
}

impl CustomSessionData {
    pub fn provider_type(&self) -> UpstreamType {
        match &self.provider {
            ProviderSessionData::Oidc(_) => UpstreamType::Oidc,
            ProviderSessionData::Ldap(_) => UpstreamType::Ldap,
            ProviderSessionData::ActiveDirectory(_) => UpstreamType::ActiveDirectory,
        }
    }
}

/// Build the session payload for an upstream OIDC login.
pub fn make_oidc_custom_session_data(
    provider: &dyn OidcIdentityProvider,
    token: &UpstreamToken,
    upstream_username: &str,
) -> Result<CustomSessionData, CommonError> {
    let issuer = require_string_claim(&token.id_token_claims, "iss")?;
    let upstream_subject = require_string_claim(&token.id_token_claims, "sub")?;

    Ok(CustomSessionData {
        provider_uid: provider.resource_uid().to_string(),
        provider_name: provider.name().to_string(),
        provider: ProviderSessionData::Oidc(OidcSessionData {
            upstream_issuer: issuer.to_string(),
            upstream_subject: upstream_subject.to_string(),
            upstream_username: upstream_username.to_string(),
        }),
    })
}

/// Build the session payload for an upstream LDAP or Active Directory
/// login. The variant follows the declared upstream type.
pub fn make_ldap_custom_session_data(
    provider: &dyn LdapIdentityProvider,
    upstream_type: UpstreamType,
    response: &LdapAuthResponse,
) -> Result<CustomSessionData, CommonError> {
    let provider_data = match upstream_type {
        UpstreamType::Ldap => ProviderSessionData::Ldap(LdapSessionData {
            user_dn: response.dn.clone(),
            extra_refresh_attributes: response.extra_refresh_attributes.clone(),
        }),
        UpstreamType::ActiveDirectory => {
            ProviderSessionData::ActiveDirectory(ActiveDirectorySessionData {
                user_dn: response.dn.clone(),
                extra_refresh_attributes: response.extra_refresh_attributes.clone(),
            })
        }
        UpstreamType::Oidc => {
            return Err(CommonError::Internal {
                msg: "directory session data requested for an OIDC upstream".to_string(),
                source: None,
            });
        }
    };

    Ok(CustomSessionData {
        provider_uid: provider.resource_uid().to_string(),
        provider_name: provider.name().to_string(),
        provider: provider_data,
    })
}

/// The downstream session handed to the authorization server for
/// persistence alongside the minted authcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamSession {
    pub subject: String,
    pub username: String,
    pub groups: Vec<String>,
    pub custom: CustomSessionData,
}

pub fn make_downstream_session(
    identity: DownstreamIdentity,
    custom: CustomSessionData,
) -> DownstreamSession {
    DownstreamSession {
        subject: identity.subject,
        username: identity.username,
        groups: identity.groups,
        custom,
    }
}
