//! Default authorization-code provider.
//!
//! Implements [`OAuth2Provider`] for a static client registry: request
//! validation up front, then authcode minting with the write-then-validate
//! ordering clients of this library observe. The authcode record is stored
//! first, OIDC-only validations and the OIDC session record follow, and
//! PKCE enforcement runs last, so a request that fails a late validation
//! can leave already-written records behind; they are unredeemable and
//! expire with their TTL.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use shared::error::CommonError;
use url::Url;

use crate::logic::session::{DownstreamSession, SCOPE_OPENID};
use crate::oauth::storage::{AuthorizeRecord, AuthorizeStorage};
use crate::oauth::{AuthorizeRequester, AuthorizeResponder, OAuth2Error, OAuth2Provider, ResponseMode};

/// Minimum length of the downstream `state` parameter.
const MIN_STATE_ENTROPY: usize = 8;

const INVALID_REQUEST_DESCRIPTION: &str = "The request is missing a required parameter, includes an invalid parameter value, includes a parameter more than once, or is otherwise malformed.";

const HINT_MISSING_CODE_CHALLENGE: &str =
    "Clients must include a code_challenge when performing the authorize code flow, but it is missing.";
const HINT_PLAIN_CODE_CHALLENGE_METHOD: &str =
    "Clients must use code_challenge_method=S256, plain is not allowed.";
const HINT_INVALID_CODE_CHALLENGE_METHOD: &str =
    "The code_challenge_method is not supported, use S256 instead.";
const HINT_PROMPT_NONE_WITH_OTHERS: &str =
    "Parameter 'prompt' was set to 'none', but contains other values as well which is not allowed.";

fn invalid_request(hint: &str) -> OAuth2Error {
    OAuth2Error::new(
        "invalid_request",
        format!("{INVALID_REQUEST_DESCRIPTION} {hint}"),
    )
}

/// A downstream client registered with the authorization server.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client_id: String,
    pub redirect_uris: Vec<Url>,
    pub allowed_scopes: Vec<String>,
}

pub struct CodeFlowProvider {
    clients: Vec<RegisteredClient>,
    storage: std::sync::Arc<dyn AuthorizeStorage>,
    authcode_hmac: Hmac<Sha256>,
}

impl CodeFlowProvider {
    /// The HMAC secret signs every minted authcode and must carry at least
    /// 32 bytes of entropy.
    pub fn new(
        clients: Vec<RegisteredClient>,
        storage: std::sync::Arc<dyn AuthorizeStorage>,
        authcode_hmac_secret: &[u8],
    ) -> Result<Self, CommonError> {
        if authcode_hmac_secret.len() < 32 {
            return Err(CommonError::Internal {
                msg: "authcode HMAC secret must be at least 32 bytes".to_string(),
                source: None,
            });
        }

        let authcode_hmac =
            Hmac::<Sha256>::new_from_slice(authcode_hmac_secret).map_err(|_| {
                CommonError::Internal {
                    msg: "authcode HMAC secret is invalid".to_string(),
                    source: None,
                }
            })?;

        Ok(Self {
            clients,
            storage,
            authcode_hmac,
        })
    }

    fn find_client(&self, client_id: &str) -> Option<&RegisteredClient> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }

    /// Mint an opaque authcode: random payload plus its HMAC-SHA256 tag.
    /// The tag doubles as the storage lookup key.
    fn mint_authcode(&self) -> (String, String) {
        let mut random = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut random);
        let payload = URL_SAFE_NO_PAD.encode(random);

        let mut mac = self.authcode_hmac.clone();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        (format!("{payload}.{signature}"), signature)
    }

    fn validate_prompt(&self, requester: &AuthorizeRequester) -> Result<(), OAuth2Error> {
        let Some(prompt) = &requester.prompt else {
            return Ok(());
        };

        let values: Vec<&str> = prompt.split_whitespace().collect();
        if values.contains(&"none") && values.len() > 1 {
            return Err(invalid_request(HINT_PROMPT_NONE_WITH_OTHERS)
                .with_redirect(requester.redirect_uri.clone(), Some(requester.state.clone())));
        }

        Ok(())
    }

    fn validate_pkce(&self, requester: &AuthorizeRequester) -> Result<(), OAuth2Error> {
        let redirectable = |err: OAuth2Error| {
            err.with_redirect(requester.redirect_uri.clone(), Some(requester.state.clone()))
        };

        if requester
            .code_challenge
            .as_deref()
            .unwrap_or_default()
            .is_empty()
        {
            return Err(redirectable(invalid_request(HINT_MISSING_CODE_CHALLENGE)));
        }

        match requester.code_challenge_method.as_deref() {
            Some("S256") => Ok(()),
            None | Some("") | Some("plain") => {
                Err(redirectable(invalid_request(HINT_PLAIN_CODE_CHALLENGE_METHOD)))
            }
            Some(_) => Err(redirectable(invalid_request(
                HINT_INVALID_CODE_CHALLENGE_METHOD,
            ))),
        }
    }
}

#[async_trait]
impl OAuth2Provider for CodeFlowProvider {
    async fn new_authorize_request(&self, query: &str) -> Result<AuthorizeRequester, OAuth2Error> {
        let params = parse_query(query);

        // Client identity first: nothing is trustworthy without it.
        let client_id = params.get("client_id").cloned().unwrap_or_default();
        let client = self.find_client(&client_id).ok_or_else(|| {
            OAuth2Error::new(
                "invalid_client",
                "Client authentication failed (e.g., unknown client, no client authentication included, or unsupported authentication method). The requested OAuth 2.0 Client does not exist.",
            )
        })?;

        // Redirect target second: errors before this point must never be
        // delivered by redirect.
        let redirect_uri = resolve_redirect_uri(client, params.get("redirect_uri"))?;
        let state = params.get("state").cloned();

        let redirectable = |err: OAuth2Error| {
            Err(err.with_redirect(redirect_uri.clone(), state.clone()))
        };

        let state = match &state {
            Some(value) if value.len() >= MIN_STATE_ENTROPY => value.clone(),
            _ => {
                return redirectable(OAuth2Error::new(
                    "invalid_state",
                    format!(
                        "Request parameter 'state' must be at least be {MIN_STATE_ENTROPY} characters long to ensure sufficient entropy."
                    ),
                ));
            }
        };

        match params.get("response_type").map(String::as_str) {
            Some("code") => {}
            other => {
                return redirectable(OAuth2Error::new(
                    "unsupported_response_type",
                    format!(
                        "The authorization server does not support obtaining a token using this method. The client is not allowed to request response type \"{}\".",
                        other.unwrap_or_default()
                    ),
                ));
            }
        }

        let requested_scopes: Vec<String> = params
            .get("scope")
            .map(|scope| {
                scope
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        for scope in &requested_scopes {
            if !client.allowed_scopes.contains(scope) {
                return redirectable(OAuth2Error::new(
                    "invalid_scope",
                    format!(
                        "The requested scope is invalid, unknown, or malformed. The OAuth 2.0 Client is not allowed to request scope \"{scope}\"."
                    ),
                ));
            }
        }

        let response_mode = match params.get("response_mode").map(String::as_str) {
            None | Some("query") => ResponseMode::Query,
            Some("form_post") => ResponseMode::FormPost,
            Some(other) => {
                return redirectable(OAuth2Error::new(
                    "unsupported_response_mode",
                    format!("The authorization server does not support the requested response mode \"{other}\"."),
                ));
            }
        };

        Ok(AuthorizeRequester {
            client_id,
            redirect_uri,
            response_mode,
            state,
            requested_scopes,
            granted_scopes: vec![],
            nonce: params.get("nonce").cloned(),
            code_challenge: params.get("code_challenge").cloned(),
            code_challenge_method: params.get("code_challenge_method").cloned(),
            prompt: params.get("prompt").cloned(),
        })
    }

    async fn new_authorize_response(
        &self,
        requester: &AuthorizeRequester,
        session: &DownstreamSession,
    ) -> Result<AuthorizeResponder, OAuth2Error> {
        let (code, signature) = self.mint_authcode();

        let record = AuthorizeRecord {
            signature,
            client_id: requester.client_id.clone(),
            requested_scopes: requester.requested_scopes.clone(),
            granted_scopes: requester.granted_scopes().to_vec(),
            session: session.clone(),
            requested_at: Utc::now(),
        };

        let storage_error = |e: CommonError| {
            OAuth2Error::new(
                "server_error",
                format!("The authorization server encountered an unexpected condition that prevented it from fulfilling the request. {e}"),
            )
        };

        self.storage
            .create_authcode_session(record.clone())
            .await
            .map_err(storage_error)?;

        if requester.was_scope_granted(SCOPE_OPENID) {
            self.validate_prompt(requester)?;
            self.storage
                .create_oidc_session(record.clone())
                .await
                .map_err(storage_error)?;
        }

        self.validate_pkce(requester)?;
        self.storage
            .create_pkce_session(record)
            .await
            .map_err(storage_error)?;

        Ok(AuthorizeResponder {
            code,
            granted_scopes: requester.granted_scopes().to_vec(),
            state: requester.state.clone(),
        })
    }
}

/// Parse an url-encoded query into a map; the first occurrence of a
/// parameter wins.
fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_insert(value.into_owned());
    }
    params
}

fn resolve_redirect_uri(
    client: &RegisteredClient,
    requested: Option<&String>,
) -> Result<Url, OAuth2Error> {
    let mismatch = || {
        OAuth2Error::new(
            "invalid_request",
            format!("{INVALID_REQUEST_DESCRIPTION} The \"redirect_uri\" parameter does not match any of the OAuth 2.0 Client's registered redirect urls."),
        )
    };

    let Some(requested) = requested else {
        // A client with a single registered redirect may omit the parameter.
        return match client.redirect_uris.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(mismatch()),
        };
    };

    let requested = Url::parse(requested).map_err(|_| mismatch())?;

    if client
        .redirect_uris
        .iter()
        .any(|registered| redirect_uri_matches(registered, &requested))
    {
        Ok(requested)
    } else {
        Err(mismatch())
    }
}

/// Exact match, except that loopback-IP redirects may vary the port
/// (RFC 8252 section 7.3).
fn redirect_uri_matches(registered: &Url, requested: &Url) -> bool {
    if registered == requested {
        return true;
    }

    let is_loopback_ip = matches!(
        requested.host_str().and_then(|h| h.parse::<IpAddr>().ok()),
        Some(ip) if ip.is_loopback()
    );

    is_loopback_ip
        && registered.scheme() == requested.scheme()
        && registered.host_str() == requested.host_str()
        && registered.path() == requested.path()
        && registered.query() == requested.query()
}
