//! The downstream OAuth2 authorization-code collaborator.
//!
//! The login flows talk to the authorization server through the
//! [`OAuth2Provider`] trait: parse-and-police the downstream authorize
//! request, then mint-and-persist the authcode response. Response writing is
//! separate (see [`response`]) because it is shared by every flow and both
//! response modes.

pub mod form_post;
pub mod provider;
pub mod response;
pub mod storage;

use async_trait::async_trait;
use url::Url;

use crate::logic::session::DownstreamSession;

/// How the downstream client asked for the authcode response to be
/// delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// 303 redirect carrying the response in the query string.
    #[default]
    Query,
    /// 200 HTML page that re-posts the response to the redirect URI.
    FormPost,
}

/// A validated downstream authorize request.
///
/// Granted scopes are tracked separately from requested scopes and only ever
/// grow through [`AuthorizeRequester::grant_scope`], so granted is always a
/// subset of requested.
#[derive(Debug, Clone)]
pub struct AuthorizeRequester {
    pub client_id: String,
    pub redirect_uri: Url,
    pub response_mode: ResponseMode,
    pub state: String,
    pub requested_scopes: Vec<String>,
    granted_scopes: Vec<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub prompt: Option<String>,
}

impl AuthorizeRequester {
    pub fn was_scope_requested(&self, scope: &str) -> bool {
        self.requested_scopes.iter().any(|s| s == scope)
    }

    pub fn was_scope_granted(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    /// Mark a scope as granted. Idempotent.
    pub fn grant_scope(&mut self, scope: &str) {
        if !self.was_scope_granted(scope) {
            self.granted_scopes.push(scope.to_string());
        }
    }

    pub fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }
}

/// The authcode response produced for a finished login.
#[derive(Debug, Clone)]
pub struct AuthorizeResponder {
    pub code: String,
    pub granted_scopes: Vec<String>,
    /// The client's own state value, echoed back verbatim.
    pub state: String,
}

/// An OAuth2 protocol error from the authorization server.
///
/// `redirect_uri` is populated only when the client identity and redirect
/// target were validated before the failure, i.e. when the error may safely
/// be delivered to the client instead of rendered to the browser.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}: {description}")]
pub struct OAuth2Error {
    pub error: &'static str,
    pub description: String,
    pub redirect_uri: Option<Url>,
    pub state: Option<String>,
}

impl OAuth2Error {
    pub fn new(error: &'static str, description: impl Into<String>) -> Self {
        Self {
            error,
            description: description.into(),
            redirect_uri: None,
            state: None,
        }
    }

    pub fn with_redirect(mut self, redirect_uri: Url, state: Option<String>) -> Self {
        self.redirect_uri = Some(redirect_uri);
        self.state = state;
        self
    }

    pub fn is_redirectable(&self) -> bool {
        self.redirect_uri.is_some()
    }
}

#[async_trait]
pub trait OAuth2Provider: Send + Sync {
    /// Parse and validate a downstream authorize request from its raw
    /// url-encoded query. Performs no storage writes.
    async fn new_authorize_request(&self, query: &str) -> Result<AuthorizeRequester, OAuth2Error>;

    /// Mint the authcode for a finished login and persist the authcode and
    /// session records. Late downstream validations (PKCE, `prompt`) also
    /// happen here, possibly after some records were already written.
    async fn new_authorize_response(
        &self,
        requester: &AuthorizeRequester,
        session: &DownstreamSession,
    ) -> Result<AuthorizeResponder, OAuth2Error>;
}
