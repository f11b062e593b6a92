//! Entry point of the login flow: the downstream authorize endpoint.
//!
//! Validates the downstream request with the authorization server, binds the
//! request to one upstream provider, and either bounces the browser to the
//! upstream OIDC authorize endpoint or renders the login form for directory
//! upstreams. Either way the request context is sealed into the `state`
//! parameter and pinned to the browser with the CSRF cookie.

use oauth2::{AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope};
use shared::error::CommonError;

use crate::logic::login_page;
use crate::logic::registry::UpstreamRegistry;
use crate::logic::state_codec::{STATE_FORMAT_VERSION, StateCodec, UpstreamStateParamData};
use crate::logic::upstream_oidc::OidcIdentityProvider;
use crate::logic::{UpstreamType, generate_token};
use crate::oauth::{OAuth2Error, OAuth2Provider};

/// Query parameter naming the upstream provider to log in with.
pub const IDP_NAME_PARAM: &str = "pinniped_idp_name";
/// Query parameter naming the upstream provider's type.
pub const IDP_TYPE_PARAM: &str = "pinniped_idp_type";

pub struct AuthorizeParams {
    /// Raw url-encoded query of the downstream authorize request.
    pub query: String,
    /// CSRF token recovered from a valid cookie on the request, if any.
    pub existing_csrf_token: Option<String>,
}

pub enum AuthorizeResult {
    /// Upstream OIDC: 303 to the upstream authorize endpoint.
    RedirectToUpstream {
        location: String,
        set_csrf_cookie: Option<String>,
    },
    /// Upstream LDAP or Active Directory: render the login form.
    LoginForm {
        html: String,
        set_csrf_cookie: Option<String>,
    },
}

/// Errors of the authorize flow keep their origin: protocol errors are
/// written by the authorization server's rules, everything else by ours.
pub enum AuthorizeError {
    OAuth2(OAuth2Error),
    Common(CommonError),
}

impl From<CommonError> for AuthorizeError {
    fn from(err: CommonError) -> Self {
        AuthorizeError::Common(err)
    }
}

/// Handle a downstream authorize request.
///
/// This function:
/// 1. Validates the request with the authorization server (no storage
///    writes happen there).
/// 2. Resolves the requested upstream provider by name and type.
/// 3. Mints nonce, PKCE verifier, and CSRF token (reusing the browser's
///    existing CSRF token when present) and seals them into `state`.
/// 4. Redirects to the upstream OIDC provider, or renders the login form
///    for directory providers.
pub async fn handle_authorize(
    upstreams: &UpstreamRegistry,
    oauth: &dyn OAuth2Provider,
    state_codec: &StateCodec,
    issuer: &str,
    redirect_uri: &str,
    params: AuthorizeParams,
) -> Result<AuthorizeResult, AuthorizeError> {
    let _requester = oauth
        .new_authorize_request(&params.query)
        .await
        .map_err(AuthorizeError::OAuth2)?;

    let (upstream_name, upstream_type) = read_idp_params(&params.query)?;

    let snapshot = upstreams.snapshot();
    let oidc_provider = match upstream_type {
        UpstreamType::Oidc => Some(snapshot.find_oidc(&upstream_name).ok_or_else(|| {
            tracing::warn!(%upstream_name, "upstream provider not found");
            CommonError::unprocessable("upstream provider not found")
        })?),
        UpstreamType::Ldap | UpstreamType::ActiveDirectory => {
            if snapshot.find_ldap(upstream_type, &upstream_name).is_none() {
                tracing::warn!(%upstream_name, "upstream provider not found");
                return Err(CommonError::unprocessable("upstream provider not found").into());
            }
            None
        }
    };

    let (csrf_token, set_csrf_cookie) = match params.existing_csrf_token {
        Some(token) => (token, None),
        None => {
            let token = generate_token();
            let cookie = state_codec.encode_csrf_cookie(&token)?;
            (token, Some(cookie))
        }
    };

    let nonce = generate_token();
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let state_data = UpstreamStateParamData {
        auth_params: params.query.clone(),
        upstream_name,
        upstream_type,
        nonce: nonce.clone(),
        csrf_token,
        pkce_code: pkce_verifier.secret().to_string(),
        format_version: STATE_FORMAT_VERSION.to_string(),
    };
    let encoded_state = state_codec.encode_state(&state_data)?;

    match oidc_provider {
        Some(provider) => {
            let location = build_upstream_authorize_url(
                provider.as_ref(),
                redirect_uri,
                &encoded_state,
                &nonce,
                &pkce_challenge,
            )?;

            Ok(AuthorizeResult::RedirectToUpstream {
                location,
                set_csrf_cookie,
            })
        }
        None => {
            let post_url = format!("{}{}", issuer.trim_end_matches('/'), crate::router::LOGIN_PATH);
            let html = login_page::render_login_form(&post_url, &encoded_state, None);

            Ok(AuthorizeResult::LoginForm {
                html,
                set_csrf_cookie,
            })
        }
    }
}

fn read_idp_params(query: &str) -> Result<(String, UpstreamType), CommonError> {
    let mut name = None;
    let mut type_value = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            IDP_NAME_PARAM => name = Some(value.into_owned()),
            IDP_TYPE_PARAM => type_value = Some(value.into_owned()),
            _ => {}
        }
    }

    let name = name.filter(|n| !n.is_empty()).ok_or_else(|| {
        CommonError::invalid_request(format!("{IDP_NAME_PARAM} param not found"))
    })?;
    let type_value = type_value.ok_or_else(|| {
        CommonError::invalid_request(format!("{IDP_TYPE_PARAM} param not found"))
    })?;
    let upstream_type = type_value.parse::<UpstreamType>().map_err(|_| {
        CommonError::invalid_request(format!(
            "{IDP_TYPE_PARAM} param has invalid value \"{type_value}\""
        ))
    })?;

    Ok((name, upstream_type))
}

/// Build the upstream authorize URL: standard authorization-code parameters
/// plus the sealed state, the upstream nonce, an S256 PKCE challenge, and
/// any extra parameters the provider is configured to send.
fn build_upstream_authorize_url(
    provider: &dyn OidcIdentityProvider,
    redirect_uri: &str,
    encoded_state: &str,
    nonce: &str,
    pkce_challenge: &PkceCodeChallenge,
) -> Result<String, CommonError> {
    let auth_url = AuthUrl::new(provider.authorization_endpoint().to_string()).map_err(|e| {
        CommonError::Internal {
            msg: "upstream authorization endpoint is not a valid URL".to_string(),
            source: Some(e.into()),
        }
    })?;
    let redirect_url =
        RedirectUrl::new(redirect_uri.to_string()).map_err(|e| CommonError::Internal {
            msg: "callback redirect URI is not a valid URL".to_string(),
            source: Some(e.into()),
        })?;

    let client = oauth2::basic::BasicClient::new(ClientId::new(provider.client_id().to_string()))
        .set_auth_uri(auth_url)
        .set_redirect_uri(redirect_url);

    let state = CsrfToken::new(encoded_state.to_string());
    let mut auth_request = client.authorize_url(move || state);

    for scope in provider.scopes() {
        auth_request = auth_request.add_scope(Scope::new(scope.clone()));
    }

    auth_request = auth_request.set_pkce_challenge(pkce_challenge.clone());

    let (mut url, _) = auth_request.url();

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("nonce", nonce);
        for (key, value) in provider.additional_authorize_parameters() {
            query.append_pair(key, value);
        }
    }

    Ok(url.to_string())
}
