//! Return leg of the directory (LDAP / Active Directory) flow.
//!
//! The login form posts the end user's credentials here together with the
//! encoded state. A failed bind sends the browser back to the login page
//! with the same state so the user can retry without a re-mint; a
//! successful bind turns into a downstream authcode response exactly like
//! the OIDC callback.

use anyhow::anyhow;
use shared::error::CommonError;
use url::Url;

use crate::logic::callback::AuthcodeReply;
use crate::logic::login_page::{ERR_PARAM, LOGIN_ERROR_BAD_CREDENTIALS, LOGIN_ERROR_INTERNAL};
use crate::logic::registry::UpstreamRegistry;
use crate::logic::session::{
    grant_scopes_if_requested, identity_from_upstream_ldap, make_downstream_session,
    make_ldap_custom_session_data,
};
use crate::logic::state_codec::UpstreamStateParamData;
use crate::oauth::{OAuth2Error, OAuth2Provider};

/// Credentials read from the POST body. Values that only appeared in the
/// URL query must never end up here.
#[derive(Debug, Default)]
pub struct LoginFormFields {
    pub username: String,
    pub password: String,
}

pub enum LoginResult {
    /// The login finished; write the downstream authcode response.
    Authcode(AuthcodeReply),
    /// The bind failed; send the browser back to the login page. The state
    /// is re-presented unchanged and the CSRF cookie stays valid.
    RedirectToLoginPage { location: String },
    /// The authorization server rejected the request while minting and
    /// chose how the error reaches the client.
    OAuth2Error(OAuth2Error),
}

/// Handle the login form POST for a directory upstream.
///
/// This function:
/// 1. Resolves the upstream provider named by the already-validated state;
///    the login form is only ever served for existing providers, so a miss
///    is a fatal handler error.
/// 2. Replays the original downstream authorize request through the
///    authorization server (fatal on rejection, as with the callback).
/// 3. Authenticates the posted credentials against the directory; empty
///    fields short-circuit as bad credentials without an upstream call.
/// 4. Projects the bind result and asks the authorization server for the
///    downstream authcode response.
pub async fn handle_post_login(
    upstreams: &UpstreamRegistry,
    oauth: &dyn OAuth2Provider,
    issuer: &str,
    encoded_state: &str,
    state: &UpstreamStateParamData,
    form: &LoginFormFields,
) -> Result<LoginResult, CommonError> {
    let snapshot = upstreams.snapshot();
    let provider = snapshot
        .find_ldap(state.upstream_type, &state.upstream_name)
        .ok_or_else(|| {
            tracing::warn!(
                upstream_name = %state.upstream_name,
                upstream_type = %state.upstream_type,
                "provider not found"
            );
            CommonError::unprocessable("error finding upstream provider: provider not found")
        })?;

    let mut requester =
        oauth
            .new_authorize_request(&state.auth_params)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "error using state downstream auth params");
                CommonError::InvalidRequest {
                    msg: "error using state downstream auth params".to_string(),
                    source: Some(anyhow!(e)),
                }
            })?;

    grant_scopes_if_requested(&mut requester);

    if form.username.is_empty() || form.password.is_empty() {
        return Ok(LoginResult::RedirectToLoginPage {
            location: login_url_with_error(issuer, LOGIN_ERROR_BAD_CREDENTIALS, encoded_state)?,
        });
    }

    let response = match provider.authenticate(&form.username, &form.password).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            return Ok(LoginResult::RedirectToLoginPage {
                location: login_url_with_error(issuer, LOGIN_ERROR_BAD_CREDENTIALS, encoded_state)?,
            });
        }
        Err(e) => {
            tracing::warn!(
                upstream_name = provider.name(),
                error = %e,
                "unexpected error during upstream authentication"
            );
            return Ok(LoginResult::RedirectToLoginPage {
                location: login_url_with_error(issuer, LOGIN_ERROR_INTERNAL, encoded_state)?,
            });
        }
    };

    let identity = identity_from_upstream_ldap(provider.as_ref(), &response);
    let custom = make_ldap_custom_session_data(provider.as_ref(), state.upstream_type, &response)?;
    let session = make_downstream_session(identity, custom);

    match oauth.new_authorize_response(&requester, &session).await {
        Ok(responder) => Ok(LoginResult::Authcode(AuthcodeReply {
            requester,
            responder,
        })),
        Err(e) => {
            tracing::warn!(
                upstream_name = provider.name(),
                error = %e,
                "error while generating and saving authcode"
            );
            Ok(LoginResult::OAuth2Error(e))
        }
    }
}

/// Login-page retry URL: `<issuer>/login?err=<code>&state=<encoded state>`.
fn login_url_with_error(
    issuer: &str,
    error: &str,
    encoded_state: &str,
) -> Result<String, CommonError> {
    let mut url = Url::parse(&format!(
        "{}{}",
        issuer.trim_end_matches('/'),
        crate::router::LOGIN_PATH
    ))?;
    url.query_pairs_mut()
        .append_pair(ERR_PARAM, error)
        .append_pair("state", encoded_state);

    Ok(url.to_string())
}
