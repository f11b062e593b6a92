//! Return leg of the upstream OIDC flow.
//!
//! The upstream provider redirects the browser back here with its authcode;
//! this flow redeems it, projects the validated ID token into a downstream
//! session, and asks the authorization server to mint the downstream
//! authcode response. Nothing is written to storage before the state and
//! CSRF checks pass.

use anyhow::anyhow;
use shared::error::CommonError;

use crate::logic::UpstreamType;
use crate::logic::registry::UpstreamRegistry;
use crate::logic::session::{
    grant_scopes_if_requested, identity_from_upstream_id_token, make_downstream_session,
    make_oidc_custom_session_data,
};
use crate::logic::state_codec::StateCodec;
use crate::oauth::{AuthorizeRequester, AuthorizeResponder, OAuth2Provider};

pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub csrf_cookie: Option<String>,
}

/// A finished login, ready for the response writer.
#[derive(Debug)]
pub struct AuthcodeReply {
    pub requester: AuthorizeRequester,
    pub responder: AuthorizeResponder,
}

/// Handle the upstream OIDC callback.
///
/// This function:
/// 1. Validates the CSRF cookie and decodes the `state` parameter.
/// 2. Resolves the upstream provider named by the state.
/// 3. Replays the original downstream authorize request through the
///    authorization server; the state was minted from a request that
///    passed, so a failure here is a bug or client-config change.
/// 4. Redeems the upstream authcode and validates the returned tokens.
/// 5. Projects the upstream identity and builds the downstream session.
/// 6. Asks the authorization server to mint and persist the downstream
///    authcode.
pub async fn handle_callback(
    upstreams: &UpstreamRegistry,
    oauth: &dyn OAuth2Provider,
    state_codec: &StateCodec,
    redirect_uri: &str,
    params: CallbackParams,
) -> Result<AuthcodeReply, CommonError> {
    let (_, state) = state_codec
        .read_state_and_validate_csrf(params.csrf_cookie.as_deref(), params.state.as_deref())?;

    let code = match params.code.as_deref() {
        Some(code) if !code.is_empty() => code,
        _ => {
            tracing::info!("code param not found");
            return Err(CommonError::invalid_request("code param not found"));
        }
    };

    if state.upstream_type != UpstreamType::Oidc {
        tracing::warn!(upstream_name = %state.upstream_name, "upstream provider not found");
        return Err(CommonError::unprocessable("upstream provider not found"));
    }
    let snapshot = upstreams.snapshot();
    let provider = snapshot.find_oidc(&state.upstream_name).ok_or_else(|| {
        tracing::warn!(upstream_name = %state.upstream_name, "upstream provider not found");
        CommonError::unprocessable("upstream provider not found")
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

    let token = provider
        .exchange_authcode_and_validate_tokens(code, &state.pkce_code, &state.nonce, redirect_uri)
        .await
        .map_err(|e| {
            tracing::warn!(
                upstream_name = provider.name(),
                error = %e,
                "error exchanging and validating upstream tokens"
            );
            CommonError::UpstreamGateway {
                msg: "error exchanging and validating upstream tokens".to_string(),
                source: Some(anyhow!(e)),
            }
        })?;

    let identity = identity_from_upstream_id_token(provider.as_ref(), &token.id_token_claims)?;
    let custom = make_oidc_custom_session_data(provider.as_ref(), &token, &identity.username)?;
    let session = make_downstream_session(identity, custom);

    let responder = oauth
        .new_authorize_response(&requester, &session)
        .await
        .map_err(|e| {
            tracing::warn!(
                upstream_name = provider.name(),
                error = %e,
                "error while generating and saving authcode"
            );
            CommonError::Internal {
                msg: "error while generating and saving authcode".to_string(),
                source: Some(anyhow!(e)),
            }
        })?;

    Ok(AuthcodeReply {
        requester,
        responder,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;
    use serde_json::Value;

    use super::*;
    use crate::logic::registry::UpstreamSnapshot;
    use crate::logic::session::ProviderSessionData;
    use crate::logic::state_codec::UpstreamStateParamData;
    use crate::oauth::response::write_authorize_response;
    use crate::test::fixtures::{
        TestOidcProvider, TestSetup, UPSTREAM_AUTHCODE, encode_params,
        happy_downstream_request_params,
    };

    fn setup_with_provider(provider: TestOidcProvider) -> TestSetup {
        let setup = TestSetup::new();
        setup.registry.update(UpstreamSnapshot {
            oidc: vec![Arc::new(provider)],
            ldap: vec![],
            active_directory: vec![],
        });
        setup
    }

    fn setup() -> TestSetup {
        setup_with_provider(TestOidcProvider::with_happy_exchange(
            "some-oidc-idp",
            "oidc-resource-uid",
        ))
    }

    fn oidc_state(setup: &TestSetup, auth_params: &str) -> UpstreamStateParamData {
        setup.happy_state("some-oidc-idp", crate::logic::UpstreamType::Oidc, auth_params)
    }

    fn happy_params(setup: &TestSetup, state: &UpstreamStateParamData) -> CallbackParams {
        CallbackParams {
            code: Some(UPSTREAM_AUTHCODE.to_string()),
            state: Some(setup.codec.encode_state(state).unwrap()),
            csrf_cookie: Some(setup.codec.encode_csrf_cookie(&state.csrf_token).unwrap()),
        }
    }

    async fn run(setup: &TestSetup, params: CallbackParams) -> Result<AuthcodeReply, CommonError> {
        handle_callback(
            &setup.registry,
            setup.oauth.as_ref(),
            &setup.codec,
            &setup.callback_redirect_uri(),
            params,
        )
        .await
    }

    #[tokio::test]
    async fn test_happy_oidc_callback_mints_a_downstream_authcode() {
        let setup = setup();
        let auth_params = encode_params(&happy_downstream_request_params());
        let state = oidc_state(&setup, &auth_params);

        let reply = run(&setup, happy_params(&setup, &state)).await.unwrap();

        let response = write_authorize_response(&reply.requester, &reply.responder);
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        let pattern =
            regex::Regex::new(r"^http://127\.0\.0\.1/callback\?code=([^&]+)&scope=openid&state=8b-state$")
                .unwrap();
        assert!(pattern.is_match(location), "unexpected location: {location}");

        // The persisted session carries the projected OIDC identity.
        assert_eq!(setup.storage.record_count(), 3);
        let (_, record) = &setup.storage.records()[0];
        assert_eq!(
            record.session.subject,
            "https://upstream.example.com?sub=abc123"
        );
        assert_eq!(record.session.username, "pinny");
        assert_eq!(record.session.groups, vec!["group1", "group2"]);
        assert_eq!(record.session.custom.provider_uid, "oidc-resource-uid");
        assert_eq!(record.session.custom.provider_name, "some-oidc-idp");
        match &record.session.custom.provider {
            ProviderSessionData::Oidc(data) => {
                assert_eq!(data.upstream_issuer, "https://upstream.example.com");
                assert_eq!(data.upstream_subject, "abc123");
                assert_eq!(data.upstream_username, "pinny");
            }
            other => panic!("expected OIDC session data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_the_exchange_receives_the_state_bound_values() {
        let setup = setup_with_provider(TestOidcProvider::asserting_exchange(
            "some-oidc-idp",
            "oidc-resource-uid",
        ));
        let auth_params = encode_params(&happy_downstream_request_params());
        let state = oidc_state(&setup, &auth_params);

        // The asserting provider fails the exchange unless it receives the
        // authcode, PKCE verifier, nonce, and redirect URI recorded here.
        let result = run(&setup, happy_params(&setup, &state)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_code_is_rejected_after_state_validation() {
        let setup = setup();
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));
        let mut params = happy_params(&setup, &state);
        params.code = None;

        let err = run(&setup, params).await.unwrap_err();
        assert_eq!(err.to_string(), "code param not found");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_state_is_rejected() {
        let setup = setup();
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));
        let mut params = happy_params(&setup, &state);
        params.state = None;

        let err = run(&setup, params).await.unwrap_err();
        assert_eq!(err.to_string(), "state param not found");
    }

    #[tokio::test]
    async fn test_missing_csrf_cookie_is_forbidden() {
        let setup = setup();
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));
        let mut params = happy_params(&setup, &state);
        params.csrf_cookie = None;

        let err = run(&setup, params).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_csrf_cookie_from_another_browser_is_forbidden() {
        let setup = setup();
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));
        let mut params = happy_params(&setup, &state);
        params.csrf_cookie = Some(
            setup
                .codec
                .encode_csrf_cookie("some-other-csrf-token")
                .unwrap(),
        );

        let err = run(&setup, params).await.unwrap_err();
        assert_eq!(err.to_string(), "CSRF value does not match");
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_upstream_is_unprocessable() {
        let setup = setup();
        let mut state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));
        state.upstream_name = "some-other-idp".to_string();

        let err = run(&setup, happy_params(&setup, &state)).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream provider not found");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_state_with_a_directory_type_never_matches_an_oidc_provider() {
        let setup = setup();
        let mut state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));
        state.upstream_type = crate::logic::UpstreamType::Ldap;

        let err = run(&setup, happy_params(&setup, &state)).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream provider not found");
    }

    #[tokio::test]
    async fn test_stale_auth_params_are_a_fatal_handler_error() {
        let setup = setup();
        let mut params = happy_downstream_request_params();
        params.retain(|(k, _)| k != "client_id");
        params.push(("client_id".to_string(), "wrong_client_id".to_string()));
        let state = oidc_state(&setup, &encode_params(&params));

        let err = run(&setup, happy_params(&setup, &state)).await.unwrap_err();
        assert_eq!(err.to_string(), "error using state downstream auth params");
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upstream_exchange_is_a_bad_gateway() {
        let setup = setup_with_provider(TestOidcProvider::with_failing_exchange(
            "some-oidc-idp",
            "oidc-resource-uid",
        ));
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));

        let err = run(&setup, happy_params(&setup, &state)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "error exchanging and validating upstream tokens"
        );
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_unprojectable_identity_is_unprocessable() {
        let mut provider =
            TestOidcProvider::with_happy_exchange("some-oidc-idp", "oidc-resource-uid");
        provider.exchange_claims.remove("username");
        let setup = setup_with_provider(provider);
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));

        let err = run(&setup, happy_params(&setup, &state)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_username_falls_back_to_the_email_claim() {
        let mut provider =
            TestOidcProvider::with_happy_exchange("some-oidc-idp", "oidc-resource-uid");
        provider.exchange_claims.remove("username");
        provider
            .exchange_claims
            .insert("email".to_string(), Value::from("pinny@example.com"));
        let setup = setup_with_provider(provider);
        let state = oidc_state(&setup, &encode_params(&happy_downstream_request_params()));

        run(&setup, happy_params(&setup, &state)).await.unwrap();

        let (_, record) = &setup.storage.records()[0];
        assert_eq!(record.session.username, "pinny@example.com");
    }

    #[tokio::test]
    async fn test_collaborator_failure_while_minting_is_internal() {
        let setup = setup();
        // form_post with a prompt conflict: the authorization server rejects
        // while minting, after the request itself parsed fine.
        let mut params = happy_downstream_request_params();
        params.push(("prompt".to_string(), "none login".to_string()));
        let state = oidc_state(&setup, &encode_params(&params));

        let err = run(&setup, happy_params(&setup, &state)).await.unwrap_err();
        assert_eq!(err.to_string(), "error while generating and saving authcode");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(setup.storage.record_count(), 1);
    }
}
