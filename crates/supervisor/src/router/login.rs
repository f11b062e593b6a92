use std::collections::HashMap;

use axum::Form;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::logic::login::{LoginFormFields, LoginResult, handle_post_login};
use crate::logic::login_page::render_login_form;
use crate::oauth::response::{write_authorize_error, write_authorize_response};
use crate::router::{LOGIN_PATH, csrf_cookie_value};
use crate::service::SupervisorService;
use shared::error::CommonError;

pub fn create_login_routes() -> OpenApiRouter<SupervisorService> {
    OpenApiRouter::new().routes(routes!(route_get_login, route_post_login))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LoginPageQuery {
    /// Encrypted state minted when the login started
    state: Option<String>,
    /// Error code from a previous attempt
    err: Option<String>,
}

/// Login page for directory upstreams
#[utoipa::path(
    get,
    path = LOGIN_PATH,
    params(LoginPageQuery),
    responses(
        (status = 200, description = "Login form"),
        (status = 400, description = "Invalid state", body = CommonError),
        (status = 403, description = "CSRF validation failed", body = CommonError),
    ),
    summary = "Show the login form",
    description = "Re-renders the login form for a retry; requires the state and CSRF cookie minted when the login started",
)]
async fn route_get_login(
    State(service): State<SupervisorService>,
    jar: CookieJar,
    Query(query): Query<LoginPageQuery>,
) -> Response {
    let csrf_cookie = csrf_cookie_value(&jar);
    match service
        .state_codec
        .read_state_and_validate_csrf(csrf_cookie.as_deref(), query.state.as_deref())
    {
        Ok((encoded_state, _)) => Html(render_login_form(
            &service.login_url(),
            &encoded_state,
            query.err.as_deref(),
        ))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Login form submission for directory upstreams
#[utoipa::path(
    post,
    path = LOGIN_PATH,
    responses(
        (status = 303, description = "Downstream authcode redirect, an error redirect to the client, or a retry redirect back to the login page"),
        (status = 200, description = "Downstream authcode response page for response_mode=form_post"),
        (status = 400, description = "Invalid state", body = CommonError),
        (status = 403, description = "CSRF validation failed", body = CommonError),
        (status = 422, description = "Upstream provider not found", body = CommonError),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "Authenticate a directory login",
    description = "Binds the posted credentials against the upstream directory and mints the downstream authcode response",
)]
async fn route_post_login(
    State(service): State<SupervisorService>,
    jar: CookieJar,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    // Credentials and state are read from the form body only; query
    // parameters never authenticate.
    let csrf_cookie = csrf_cookie_value(&jar);
    let (encoded_state, state) = match service
        .state_codec
        .read_state_and_validate_csrf(csrf_cookie.as_deref(), form.get("state").map(String::as_str))
    {
        Ok(decoded) => decoded,
        Err(e) => return e.into_response(),
    };

    let fields = LoginFormFields {
        username: form.get("username").cloned().unwrap_or_default(),
        password: form.get("password").cloned().unwrap_or_default(),
    };

    let result = handle_post_login(
        &service.upstreams,
        service.oauth.as_ref(),
        &service.issuer,
        &encoded_state,
        &state,
        &fields,
    )
    .await;

    match result {
        Ok(LoginResult::Authcode(reply)) => {
            write_authorize_response(&reply.requester, &reply.responder)
        }
        Ok(LoginResult::RedirectToLoginPage { location }) => Redirect::to(&location).into_response(),
        Ok(LoginResult::OAuth2Error(e)) => write_authorize_error(&e),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::logic::UpstreamType;
    use crate::logic::registry::UpstreamSnapshot;
    use crate::router::{CSRF_COOKIE_NAME, create_router};
    use crate::test::fixtures::{
        HAPPY_LDAP_PASSWORD, HAPPY_LDAP_USERNAME, TestLdapProvider, TestSetup, encode_params,
        happy_downstream_request_params,
    };

    fn ldap_setup() -> TestSetup {
        let setup = TestSetup::new();
        setup.registry.update(UpstreamSnapshot {
            oidc: vec![],
            ldap: vec![Arc::new(TestLdapProvider::with_happy_bind(
                "some-ldap-idp",
                "ldap-resource-uid",
            ))],
            active_directory: vec![],
        });
        setup
    }

    fn router_for(setup: &TestSetup) -> axum::Router {
        let (router, _api) = create_router().split_for_parts();
        router.with_state(setup.service())
    }

    struct EncodedLogin {
        encoded_state: String,
        cookie_header: String,
    }

    fn encoded_login(setup: &TestSetup) -> EncodedLogin {
        let state = setup.happy_state(
            "some-ldap-idp",
            UpstreamType::Ldap,
            &encode_params(&happy_downstream_request_params()),
        );
        let encoded_state = setup.codec.encode_state(&state).unwrap();
        let cookie = setup.codec.encode_csrf_cookie(&state.csrf_token).unwrap();

        EncodedLogin {
            encoded_state,
            cookie_header: format!("{CSRF_COOKIE_NAME}={cookie}"),
        }
    }

    fn form_body(fields: &[(&str, &str)]) -> String {
        let pairs: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        encode_params(&pairs)
    }

    #[tokio::test]
    async fn test_post_login_authenticates_credentials_from_the_form_body() {
        let setup = ldap_setup();
        let login = encoded_login(&setup);

        let request = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::COOKIE, &login.cookie_header)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(&[
                ("username", HAPPY_LDAP_USERNAME),
                ("password", HAPPY_LDAP_PASSWORD),
                ("state", &login.encoded_state),
            ])))
            .unwrap();

        let response = router_for(&setup).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("http://127.0.0.1/callback?code="));
        assert_eq!(setup.storage.record_count(), 3);
    }

    #[tokio::test]
    async fn test_credentials_in_the_query_never_authenticate() {
        let setup = ldap_setup();
        let login = encoded_login(&setup);

        // Credentials ride in the URI query; the body carries only the
        // state. The attempt must fail as bad credentials, with no storage
        // writes.
        let uri = format!(
            "/login?username={HAPPY_LDAP_USERNAME}&password={HAPPY_LDAP_PASSWORD}"
        );
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, &login.cookie_header)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(&[("state", &login.encoded_state)])))
            .unwrap();

        let response = router_for(&setup).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.contains("err=login_error"));
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_post_login_without_the_csrf_cookie_is_forbidden() {
        let setup = ldap_setup();
        let login = encoded_login(&setup);

        let request = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(&[
                ("username", HAPPY_LDAP_USERNAME),
                ("password", HAPPY_LDAP_PASSWORD),
                ("state", &login.encoded_state),
            ])))
            .unwrap();

        let response = router_for(&setup).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(setup.storage.record_count(), 0);
    }

    #[tokio::test]
    async fn test_get_login_renders_the_form_for_a_valid_state() {
        let setup = ldap_setup();
        let login = encoded_login(&setup);

        let request = Request::builder()
            .method("GET")
            .uri(format!(
                "/login?state={}&err=login_error",
                urlencoding::encode(&login.encoded_state)
            ))
            .header(header::COOKIE, &login.cookie_header)
            .body(Body::empty())
            .unwrap();

        let response = router_for(&setup).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("Incorrect username or password."));
        assert!(body.contains(r#"name="username""#));
    }

    #[tokio::test]
    async fn test_get_login_without_state_is_an_error() {
        let setup = ldap_setup();
        let login = encoded_login(&setup);

        let request = Request::builder()
            .method("GET")
            .uri("/login")
            .header(header::COOKIE, &login.cookie_header)
            .body(Body::empty())
            .unwrap();

        let response = router_for(&setup).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wrong_method_on_the_callback_endpoint() {
        let setup = ldap_setup();

        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .body(Body::empty())
            .unwrap();

        let response = router_for(&setup).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
