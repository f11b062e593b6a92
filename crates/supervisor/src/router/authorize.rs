use axum::extract::{RawQuery, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::logic::authorize::{
    AuthorizeError, AuthorizeParams, AuthorizeResult, handle_authorize,
};
use crate::oauth::response::write_authorize_error;
use crate::router::{AUTHORIZE_PATH, build_csrf_cookie, csrf_cookie_value};
use crate::service::SupervisorService;
use shared::error::CommonError;

pub fn create_authorize_routes() -> OpenApiRouter<SupervisorService> {
    OpenApiRouter::new().routes(routes!(route_authorize))
}

/// Downstream authorize endpoint
#[utoipa::path(
    get,
    path = AUTHORIZE_PATH,
    responses(
        (status = 303, description = "Redirect to the upstream OIDC provider, or an error redirect to the client"),
        (status = 200, description = "Login form for a directory upstream"),
        (status = 400, description = "Invalid request", body = CommonError),
        (status = 422, description = "Upstream provider not found", body = CommonError),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "Start a login",
    description = "Validates the downstream OAuth2 authorize request and hands the browser to the upstream identity provider named by pinniped_idp_name/pinniped_idp_type",
)]
async fn route_authorize(
    State(service): State<SupervisorService>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Response {
    // An unreadable cookie is treated as absent here; a fresh one is minted.
    let existing_csrf_token = csrf_cookie_value(&jar)
        .and_then(|value| service.state_codec.decode_csrf_cookie(&value).ok());

    let params = AuthorizeParams {
        query: query.unwrap_or_default(),
        existing_csrf_token,
    };

    let result = handle_authorize(
        &service.upstreams,
        service.oauth.as_ref(),
        &service.state_codec,
        &service.issuer,
        &service.redirect_uri,
        params,
    )
    .await;

    match result {
        Ok(AuthorizeResult::RedirectToUpstream {
            location,
            set_csrf_cookie,
        }) => with_optional_cookie(jar, set_csrf_cookie, Redirect::to(&location)),
        Ok(AuthorizeResult::LoginForm {
            html,
            set_csrf_cookie,
        }) => with_optional_cookie(jar, set_csrf_cookie, Html(html)),
        Err(AuthorizeError::OAuth2(e)) => write_authorize_error(&e),
        Err(AuthorizeError::Common(e)) => e.into_response(),
    }
}

fn with_optional_cookie(
    jar: CookieJar,
    cookie_value: Option<String>,
    response: impl IntoResponse,
) -> Response {
    match cookie_value {
        Some(value) => (jar.add(build_csrf_cookie(value)), response).into_response(),
        None => response.into_response(),
    }
}
