use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::logic::callback::{CallbackParams, handle_callback};
use crate::oauth::response::write_authorize_response;
use crate::router::{CALLBACK_PATH, csrf_cookie_value};
use crate::service::SupervisorService;
use shared::error::CommonError;

pub fn create_callback_routes() -> OpenApiRouter<SupervisorService> {
    OpenApiRouter::new().routes(routes!(route_callback))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    /// Authcode issued by the upstream OIDC provider
    code: Option<String>,
    /// Encrypted state minted when the login started
    state: Option<String>,
}

/// Upstream OIDC callback endpoint
#[utoipa::path(
    get,
    path = CALLBACK_PATH,
    params(CallbackQuery),
    responses(
        (status = 303, description = "Downstream authcode redirect to the client"),
        (status = 200, description = "Downstream authcode response page for response_mode=form_post"),
        (status = 400, description = "Invalid state or missing code", body = CommonError),
        (status = 403, description = "CSRF validation failed", body = CommonError),
        (status = 422, description = "Upstream provider not found or identity projection failed", body = CommonError),
        (status = 502, description = "Upstream token exchange failed", body = CommonError),
        (status = 500, description = "Internal server error", body = CommonError),
    ),
    summary = "Finish an upstream OIDC login",
    description = "Redeems the upstream authcode and mints the downstream authcode response",
)]
async fn route_callback(
    State(service): State<SupervisorService>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let params = CallbackParams {
        code: query.code,
        state: query.state,
        csrf_cookie: csrf_cookie_value(&jar),
    };

    let result = handle_callback(
        &service.upstreams,
        service.oauth.as_ref(),
        &service.state_codec,
        &service.redirect_uri,
        params,
    )
    .await;

    match result {
        Ok(reply) => write_authorize_response(&reply.requester, &reply.responder),
        Err(e) => e.into_response(),
    }
}
