//! Authcode response writing for both response modes.
//!
//! `response_mode=query` delivers the response as a 303 redirect;
//! `response_mode=form_post` delivers a 200 HTML page that re-posts it (see
//! [`form_post`]). Protocol errors that were validated as safe to return to
//! the client become error redirects; everything else is rendered to the
//! browser.

use axum::{
    Json,
    body::Body,
    response::{IntoResponse, Response},
};
use http::{StatusCode, header};
use serde_json::json;

use crate::oauth::{AuthorizeRequester, AuthorizeResponder, OAuth2Error, ResponseMode, form_post};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Write a finished authcode response in the mode the client requested.
pub fn write_authorize_response(
    requester: &AuthorizeRequester,
    responder: &AuthorizeResponder,
) -> Response {
    let scope = responder.granted_scopes.join(" ");

    match requester.response_mode {
        ResponseMode::Query => {
            let mut location = requester.redirect_uri.clone();
            location
                .query_pairs_mut()
                .append_pair("code", &responder.code)
                .append_pair("scope", &scope)
                .append_pair("state", &responder.state);

            see_other(location.as_str())
        }
        ResponseMode::FormPost => {
            let html = form_post::render(
                &requester.redirect_uri,
                &responder.code,
                &scope,
                &responder.state,
            );

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, HTML_CONTENT_TYPE)
                .header(
                    header::CONTENT_SECURITY_POLICY,
                    form_post::CONTENT_SECURITY_POLICY.as_str(),
                )
                .body(Body::from(html))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// Write an OAuth2 protocol error, redirecting to the client when the error
/// was validated as redirectable.
pub fn write_authorize_error(err: &OAuth2Error) -> Response {
    match &err.redirect_uri {
        Some(redirect_uri) => {
            let mut location = redirect_uri.clone();
            {
                let mut query = location.query_pairs_mut();
                query.append_pair("error", err.error);
                query.append_pair("error_description", &err.description);
                if let Some(state) = &err.state {
                    query.append_pair("state", state);
                }
            }

            see_other(location.as_str())
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": err.error,
                "error_description": err.description,
            })),
        )
            .into_response(),
    }
}

fn see_other(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location)
        .header(header::CONTENT_TYPE, HTML_CONTENT_TYPE)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
