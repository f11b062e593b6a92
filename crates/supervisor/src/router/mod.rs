mod authorize;
mod callback;
mod login;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use utoipa_axum::router::OpenApiRouter;

use crate::service::SupervisorService;

pub const AUTHORIZE_PATH: &str = "/oauth2/authorize";
pub const CALLBACK_PATH: &str = "/callback";
pub const LOGIN_PATH: &str = "/login";

/// CSRF cookie pinning a login flow to one browser. The `__Host-` prefix
/// requires Secure, Path=/ and no Domain attribute.
pub const CSRF_COOKIE_NAME: &str = "__Host-supervisor-csrf";

pub fn create_router() -> OpenApiRouter<SupervisorService> {
    OpenApiRouter::new()
        .merge(authorize::create_authorize_routes())
        .merge(callback::create_callback_routes())
        .merge(login::create_login_routes())
}

pub(crate) fn build_csrf_cookie(value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(CSRF_COOKIE_NAME, value);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie
}

pub(crate) fn csrf_cookie_value(jar: &CookieJar) -> Option<String> {
    jar.get(CSRF_COOKIE_NAME).map(|c| c.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csrf_cookie_attributes() {
        let cookie = build_csrf_cookie("some-value".to_string());

        assert_eq!(cookie.name(), CSRF_COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert!(cookie.domain().is_none());
    }
}
