use std::sync::Arc;

use crate::logic::registry::UpstreamRegistry;
use crate::logic::state_codec::StateCodec;
use crate::oauth::OAuth2Provider;
use crate::router::{CALLBACK_PATH, LOGIN_PATH};

/// Parameters for constructing a SupervisorService
pub struct SupervisorServiceParams {
    /// External base URL of this issuer, e.g. `https://login.example.com`.
    pub issuer: String,
    pub upstreams: UpstreamRegistry,
    pub oauth: Arc<dyn OAuth2Provider>,
    pub state_codec: StateCodec,
}

/// Request-handler state. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct SupervisorService {
    pub issuer: String,
    /// Absolute URL of this server's upstream callback endpoint, registered
    /// as the redirect URI with every upstream OIDC provider.
    pub redirect_uri: String,
    pub upstreams: UpstreamRegistry,
    pub oauth: Arc<dyn OAuth2Provider>,
    pub state_codec: StateCodec,
}

impl SupervisorService {
    pub fn new(params: SupervisorServiceParams) -> Self {
        let issuer = params.issuer.trim_end_matches('/').to_string();
        let redirect_uri = format!("{issuer}{CALLBACK_PATH}");

        Self {
            issuer,
            redirect_uri,
            upstreams: params.upstreams,
            oauth: params.oauth,
            state_codec: params.state_codec,
        }
    }

    /// Absolute URL of the login page endpoint.
    pub fn login_url(&self) -> String {
        format!("{}{}", self.issuer, LOGIN_PATH)
    }
}

#[cfg(test)]
mod tests {
    use crate::test::fixtures::{DOWNSTREAM_ISSUER, TestSetup};

    #[test]
    fn test_derived_urls() {
        let service = TestSetup::new().service();

        assert_eq!(service.issuer, DOWNSTREAM_ISSUER);
        assert_eq!(
            service.redirect_uri,
            format!("{DOWNSTREAM_ISSUER}/callback")
        );
        assert_eq!(service.login_url(), format!("{DOWNSTREAM_ISSUER}/login"));
    }
}
