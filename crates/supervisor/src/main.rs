use std::net::SocketAddr;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use shared::error::CommonError;
use shared::port::find_free_port;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use supervisor::logic::registry::UpstreamRegistry;
use supervisor::logic::state_codec::{StateCodec, generate_key};
use supervisor::oauth::provider::{CodeFlowProvider, RegisteredClient};
use supervisor::oauth::storage::InMemoryAuthorizeStorage;
use supervisor::router::create_router;
use supervisor::service::{SupervisorService, SupervisorServiceParams};

#[tokio::main]
async fn main() -> Result<(), CommonError> {
    shared::env::load_optional_env_files();
    shared::logging::configure_logging()?;

    let issuer = shared::env::env_or("SUPERVISOR_ISSUER", "http://localhost:3000");
    let host = shared::env::env_or("SUPERVISOR_HOST", "127.0.0.1");
    let port: u16 = shared::env::env_or("SUPERVISOR_PORT", "3000")
        .parse()
        .map_err(|_| CommonError::Internal {
            msg: "SUPERVISOR_PORT is not a valid port number".to_string(),
            source: None,
        })?;

    let state_key = key_from_env("SUPERVISOR_STATE_KEY")?;
    let cookie_key = key_from_env("SUPERVISOR_COOKIE_KEY")?;
    let authcode_secret = key_from_env("SUPERVISOR_AUTHCODE_SECRET")?;

    let client = RegisteredClient {
        client_id: shared::env::env_or("SUPERVISOR_CLIENT_ID", "pinniped-cli"),
        redirect_uris: parse_redirect_uris(&shared::env::env_or(
            "SUPERVISOR_CLIENT_REDIRECT_URIS",
            "http://127.0.0.1/callback",
        ))?,
        allowed_scopes: shared::env::env_or(
            "SUPERVISOR_CLIENT_SCOPES",
            "openid offline_access profile email pinniped:request-audience",
        )
        .split_whitespace()
        .map(|s| s.to_string())
        .collect(),
    };

    let storage = InMemoryAuthorizeStorage::new();
    let oauth = CodeFlowProvider::new(vec![client], Arc::new(storage), &authcode_secret)?;

    // The registry starts empty; the provider-resource controller fills it
    // in as upstream identity providers are reconciled.
    let service = SupervisorService::new(SupervisorServiceParams {
        issuer,
        upstreams: UpstreamRegistry::new(),
        oauth: Arc::new(oauth),
        state_codec: StateCodec::new(&state_key, &cookie_key),
    });

    let (router, _api) = create_router().split_for_parts();
    let router = router
        .with_state(service)
        .layer(CorsLayer::permissive());

    let port = find_free_port(port, port + 100)?;
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| CommonError::AddrParseError { source: e })?;

    info!("starting server on {}", addr);

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down, waiting for in-flight requests to complete...");
            shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
        }
    });

    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    info!("server shut down gracefully");
    Ok(())
}

/// Read a 32-byte base64 key from the environment, or mint an ephemeral one.
/// Ephemeral keys invalidate in-flight logins and CSRF cookies on restart.
fn key_from_env(key_name: &str) -> Result<[u8; 32], CommonError> {
    let Ok(value) = std::env::var(key_name) else {
        warn!("{key_name} is not set; generating an ephemeral key");
        return Ok(generate_key());
    };

    let bytes = STANDARD.decode(value.trim()).map_err(|e| CommonError::Internal {
        msg: format!("{key_name} is not valid base64"),
        source: Some(e.into()),
    })?;

    bytes.try_into().map_err(|_| CommonError::Internal {
        msg: format!("{key_name} must decode to exactly 32 bytes"),
        source: None,
    })
}

fn parse_redirect_uris(raw: &str) -> Result<Vec<url::Url>, CommonError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| url::Url::parse(s).map_err(|e| CommonError::UrlParseError { source: e }))
        .collect()
}
