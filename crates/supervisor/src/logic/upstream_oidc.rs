//! Upstream OIDC identity providers.
//!
//! The trait is the capability the authorize and callback flows consume; the
//! concrete [`UpstreamOidcProvider`] speaks the authorization-code exchange
//! over HTTP and validates the returned ID token against the provider's
//! JWKS.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};
use shared::error::CommonError;

/// Validated tokens returned by an upstream authcode exchange.
#[derive(Debug, Clone)]
pub struct UpstreamToken {
    /// Claims of the validated upstream ID token.
    pub id_token_claims: Map<String, Value>,
    /// Upstream refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait OidcIdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// UID of the resource this provider was loaded from.
    fn resource_uid(&self) -> &str;

    fn client_id(&self) -> &str;

    fn authorization_endpoint(&self) -> &str;

    /// Scopes to request from the upstream provider.
    fn scopes(&self) -> &[String];

    /// Extra query parameters appended to the upstream authorize URL.
    fn additional_authorize_parameters(&self) -> &[(String, String)];

    /// ID token claim projected to the downstream username.
    fn username_claim(&self) -> &str;

    /// ID token claim projected to the downstream group list, when set.
    fn groups_claim(&self) -> Option<&str>;

    /// Redeem an upstream authcode and validate the resulting ID token
    /// (signature, `iss`, `aud`, `exp`, and the `nonce` minted when the
    /// login started).
    async fn exchange_authcode_and_validate_tokens(
        &self,
        authcode: &str,
        pkce_verifier: &str,
        expected_nonce: &str,
        redirect_uri: &str,
    ) -> Result<UpstreamToken, CommonError>;
}

// ============================================
// Concrete provider
// ============================================

/// Static configuration for an upstream OIDC provider.
#[derive(Debug, Clone)]
pub struct UpstreamOidcProviderConfig {
    pub name: String,
    pub resource_uid: String,
    /// Expected `iss` of upstream ID tokens.
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub additional_authorize_parameters: Vec<(String, String)>,
    pub username_claim: String,
    pub groups_claim: Option<String>,
}

pub struct UpstreamOidcProvider {
    config: UpstreamOidcProviderConfig,
    http_client: reqwest::Client,
    jwks_cache: JwksKeyCache,
}

impl UpstreamOidcProvider {
    pub fn new(config: UpstreamOidcProviderConfig) -> Result<Self, CommonError> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                CommonError::Unknown(anyhow::anyhow!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
            jwks_cache: JwksKeyCache::new(),
        })
    }

    /// Exchange the authcode for tokens at the upstream token endpoint.
    async fn exchange_code(
        &self,
        authcode: &str,
        pkce_verifier: &str,
        redirect_uri: &str,
    ) -> Result<Map<String, Value>, CommonError> {
        let form_params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", authcode.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("code_verifier", pkce_verifier.to_string()),
        ];

        let response = self
            .http_client
            .post(&self.config.token_endpoint)
            .form(&form_params)
            .send()
            .await
            .map_err(|e| CommonError::UpstreamGateway {
                msg: "token exchange request failed".to_string(),
                source: Some(e.into()),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CommonError::UpstreamGateway {
                msg: format!("token exchange failed: HTTP {status}"),
                source: None,
            });
        }

        let token_response: Value =
            response
                .json()
                .await
                .map_err(|e| CommonError::UpstreamGateway {
                    msg: "failed to parse token response".to_string(),
                    source: Some(e.into()),
                })?;

        match token_response {
            Value::Object(obj) => Ok(obj),
            _ => Err(CommonError::UpstreamGateway {
                msg: "token response is not a JSON object".to_string(),
                source: None,
            }),
        }
    }

    /// Validate the ID token signature and registered claims against the
    /// provider's JWKS, refreshing the key set once on an unknown `kid`.
    async fn validate_id_token(&self, id_token: &str) -> Result<Map<String, Value>, CommonError> {
        let header = decode_header(id_token).map_err(|e| CommonError::UpstreamGateway {
            msg: "could not parse upstream ID token header".to_string(),
            source: Some(e.into()),
        })?;
        let kid = header.kid.ok_or_else(|| CommonError::UpstreamGateway {
            msg: "upstream ID token has no key ID".to_string(),
            source: None,
        })?;

        let key = match self.jwks_cache.get_key(&self.config.jwks_uri, &kid) {
            Some(key) => key,
            None => {
                self.jwks_cache
                    .fetch_jwks(&self.http_client, &self.config.jwks_uri)
                    .await?;
                self.jwks_cache
                    .get_key(&self.config.jwks_uri, &kid)
                    .ok_or_else(|| CommonError::UpstreamGateway {
                        msg: format!("no JWKS key found for kid {kid}"),
                        source: None,
                    })?
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.client_id]);
        validation.set_issuer(&[&self.config.issuer]);

        let token_data = decode::<Map<String, Value>>(id_token, &key, &validation).map_err(
            |e| CommonError::UpstreamGateway {
                msg: "upstream ID token validation failed".to_string(),
                source: Some(e.into()),
            },
        )?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl OidcIdentityProvider for UpstreamOidcProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn resource_uid(&self) -> &str {
        &self.config.resource_uid
    }

    fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn authorization_endpoint(&self) -> &str {
        &self.config.authorization_endpoint
    }

    fn scopes(&self) -> &[String] {
        &self.config.scopes
    }

    fn additional_authorize_parameters(&self) -> &[(String, String)] {
        &self.config.additional_authorize_parameters
    }

    fn username_claim(&self) -> &str {
        &self.config.username_claim
    }

    fn groups_claim(&self) -> Option<&str> {
        self.config.groups_claim.as_deref()
    }

    async fn exchange_authcode_and_validate_tokens(
        &self,
        authcode: &str,
        pkce_verifier: &str,
        expected_nonce: &str,
        redirect_uri: &str,
    ) -> Result<UpstreamToken, CommonError> {
        let token_response = self
            .exchange_code(authcode, pkce_verifier, redirect_uri)
            .await?;

        let id_token = token_response
            .get("id_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CommonError::UpstreamGateway {
                msg: "no ID token in upstream token response".to_string(),
                source: None,
            })?;

        let claims = self.validate_id_token(id_token).await?;
        require_nonce(&claims, expected_nonce)?;

        let refresh_token = token_response
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(UpstreamToken {
            id_token_claims: claims,
            refresh_token,
        })
    }
}

/// The ID token `nonce` claim must echo the nonce minted at authorize time.
pub fn require_nonce(claims: &Map<String, Value>, expected: &str) -> Result<(), CommonError> {
    let token_nonce = claims
        .get("nonce")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CommonError::UpstreamGateway {
            msg: "upstream ID token is missing the nonce claim".to_string(),
            source: None,
        })?;

    if token_nonce != expected {
        return Err(CommonError::UpstreamGateway {
            msg: "nonce mismatch in upstream ID token".to_string(),
            source: None,
        });
    }

    Ok(())
}

// ============================================
// JWKS cache
// ============================================

/// Per-provider cache of upstream JWKS decoding keys, keyed by JWKS URI and
/// `kid`.
#[derive(Clone)]
struct JwksKeyCache {
    keys: std::sync::Arc<dashmap::DashMap<String, HashMap<String, DecodingKey>>>,
}

impl JwksKeyCache {
    fn new() -> Self {
        Self {
            keys: std::sync::Arc::new(dashmap::DashMap::new()),
        }
    }

    async fn fetch_jwks(
        &self,
        http_client: &reqwest::Client,
        jwks_uri: &str,
    ) -> Result<(), CommonError> {
        let response =
            http_client
                .get(jwks_uri)
                .send()
                .await
                .map_err(|e| CommonError::UpstreamGateway {
                    msg: "failed to fetch upstream JWKS".to_string(),
                    source: Some(e.into()),
                })?;

        let jwks: Value = response
            .json()
            .await
            .map_err(|e| CommonError::UpstreamGateway {
                msg: "failed to parse upstream JWKS".to_string(),
                source: Some(e.into()),
            })?;

        let keys = jwks["keys"]
            .as_array()
            .ok_or_else(|| CommonError::UpstreamGateway {
                msg: "upstream JWKS is missing the keys array".to_string(),
                source: None,
            })?;

        let mut key_map = HashMap::new();
        for key in keys {
            let Some(kid) = key["kid"].as_str() else {
                continue;
            };

            let kty = key["kty"].as_str().unwrap_or("RSA");
            if kty != "RSA" {
                tracing::warn!(kty, "skipping unsupported upstream JWKS key type");
                continue;
            }

            let (Some(n), Some(e)) = (key["n"].as_str(), key["e"].as_str()) else {
                continue;
            };
            let decoding_key =
                DecodingKey::from_rsa_components(n, e).map_err(|e| CommonError::UpstreamGateway {
                    msg: "upstream JWKS contains an invalid RSA key".to_string(),
                    source: Some(e.into()),
                })?;

            key_map.insert(kid.to_string(), decoding_key);
        }

        self.keys.insert(jwks_uri.to_string(), key_map);
        Ok(())
    }

    fn get_key(&self, jwks_uri: &str, kid: &str) -> Option<DecodingKey> {
        self.keys
            .get(jwks_uri)
            .and_then(|keys| keys.get(kid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with_nonce(nonce: Option<&str>) -> Map<String, Value> {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), Value::from("https://upstream.example.com"));
        claims.insert("sub".to_string(), Value::from("abc123"));
        if let Some(nonce) = nonce {
            claims.insert("nonce".to_string(), Value::from(nonce));
        }
        claims
    }

    #[test]
    fn test_require_nonce_accepts_a_matching_nonce() {
        let claims = claims_with_nonce(Some("expected-nonce"));
        assert!(require_nonce(&claims, "expected-nonce").is_ok());
    }

    #[test]
    fn test_require_nonce_rejects_a_mismatched_nonce() {
        let claims = claims_with_nonce(Some("some-other-nonce"));
        let err = require_nonce(&claims, "expected-nonce").unwrap_err();
        assert_eq!(err.to_string(), "nonce mismatch in upstream ID token");
    }

    #[test]
    fn test_require_nonce_rejects_a_missing_nonce() {
        let claims = claims_with_nonce(None);
        let err = require_nonce(&claims, "expected-nonce").unwrap_err();
        assert_eq!(err.to_string(), "upstream ID token is missing the nonce claim");
    }

    #[test]
    fn test_provider_exposes_its_configuration() {
        let provider = UpstreamOidcProvider::new(UpstreamOidcProviderConfig {
            name: "some-oidc-idp".to_string(),
            resource_uid: "oidc-resource-uid".to_string(),
            issuer: "https://upstream.example.com".to_string(),
            authorization_endpoint: "https://upstream.example.com/auth".to_string(),
            token_endpoint: "https://upstream.example.com/token".to_string(),
            jwks_uri: "https://upstream.example.com/keys".to_string(),
            client_id: "some-client-id".to_string(),
            client_secret: "some-client-secret".to_string(),
            scopes: vec!["openid".to_string(), "groups".to_string()],
            additional_authorize_parameters: vec![("hd".to_string(), "example.com".to_string())],
            username_claim: "email".to_string(),
            groups_claim: Some("groups".to_string()),
        })
        .unwrap();

        assert_eq!(provider.name(), "some-oidc-idp");
        assert_eq!(provider.resource_uid(), "oidc-resource-uid");
        assert_eq!(provider.username_claim(), "email");
        assert_eq!(provider.groups_claim(), Some("groups"));
        assert_eq!(provider.scopes(), ["openid", "groups"]);
        assert_eq!(
            provider.additional_authorize_parameters(),
            [("hd".to_string(), "example.com".to_string())]
        );
    }
}
