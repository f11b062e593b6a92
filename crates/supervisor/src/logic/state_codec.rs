//! Codec for the `state` parameter carried across browser redirects and the
//! CSRF cookie that must accompany it.
//!
//! The state blob is an AES-256-GCM envelope over a JSON payload: 12 random
//! nonce bytes followed by the ciphertext, url-safe base64 encoded. The CSRF
//! cookie value is a separate envelope under its own key, so neither value
//! can be spliced into the other. Tampering with any byte fails the GCM tag
//! check and surfaces as an unreadable value, never as a partial payload.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;

use crate::logic::UpstreamType;

/// Current version of the state payload; older blobs are rejected.
pub const STATE_FORMAT_VERSION: &str = "2";

const NONCE_LEN: usize = 12;

/// Everything the supervisor needs to finish a login after the browser
/// returns, round-tripped through the upstream `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamStateParamData {
    /// Url-encoded query of the original downstream authorize request.
    pub auth_params: String,
    pub upstream_name: String,
    pub upstream_type: UpstreamType,
    /// Nonce sent to the upstream OIDC provider.
    pub nonce: String,
    /// Must match the CSRF cookie presented on return.
    pub csrf_token: String,
    /// PKCE code verifier for the upstream token exchange.
    pub pkce_code: String,
    pub format_version: String,
}

/// Generate a random 32-byte AEAD key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

#[derive(Clone)]
pub struct StateCodec {
    state_cipher: Arc<Aes256Gcm>,
    cookie_cipher: Arc<Aes256Gcm>,
}

impl StateCodec {
    pub fn new(state_key: &[u8; 32], cookie_key: &[u8; 32]) -> Self {
        Self {
            state_cipher: Arc::new(Aes256Gcm::new(state_key.into())),
            cookie_cipher: Arc::new(Aes256Gcm::new(cookie_key.into())),
        }
    }

    /// Encrypt state data into the opaque string carried by the browser.
    pub fn encode_state(&self, data: &UpstreamStateParamData) -> Result<String, CommonError> {
        let plaintext = serde_json::to_vec(data)?;
        seal(&self.state_cipher, &plaintext)
    }

    /// Decrypt and validate a `state` parameter.
    pub fn decode_state(&self, encoded: &str) -> Result<UpstreamStateParamData, CommonError> {
        let plaintext = open(&self.state_cipher, encoded)
            .ok_or_else(|| CommonError::invalid_request("error reading state"))?;

        let data: UpstreamStateParamData = serde_json::from_slice(&plaintext)
            .map_err(|_| CommonError::invalid_request("error reading state"))?;

        if data.format_version != STATE_FORMAT_VERSION {
            return Err(CommonError::unprocessable("state format version is invalid"));
        }

        Ok(data)
    }

    /// Encrypt a CSRF token into a cookie value.
    pub fn encode_csrf_cookie(&self, csrf_token: &str) -> Result<String, CommonError> {
        seal(&self.cookie_cipher, csrf_token.as_bytes())
    }

    /// Decrypt a CSRF cookie value back into the token it carries.
    pub fn decode_csrf_cookie(&self, value: &str) -> Result<String, CommonError> {
        let plaintext = open(&self.cookie_cipher, value)
            .ok_or_else(|| CommonError::forbidden("error reading CSRF cookie"))?;

        String::from_utf8(plaintext)
            .map_err(|_| CommonError::forbidden("error reading CSRF cookie"))
    }

    /// Validate the CSRF cookie and the `state` parameter of a returning
    /// request, in that order, and require that they agree.
    ///
    /// Nothing downstream of this call may touch storage unless it
    /// succeeded. Returns the still-encoded state (the login flow
    /// re-presents it on retry) alongside the decoded payload.
    pub fn read_state_and_validate_csrf(
        &self,
        csrf_cookie: Option<&str>,
        state_param: Option<&str>,
    ) -> Result<(String, UpstreamStateParamData), CommonError> {
        let cookie_value = csrf_cookie.ok_or_else(|| {
            CommonError::forbidden("CSRF cookie is missing")
        })?;
        let csrf_token = self.decode_csrf_cookie(cookie_value)?;

        let encoded_state = state_param.ok_or_else(|| {
            CommonError::invalid_request("state param not found")
        })?;
        let state = self.decode_state(encoded_state)?;

        if state.csrf_token != csrf_token {
            return Err(CommonError::forbidden("CSRF value does not match"));
        }

        Ok((encoded_state.to_string(), state))
    }
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<String, CommonError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|_| {
        CommonError::Internal {
            msg: "state encryption failed".to_string(),
            source: None,
        }
    })?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);

    Ok(URL_SAFE_NO_PAD.encode(envelope))
}

/// Returns `None` on any decode or authentication failure; callers choose
/// the error to surface.
fn open(cipher: &Aes256Gcm, encoded: &str) -> Option<Vec<u8>> {
    let envelope = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    if envelope.len() <= NONCE_LEN {
        return None;
    }

    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::generate_token;

    fn test_codec() -> StateCodec {
        StateCodec::new(&generate_key(), &generate_key())
    }

    fn happy_state() -> UpstreamStateParamData {
        UpstreamStateParamData {
            auth_params: "client_id=pinniped-cli&response_type=code".to_string(),
            upstream_name: "some-ldap-idp".to_string(),
            upstream_type: UpstreamType::Ldap,
            nonce: generate_token(),
            csrf_token: generate_token(),
            pkce_code: generate_token(),
            format_version: STATE_FORMAT_VERSION.to_string(),
        }
    }

    fn tamper(encoded: &str) -> String {
        let mut chars: Vec<char> = encoded.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_state_round_trip() {
        let codec = test_codec();
        let data = happy_state();

        let encoded = codec.encode_state(&data).unwrap();
        let decoded = codec.decode_state(&encoded).unwrap();

        assert_eq!(decoded, data);
    }

    #[test]
    fn test_encoding_is_opaque() {
        let codec = test_codec();
        let encoded = codec.encode_state(&happy_state()).unwrap();

        assert!(!encoded.contains("some-ldap-idp"));
        assert!(!encoded.contains("pinniped-cli"));
    }

    #[test]
    fn test_tampered_state_is_rejected() {
        let codec = test_codec();
        let encoded = codec.encode_state(&happy_state()).unwrap();

        let err = codec.decode_state(&tamper(&encoded)).unwrap_err();
        assert_eq!(err.to_string(), "error reading state");
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_state_from_another_key_is_rejected() {
        let codec = test_codec();
        let other = test_codec();
        let encoded = other.encode_state(&happy_state()).unwrap();

        assert!(codec.decode_state(&encoded).is_err());
    }

    #[test]
    fn test_garbage_state_is_rejected() {
        let codec = test_codec();

        assert!(codec.decode_state("").is_err());
        assert!(codec.decode_state("not base64 at all!!!").is_err());
        assert!(codec.decode_state("aGVsbG8").is_err());
    }

    #[test]
    fn test_old_format_version_is_rejected() {
        let codec = test_codec();
        let mut data = happy_state();
        data.format_version = "1".to_string();

        let encoded = codec.encode_state(&data).unwrap();
        let err = codec.decode_state(&encoded).unwrap_err();

        assert_eq!(err.to_string(), "state format version is invalid");
        assert_eq!(err.status_code(), http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_csrf_cookie_round_trip() {
        let codec = test_codec();
        let token = generate_token();

        let cookie = codec.encode_csrf_cookie(&token).unwrap();
        assert!(!cookie.contains(&token));
        assert_eq!(codec.decode_csrf_cookie(&cookie).unwrap(), token);

        let err = codec.decode_csrf_cookie(&tamper(&cookie)).unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_state_and_cookie_keys_are_not_interchangeable() {
        let codec = test_codec();
        let token = generate_token();

        let cookie = codec.encode_csrf_cookie(&token).unwrap();
        assert!(codec.decode_state(&cookie).is_err());
    }

    #[test]
    fn test_read_state_and_validate_csrf_happy_path() {
        let codec = test_codec();
        let data = happy_state();
        let encoded = codec.encode_state(&data).unwrap();
        let cookie = codec.encode_csrf_cookie(&data.csrf_token).unwrap();

        let (returned_encoded, decoded) = codec
            .read_state_and_validate_csrf(Some(&cookie), Some(&encoded))
            .unwrap();

        assert_eq!(returned_encoded, encoded);
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_missing_csrf_cookie() {
        let codec = test_codec();
        let encoded = codec.encode_state(&happy_state()).unwrap();

        let err = codec
            .read_state_and_validate_csrf(None, Some(&encoded))
            .unwrap_err();
        assert_eq!(err.to_string(), "CSRF cookie is missing");
        assert_eq!(err.status_code(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_missing_state_param() {
        let codec = test_codec();
        let cookie = codec.encode_csrf_cookie(&generate_token()).unwrap();

        let err = codec
            .read_state_and_validate_csrf(Some(&cookie), None)
            .unwrap_err();
        assert_eq!(err.to_string(), "state param not found");
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_csrf_cookie_must_match_state() {
        let codec = test_codec();
        let data = happy_state();
        let encoded = codec.encode_state(&data).unwrap();
        let unrelated_cookie = codec.encode_csrf_cookie(&generate_token()).unwrap();

        let err = codec
            .read_state_and_validate_csrf(Some(&unrelated_cookie), Some(&encoded))
            .unwrap_err();
        assert_eq!(err.to_string(), "CSRF value does not match");
        assert_eq!(err.status_code(), http::StatusCode::FORBIDDEN);
    }
}
