use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub mod authorize;
pub mod callback;
pub mod login;
pub mod login_page;
pub mod registry;
pub mod session;
pub mod state_codec;
pub mod upstream_ldap;
pub mod upstream_oidc;

/// The kind of upstream identity provider a request is bound to.
///
/// The serialized names are part of the wire protocol: they appear in the
/// `pinniped_idp_type` query parameter and inside the encrypted state blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamType {
    Oidc,
    Ldap,
    ActiveDirectory,
}

impl UpstreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamType::Oidc => "oidc",
            UpstreamType::Ldap => "ldap",
            UpstreamType::ActiveDirectory => "activedirectory",
        }
    }
}

impl std::fmt::Display for UpstreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpstreamType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oidc" => Ok(UpstreamType::Oidc),
            "ldap" => Ok(UpstreamType::Ldap),
            "activedirectory" => Ok(UpstreamType::ActiveDirectory),
            _ => Err(()),
        }
    }
}

/// Generate a 32-byte random value encoded as url-safe base64.
///
/// Used for CSRF tokens and upstream nonces.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_type_round_trips_through_strings() {
        for (t, s) in [
            (UpstreamType::Oidc, "oidc"),
            (UpstreamType::Ldap, "ldap"),
            (UpstreamType::ActiveDirectory, "activedirectory"),
        ] {
            assert_eq!(t.to_string(), s);
            assert_eq!(s.parse::<UpstreamType>().unwrap(), t);
            assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{s}\""));
        }

        assert!("saml".parse::<UpstreamType>().is_err());
    }

    #[test]
    fn test_generate_token_has_enough_entropy() {
        let token = generate_token();
        // 32 bytes of url-safe base64 without padding is 43 characters.
        assert_eq!(token.len(), 43);
        assert_ne!(token, generate_token());
    }
}
