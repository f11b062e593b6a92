//! Capability interface for LDAP and Active Directory upstreams.
//!
//! The directory bind and search transport lives behind this trait; the
//! supervisor only consumes the authenticated result. The registry stores
//! providers as trait objects so the login flow can treat any directory
//! implementation uniformly.

use std::collections::HashMap;

use async_trait::async_trait;
use shared::error::CommonError;

/// The user identity a directory bind resolved, after any attribute mapping
/// the authenticator performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapAuthenticatedUser {
    pub name: String,
    pub uid: String,
    pub groups: Vec<String>,
}

/// Successful result of an upstream directory authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapAuthResponse {
    pub user: LdapAuthenticatedUser,
    /// Distinguished name of the bound user entry.
    pub dn: String,
    /// Attributes the authenticator wants replayed on future refreshes.
    pub extra_refresh_attributes: HashMap<String, String>,
}

#[async_trait]
pub trait LdapIdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// UID of the resource this provider was loaded from.
    fn resource_uid(&self) -> &str;

    /// Connection URL including the search-base query, e.g.
    /// `ldaps://ldap.example.com:636?base=ou%3Dusers%2Cdc%3Dexample`.
    /// Also the prefix of every downstream subject minted for this provider.
    fn url(&self) -> &str;

    /// Authenticate an end user. `Ok(None)` means the directory rejected the
    /// credentials; `Err` means the directory itself failed.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<LdapAuthResponse>, CommonError>;
}
