//! In-memory registry of upstream identity providers.
//!
//! The background controller reconciling provider resources replaces the
//! whole snapshot with an atomic pointer swap; request handlers capture one
//! snapshot at entry and never observe a partial update.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::logic::UpstreamType;
use crate::logic::upstream_ldap::LdapIdentityProvider;
use crate::logic::upstream_oidc::OidcIdentityProvider;

/// One immutable generation of registered upstream providers.
#[derive(Default)]
pub struct UpstreamSnapshot {
    pub oidc: Vec<Arc<dyn OidcIdentityProvider>>,
    pub ldap: Vec<Arc<dyn LdapIdentityProvider>>,
    pub active_directory: Vec<Arc<dyn LdapIdentityProvider>>,
}

impl UpstreamSnapshot {
    pub fn oidc_identity_providers(&self) -> &[Arc<dyn OidcIdentityProvider>] {
        &self.oidc
    }

    pub fn ldap_identity_providers(&self) -> &[Arc<dyn LdapIdentityProvider>] {
        &self.ldap
    }

    pub fn active_directory_identity_providers(&self) -> &[Arc<dyn LdapIdentityProvider>] {
        &self.active_directory
    }

    /// Find an OIDC provider by name.
    pub fn find_oidc(&self, name: &str) -> Option<Arc<dyn OidcIdentityProvider>> {
        self.oidc.iter().find(|p| p.name() == name).cloned()
    }

    /// Find a directory provider by name in the list selected by
    /// `upstream_type`. A same-named provider of another type never
    /// matches.
    pub fn find_ldap(
        &self,
        upstream_type: UpstreamType,
        name: &str,
    ) -> Option<Arc<dyn LdapIdentityProvider>> {
        let list = match upstream_type {
            UpstreamType::Ldap => &self.ldap,
            UpstreamType::ActiveDirectory => &self.active_directory,
            UpstreamType::Oidc => return None,
        };

        list.iter().find(|p| p.name() == name).cloned()
    }
}

/// Shared handle to the current [`UpstreamSnapshot`].
#[derive(Clone)]
pub struct UpstreamRegistry {
    snapshot: Arc<ArcSwap<UpstreamSnapshot>>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(UpstreamSnapshot::default())),
        }
    }

    /// The current snapshot. Handlers call this once per request.
    pub fn snapshot(&self) -> Arc<UpstreamSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the whole provider set atomically.
    pub fn update(&self, snapshot: UpstreamSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
