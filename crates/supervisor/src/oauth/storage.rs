//! Persistence collaborator for authcode and session records.
//!
//! The authorization server owns these records; the supervisor only hands
//! them in. The in-memory implementation backs the server binary and the
//! tests, and exposes its record log so tests can assert exactly which
//! writes happened.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::error::CommonError;

use crate::logic::session::DownstreamSession;

/// Which kind of record a storage write created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredRecordKind {
    AuthcodeSession,
    OidcSession,
    PkceSession,
}

/// One stored record. All three record kinds share this shape; the authcode
/// signature is the lookup key for later redemption.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRecord {
    pub signature: String,
    pub client_id: String,
    pub requested_scopes: Vec<String>,
    pub granted_scopes: Vec<String>,
    pub session: DownstreamSession,
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthorizeStorage: Send + Sync {
    async fn create_authcode_session(&self, record: AuthorizeRecord) -> Result<(), CommonError>;

    async fn create_oidc_session(&self, record: AuthorizeRecord) -> Result<(), CommonError>;

    async fn create_pkce_session(&self, record: AuthorizeRecord) -> Result<(), CommonError>;
}

/// Storage backed by a process-local record log.
#[derive(Clone, Default)]
pub struct InMemoryAuthorizeStorage {
    records: Arc<RwLock<Vec<(StoredRecordKind, AuthorizeRecord)>>>,
}

impl InMemoryAuthorizeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record written so far, in write order.
    pub fn records(&self) -> Vec<(StoredRecordKind, AuthorizeRecord)> {
        self.records.read().expect("storage lock poisoned").clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().expect("storage lock poisoned").len()
    }

    pub fn find(&self, kind: StoredRecordKind, signature: &str) -> Option<AuthorizeRecord> {
        self.records
            .read()
            .expect("storage lock poisoned")
            .iter()
            .find(|(k, record)| *k == kind && record.signature == signature)
            .map(|(_, record)| record.clone())
    }

    fn push(&self, kind: StoredRecordKind, record: AuthorizeRecord) {
        self.records
            .write()
            .expect("storage lock poisoned")
            .push((kind, record));
    }
}

#[async_trait]
impl AuthorizeStorage for InMemoryAuthorizeStorage {
    async fn create_authcode_session(&self, record: AuthorizeRecord) -> Result<(), CommonError> {
        self.push(StoredRecordKind::AuthcodeSession, record);
        Ok(())
    }

    async fn create_oidc_session(&self, record: AuthorizeRecord) -> Result<(), CommonError> {
        self.push(StoredRecordKind::OidcSession, record);
        Ok(())
    }

    async fn create_pkce_session(&self, record: AuthorizeRecord) -> Result<(), CommonError> {
        self.push(StoredRecordKind::PkceSession, record);
        Ok(())
    }
}
