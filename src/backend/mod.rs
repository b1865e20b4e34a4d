//! Interfaces to the managed backend: the document store that owns inventory
//! records and the identity provider that owns sessions.
//!
//! Both are asynchronous and push-based. The in-process implementations in
//! [`memory`] and [`identity`] back the CLI and the test suite.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::model::RawRecord;
use crate::session::{Identity, SessionState};

pub mod identity;
pub mod memory;

pub use identity::MemoryIdentityProvider;
pub use memory::MemoryStore;

/// Full contents of a collection at one point in time.
pub type Snapshot = Vec<RawRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("document {0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to persist store: {0}")]
    Persist(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::PermissionDenied => "STORE/PERMISSION_DENIED",
            StoreError::NotFound(_) => "STORE/NOT_FOUND",
            StoreError::Unavailable(_) => "STORE/UNAVAILABLE",
            StoreError::Persist(_) => "STORE/PERSIST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("email already in use")]
    EmailInUse,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "AUTH/INVALID_EMAIL",
            AuthError::WeakPassword { .. } => "AUTH/WEAK_PASSWORD",
            AuthError::EmailInUse => "AUTH/EMAIL_IN_USE",
            AuthError::InvalidCredentials => "AUTH/INVALID_CREDENTIALS",
            AuthError::Unavailable(_) => "AUTH/UNAVAILABLE",
        }
    }
}

/// Live feed of snapshots for one collection.
///
/// Dropping or closing the subscription detaches it from the store at once;
/// snapshots already queued but not yet received are discarded.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Snapshot>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Snapshot>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Waits for the next snapshot. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    /// The next queued snapshot, if one has already been delivered.
    pub fn try_next(&mut self) -> Option<Snapshot> {
        self.receiver.try_recv().ok()
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

/// Document store holding inventory collections.
pub trait RecordStore: Send + Sync {
    /// Attach to a collection. The current contents are delivered as the
    /// first snapshot, then again after every change.
    fn subscribe(&self, collection: &str) -> Result<Subscription, StoreError>;

    /// Insert a document; resolves to the id the store assigned.
    fn create<'a>(
        &'a self,
        collection: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, Result<String, StoreError>>;

    /// Merge `fields` into an existing document.
    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str)
        -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Identity provider owning the signed-in session.
pub trait IdentityProvider: Send + Sync {
    fn current_session(&self) -> SessionState;

    /// Receiver notified on every session transition.
    fn watch_session(&self) -> watch::Receiver<SessionState>;

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, AuthError>>;

    /// Create an account and sign it in.
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, AuthError>>;

    fn sign_out(&self) -> BoxFuture<'_, ()>;
}
