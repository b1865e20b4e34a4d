use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use ts_rs::TS;

use crate::error::InventoryError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "state", content = "identity", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            SessionState::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }
}

/// Read side of the identity provider's session notifications.
///
/// The gate never changes the session itself; it only observes what the
/// provider publishes and answers "is there a signed-in identity right now".
pub struct SessionGate {
    rx: watch::Receiver<SessionState>,
}

impl SessionGate {
    pub fn new(rx: watch::Receiver<SessionState>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.rx.borrow().identity().cloned()
    }

    /// The signed-in identity, or `NotSignedIn`.
    pub fn require(&self) -> Result<Identity, InventoryError> {
        self.identity().ok_or(InventoryError::NotSignedIn)
    }

    /// Returns the latest state if the provider published since the last
    /// call, without waiting.
    pub fn poll_transition(&mut self) -> Option<SessionState> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    /// Waits for the next published state. `None` once the provider is gone.
    pub async fn next_transition(&mut self) -> Option<SessionState> {
        if self.rx.changed().await.is_err() {
            debug!(target: "stockroom", event = "session_provider_closed");
            return None;
        }
        Some(self.rx.borrow_and_update().clone())
    }
}
