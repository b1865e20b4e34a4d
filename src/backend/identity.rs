use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AuthError, IdentityProvider};
use crate::session::{Identity, SessionState};
use crate::util::write_atomic;
use crate::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email validation pattern to compile")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    uid: String,
    password_sha256: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
}

struct Inner {
    data: AccountsFile,
    unavailable: bool,
    persist_path: Option<PathBuf>,
}

/// In-process identity provider with e-mail/password accounts.
#[derive(Clone)]
pub struct MemoryIdentityProvider {
    inner: Arc<Mutex<Inner>>,
    session: Arc<watch::Sender<SessionState>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::with_data(AccountsFile::default(), None)
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load accounts from `path` (none if missing) and persist new accounts back.
    pub fn open(path: &Path) -> AppResult<Self> {
        let data = if path.exists() {
            let bytes = fs::read(path).map_err(|err| {
                AppError::from(err).with_context("path", path.display().to_string())
            })?;
            serde_json::from_slice::<AccountsFile>(&bytes).map_err(|err| {
                AppError::from(err).with_context("path", path.display().to_string())
            })?
        } else {
            AccountsFile::default()
        };
        Ok(Self::with_data(data, Some(path.to_path_buf())))
    }

    fn with_data(data: AccountsFile, persist_path: Option<PathBuf>) -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unauthenticated);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                unavailable: false,
                persist_path,
            })),
            session: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every sign-in/sign-up fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn publish(&self, state: SessionState) {
        self.session.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let inner = self.lock();
        if inner.unavailable {
            return Err(AuthError::Unavailable("provider offline".into()));
        }
        let email = normalize_email(email);
        let account = inner
            .data
            .accounts
            .get(&email)
            .ok_or(AuthError::InvalidCredentials)?;
        if account.password_sha256 != hash_password(&account.uid, password) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Identity {
            uid: account.uid.clone(),
            email,
        })
    }

    fn register(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(AuthError::Unavailable("provider offline".into()));
        }
        let email = normalize_email(email);
        if !EMAIL_PATTERN.is_match(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword {
                min: MIN_PASSWORD_LEN,
            });
        }
        if inner.data.accounts.contains_key(&email) {
            return Err(AuthError::EmailInUse);
        }

        let uid = Uuid::new_v4().simple().to_string();
        let account = Account {
            password_sha256: hash_password(&uid, password),
            uid: uid.clone(),
        };
        if let Some(path) = &inner.persist_path {
            let mut next = AccountsFile {
                accounts: inner.data.accounts.clone(),
            };
            next.accounts.insert(email.clone(), account.clone());
            let bytes = serde_json::to_vec_pretty(&next)
                .map_err(|err| AuthError::Unavailable(err.to_string()))?;
            write_atomic(path, &bytes).map_err(|err| AuthError::Unavailable(err.to_string()))?;
        }
        inner.data.accounts.insert(email.clone(), account);
        Ok(Identity { uid, email })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(uid: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl IdentityProvider for MemoryIdentityProvider {
    fn current_session(&self) -> SessionState {
        self.session.borrow().clone()
    }

    fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, AuthError>> {
        async move {
            match self.authenticate(email, password) {
                Ok(identity) => {
                    info!(target: "stockroom", event = "signed_in", uid = %identity.uid);
                    self.publish(SessionState::Authenticated(identity.clone()));
                    Ok(identity)
                }
                Err(err) => {
                    warn!(target: "stockroom", event = "sign_in_rejected", code = err.code());
                    Err(err)
                }
            }
        }
        .boxed()
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, AuthError>> {
        async move {
            match self.register(email, password) {
                Ok(identity) => {
                    info!(target: "stockroom", event = "signed_up", uid = %identity.uid);
                    self.publish(SessionState::Authenticated(identity.clone()));
                    Ok(identity)
                }
                Err(err) => {
                    warn!(target: "stockroom", event = "sign_up_rejected", code = err.code());
                    Err(err)
                }
            }
        }
        .boxed()
    }

    fn sign_out(&self) -> BoxFuture<'_, ()> {
        async move {
            info!(target: "stockroom", event = "signed_out");
            self.publish(SessionState::Unauthenticated);
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sign_up_then_sign_in_round_trip() {
        let provider = MemoryIdentityProvider::new();
        let created = provider
            .sign_up("Ops@Example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(created.email, "ops@example.com");
        assert!(provider.current_session().is_authenticated());

        provider.sign_out().await;
        assert_eq!(provider.current_session(), SessionState::Unauthenticated);

        let again = provider.sign_in("ops@example.com", "hunter22").await.unwrap();
        assert_eq!(again, created);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_session_change() {
        let provider = MemoryIdentityProvider::new();
        provider.sign_up("ops@example.com", "hunter22").await.unwrap();
        provider.sign_out().await;

        let mut rx = provider.watch_session();
        rx.borrow_and_update();
        let err = provider.sign_in("ops@example.com", "nope").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn sign_up_validates_input() {
        let provider = MemoryIdentityProvider::new();
        assert_eq!(
            provider.sign_up("not-an-email", "hunter22").await,
            Err(AuthError::InvalidEmail)
        );
        assert_eq!(
            provider.sign_up("ops@example.com", "123").await,
            Err(AuthError::WeakPassword { min: 6 })
        );
        provider.sign_up("ops@example.com", "hunter22").await.unwrap();
        assert_eq!(
            provider.sign_up("OPS@example.com", "hunter22").await,
            Err(AuthError::EmailInUse)
        );
    }

    #[tokio::test]
    async fn repeated_sign_out_publishes_once() {
        let provider = MemoryIdentityProvider::new();
        provider.sign_up("ops@example.com", "hunter22").await.unwrap();
        let mut rx = provider.watch_session();
        rx.borrow_and_update();
        provider.sign_out().await;
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        provider.sign_out().await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn accounts_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let provider = MemoryIdentityProvider::open(&path).unwrap();
        provider.sign_up("ops@example.com", "hunter22").await.unwrap();

        let reopened = MemoryIdentityProvider::open(&path).unwrap();
        assert!(reopened.sign_in("ops@example.com", "hunter22").await.is_ok());
    }

    #[tokio::test]
    async fn failed_persist_does_not_register_the_account() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let provider = MemoryIdentityProvider::open(&data_dir.join("accounts.json")).unwrap();
        std::fs::remove_dir_all(&data_dir).unwrap();

        let err = provider
            .sign_up("ops@example.com", "hunter22")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)), "{err:?}");
        assert_eq!(provider.current_session(), SessionState::Unauthenticated);
        assert_eq!(
            provider.sign_in("ops@example.com", "hunter22").await,
            Err(AuthError::InvalidCredentials)
        );

        std::fs::create_dir_all(&data_dir).unwrap();
        assert!(provider.sign_up("ops@example.com", "hunter22").await.is_ok());
    }
}
