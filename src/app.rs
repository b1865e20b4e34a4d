//! Event-driven driver tying the session, the store subscription and the
//! reconciler together.
//!
//! All work happens on one task. Intents mutate the reconciler first and only
//! then await the store; snapshots and session transitions arrive as separate
//! events through [`InventoryApp::step`] or [`InventoryApp::drain_snapshots`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{IdentityProvider, RecordStore, Snapshot, Subscription};
use crate::config::AppConfig;
use crate::error::InventoryError;
use crate::export::CsvSink;
use crate::logging::LogScope;
use crate::model::{InventoryRecord, RecordDraft, RecordId};
use crate::notify::{Notice, Notifier};
use crate::projector;
use crate::reconciler::{Accepted, InventoryReconciler, RemoteOp};
use crate::session::{Identity, SessionGate, SessionState};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    SessionChanged(SessionState),
    SnapshotApplied { records: usize },
    /// A snapshot arrived while no session was active and was ignored.
    SnapshotDiscarded,
    SubscriptionClosed,
    ProviderClosed,
}

pub struct InventoryApp<S, P> {
    store: S,
    provider: P,
    gate: SessionGate,
    reconciler: InventoryReconciler,
    subscription: Option<Subscription>,
    subscribed_for: Option<Identity>,
    collection: String,
    notifier: Arc<dyn Notifier>,
    draft: RecordDraft,
}

async fn next_snapshot(subscription: &mut Option<Subscription>) -> Option<Snapshot> {
    match subscription {
        Some(sub) => sub.next().await,
        None => futures::future::pending().await,
    }
}

impl<S, P> InventoryApp<S, P>
where
    S: RecordStore,
    P: IdentityProvider,
{
    pub fn new(store: S, provider: P, config: &AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let gate = SessionGate::new(provider.watch_session());
        Self {
            store,
            provider,
            gate,
            reconciler: InventoryReconciler::new(config.default_low_threshold),
            subscription: None,
            subscribed_for: None,
            collection: config.collection.clone(),
            notifier,
            draft: RecordDraft::default(),
        }
    }

    pub fn reconciler(&self) -> &InventoryReconciler {
        &self.reconciler
    }

    /// Direct access for listener registration and edit-mode handling.
    pub fn reconciler_mut(&mut self) -> &mut InventoryReconciler {
        &mut self.reconciler
    }

    pub fn records(&self) -> &[InventoryRecord] {
        self.reconciler.records()
    }

    pub fn low_stock(&self) -> &[InventoryRecord] {
        self.reconciler.low_stock()
    }

    pub fn session(&self) -> SessionState {
        self.gate.current()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn draft(&self) -> &RecordDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut RecordDraft {
        &mut self.draft
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    pub fn search(&self, term: &str) -> Vec<&InventoryRecord> {
        projector::filtered_view(self.reconciler.records(), term)
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<Identity, InventoryError> {
        let result = self.provider.sign_in(email, password).await;
        self.finish_auth(result)
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<Identity, InventoryError> {
        let result = self.provider.sign_up(email, password).await;
        self.finish_auth(result)
    }

    pub async fn sign_out(&mut self) {
        self.provider.sign_out().await;
        self.sync_session();
    }

    fn finish_auth(
        &mut self,
        result: Result<Identity, crate::backend::AuthError>,
    ) -> Result<Identity, InventoryError> {
        match result {
            Ok(identity) => {
                self.sync_session();
                Ok(identity)
            }
            Err(err) => Err(self.report(InventoryError::AuthFailure(err))),
        }
    }

    /// Bring the reconciler and the store subscription in line with the
    /// provider's current session. Subscribes only while signed in; a lost or
    /// switched session drops the old subscription and anything it still had
    /// queued.
    pub fn sync_session(&mut self) {
        let _ = self.gate.poll_transition();
        let state = self.gate.current();
        self.reconciler.on_session_change(&state);

        if self.subscribed_for.as_ref() == state.identity() && self.subscription.is_some() {
            return;
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.close();
            info!(target: "stockroom", event = "subscription_closed", collection = %self.collection);
        }
        self.subscribed_for = None;

        if let Some(identity) = state.identity() {
            match self.store.subscribe(&self.collection) {
                Ok(subscription) => {
                    info!(
                        target: "stockroom",
                        event = "subscription_opened",
                        collection = %self.collection,
                        uid = %identity.uid
                    );
                    self.subscription = Some(subscription);
                    self.subscribed_for = Some(identity.clone());
                    self.drain_snapshots();
                }
                Err(err) => {
                    let _ = self.report(InventoryError::RemoteDispatchFailure(err));
                }
            }
        }
    }

    /// Apply every snapshot already delivered, in delivery order.
    pub fn drain_snapshots(&mut self) -> usize {
        let mut applied = 0;
        while let Some(snapshot) = self.subscription.as_mut().and_then(Subscription::try_next) {
            if self.reconciler.apply_snapshot(&snapshot) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next session transition or snapshot and process it.
    pub async fn step(&mut self) -> AppEvent {
        tokio::select! {
            state = self.gate.next_transition() => match state {
                Some(state) => {
                    self.sync_session();
                    AppEvent::SessionChanged(state)
                }
                None => AppEvent::ProviderClosed,
            },
            snapshot = next_snapshot(&mut self.subscription) => match snapshot {
                Some(snapshot) => {
                    if self.reconciler.apply_snapshot(&snapshot) {
                        AppEvent::SnapshotApplied { records: snapshot.len() }
                    } else {
                        AppEvent::SnapshotDiscarded
                    }
                }
                None => {
                    warn!(target: "stockroom", event = "subscription_ended", collection = %self.collection);
                    self.subscription = None;
                    self.subscribed_for = None;
                    AppEvent::SubscriptionClosed
                }
            },
        }
    }

    /// Add or merge the given draft, then dispatch.
    pub async fn add(&mut self, draft: &RecordDraft) -> Result<Accepted, InventoryError> {
        let scope = LogScope::new("add_or_merge");
        let accepted = match self.reconciler.add_or_merge(draft) {
            Ok(accepted) => accepted,
            Err(err) => return Err(self.fail(scope, err)),
        };
        self.finish(scope, accepted).await
    }

    /// Submit the app's own form draft; the form is cleared once accepted.
    pub async fn submit_draft(&mut self) -> Result<Accepted, InventoryError> {
        let draft = self.draft.clone();
        let scope = LogScope::new("add_or_merge");
        let accepted = match self.reconciler.add_or_merge(&draft) {
            Ok(accepted) => accepted,
            Err(err) => return Err(self.fail(scope, err)),
        };
        self.draft.clear();
        self.finish(scope, accepted).await
    }

    pub async fn edit_quantity(
        &mut self,
        id: &RecordId,
        text: &str,
    ) -> Result<Accepted, InventoryError> {
        let scope = LogScope::new("edit_quantity");
        let accepted = match self.reconciler.edit_quantity(id, text) {
            Ok(accepted) => accepted,
            Err(err) => return Err(self.fail(scope, err)),
        };
        self.finish(scope, accepted).await
    }

    /// Save the reconciler's edit in progress. `Ok(None)` if none was open.
    pub async fn commit_edit(&mut self) -> Result<Option<Accepted>, InventoryError> {
        let scope = LogScope::new("commit_edit");
        match self.reconciler.commit_edit() {
            Ok(Some(accepted)) => self.finish(scope, accepted).await.map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(self.fail(scope, err)),
        }
    }

    /// Delete a record once `confirm` agrees. `Ok(None)` when declined.
    pub async fn delete(
        &mut self,
        id: &RecordId,
        confirm: impl FnOnce(&InventoryRecord) -> bool,
    ) -> Result<Option<Accepted>, InventoryError> {
        if let Err(err) = self.gate.require() {
            return Err(self.report(err));
        }
        let Some(record) = self.reconciler.get(id) else {
            let err = InventoryError::UnknownRecord { id: id.to_string() };
            return Err(self.report(err));
        };
        if !confirm(record) {
            debug!(target: "stockroom", event = "delete_declined", id = %id);
            return Ok(None);
        }
        let scope = LogScope::new("delete_record");
        let accepted = match self.reconciler.delete_record(id) {
            Ok(accepted) => accepted,
            Err(err) => return Err(self.fail(scope, err)),
        };
        self.finish(scope, accepted).await.map(Some)
    }

    /// Hand the current canonical set to a CSV sink.
    pub fn export_csv(&self, sink: &dyn CsvSink) -> AppResult<PathBuf> {
        self.gate.require().map_err(AppError::from)?;
        sink.export(&projector::to_csv_rows(self.reconciler.records()))
    }

    /// Drop the store subscription. The canonical set is left as is.
    pub fn close(&mut self) {
        if self.subscription.take().is_some() {
            info!(target: "stockroom", event = "subscription_closed", collection = %self.collection);
        }
        self.subscribed_for = None;
    }

    async fn finish(
        &mut self,
        scope: LogScope,
        accepted: Accepted,
    ) -> Result<Accepted, InventoryError> {
        match self.dispatch(&accepted.op).await {
            Ok(()) => {
                scope.success();
                self.drain_snapshots();
                Ok(accepted)
            }
            Err(err) => {
                let err = self.fail(scope, err);
                self.drain_snapshots();
                Err(err)
            }
        }
    }

    async fn dispatch(&mut self, op: &RemoteOp) -> Result<(), InventoryError> {
        match op {
            RemoteOp::Create { pending, fields } => {
                let id = self.store.create(&self.collection, fields.clone()).await?;
                self.reconciler.acknowledge_create(pending, &id);
            }
            RemoteOp::Update { id, fields } => {
                self.store
                    .update(&self.collection, id, fields.clone())
                    .await?;
            }
            RemoteOp::Delete { id } => {
                self.store.delete(&self.collection, id).await?;
            }
        }
        Ok(())
    }

    fn fail(&self, scope: LogScope, err: InventoryError) -> InventoryError {
        let app_error = AppError::from(err.clone());
        scope.fail(&app_error);
        self.notify(&app_error);
        err
    }

    fn report(&self, err: InventoryError) -> InventoryError {
        let app_error = AppError::from(err.clone());
        warn!(target: "stockroom", event = "intent_rejected", code = app_error.code());
        self.notify(&app_error);
        err
    }

    fn notify(&self, error: &AppError) {
        self.notifier.notify(&Notice::from(error));
    }
}
