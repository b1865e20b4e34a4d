//! Local view of the inventory collection.
//!
//! The store is the source of truth: every snapshot replaces the canonical set
//! wholesale. Local intents are applied optimistically and handed back as a
//! [`RemoteOp`] for the caller to dispatch; whatever the store reports next
//! wins, including over optimistic edits it has not caught up with yet.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::InventoryError;
use crate::model::{
    parse_count, quantity_patch, EditIntent, InventoryRecord, RawRecord, RecordDraft, RecordId,
    DEFAULT_LOW_THRESHOLD, FIELD_QUANTITY,
};
use crate::session::{Identity, SessionState};

pub type ListenerId = u64;

type Listener = Box<dyn FnMut(&CanonicalView<'_>) + Send>;

/// What caused a canonical-set change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Snapshot,
    Created,
    Merged,
    Edited,
    Deleted,
    Acknowledged,
    Cleared,
}

/// Borrowed state handed to change listeners.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalView<'a> {
    pub records: &'a [InventoryRecord],
    pub low_stock: &'a [InventoryRecord],
    pub cause: ChangeCause,
}

/// Store call owed for an accepted intent.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    /// Insert a new document. `pending` is the placeholder id the optimistic
    /// copy carries until the store acknowledges.
    Create {
        pending: RecordId,
        fields: Map<String, Value>,
    },
    Update {
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub id: RecordId,
    pub op: RemoteOp,
}

/// Derive the low-stock subset, preserving canonical order.
pub fn derive_low_stock(records: &[InventoryRecord], default_threshold: u64) -> Vec<InventoryRecord> {
    records
        .iter()
        .filter(|record| record.is_low_stock(default_threshold))
        .cloned()
        .collect()
}

pub struct InventoryReconciler {
    records: Vec<InventoryRecord>,
    low_stock: Vec<InventoryRecord>,
    edit: Option<EditIntent>,
    owner: Option<Identity>,
    default_threshold: u64,
    next_pending: u64,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
}

impl Default for InventoryReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_THRESHOLD)
    }
}

impl InventoryReconciler {
    /// `default_threshold` applies to records without their own `lowThreshold`.
    pub fn new(default_threshold: u64) -> Self {
        Self {
            records: Vec::new(),
            low_stock: Vec::new(),
            edit: None,
            owner: None,
            default_threshold,
            next_pending: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn records(&self) -> &[InventoryRecord] {
        &self.records
    }

    pub fn low_stock(&self) -> &[InventoryRecord] {
        &self.low_stock
    }

    pub fn edit_intent(&self) -> Option<&EditIntent> {
        self.edit.as_ref()
    }

    pub fn owner(&self) -> Option<&Identity> {
        self.owner.as_ref()
    }

    pub fn default_threshold(&self) -> u64 {
        self.default_threshold
    }

    pub fn get(&self, id: &RecordId) -> Option<&InventoryRecord> {
        self.records.iter().find(|record| &record.id == id)
    }

    pub fn find_by_code(&self, code: &str) -> Option<&InventoryRecord> {
        self.records.iter().find(|record| record.code == code)
    }

    /// Register a callback fired after every canonical-set change.
    pub fn on_change(
        &mut self,
        listener: impl FnMut(&CanonicalView<'_>) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Track the provider's session. Losing the session, or switching to a
    /// different identity, empties the canonical and low-stock sets.
    pub fn on_session_change(&mut self, state: &SessionState) {
        let next = state.identity();
        if self.owner.as_ref() == next {
            return;
        }
        info!(
            target: "stockroom",
            event = "session_changed",
            authenticated = next.is_some(),
            records_dropped = self.records.len()
        );
        self.owner = next.cloned();
        self.clear();
    }

    /// Drop every record, the low-stock set and any edit in progress.
    pub fn clear(&mut self) {
        self.records.clear();
        self.low_stock.clear();
        self.edit = None;
        self.notify(ChangeCause::Cleared);
    }

    /// Replace the canonical set with the store's view. Ignored when no session
    /// is active. Returns whether the snapshot was applied.
    pub fn apply_snapshot(&mut self, snapshot: &[RawRecord]) -> bool {
        if self.owner.is_none() {
            debug!(
                target: "stockroom",
                event = "snapshot_discarded",
                reason = "no_session",
                records = snapshot.len()
            );
            return false;
        }

        self.records = snapshot.iter().map(InventoryRecord::from_raw).collect();
        self.refresh_low_stock();
        if let Some(edit) = &self.edit {
            if self.get(&edit.id).is_none() {
                debug!(target: "stockroom", event = "edit_closed", reason = "record_gone", id = %edit.id);
                self.edit = None;
            }
        }

        info!(
            target: "stockroom",
            event = "snapshot_applied",
            records = self.records.len(),
            low_stock = self.low_stock.len()
        );
        self.notify(ChangeCause::Snapshot);
        true
    }

    /// Add stock from the form. A `code` already in the canonical set merges
    /// into that record (quantities add up); otherwise a new record is created
    /// under a pending placeholder id.
    pub fn add_or_merge(&mut self, draft: &RecordDraft) -> Result<Accepted, InventoryError> {
        self.require_session()?;
        let valid = draft.validate()?;

        if let Some(index) = self.records.iter().position(|r| r.code == valid.code) {
            let existing = &self.records[index];
            let id = match &existing.id {
                RecordId::Remote(id) => id.clone(),
                RecordId::Pending(_) => {
                    return Err(InventoryError::RecordPending {
                        code: existing.code.clone(),
                    })
                }
            };
            let quantity = existing.quantity.checked_add(valid.quantity).ok_or_else(|| {
                InventoryError::InvalidQuantity {
                    field: FIELD_QUANTITY,
                    input: draft.quantity.clone(),
                }
            })?;

            self.records[index].quantity = quantity;
            let record_id = self.records[index].id.clone();
            self.refresh_low_stock();
            info!(
                target: "stockroom",
                event = "record_merged",
                id = %id,
                added = valid.quantity,
                quantity
            );
            self.notify(ChangeCause::Merged);
            return Ok(Accepted {
                id: record_id,
                op: RemoteOp::Update {
                    id,
                    fields: quantity_patch(quantity),
                },
            });
        }

        let pending = RecordId::Pending(self.next_pending);
        self.next_pending += 1;
        let fields = valid.to_document();
        self.records.push(InventoryRecord {
            id: pending.clone(),
            name: valid.name,
            code: valid.code,
            quantity: valid.quantity,
            unit: valid.unit,
            low_threshold: valid.low_threshold,
        });
        self.refresh_low_stock();
        info!(
            target: "stockroom",
            event = "record_created",
            id = %pending,
            quantity = valid.quantity
        );
        self.notify(ChangeCause::Created);
        Ok(Accepted {
            id: pending.clone(),
            op: RemoteOp::Create { pending, fields },
        })
    }

    /// Give the optimistic copy its store-assigned id. Returns false when a
    /// snapshot already replaced the placeholder.
    pub fn acknowledge_create(&mut self, pending: &RecordId, remote_id: &str) -> bool {
        let assigned = RecordId::remote(remote_id);
        let Some(record) = self.records.iter_mut().find(|r| &r.id == pending) else {
            return false;
        };
        record.id = assigned.clone();
        if let Some(edit) = self.edit.as_mut() {
            if &edit.id == pending {
                edit.id = assigned;
            }
        }
        self.refresh_low_stock();
        debug!(target: "stockroom", event = "create_acknowledged", pending = %pending, id = remote_id);
        self.notify(ChangeCause::Acknowledged);
        true
    }

    /// Set a record's quantity from edit text. Accepts any non-negative integer.
    pub fn edit_quantity(&mut self, id: &RecordId, text: &str) -> Result<Accepted, InventoryError> {
        self.require_session()?;
        let quantity = parse_count(FIELD_QUANTITY, text)?;
        let remote_id = self.remote_id_of(id)?;

        if let Some(record) = self.records.iter_mut().find(|r| &r.id == id) {
            record.quantity = quantity;
        }
        self.refresh_low_stock();
        info!(target: "stockroom", event = "record_edited", id = %remote_id, quantity);
        self.notify(ChangeCause::Edited);
        Ok(Accepted {
            id: id.clone(),
            op: RemoteOp::Update {
                id: remote_id,
                fields: quantity_patch(quantity),
            },
        })
    }

    /// Remove a record. Confirmation is the caller's job.
    pub fn delete_record(&mut self, id: &RecordId) -> Result<Accepted, InventoryError> {
        self.require_session()?;
        let remote_id = self.remote_id_of(id)?;

        self.records.retain(|record| &record.id != id);
        if self.edit.as_ref().is_some_and(|edit| &edit.id == id) {
            self.edit = None;
        }
        self.refresh_low_stock();
        info!(target: "stockroom", event = "record_deleted", id = %remote_id);
        self.notify(ChangeCause::Deleted);
        Ok(Accepted {
            id: id.clone(),
            op: RemoteOp::Delete { id: remote_id },
        })
    }

    /// Put one record in edit mode, seeded with its current quantity. Any
    /// other edit in progress is abandoned.
    pub fn begin_edit(&mut self, id: &RecordId) -> Result<&EditIntent, InventoryError> {
        self.require_session()?;
        let record = self.get(id).ok_or_else(|| InventoryError::UnknownRecord {
            id: id.to_string(),
        })?;
        let intent = EditIntent {
            id: id.clone(),
            text: record.quantity.to_string(),
        };
        Ok(self.edit.insert(intent))
    }

    /// Replace the pending edit text. False when nothing is being edited.
    pub fn set_edit_text(&mut self, text: impl Into<String>) -> bool {
        match self.edit.as_mut() {
            Some(edit) => {
                edit.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn cancel_edit(&mut self) {
        self.edit = None;
    }

    /// Save the edit in progress. Edit mode closes only when the edit is
    /// accepted; `Ok(None)` when nothing was being edited.
    pub fn commit_edit(&mut self) -> Result<Option<Accepted>, InventoryError> {
        let Some(edit) = self.edit.clone() else {
            return Ok(None);
        };
        let accepted = self.edit_quantity(&edit.id, &edit.text)?;
        self.edit = None;
        Ok(Some(accepted))
    }

    fn require_session(&self) -> Result<(), InventoryError> {
        if self.owner.is_some() {
            Ok(())
        } else {
            Err(InventoryError::NotSignedIn)
        }
    }

    fn remote_id_of(&self, id: &RecordId) -> Result<String, InventoryError> {
        let record = self.get(id).ok_or_else(|| InventoryError::UnknownRecord {
            id: id.to_string(),
        })?;
        match &record.id {
            RecordId::Remote(remote) => Ok(remote.clone()),
            RecordId::Pending(_) => Err(InventoryError::RecordPending {
                code: record.code.clone(),
            }),
        }
    }

    fn refresh_low_stock(&mut self) {
        self.low_stock = derive_low_stock(&self.records, self.default_threshold);
    }

    fn notify(&mut self, cause: ChangeCause) {
        let view = CanonicalView {
            records: &self.records,
            low_stock: &self.low_stock,
            cause,
        };
        for (_, listener) in self.listeners.iter_mut() {
            listener(&view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn identity(uid: &str) -> Identity {
        Identity {
            uid: uid.into(),
            email: format!("{uid}@example.com"),
        }
    }

    fn signed_in() -> InventoryReconciler {
        let mut reconciler = InventoryReconciler::default();
        reconciler.on_session_change(&SessionState::Authenticated(identity("u1")));
        reconciler
    }

    fn raw(id: &str, code: &str, quantity: u64, low: Option<u64>) -> RawRecord {
        let mut value = json!({
            "id": id,
            "name": format!("Item {code}"),
            "code": code,
            "quantity": quantity,
            "unit": "pcs"
        });
        if let Some(low) = low {
            value["lowThreshold"] = json!(low);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn snapshot_replaces_set_and_derives_low_stock() {
        let mut reconciler = signed_in();
        assert!(reconciler.apply_snapshot(&[raw("a", "A1", 3, Some(5)), raw("b", "B1", 10, Some(5))]));
        assert_eq!(reconciler.records().len(), 2);
        assert_eq!(reconciler.low_stock().len(), 1);
        assert_eq!(reconciler.low_stock()[0].code, "A1");

        assert!(reconciler.apply_snapshot(&[]));
        assert!(reconciler.records().is_empty());
        assert!(reconciler.low_stock().is_empty());
    }

    #[test]
    fn fixed_threshold_applies_without_per_record_value() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 4, None), raw("b", "B1", 5, None)]);
        let low: Vec<_> = reconciler.low_stock().iter().map(|r| r.code.as_str()).collect();
        assert_eq!(low, ["A1"]);
    }

    #[test]
    fn snapshot_without_session_is_discarded() {
        let mut reconciler = InventoryReconciler::default();
        assert!(!reconciler.apply_snapshot(&[raw("a", "A1", 3, None)]));
        assert!(reconciler.records().is_empty());
    }

    #[test]
    fn add_with_existing_code_merges_quantity() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 10, None)]);

        let accepted = reconciler
            .add_or_merge(&RecordDraft::new("Bolt", "A1", "5", "pcs"))
            .unwrap();
        assert_eq!(reconciler.records().len(), 1);
        assert_eq!(reconciler.records()[0].quantity, 15);
        assert_eq!(
            accepted.op,
            RemoteOp::Update {
                id: "a".into(),
                fields: quantity_patch(15)
            }
        );
    }

    #[test]
    fn add_with_new_code_creates_pending_record() {
        let mut reconciler = signed_in();
        let accepted = reconciler
            .add_or_merge(&RecordDraft::new("Nut", "N9", "2", "pcs"))
            .unwrap();
        assert_eq!(accepted.id, RecordId::Pending(0));
        match &accepted.op {
            RemoteOp::Create { pending, fields } => {
                assert_eq!(pending, &RecordId::Pending(0));
                assert_eq!(fields.get("quantity"), Some(&json!(2)));
                assert_eq!(fields.get("code"), Some(&json!("N9")));
            }
            other => panic!("expected create, got {other:?}"),
        }
        assert_eq!(reconciler.records().len(), 1);
        assert_eq!(reconciler.low_stock().len(), 1);
    }

    #[test]
    fn merging_into_unacknowledged_record_is_refused() {
        let mut reconciler = signed_in();
        reconciler
            .add_or_merge(&RecordDraft::new("Nut", "N9", "2", "pcs"))
            .unwrap();
        let err = reconciler
            .add_or_merge(&RecordDraft::new("Nut", "N9", "1", "pcs"))
            .unwrap_err();
        assert_eq!(err, InventoryError::RecordPending { code: "N9".into() });
        assert_eq!(reconciler.records()[0].quantity, 2);
    }

    #[test]
    fn acknowledgement_assigns_store_id() {
        let mut reconciler = signed_in();
        let accepted = reconciler
            .add_or_merge(&RecordDraft::new("Nut", "N9", "2", "pcs"))
            .unwrap();
        assert!(reconciler.acknowledge_create(&accepted.id, "doc-1"));
        assert_eq!(reconciler.records()[0].id, RecordId::remote("doc-1"));
        assert!(!reconciler.acknowledge_create(&accepted.id, "doc-1"));

        let merged = reconciler
            .add_or_merge(&RecordDraft::new("Nut", "N9", "1", "pcs"))
            .unwrap();
        assert_eq!(merged.id, RecordId::remote("doc-1"));
        assert_eq!(reconciler.records()[0].quantity, 3);
    }

    #[test]
    fn snapshot_replaces_placeholder_rather_than_merging() {
        let mut reconciler = signed_in();
        reconciler
            .add_or_merge(&RecordDraft::new("Nut", "N9", "2", "pcs"))
            .unwrap();
        reconciler.apply_snapshot(&[raw("doc-1", "N9", 2, None)]);
        assert_eq!(reconciler.records().len(), 1);
        assert_eq!(reconciler.records()[0].id, RecordId::remote("doc-1"));
    }

    #[test]
    fn validation_failures_leave_set_untouched() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 10, None)]);
        let before = reconciler.records().to_vec();

        let missing = reconciler
            .add_or_merge(&RecordDraft::new("", "A1", "5", "pcs"))
            .unwrap_err();
        assert_eq!(missing, InventoryError::MissingField { field: "name" });

        for bad in ["-1", "abc"] {
            let err = reconciler
                .edit_quantity(&RecordId::remote("a"), bad)
                .unwrap_err();
            assert!(matches!(err, InventoryError::InvalidQuantity { .. }), "{bad}");
        }
        assert_eq!(reconciler.records(), before.as_slice());
    }

    #[test]
    fn edit_accepts_zero_and_updates_low_stock() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 10, None)]);
        let accepted = reconciler.edit_quantity(&RecordId::remote("a"), "0").unwrap();
        assert_eq!(
            accepted.op,
            RemoteOp::Update {
                id: "a".into(),
                fields: quantity_patch(0)
            }
        );
        assert_eq!(reconciler.low_stock().len(), 1);
    }

    #[test]
    fn edit_unknown_record_is_rejected() {
        let mut reconciler = signed_in();
        let err = reconciler
            .edit_quantity(&RecordId::remote("ghost"), "3")
            .unwrap_err();
        assert_eq!(err, InventoryError::UnknownRecord { id: "ghost".into() });
    }

    #[test]
    fn edit_mode_is_exclusive_and_survives_invalid_text() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 10, None), raw("b", "B1", 7, None)]);

        reconciler.begin_edit(&RecordId::remote("a")).unwrap();
        let intent = reconciler.begin_edit(&RecordId::remote("b")).unwrap();
        assert_eq!(intent.text, "7");
        assert_eq!(reconciler.edit_intent().unwrap().id, RecordId::remote("b"));

        assert!(reconciler.set_edit_text("nope"));
        assert!(reconciler.commit_edit().is_err());
        assert!(reconciler.edit_intent().is_some());

        reconciler.set_edit_text("12");
        let accepted = reconciler.commit_edit().unwrap().unwrap();
        assert_eq!(accepted.id, RecordId::remote("b"));
        assert!(reconciler.edit_intent().is_none());
        assert_eq!(reconciler.commit_edit(), Ok(None));
    }

    #[test]
    fn edit_closes_when_record_leaves_snapshot() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 10, None)]);
        reconciler.begin_edit(&RecordId::remote("a")).unwrap();
        reconciler.apply_snapshot(&[]);
        assert!(reconciler.edit_intent().is_none());
    }

    #[test]
    fn delete_removes_locally_and_emits_delete() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 1, None), raw("b", "B1", 10, None)]);
        let accepted = reconciler.delete_record(&RecordId::remote("a")).unwrap();
        assert_eq!(accepted.op, RemoteOp::Delete { id: "a".into() });
        assert_eq!(reconciler.records().len(), 1);
        assert!(reconciler.low_stock().is_empty());
    }

    #[test]
    fn session_loss_clears_everything() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 1, None)]);
        reconciler.begin_edit(&RecordId::remote("a")).unwrap();

        reconciler.on_session_change(&SessionState::Unauthenticated);
        assert!(reconciler.records().is_empty());
        assert!(reconciler.low_stock().is_empty());
        assert!(reconciler.edit_intent().is_none());
        assert_eq!(
            reconciler.add_or_merge(&RecordDraft::new("Bolt", "A1", "1", "pcs")),
            Err(InventoryError::NotSignedIn)
        );
    }

    #[test]
    fn switching_identity_drops_previous_inventory() {
        let mut reconciler = signed_in();
        reconciler.apply_snapshot(&[raw("a", "A1", 1, None)]);
        reconciler.on_session_change(&SessionState::Authenticated(identity("u2")));
        assert!(reconciler.records().is_empty());
        assert_eq!(reconciler.owner(), Some(&identity("u2")));
    }

    #[test]
    fn listeners_observe_changes_until_removed() {
        let mut reconciler = signed_in();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = reconciler.on_change(move |view| {
            sink.lock().unwrap().push((view.cause, view.records.len()));
        });

        reconciler.apply_snapshot(&[raw("a", "A1", 1, None)]);
        reconciler.delete_record(&RecordId::remote("a")).unwrap();
        assert!(reconciler.remove_listener(id));
        reconciler.apply_snapshot(&[]);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(ChangeCause::Snapshot, 1), (ChangeCause::Deleted, 0)]
        );
    }
}
