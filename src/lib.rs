//! Client core for a shared inventory tracker.
//!
//! The managed backend owns persistence, live updates and identity; this crate
//! keeps the local view consistent with it: session gating, snapshot
//! reconciliation with optimistic intents, low-stock derivation, search and
//! CSV export.

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod notify;
pub mod projector;
pub mod reconciler;
pub mod session;
pub mod util;

pub use app::{AppEvent, InventoryApp};
pub use backend::{
    AuthError, IdentityProvider, MemoryIdentityProvider, MemoryStore, RecordStore, Snapshot,
    StoreError, Subscription,
};
pub use config::AppConfig;
pub use error::{AppError, AppResult, InventoryError};
pub use export::{CsvSink, DirectorySink};
pub use logging::init_logging;
pub use model::{EditIntent, InventoryRecord, RawRecord, RecordDraft, RecordId};
pub use notify::{LogNotifier, Notice, Notifier, RecordingNotifier};
pub use projector::{filtered_view, render_csv, to_csv_rows, CsvTable};
pub use reconciler::{Accepted, CanonicalView, ChangeCause, InventoryReconciler, RemoteOp};
pub use session::{Identity, SessionGate, SessionState};
