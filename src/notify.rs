use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

use crate::AppError;

/// A user-facing failure notice. Shown once and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for Notice {
    fn from(error: &AppError) -> Self {
        Notice {
            code: error.code().to_string(),
            message: error.message().to_string(),
        }
    }
}

/// Blocking notification surface (an alert dialog in the browser).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        warn!(
            target: "stockroom",
            event = "user_notified",
            code = notice.code.as_str(),
            message = notice.message.as_str()
        );
    }
}

/// Notifier that keeps every notice, for callers that render them later.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());
    }
}
