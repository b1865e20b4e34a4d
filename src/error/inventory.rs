use thiserror::Error;

use super::AppError;
use crate::backend::{AuthError, StoreError};
use crate::model::{
    AUTH_FAILED, INVENTORY_RECORD_PENDING, INVENTORY_UNKNOWN_RECORD, REMOTE_DISPATCH_FAILED,
    SESSION_REQUIRED, VALIDATION_INVALID_QUANTITY, VALIDATION_MISSING_FIELD,
};

/// Failures surfaced by inventory intents.
///
/// Validation variants are raised before anything is dispatched and leave the
/// canonical set untouched. `RemoteDispatchFailure` is raised after the
/// optimistic mutation has already been applied; it is not rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("fill all fields: {field} is empty")]
    MissingField { field: &'static str },
    #[error("invalid {field}: {input:?}")]
    InvalidQuantity { field: &'static str, input: String },
    #[error("remote dispatch failed: {0}")]
    RemoteDispatchFailure(#[from] StoreError),
    #[error("authentication failed: {0}")]
    AuthFailure(#[from] AuthError),
    #[error("no signed-in session")]
    NotSignedIn,
    #[error("record {id} not found")]
    UnknownRecord { id: String },
    #[error("record {code} is still waiting for the store to assign an id")]
    RecordPending { code: String },
}

impl InventoryError {
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::MissingField { .. } => VALIDATION_MISSING_FIELD,
            InventoryError::InvalidQuantity { .. } => VALIDATION_INVALID_QUANTITY,
            InventoryError::RemoteDispatchFailure(_) => REMOTE_DISPATCH_FAILED,
            InventoryError::AuthFailure(_) => AUTH_FAILED,
            InventoryError::NotSignedIn => SESSION_REQUIRED,
            InventoryError::UnknownRecord { .. } => INVENTORY_UNKNOWN_RECORD,
            InventoryError::RecordPending { .. } => INVENTORY_RECORD_PENDING,
        }
    }

    /// True for failures detected locally before any dispatch.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            InventoryError::MissingField { .. } | InventoryError::InvalidQuantity { .. }
        )
    }
}

impl From<InventoryError> for AppError {
    fn from(error: InventoryError) -> Self {
        let base = AppError::new(error.code(), error.to_string());
        match error {
            InventoryError::MissingField { field } => base.with_context("field", field),
            InventoryError::InvalidQuantity { field, input } => {
                base.with_context("field", field).with_context("input", input)
            }
            InventoryError::RemoteDispatchFailure(source) => {
                base.with_cause(AppError::new(source.code(), source.to_string()))
            }
            InventoryError::AuthFailure(source) => {
                base.with_cause(AppError::new(source.code(), source.to_string()))
            }
            InventoryError::UnknownRecord { id } => base.with_context("id", id),
            InventoryError::RecordPending { code } => base.with_context("code", code),
            InventoryError::NotSignedIn => base,
        }
    }
}
