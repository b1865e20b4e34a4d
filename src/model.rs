use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::InventoryError;

pub const VALIDATION_MISSING_FIELD: &str = "VALIDATION/MISSING_FIELD";
pub const VALIDATION_INVALID_QUANTITY: &str = "VALIDATION/INVALID_QUANTITY";
pub const REMOTE_DISPATCH_FAILED: &str = "REMOTE/DISPATCH_FAILED";
pub const AUTH_FAILED: &str = "AUTH/FAILED";
pub const SESSION_REQUIRED: &str = "SESSION/REQUIRED";
pub const INVENTORY_UNKNOWN_RECORD: &str = "INVENTORY/UNKNOWN_RECORD";
pub const INVENTORY_RECORD_PENDING: &str = "INVENTORY/RECORD_PENDING";

/// Threshold applied to records that carry no `lowThreshold` of their own.
pub const DEFAULT_LOW_THRESHOLD: u64 = 5;

pub const FIELD_NAME: &str = "name";
pub const FIELD_CODE: &str = "code";
pub const FIELD_QUANTITY: &str = "quantity";
pub const FIELD_UNIT: &str = "unit";
pub const FIELD_LOW_THRESHOLD: &str = "lowThreshold";

/// Identifier of a record in the canonical set.
///
/// `Remote` ids are only ever produced by the store. `Pending` is a local
/// placeholder for an optimistic create that has not been acknowledged; it is
/// never sent to the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RecordId {
    Remote(String),
    Pending(u64),
}

impl RecordId {
    pub fn remote(id: impl Into<String>) -> Self {
        RecordId::Remote(id.into())
    }

    pub fn as_remote(&self) -> Option<&str> {
        match self {
            RecordId::Remote(id) => Some(id),
            RecordId::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RecordId::Pending(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Remote(id) => f.write_str(id),
            RecordId::Pending(n) => write!(f, "pending-{n}"),
        }
    }
}

/// One document as delivered by a store snapshot: the store id plus whatever
/// fields the document holds. Field contents are not trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct InventoryRecord {
    pub id: RecordId,
    pub name: String,
    pub code: String,
    #[ts(type = "number")]
    pub quantity: u64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub low_threshold: Option<u64>,
}

impl InventoryRecord {
    /// Decode a snapshot document. Never fails: missing text fields become
    /// empty, missing or malformed counts become zero (threshold: absent),
    /// and negative counts are clamped to zero.
    pub fn from_raw(raw: &RawRecord) -> Self {
        Self {
            id: RecordId::Remote(raw.id.clone()),
            name: text_field(&raw.data, FIELD_NAME),
            code: text_field(&raw.data, FIELD_CODE),
            quantity: count_field(&raw.data, FIELD_QUANTITY).unwrap_or(0),
            unit: text_field(&raw.data, FIELD_UNIT),
            low_threshold: count_field(&raw.data, FIELD_LOW_THRESHOLD),
        }
    }

    pub fn threshold(&self, default: u64) -> u64 {
        self.low_threshold.unwrap_or(default)
    }

    pub fn is_low_stock(&self, default: u64) -> bool {
        self.quantity < self.threshold(default)
    }
}

fn text_field(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn count_field(data: &Map<String, Value>, key: &str) -> Option<u64> {
    match data.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().map(|v| v.max(0.0).trunc() as u64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(|v| v.max(0) as u64),
        _ => None,
    }
}

/// Contents of the add form. Every field is raw user text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub name: String,
    pub code: String,
    pub quantity: String,
    pub unit: String,
    #[serde(default)]
    pub low_threshold: String,
}

impl RecordDraft {
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        quantity: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            quantity: quantity.into(),
            unit: unit.into(),
            low_threshold: String::new(),
        }
    }

    pub fn with_low_threshold(mut self, threshold: impl Into<String>) -> Self {
        self.low_threshold = threshold.into();
        self
    }

    pub fn clear(&mut self) {
        *self = RecordDraft::default();
    }

    /// Check presence and numeric fields, in form order.
    pub fn validate(&self) -> Result<ValidDraft, InventoryError> {
        let name = required(FIELD_NAME, &self.name)?;
        let code = required(FIELD_CODE, &self.code)?;
        let quantity_text = required(FIELD_QUANTITY, &self.quantity)?;
        let unit = required(FIELD_UNIT, &self.unit)?;

        let quantity = parse_count(FIELD_QUANTITY, quantity_text)?;
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                field: FIELD_QUANTITY,
                input: self.quantity.clone(),
            });
        }

        let low_threshold = match self.low_threshold.trim() {
            "" => None,
            text => Some(parse_count(FIELD_LOW_THRESHOLD, text)?),
        };

        Ok(ValidDraft {
            name: name.to_string(),
            code: code.to_string(),
            quantity,
            unit: unit.to_string(),
            low_threshold,
        })
    }
}

/// A draft that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDraft {
    pub name: String,
    pub code: String,
    pub quantity: u64,
    pub unit: String,
    pub low_threshold: Option<u64>,
}

impl ValidDraft {
    /// Full document for a store create.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert(FIELD_NAME.into(), Value::from(self.name.clone()));
        doc.insert(FIELD_CODE.into(), Value::from(self.code.clone()));
        doc.insert(FIELD_QUANTITY.into(), Value::from(self.quantity));
        doc.insert(FIELD_UNIT.into(), Value::from(self.unit.clone()));
        if let Some(threshold) = self.low_threshold {
            doc.insert(FIELD_LOW_THRESHOLD.into(), Value::from(threshold));
        }
        doc
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, InventoryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(InventoryError::MissingField { field })
    } else {
        Ok(trimmed)
    }
}

/// Parse a non-negative integer count from form text.
pub fn parse_count(field: &'static str, input: &str) -> Result<u64, InventoryError> {
    input
        .trim()
        .parse::<u64>()
        .map_err(|_| InventoryError::InvalidQuantity {
            field,
            input: input.to_string(),
        })
}

/// Partial update carrying only the quantity.
pub fn quantity_patch(quantity: u64) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(FIELD_QUANTITY.into(), Value::from(quantity));
    doc
}

/// The record currently in edit mode and its unvalidated quantity text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditIntent {
    pub id: RecordId,
    pub text: String,
}
