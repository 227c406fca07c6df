//! Append-only audit history, keyed by LR number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status-transition label recorded with each history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Booked,
    Loaded,
    Dispatched,
    Inwarded,
    Delivered,
    PartiallyDelivered,
    /// Dropped from an edited inward challan; the receipt is undone.
    ReturnedToTransit,
    Held,
    Released,
    Cancelled,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Booked => "booked",
            HistoryAction::Loaded => "loaded",
            HistoryAction::Dispatched => "dispatched",
            HistoryAction::Inwarded => "inwarded",
            HistoryAction::Delivered => "delivered",
            HistoryAction::PartiallyDelivered => "partially_delivered",
            HistoryAction::ReturnedToTransit => "returned_to_transit",
            HistoryAction::Held => "held",
            HistoryAction::Released => "released",
            HistoryAction::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit-trail entry. Write-once: there is no update or delete path
/// anywhere in the service. The full ascending list for an lr_no is the
/// canonical trail, derivable independently of the consignment's mutable
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryEntry {
    pub history_id: Uuid,
    pub company_id: Uuid,
    pub lr_no: String,
    pub action: String,
    pub actor: String,
    pub details: String,
    pub recorded_utc: DateTime<Utc>,
}
