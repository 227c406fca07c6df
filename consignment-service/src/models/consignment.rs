//! Consignment (booking) model and lifecycle state machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a consignment.
///
/// Not a linear sequence: `InStock` is both the post-booking state and the
/// re-entrant state after each inward receipt, so a consignment may cycle
/// `InStock -> InLoading -> InTransit -> InStock` once per movement leg
/// before reaching a delivery outcome. Transitions are guarded by the
/// explicit methods below; ordinal comparison between statuses is
/// meaningless and deliberately not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsignmentStatus {
    InStock,
    InLoading,
    InTransit,
    Delivered,
    PartiallyDelivered,
    InHold,
    Cancelled,
}

impl ConsignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsignmentStatus::InStock => "in_stock",
            ConsignmentStatus::InLoading => "in_loading",
            ConsignmentStatus::InTransit => "in_transit",
            ConsignmentStatus::Delivered => "delivered",
            ConsignmentStatus::PartiallyDelivered => "partially_delivered",
            ConsignmentStatus::InHold => "in_hold",
            ConsignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(ConsignmentStatus::InStock),
            "in_loading" => Some(ConsignmentStatus::InLoading),
            "in_transit" => Some(ConsignmentStatus::InTransit),
            "delivered" => Some(ConsignmentStatus::Delivered),
            "partially_delivered" => Some(ConsignmentStatus::PartiallyDelivered),
            "in_hold" => Some(ConsignmentStatus::InHold),
            "cancelled" => Some(ConsignmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Guard for selection into a loading (dispatch) challan.
    /// `InLoading` itself is excluded: it means the consignment is already
    /// on an open dispatch challan.
    pub fn can_enter_loading(&self) -> bool {
        matches!(self, ConsignmentStatus::InStock)
    }

    /// Guard for dispatch-challan finalization.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, ConsignmentStatus::InLoading)
    }

    /// Guard for inward receipt. Rejects double-inwarding and inwarding
    /// of a not-yet-dispatched consignment.
    pub fn can_inward(&self) -> bool {
        matches!(self, ConsignmentStatus::InTransit)
    }

    /// Guard for delivery reconciliation.
    pub fn can_deliver(&self) -> bool {
        matches!(self, ConsignmentStatus::InStock | ConsignmentStatus::InHold)
    }

    /// Guard for hold / release management.
    pub fn can_hold(&self) -> bool {
        matches!(self, ConsignmentStatus::InStock)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, ConsignmentStatus::InHold)
    }

    /// Cancellation is administrative and allowed from any non-terminal
    /// state; whether an in-transit consignment should be cancelled is a
    /// caller policy, the engine only records it.
    pub fn can_cancel(&self) -> bool {
        !matches!(
            self,
            ConsignmentStatus::Delivered
                | ConsignmentStatus::PartiallyDelivered
                | ConsignmentStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ConsignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Freight payment responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreightType {
    Topay,
    Paid,
    Tbb,
    Foc,
}

impl FreightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreightType::Topay => "topay",
            FreightType::Paid => "paid",
            FreightType::Tbb => "tbb",
            FreightType::Foc => "foc",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "topay" => Some(FreightType::Topay),
            "paid" => Some(FreightType::Paid),
            "tbb" => Some(FreightType::Tbb),
            "foc" => Some(FreightType::Foc),
            _ => None,
        }
    }
}

/// Where a consignment record came from: booked at this hub (`Regular`)
/// or created from a received inward manifest (`Inward`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsignmentSource {
    Regular,
    Inward,
}

impl ConsignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsignmentSource::Regular => "regular",
            ConsignmentSource::Inward => "inward",
        }
    }
}

/// Display-only annotation set when a dispatch did not match the booked
/// quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    ShortDispatched,
    ExtraDispatched,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::ShortDispatched => "short_dispatched",
            DispatchStatus::ExtraDispatched => "extra_dispatched",
        }
    }
}

/// Consignment row. `consignment_id` is the internal tracking id; `lr_no`
/// is the human-facing reference, unique per company and immutable once
/// assigned.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Consignment {
    pub consignment_id: Uuid,
    pub company_id: Uuid,
    pub lr_no: String,
    pub status: String,
    pub origin_station: String,
    pub destination_station: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub freight_type: String,
    pub payment_mode: Option<String>,
    pub total_amount: Decimal,
    pub source: String,
    pub dispatch_status: Option<String>,
    pub delivery_memo_no: Option<String>,
    pub received_by: Option<String>,
    pub delivered_date: Option<NaiveDate>,
    pub unloading_charge: Option<Decimal>,
    pub other_charge: Option<Decimal>,
    pub delivery_remarks: Option<String>,
    pub booked_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Consignment {
    pub fn parsed_status(&self) -> Option<ConsignmentStatus> {
        ConsignmentStatus::from_string(&self.status)
    }
}

/// Line item on a consignment. `delivered_qty`/`return_qty` stay NULL
/// until delivery reconciliation closes the allocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub consignment_id: Uuid,
    pub line_no: i32,
    pub description: String,
    pub quantity: i32,
    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub delivered_qty: Option<i32>,
    pub return_qty: Option<i32>,
}

/// Input for booking a consignment.
#[derive(Debug, Clone)]
pub struct CreateConsignment {
    pub company_id: Uuid,
    /// Caller-supplied reference; allocated from the per-company `lr`
    /// sequence when absent.
    pub lr_no: Option<String>,
    pub origin_station: String,
    pub destination_station: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub freight_type: FreightType,
    pub payment_mode: Option<String>,
    pub source: ConsignmentSource,
    pub line_items: Vec<CreateLineItem>,
}

/// Input for one booked line item.
#[derive(Debug, Clone)]
pub struct CreateLineItem {
    pub description: String,
    pub quantity: i32,
    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub amount: Decimal,
}

impl CreateConsignment {
    /// Booked total, computed from the line items rather than trusted
    /// from the caller.
    pub fn total_amount(&self) -> Decimal {
        self.line_items.iter().map(|li| li.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_requires_in_stock() {
        assert!(ConsignmentStatus::InStock.can_enter_loading());
        for status in [
            ConsignmentStatus::InLoading,
            ConsignmentStatus::InTransit,
            ConsignmentStatus::Delivered,
            ConsignmentStatus::PartiallyDelivered,
            ConsignmentStatus::InHold,
            ConsignmentStatus::Cancelled,
        ] {
            assert!(!status.can_enter_loading(), "{status} must not be loadable");
        }
    }

    #[test]
    fn inward_requires_in_transit() {
        assert!(ConsignmentStatus::InTransit.can_inward());
        assert!(!ConsignmentStatus::InStock.can_inward());
        assert!(!ConsignmentStatus::InLoading.can_inward());
        // Double inward: after the first receipt the status is in_stock again.
        assert!(!ConsignmentStatus::InStock.can_inward());
    }

    #[test]
    fn delivery_requires_in_stock_or_hold() {
        assert!(ConsignmentStatus::InStock.can_deliver());
        assert!(ConsignmentStatus::InHold.can_deliver());
        assert!(!ConsignmentStatus::InTransit.can_deliver());
        assert!(!ConsignmentStatus::Delivered.can_deliver());
    }

    #[test]
    fn cancel_blocked_on_terminal_states() {
        assert!(ConsignmentStatus::InTransit.can_cancel());
        assert!(ConsignmentStatus::InHold.can_cancel());
        assert!(!ConsignmentStatus::Delivered.can_cancel());
        assert!(!ConsignmentStatus::PartiallyDelivered.can_cancel());
        assert!(!ConsignmentStatus::Cancelled.can_cancel());
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            ConsignmentStatus::InStock,
            ConsignmentStatus::InLoading,
            ConsignmentStatus::InTransit,
            ConsignmentStatus::Delivered,
            ConsignmentStatus::PartiallyDelivered,
            ConsignmentStatus::InHold,
            ConsignmentStatus::Cancelled,
        ] {
            assert_eq!(ConsignmentStatus::from_string(status.as_str()), Some(status));
        }
        assert_eq!(ConsignmentStatus::from_string("bogus"), None);
    }

    #[test]
    fn booked_total_sums_line_items() {
        let input = CreateConsignment {
            company_id: Uuid::new_v4(),
            lr_no: None,
            origin_station: "Jaipur".into(),
            destination_station: "Surat".into(),
            sender_name: "Acme Textiles".into(),
            receiver_name: "Mehta & Sons".into(),
            freight_type: FreightType::Topay,
            payment_mode: None,
            source: ConsignmentSource::Regular,
            line_items: vec![
                CreateLineItem {
                    description: "Cartons".into(),
                    quantity: 10,
                    actual_weight: Decimal::new(1200, 1),
                    charge_weight: Decimal::new(1250, 1),
                    amount: Decimal::new(150000, 2),
                },
                CreateLineItem {
                    description: "Bales".into(),
                    quantity: 4,
                    actual_weight: Decimal::new(800, 1),
                    charge_weight: Decimal::new(800, 1),
                    amount: Decimal::new(50000, 2),
                },
            ],
        };
        assert_eq!(input.total_amount(), Decimal::new(200000, 2));
    }
}
