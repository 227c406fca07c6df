//! Challan (manifest) and LR-detail snapshot models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Direction of a vehicle movement manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallanType {
    Dispatch,
    Inward,
}

impl ChallanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallanType::Dispatch => "dispatch",
            ChallanType::Inward => "inward",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "dispatch" => Some(ChallanType::Dispatch),
            "inward" => Some(ChallanType::Inward),
            _ => None,
        }
    }
}

/// A dispatch challan is `Pending` from creation until its one-time
/// finalization; inward challans are saved directly as `Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallanStatus {
    Pending,
    Finalized,
}

impl ChallanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallanStatus::Pending => "pending",
            ChallanStatus::Finalized => "finalized",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChallanStatus::Pending),
            "finalized" => Some(ChallanStatus::Finalized),
            _ => None,
        }
    }
}

/// Challan row. The total columns are a materialized view of the
/// challan's LrDetail snapshots and must equal their sums at every save.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Challan {
    pub challan_id: Uuid,
    pub company_id: Uuid,
    pub challan_no: String,
    pub challan_type: String,
    pub status: String,
    pub vehicle_no: Option<String>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub freight_terms: Option<String>,
    pub from_station: String,
    pub to_station: String,
    pub total_lr: i32,
    pub total_packages: i32,
    pub total_actual_weight: Decimal,
    pub total_charge_weight: Decimal,
    pub total_amount: Decimal,
    pub created_utc: DateTime<Utc>,
    pub finalized_utc: Option<DateTime<Utc>>,
}

impl Challan {
    pub fn parsed_status(&self) -> Option<ChallanStatus> {
        ChallanStatus::from_string(&self.status)
    }

    pub fn parsed_type(&self) -> Option<ChallanType> {
        ChallanType::from_string(&self.challan_type)
    }
}

/// Write-once snapshot of one consignment's manifest-relevant fields at
/// the moment it was placed on a challan. Later edits to the consignment
/// never change a historical manifest. `consignment_id` is NULL for
/// inward rows received ahead of a local consignment record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LrDetail {
    pub lr_detail_id: Uuid,
    pub challan_id: Uuid,
    pub company_id: Uuid,
    pub lr_no: String,
    pub consignment_id: Option<Uuid>,
    pub from_station: String,
    pub to_station: String,
    pub description: String,
    pub quantity: i32,
    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub amount: Decimal,
}

/// Aggregate totals cached on a challan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChallanTotals {
    pub total_lr: i32,
    pub total_packages: i32,
    pub total_actual_weight: Decimal,
    pub total_charge_weight: Decimal,
    pub total_amount: Decimal,
}

impl ChallanTotals {
    /// Rebuild the cached totals from LrDetail snapshots. This is the
    /// single source of the materialized values; the invariant is that
    /// re-running it over a stored challan's details reproduces the
    /// stored columns exactly.
    pub fn from_details<'a, I>(details: I) -> Self
    where
        I: IntoIterator<Item = &'a LrDetail>,
    {
        let mut totals = ChallanTotals::default();
        for detail in details {
            totals.total_lr += 1;
            totals.total_packages += detail.quantity;
            totals.total_actual_weight += detail.actual_weight;
            totals.total_charge_weight += detail.charge_weight;
            totals.total_amount += detail.amount;
        }
        totals
    }
}

/// Vehicle, driver and freight fields merged in at dispatch finalization.
#[derive(Debug, Clone)]
pub struct VehicleInfo {
    pub vehicle_no: String,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub freight_terms: Option<String>,
}
