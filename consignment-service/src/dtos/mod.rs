use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    Challan, ChallanStatus, ChallanType, Consignment, ConsignmentSource, CreateConsignment,
    CreateLineItem, DeliveryAllocation, FreightType, LineItem, LrDetail, VehicleInfo,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateConsignmentRequest {
    #[validate(length(min = 1, max = 32, message = "LR number must be 1-32 characters"))]
    pub lr_no: Option<String>,

    #[validate(length(min = 1, message = "Origin station is required"))]
    pub origin_station: String,

    #[validate(length(min = 1, message = "Destination station is required"))]
    pub destination_station: String,

    #[validate(length(min = 1, message = "Sender name is required"))]
    pub sender_name: String,

    #[validate(length(min = 1, message = "Receiver name is required"))]
    pub receiver_name: String,

    pub freight_type: FreightType,
    pub payment_mode: Option<String>,

    /// `regular` when omitted. `inward` records a receiving-side booking
    /// against a synthesized stock row and must carry that row's `lr_no`.
    #[serde(default)]
    pub source: Option<ConsignmentSource>,

    #[validate(length(min = 1, message = "At least one line item is required"), nested)]
    pub line_items: Vec<LineItemRequest>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,

    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,

    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub amount: Decimal,
}

impl CreateConsignmentRequest {
    pub fn into_input(self, company_id: Uuid) -> CreateConsignment {
        CreateConsignment {
            company_id,
            lr_no: self.lr_no,
            origin_station: self.origin_station,
            destination_station: self.destination_station,
            sender_name: self.sender_name,
            receiver_name: self.receiver_name,
            freight_type: self.freight_type,
            payment_mode: self.payment_mode,
            source: self.source.unwrap_or(ConsignmentSource::Regular),
            line_items: self
                .line_items
                .into_iter()
                .map(|li| CreateLineItem {
                    description: li.description,
                    quantity: li.quantity,
                    actual_weight: li.actual_weight,
                    charge_weight: li.charge_weight,
                    amount: li.amount,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConsignmentResponse {
    #[serde(flatten)]
    pub consignment: Consignment,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLoadingChallanRequest {
    #[validate(length(min = 1, message = "From station is required"))]
    pub from_station: String,

    #[validate(length(min = 1, message = "To station is required"))]
    pub to_station: String,

    #[validate(length(min = 1, message = "Select at least one consignment"))]
    pub consignment_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FinalizeChallanRequest {
    #[validate(length(min = 1, message = "Vehicle number is required"))]
    pub vehicle_no: String,

    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub freight_terms: Option<String>,
}

impl FinalizeChallanRequest {
    pub fn into_vehicle(self) -> VehicleInfo {
        VehicleInfo {
            vehicle_no: self.vehicle_no,
            driver_name: self.driver_name,
            driver_phone: self.driver_phone,
            freight_terms: self.freight_terms,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InwardCandidateRequest {
    #[validate(length(min = 1, message = "LR number is required"))]
    pub lr_no: String,

    /// LR numbers already collected in the caller's working set.
    #[serde(default)]
    pub working_set: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveInwardChallanRequest {
    /// Present when editing an already-saved inward challan in place.
    pub challan_id: Option<Uuid>,

    #[validate(length(min = 1, message = "From station is required"))]
    pub from_station: String,

    #[validate(length(min = 1, message = "To station is required"))]
    pub to_station: String,

    pub vehicle_no: Option<String>,
    pub driver_name: Option<String>,

    /// Working-set LRs with local consignment records.
    #[serde(default)]
    pub lr_nos: Vec<String>,

    /// Manifest rows for LRs booked at another hub, carried without a
    /// local record. A non-empty challan needs at least one of `lr_nos`
    /// or `external_lrs`.
    #[serde(default)]
    #[validate(nested)]
    pub external_lrs: Vec<ExternalLrRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExternalLrRequest {
    #[validate(length(min = 1, max = 32, message = "LR number must be 1-32 characters"))]
    pub lr_no: String,

    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,

    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,

    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ChallanResponse {
    #[serde(flatten)]
    pub challan: Challan,
    pub lr_details: Vec<LrDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ListChallansQuery {
    pub challan_type: Option<ChallanType>,
    pub status: Option<ChallanStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmDeliveryRequest {
    #[validate(length(min = 1, message = "At least one allocation is required"))]
    pub allocations: Vec<AllocationRequest>,

    pub received_by: Option<String>,
    pub delivered_date: Option<NaiveDate>,
    pub unloading_charge: Option<Decimal>,
    pub other_charge: Option<Decimal>,
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub line_item_id: Uuid,
    pub delivered_qty: i32,
    pub return_qty: i32,
}

impl From<AllocationRequest> for DeliveryAllocation {
    fn from(req: AllocationRequest) -> Self {
        DeliveryAllocation {
            line_item_id: req.line_item_id,
            delivered_qty: req.delivered_qty,
            return_qty: req.return_qty,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct MarkDeliveredRequest {
    #[validate(length(min = 1, message = "Receiver name is required"))]
    pub received_by: String,

    pub delivered_date: NaiveDate,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}
