//! Domain models for consignment-service.

mod challan;
mod consignment;
mod delivery;
mod history;
mod stock;

pub use challan::{Challan, ChallanStatus, ChallanTotals, ChallanType, LrDetail, VehicleInfo};
pub use consignment::{
    Consignment, ConsignmentSource, ConsignmentStatus, CreateConsignment, CreateLineItem,
    DispatchStatus, FreightType, LineItem,
};
pub use delivery::{
    AllocationProblem, DeliveryAllocation, DeliveryCharges, DeliveryOutcome,
    full_delivery_allocations, reconcile_delivery,
};
pub use history::{HistoryAction, HistoryEntry};
pub use stock::{StockItem, merge_stock};
