//! Current-stock view: a derived, non-authoritative projection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::challan::LrDetail;
use super::consignment::{Consignment, ConsignmentSource};

/// One "on hand" row. Either a real consignment record or a row
/// synthesized from an unconsumed inward-challan snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItem {
    pub lr_no: String,
    /// Present only for store-backed rows.
    pub consignment_id: Option<Uuid>,
    pub status: String,
    pub origin_station: String,
    pub destination_station: String,
    pub quantity: i32,
    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub amount: Decimal,
    pub source: String,
    pub synthesized: bool,
}

impl StockItem {
    fn from_consignment(c: &Consignment, quantity: i32, actual: Decimal, charge: Decimal) -> Self {
        StockItem {
            lr_no: c.lr_no.clone(),
            consignment_id: Some(c.consignment_id),
            status: c.status.clone(),
            origin_station: c.origin_station.clone(),
            destination_station: c.destination_station.clone(),
            quantity,
            actual_weight: actual,
            charge_weight: charge,
            amount: c.total_amount,
            source: c.source.clone(),
            synthesized: false,
        }
    }

    fn from_inward_detail(d: &LrDetail) -> Self {
        StockItem {
            lr_no: d.lr_no.clone(),
            consignment_id: None,
            status: "in_stock".to_string(),
            origin_station: d.from_station.clone(),
            destination_station: d.to_station.clone(),
            quantity: d.quantity,
            actual_weight: d.actual_weight,
            charge_weight: d.charge_weight,
            amount: d.amount,
            source: ConsignmentSource::Inward.as_str().to_string(),
            synthesized: true,
        }
    }
}

/// Compose the stock view from its two sources and de-duplicate by
/// lr_no, with the explicit store record winning over a synthesized one.
/// Pure and recomputed per query; this view is never the system of
/// record for status.
pub fn merge_stock(
    store_rows: Vec<(Consignment, i32, Decimal, Decimal)>,
    inward_details: Vec<LrDetail>,
) -> Vec<StockItem> {
    let mut items: Vec<StockItem> = store_rows
        .iter()
        .map(|(c, qty, actual, charge)| StockItem::from_consignment(c, *qty, *actual, *charge))
        .collect();

    let known: std::collections::HashSet<&str> =
        items.iter().map(|i| i.lr_no.as_str()).collect();

    let mut synthesized: Vec<StockItem> = inward_details
        .iter()
        .filter(|d| !known.contains(d.lr_no.as_str()))
        .map(StockItem::from_inward_detail)
        .collect();
    // A single LR can appear on several historical inward challans; one
    // synthesized row per lr_no is enough.
    synthesized.sort_by(|a, b| a.lr_no.cmp(&b.lr_no));
    synthesized.dedup_by(|a, b| a.lr_no == b.lr_no);

    items.extend(synthesized);
    items.sort_by(|a, b| a.lr_no.cmp(&b.lr_no));
    items
}
