//! Delivery reconciliation rules.
//!
//! The allocation is closed: every line item must be fully accounted for
//! as delivered plus returned, with nothing left open. The consignment
//! status is then derived from the per-line outcome, never set directly.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::consignment::{ConsignmentStatus, LineItem};

/// Per-line allocation supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryAllocation {
    pub line_item_id: Uuid,
    pub delivered_qty: i32,
    pub return_qty: i32,
}

/// Additional charges recorded with the delivery memo.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryCharges {
    pub unloading_charge: Option<Decimal>,
    pub other_charge: Option<Decimal>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationProblem {
    #[error("line item {line_item_id} has no allocation")]
    MissingLine { line_item_id: Uuid },

    #[error("allocation references unknown line item {line_item_id}")]
    UnknownLine { line_item_id: Uuid },

    #[error("line item {line_item_id} allocated more than once")]
    DuplicateLine { line_item_id: Uuid },

    #[error("line item {line_item_id} has a negative quantity")]
    NegativeQuantity { line_item_id: Uuid },

    #[error(
        "line item {line_item_id}: delivered {delivered} + returned {returned} != original {original}"
    )]
    NotClosed {
        line_item_id: Uuid,
        delivered: i32,
        returned: i32,
        original: i32,
    },

    #[error("received_by and delivery date are required when any quantity is delivered")]
    MissingReceiver,
}

/// Result of a validated allocation: the derived consignment status plus
/// the per-line quantities to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: ConsignmentStatus,
    pub lines: Vec<DeliveryAllocation>,
}

/// Validate a closed allocation over the consignment's line items and
/// derive the resulting status.
///
/// Every line must appear exactly once with non-negative quantities that
/// sum to the original quantity. All returns zero gives `Delivered`; any
/// positive return, including a wholesale return, gives
/// `PartiallyDelivered` (the documented conflation - the history entry
/// carries the split).
pub fn reconcile_delivery(
    line_items: &[LineItem],
    allocations: &[DeliveryAllocation],
    received_by: Option<&str>,
) -> Result<DeliveryOutcome, AllocationProblem> {
    let mut remaining: std::collections::HashMap<Uuid, i32> = line_items
        .iter()
        .map(|li| (li.line_item_id, li.quantity))
        .collect();

    let mut seen = std::collections::HashSet::with_capacity(allocations.len());
    let mut any_delivered = false;
    let mut any_returned = false;

    for alloc in allocations {
        if !seen.insert(alloc.line_item_id) {
            return Err(AllocationProblem::DuplicateLine {
                line_item_id: alloc.line_item_id,
            });
        }
        let original = remaining.remove(&alloc.line_item_id).ok_or(
            AllocationProblem::UnknownLine {
                line_item_id: alloc.line_item_id,
            },
        )?;
        if alloc.delivered_qty < 0 || alloc.return_qty < 0 {
            return Err(AllocationProblem::NegativeQuantity {
                line_item_id: alloc.line_item_id,
            });
        }
        if alloc.delivered_qty + alloc.return_qty != original {
            return Err(AllocationProblem::NotClosed {
                line_item_id: alloc.line_item_id,
                delivered: alloc.delivered_qty,
                returned: alloc.return_qty,
                original,
            });
        }
        any_delivered |= alloc.delivered_qty > 0;
        any_returned |= alloc.return_qty > 0;
    }

    if let Some((&line_item_id, _)) = remaining.iter().next() {
        return Err(AllocationProblem::MissingLine { line_item_id });
    }

    if any_delivered && received_by.map_or(true, |r| r.trim().is_empty()) {
        return Err(AllocationProblem::MissingReceiver);
    }

    let status = if any_returned {
        ConsignmentStatus::PartiallyDelivered
    } else {
        ConsignmentStatus::Delivered
    };

    Ok(DeliveryOutcome {
        status,
        lines: allocations.to_vec(),
    })
}

/// Build the quick-path allocation set: every line fully delivered, no
/// returns. Shares the guarded path above.
pub fn full_delivery_allocations(line_items: &[LineItem]) -> Vec<DeliveryAllocation> {
    line_items
        .iter()
        .map(|li| DeliveryAllocation {
            line_item_id: li.line_item_id,
            delivered_qty: li.quantity,
            return_qty: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn line(quantity: i32) -> LineItem {
        LineItem {
            line_item_id: Uuid::new_v4(),
            consignment_id: Uuid::new_v4(),
            line_no: 1,
            description: "Cartons".into(),
            quantity,
            actual_weight: Decimal::new(100, 0),
            charge_weight: Decimal::new(100, 0),
            delivered_qty: None,
            return_qty: None,
        }
    }

    #[test]
    fn full_delivery_derives_delivered() {
        let items = vec![line(10)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 10,
            return_qty: 0,
        }];
        let outcome = reconcile_delivery(&items, &allocs, Some("R. Sharma")).unwrap();
        assert_eq!(outcome.status, ConsignmentStatus::Delivered);
    }

    #[test]
    fn mixed_delivery_derives_partially_delivered() {
        let items = vec![line(10)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 6,
            return_qty: 4,
        }];
        let outcome = reconcile_delivery(&items, &allocs, Some("R. Sharma")).unwrap();
        assert_eq!(outcome.status, ConsignmentStatus::PartiallyDelivered);
    }

    #[test]
    fn wholesale_return_is_partially_delivered() {
        // Documented conflation: a 100% return still lands on
        // partially_delivered, and needs no receiver.
        let items = vec![line(10)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 0,
            return_qty: 10,
        }];
        let outcome = reconcile_delivery(&items, &allocs, None).unwrap();
        assert_eq!(outcome.status, ConsignmentStatus::PartiallyDelivered);
    }

    #[test]
    fn open_allocation_is_rejected() {
        let items = vec![line(10)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 6,
            return_qty: 3,
        }];
        let err = reconcile_delivery(&items, &allocs, Some("R. Sharma")).unwrap_err();
        assert!(matches!(err, AllocationProblem::NotClosed { original: 10, .. }));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let items = vec![line(10)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 12,
            return_qty: -2,
        }];
        let err = reconcile_delivery(&items, &allocs, Some("R. Sharma")).unwrap_err();
        assert!(matches!(err, AllocationProblem::NegativeQuantity { .. }));
    }

    #[test]
    fn every_line_must_be_covered() {
        let items = vec![line(10), line(4)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 10,
            return_qty: 0,
        }];
        let err = reconcile_delivery(&items, &allocs, Some("R. Sharma")).unwrap_err();
        assert_eq!(
            err,
            AllocationProblem::MissingLine {
                line_item_id: items[1].line_item_id
            }
        );
    }

    #[test]
    fn duplicate_line_allocation_is_rejected() {
        let items = vec![line(10)];
        let alloc = DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 10,
            return_qty: 0,
        };
        let err = reconcile_delivery(&items, &[alloc, alloc], Some("R. Sharma")).unwrap_err();
        assert!(matches!(err, AllocationProblem::DuplicateLine { .. }));
    }

    #[test]
    fn delivery_requires_receiver() {
        let items = vec![line(10)];
        let allocs = vec![DeliveryAllocation {
            line_item_id: items[0].line_item_id,
            delivered_qty: 10,
            return_qty: 0,
        }];
        assert_eq!(
            reconcile_delivery(&items, &allocs, None).unwrap_err(),
            AllocationProblem::MissingReceiver
        );
        assert_eq!(
            reconcile_delivery(&items, &allocs, Some("  ")).unwrap_err(),
            AllocationProblem::MissingReceiver
        );
    }

    #[test]
    fn quick_path_builds_closed_full_delivery() {
        let items = vec![line(10), line(4)];
        let allocs = full_delivery_allocations(&items);
        let outcome = reconcile_delivery(&items, &allocs, Some("R. Sharma")).unwrap();
        assert_eq!(outcome.status, ConsignmentStatus::Delivered);
        assert!(outcome.lines.iter().all(|l| l.return_qty == 0));
        assert_eq!(
            outcome.lines.iter().map(|l| l.delivered_qty).sum::<i32>(),
            14
        );
    }
}
