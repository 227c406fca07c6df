//! Consignment handlers.
//!
//! All operations are scoped to the company from the request context.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        ConfirmDeliveryRequest, ConsignmentResponse, CreateConsignmentRequest,
        MarkDeliveredRequest, ReasonRequest,
    },
    middleware::CompanyContext,
    models::{ConsignmentSource, DeliveryAllocation, DeliveryCharges, HistoryEntry},
    services::DeliveryMeta,
    AppState,
};

/// Book a new consignment.
pub async fn create_consignment(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<CreateConsignmentRequest>,
) -> Result<(StatusCode, Json<ConsignmentResponse>), AppError> {
    payload.validate()?;

    let input = payload.into_input(company.company_id);
    // A receiving-side booking consumes a synthesized stock row, so it
    // must name that row's LR rather than draw a fresh number.
    if input.source == ConsignmentSource::Inward && input.lr_no.is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "An inward-sourced booking must carry the manifested LR number"
        )));
    }
    let (consignment, line_items) = state
        .database
        .create_consignment(&input, company.actor())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConsignmentResponse {
            consignment,
            line_items,
        }),
    ))
}

/// Get a consignment with its line items.
pub async fn get_consignment(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
) -> Result<Json<ConsignmentResponse>, AppError> {
    let (consignment, line_items) = state
        .database
        .get_consignment(company.company_id, consignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Consignment not found")))?;

    Ok(Json(ConsignmentResponse {
        consignment,
        line_items,
    }))
}

/// Full audit trail for a consignment's LR, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let (consignment, _) = state
        .database
        .get_consignment(company.company_id, consignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Consignment not found")))?;

    let entries = state
        .database
        .get_history(company.company_id, &consignment.lr_no)
        .await?;

    Ok(Json(entries))
}

/// Reconcile delivery with an explicit per-line allocation.
pub async fn confirm_delivery(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
    Json(payload): Json<ConfirmDeliveryRequest>,
) -> Result<Json<ConsignmentResponse>, AppError> {
    payload.validate()?;

    let allocations: Vec<DeliveryAllocation> = payload
        .allocations
        .into_iter()
        .map(DeliveryAllocation::from)
        .collect();
    let charges = DeliveryCharges {
        unloading_charge: payload.unloading_charge,
        other_charge: payload.other_charge,
    };
    let meta = DeliveryMeta {
        received_by: payload.received_by,
        delivered_date: payload.delivered_date,
        remarks: payload.remarks,
    };

    let (consignment, line_items) = state
        .database
        .confirm_delivery(
            company.company_id,
            consignment_id,
            &allocations,
            charges,
            &meta,
            company.actor(),
        )
        .await?;

    Ok(Json(ConsignmentResponse {
        consignment,
        line_items,
    }))
}

/// Quick path: deliver every line item in full, no returns.
pub async fn mark_delivered(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
    Json(payload): Json<MarkDeliveredRequest>,
) -> Result<Json<ConsignmentResponse>, AppError> {
    payload.validate()?;

    let meta = DeliveryMeta {
        received_by: Some(payload.received_by),
        delivered_date: Some(payload.delivered_date),
        remarks: payload.remarks,
    };

    let (consignment, line_items) = state
        .database
        .mark_delivered(company.company_id, consignment_id, &meta, company.actor())
        .await?;

    Ok(Json(ConsignmentResponse {
        consignment,
        line_items,
    }))
}

/// Cancel a consignment from any non-terminal state.
pub async fn cancel_consignment(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<crate::models::Consignment>, AppError> {
    let consignment = state
        .database
        .cancel_consignment(
            company.company_id,
            consignment_id,
            payload.reason.as_deref(),
            company.actor(),
        )
        .await?;

    Ok(Json(consignment))
}

/// Put an in-stock consignment on hold.
pub async fn hold_consignment(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<crate::models::Consignment>, AppError> {
    let consignment = state
        .database
        .hold_consignment(
            company.company_id,
            consignment_id,
            payload.reason.as_deref(),
            company.actor(),
        )
        .await?;

    Ok(Json(consignment))
}

/// Release a held consignment back into stock.
pub async fn release_consignment(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(consignment_id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<crate::models::Consignment>, AppError> {
    let consignment = state
        .database
        .release_consignment(
            company.company_id,
            consignment_id,
            payload.reason.as_deref(),
            company.actor(),
        )
        .await?;

    Ok(Json(consignment))
}
