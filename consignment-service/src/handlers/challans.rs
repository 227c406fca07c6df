//! Challan handlers: the two manifest workflows.
//!
//! Dispatch challans are created pending and finalized once; inward
//! challans are saved directly finalized and may be edited in place.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        ChallanResponse, CreateLoadingChallanRequest, FinalizeChallanRequest,
        InwardCandidateRequest, ListChallansQuery, SaveInwardChallanRequest,
    },
    middleware::CompanyContext,
    models::{Challan, Consignment},
    services::{ExternalLr, InwardChallanDraft},
    AppState,
};

/// Create a pending loading challan from in-stock consignments.
pub async fn create_loading_challan(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<CreateLoadingChallanRequest>,
) -> Result<(StatusCode, Json<ChallanResponse>), AppError> {
    payload.validate()?;

    let (challan, lr_details) = state
        .database
        .create_loading_challan(
            company.company_id,
            &payload.from_station,
            &payload.to_station,
            &payload.consignment_ids,
            company.actor(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ChallanResponse {
            challan,
            lr_details,
        }),
    ))
}

/// Finalize a pending dispatch challan with vehicle details.
pub async fn finalize_challan(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(challan_id): Path<Uuid>,
    Json(payload): Json<FinalizeChallanRequest>,
) -> Result<Json<Challan>, AppError> {
    payload.validate()?;

    let vehicle = payload.into_vehicle();
    let challan = state
        .database
        .finalize_challan(company.company_id, challan_id, &vehicle, company.actor())
        .await?;

    Ok(Json(challan))
}

/// Validate one LR against the caller's inward working set.
pub async fn inward_candidate(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<InwardCandidateRequest>,
) -> Result<Json<Consignment>, AppError> {
    payload.validate()?;

    let consignment = state
        .database
        .inward_candidate(company.company_id, &payload.lr_no, &payload.working_set)
        .await?;

    Ok(Json(consignment))
}

/// Save an inward challan (new, or edit-in-place when `challan_id` is set).
pub async fn save_inward_challan(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<SaveInwardChallanRequest>,
) -> Result<(StatusCode, Json<ChallanResponse>), AppError> {
    payload.validate()?;

    let editing = payload.challan_id.is_some();
    let draft = InwardChallanDraft {
        challan_id: payload.challan_id,
        from_station: payload.from_station,
        to_station: payload.to_station,
        vehicle_no: payload.vehicle_no,
        driver_name: payload.driver_name,
        externals: payload
            .external_lrs
            .into_iter()
            .map(|e| ExternalLr {
                lr_no: e.lr_no,
                description: e.description,
                quantity: e.quantity,
                actual_weight: e.actual_weight,
                charge_weight: e.charge_weight,
                amount: e.amount,
            })
            .collect(),
    };

    let (challan, lr_details) = state
        .database
        .save_inward_challan(company.company_id, &draft, &payload.lr_nos, company.actor())
        .await?;

    let status = if editing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(ChallanResponse {
            challan,
            lr_details,
        }),
    ))
}

/// Get a challan with its LR-detail snapshots.
pub async fn get_challan(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(challan_id): Path<Uuid>,
) -> Result<Json<ChallanResponse>, AppError> {
    let (challan, lr_details) = state
        .database
        .get_challan(company.company_id, challan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Challan not found")))?;

    Ok(Json(ChallanResponse {
        challan,
        lr_details,
    }))
}

/// List challans, newest first, optionally filtered by type and status.
pub async fn list_challans(
    State(state): State<AppState>,
    company: CompanyContext,
    Query(query): Query<ListChallansQuery>,
) -> Result<Json<Vec<Challan>>, AppError> {
    let challans = state
        .database
        .list_challans(company.company_id, query.challan_type, query.status)
        .await?;

    Ok(Json(challans))
}
