//! Current-stock view handler.

use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{middleware::CompanyContext, models::StockItem, AppState};

/// Everything physically present at this hub right now: store-backed rows
/// merged with rows synthesized from unconsumed inward manifests.
pub async fn current_stock(
    State(state): State<AppState>,
    company: CompanyContext,
) -> Result<Json<Vec<StockItem>>, AppError> {
    let stock = state.database.current_stock(company.company_id).await?;
    Ok(Json(stock))
}
