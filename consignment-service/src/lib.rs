//! Consignment Service - consignment lifecycle, challan workflows, and
//! hub stock tracking.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use services::Database;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
}
