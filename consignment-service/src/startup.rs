//! Application startup and lifecycle management.

use crate::config::ConsignmentConfig;
use crate::handlers::{challans, consignments, stock};
use crate::services::{
    metrics::{get_metrics, init_metrics},
    Database,
};
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    database: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.database.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "consignment-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "consignment-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.database.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Business API router. Every route extracts [`crate::middleware::CompanyContext`].
fn api_router() -> Router<AppState> {
    Router::new()
        .route("/consignments", post(consignments::create_consignment))
        .route("/consignments/:id", get(consignments::get_consignment))
        .route(
            "/consignments/:id/history",
            get(consignments::get_history),
        )
        .route(
            "/consignments/:id/deliver",
            post(consignments::confirm_delivery),
        )
        .route(
            "/consignments/:id/mark-delivered",
            post(consignments::mark_delivered),
        )
        .route(
            "/consignments/:id/cancel",
            post(consignments::cancel_consignment),
        )
        .route(
            "/consignments/:id/hold",
            post(consignments::hold_consignment),
        )
        .route(
            "/consignments/:id/release",
            post(consignments::release_consignment),
        )
        .route("/challans/loading", post(challans::create_loading_challan))
        .route("/challans/:id/finalize", post(challans::finalize_challan))
        .route(
            "/challans/inward/candidate",
            post(challans::inward_candidate),
        )
        .route("/challans/inward", post(challans::save_inward_challan))
        .route("/challans/:id", get(challans::get_challan))
        .route("/challans", get(challans::list_challans))
        .route("/stock", get(stock::current_stock))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ConsignmentConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: ConsignmentConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: ConsignmentConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let database = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            database.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let state = AppState {
            database: Arc::new(database),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Consignment service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn database(&self) -> &Database {
        &self.state.database
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            database: self.state.database.clone(),
        };

        let router = Router::new()
            .route("/health", get(health_check).with_state(health_state.clone()))
            .route("/ready", get(readiness_check).with_state(health_state))
            .route("/metrics", get(metrics_handler))
            .merge(api_router().with_state(self.state.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware));

        tracing::info!(
            service = "consignment-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
