//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Deployment management (create, query, list, delete)
//! - Reconciliation of stuck deployments
//! - Health and readiness checks

mod deployments;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::deployment::{DeploymentManager, ReconcileReport};

pub use deployments::{
    CreateDeploymentRequest, DeploymentResponse, ErrorResponse, ListDeploymentsQuery,
};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Deployment manager driving every workflow.
    pub manager: Arc<DeploymentManager>,
    /// Age after which a provisioning row is considered stuck.
    pub reconcile_grace: Duration,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Deployment management
        .route(
            "/versions/{version_id}/deployments",
            post(deployments::create_deployment).get(deployments::list_version_deployments),
        )
        .route("/deployments", get(deployments::list_deployments))
        .route(
            "/deployments/{id}",
            get(deployments::get_deployment).delete(deployments::delete_deployment),
        )
        // Recovery
        .route("/reconcile", post(reconcile))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.manager.ready().await {
        Ok(()) => (StatusCode::OK, Json(ReadyResponse { ready: true })),
        Err(e) => {
            warn!(error = %e, "record store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse { ready: false }),
            )
        }
    }
}

/// Run one reconciliation sweep.
async fn reconcile(
    State(state): State<AppState>,
) -> Result<Json<ReconcileReport>, (StatusCode, Json<ErrorResponse>)> {
    let report = state
        .manager
        .reconcile(state.reconcile_grace)
        .await
        .map_err(|e| deployments::error_response(&e))?;

    info!(
        examined = report.examined,
        rolled_back = report.rolled_back,
        recovered = report.recovered,
        skipped = report.skipped,
        "reconcile requested via API"
    );
    Ok(Json(report))
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
}
