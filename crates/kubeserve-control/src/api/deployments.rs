//! Deployment management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ControlError;
use crate::store::DeploymentFilter;
use crate::types::{DeploymentId, DeploymentRecord, Phase, VersionId};

use super::AppState;

/// Request to deploy a model version.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Desired replica count.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

const fn default_replicas() -> u32 {
    1
}

/// Query parameters for listing deployments.
#[derive(Debug, Default, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Filter by model version.
    pub version_id: Option<i64>,
    /// Filter by phase (`provisioning` or `live`).
    pub phase: Option<String>,
    /// Only deployments created before this instant (RFC 3339).
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

/// Response for a deployment.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeploymentResponse {
    /// Deployment ID.
    pub id: String,
    /// Deployed model version.
    pub version_id: i64,
    /// Release name on the orchestrator.
    pub release_name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// Replica count.
    pub replicas: u32,
    /// Public URL, present once live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Current phase.
    pub phase: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
    /// Whether retrying the same request can succeed.
    pub retryable: bool,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Deploy a model version.
pub async fn create_deployment(
    State(state): State<AppState>,
    Path(version_id): Path<i64>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResponse>), ApiError> {
    info!(
        version_id,
        replicas = request.replicas,
        "creating deployment via API"
    );

    let record = state
        .manager
        .deploy(VersionId::new(version_id), request.replicas)
        .await
        .map_err(|e| error_response(&e))?;

    info!(deployment_id = %record.id, url = ?record.url, "deployment created");
    Ok((StatusCode::CREATED, Json(record_to_response(record))))
}

/// List the deployments of one model version.
pub async fn list_version_deployments(
    State(state): State<AppState>,
    Path(version_id): Path<i64>,
) -> Result<Json<Vec<DeploymentResponse>>, ApiError> {
    let filter = DeploymentFilter::new().with_version(VersionId::new(version_id));
    let records = state
        .manager
        .list(&filter)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(records.into_iter().map(record_to_response).collect()))
}

/// Get a deployment by ID.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let record = state
        .manager
        .get(&DeploymentId::new(id))
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(record_to_response(record)))
}

/// List deployments with optional filters.
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<Vec<DeploymentResponse>>, ApiError> {
    let mut filter = DeploymentFilter::new();

    if let Some(version_id) = query.version_id {
        filter = filter.with_version(VersionId::new(version_id));
    }
    if let Some(phase) = query.phase {
        let phase: Phase = phase.parse().map_err(|message| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: message,
                    code: "invalid_phase".to_owned(),
                    retryable: false,
                }),
            )
        })?;
        filter = filter.with_phase(phase);
    }
    if let Some(cutoff) = query.created_before {
        filter = filter.created_before(cutoff);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(offset) = query.offset {
        filter = filter.with_offset(offset);
    }

    let records = state
        .manager
        .list(&filter)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(records.into_iter().map(record_to_response).collect()))
}

/// Delete a deployment.
pub async fn delete_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!(deployment_id = %id, "deleting deployment via API");

    state
        .manager
        .delete(&DeploymentId::new(id.as_str()))
        .await
        .map_err(|e| error_response(&e))?;

    info!(deployment_id = %id, "deployment deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn record_to_response(record: DeploymentRecord) -> DeploymentResponse {
    let phase = record.phase();
    DeploymentResponse {
        id: record.id.to_string(),
        version_id: record.version_id.get(),
        release_name: record.release_name.to_string(),
        namespace: record.namespace,
        replicas: record.replicas.get(),
        url: record.url,
        phase: phase.as_str().to_owned(),
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

pub(super) fn error_response(error: &ControlError) -> ApiError {
    (
        error_to_status(error),
        Json(ErrorResponse {
            error: error.to_string(),
            code: error.code().to_owned(),
            retryable: error.is_retryable(),
        }),
    )
}

fn error_to_status(error: &ControlError) -> StatusCode {
    if error.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match error {
        ControlError::VersionNotFound(_) | ControlError::DeploymentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ControlError::VersionNotReady { .. } => StatusCode::CONFLICT,
        ControlError::MalformedReference(_) => StatusCode::BAD_REQUEST,
        ControlError::InvalidReplicaCount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::InstallFailed { .. } | ControlError::ExposeFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::api::tests::make_app_state;
    use crate::error::ExternalError;
    use crate::registry::{ModelVersion, VersionState};
    use crate::types::TenantId;

    fn add_version(registry: &crate::registry::MemoryRegistry, id: i64, state: VersionState) {
        registry
            .insert(ModelVersion {
                id: VersionId::new(id),
                owner: TenantId::new(7),
                state,
                store_reference: "s3://models/7/model.pkl".to_owned(),
            })
            .unwrap();
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_deployment(version_id: i64, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/versions/{version_id}/deployments"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    #[rstest]
    #[case::version_not_found(ControlError::VersionNotFound(VersionId::new(1)), StatusCode::NOT_FOUND)]
    #[case::deployment_not_found(ControlError::DeploymentNotFound("x".into()), StatusCode::NOT_FOUND)]
    #[case::not_ready(
        ControlError::VersionNotReady { version: VersionId::new(1), state: VersionState::Building },
        StatusCode::CONFLICT
    )]
    #[case::malformed(ControlError::MalformedReference("nokey".into()), StatusCode::BAD_REQUEST)]
    #[case::replicas(
        ControlError::InvalidReplicaCount { requested: 0, max: 10 },
        StatusCode::UNPROCESSABLE_ENTITY
    )]
    #[case::install(
        ControlError::install_failed(&ExternalError::failed("install", "boom")),
        StatusCode::BAD_GATEWAY
    )]
    #[case::install_timeout(
        ControlError::install_failed(&ExternalError::Timeout { operation: "install", limit: Duration::from_secs(1) }),
        StatusCode::GATEWAY_TIMEOUT
    )]
    #[case::internal(ControlError::internal("lock poisoned"), StatusCode::INTERNAL_SERVER_ERROR)]
    fn errors_map_to_status(#[case] error: ControlError, #[case] expected: StatusCode) {
        assert_eq!(error_to_status(&error), expected);
    }

    #[tokio::test]
    async fn create_deployment_returns_live_record() {
        let test = make_app_state();
        add_version(&test.registry, 1, VersionState::Ready);
        let app = router(test.state);

        let response = app
            .oneshot(post_deployment(1, r#"{"replicas": 2}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body: DeploymentResponse = json_body(response).await;
        assert_eq!(body.version_id, 1);
        assert_eq!(body.replicas, 2);
        assert_eq!(body.namespace, "user-7");
        assert_eq!(body.phase, "live");
        assert!(body.url.unwrap().ends_with(&body.release_name));
    }

    #[tokio::test]
    async fn create_deployment_defaults_to_one_replica() {
        let test = make_app_state();
        add_version(&test.registry, 1, VersionState::Ready);
        let app = router(test.state);

        let response = app.oneshot(post_deployment(1, "{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body: DeploymentResponse = json_body(response).await;
        assert_eq!(body.replicas, 1);
    }

    #[tokio::test]
    async fn create_deployment_for_unready_version_conflicts() {
        let test = make_app_state();
        add_version(&test.registry, 1, VersionState::Building);
        let app = router(test.state);

        let response = app.oneshot(post_deployment(1, "{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: ErrorResponse = json_body(response).await;
        assert_eq!(body.code, "version_not_ready");
        assert!(!body.retryable);
        assert_eq!(test.store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn create_deployment_install_failure_is_bad_gateway() {
        let test = make_app_state();
        add_version(&test.registry, 1, VersionState::Ready);
        test.orchestrator
            .fail_installs(Some(ExternalError::failed("install", "chart not found")));
        let app = router(test.state);

        let response = app.oneshot(post_deployment(1, "{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: ErrorResponse = json_body(response).await;
        assert_eq!(body.code, "install_failed");
        assert!(body.retryable);
        assert_eq!(test.store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn list_deployments_empty() {
        let app = router(make_app_state().state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/deployments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Vec<DeploymentResponse> = json_body(response).await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn list_deployments_rejects_unknown_phase() {
        let app = router(make_app_state().state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/deployments?phase=superseded")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_version_deployments_filters_by_version() {
        let test = make_app_state();
        add_version(&test.registry, 1, VersionState::Ready);
        add_version(&test.registry, 2, VersionState::Ready);
        test.state.manager.deploy(VersionId::new(1), 1).await.unwrap();
        test.state.manager.deploy(VersionId::new(2), 1).await.unwrap();
        let app = router(test.state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/versions/2/deployments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Vec<DeploymentResponse> = json_body(response).await;
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].version_id, 2);
    }

    #[tokio::test]
    async fn get_deployment_not_found() {
        let app = router(make_app_state().state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/deployments/nonexistent-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_deployment_removes_row() {
        let test = make_app_state();
        add_version(&test.registry, 1, VersionState::Ready);
        let record = test.state.manager.deploy(VersionId::new(1), 1).await.unwrap();
        let app = router(test.state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/deployments/{}", record.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(test.store.len().unwrap(), 0);
        assert!(!test.orchestrator.contains(&record.release_name, "user-7"));
    }

    #[tokio::test]
    async fn delete_deployment_not_found() {
        let app = router(make_app_state().state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/deployments/nonexistent-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
