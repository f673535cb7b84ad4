//! KubeServe Deployment Orchestration
//!
//! This crate turns a ready model version into a running, publicly routed
//! inference endpoint on a Kubernetes cluster, and tears it down again.
//!
//! # Architecture
//!
//! The control service is responsible for:
//!
//! - **Deployment orchestration**: installing a release of the serving chart
//!   into the tenant's namespace, exposing it, and recording the public URL
//! - **Compensation**: unwinding a half-provisioned release whenever any step
//!   fails, so no record outlives the workload it describes
//! - **Reconciliation**: resolving records left in provisioning by a crash
//! - **API surface**: HTTP endpoints for deploy, delete and status queries
//!
//! # State Machine
//!
//! Deployments follow a state machine enforced at compile time using the
//! typestate pattern:
//!
//! ```text
//! Provisioning ──▶ Live ──▶ TearingDown ──▶ Gone
//!      │                         ▲
//!      ├─────────────────────────┘  (abandon)
//!      ▼
//!  RolledBack
//! ```
//!
//! Only `Provisioning` and `Live` are ever persisted. A deployment is live
//! exactly when its record carries a URL.
//!
//! # Example
//!
//! ```
//! use kubeserve_control::{Deployment, DeploymentRecord, Provisioning, Replicas, VersionId};
//!
//! let record = DeploymentRecord::new(VersionId::new(42), "user-7", Replicas::new(2, 10).unwrap());
//! let provisioning = Deployment::<Provisioning>::begin(record);
//!
//! let live = provisioning.go_live("http://localhost/api/v1/predict/x".to_owned());
//! let gone = live.tear_down().finish();
//! assert_eq!(gone.state_name(), "gone");
//!
//! // This would not compile:
//! // let invalid = gone.go_live(url);
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod command;
pub mod config;
pub mod deployment;
pub mod error;
pub mod locator;
pub mod orchestration;
pub mod registrar;
pub mod registry;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::ControlConfig;
pub use deployment::{DeploymentManager, ManagerSettings, ReconcileReport};
pub use error::{ControlError, ControlResult, ExternalError};
pub use locator::ArtifactLocation;
pub use orchestration::{MockOrchestrator, OrchestrationClient};
pub use registrar::{EndpointRegistrar, MockRegistrar};
pub use registry::{MemoryRegistry, ModelVersion, VersionRegistry, VersionState};
pub use service::ControlService;
pub use state::{
    AnyDeployment, Deployment, DeploymentState, Gone, Live, Provisioning, RolledBack, TearingDown,
};
pub use store::{DeploymentFilter, DeploymentStore, MemoryStore, PostgresStore};
pub use types::{DeploymentId, DeploymentRecord, Phase, ReleaseName, Replicas, TenantId, VersionId};
