//! Deployment orchestration and lifecycle management.
//!
//! This module drives a model version through provisioning (install, then
//! expose) to a live endpoint and back to nothing, keeping the record store
//! consistent with the orchestrator along the way.

mod manager;
mod reconcile;

pub use manager::{DeploymentManager, ManagerSettings};
pub use reconcile::ReconcileReport;
