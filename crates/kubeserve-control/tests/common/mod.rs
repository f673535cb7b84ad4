//! Common test utilities for control service integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod gated;
pub mod logs;

use std::sync::Arc;

use gated::GatedOrchestrator;
use kubeserve_control::orchestration::OrchestrationClient;
use kubeserve_control::registry::PrefixedNamespaces;
use kubeserve_control::{
    DeploymentManager, ManagerSettings, MemoryRegistry, MemoryStore, MockOrchestrator,
    MockRegistrar,
};

/// A deployment manager wired to in-memory collaborators.
///
/// Every collaborator is kept so tests can inject failures and inspect
/// what the manager did to it.
pub struct TestControl {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<MemoryRegistry>,
    pub orchestrator: Arc<MockOrchestrator>,
    pub registrar: Arc<MockRegistrar>,
    pub manager: DeploymentManager,
}

impl TestControl {
    /// Creates a control setup with default settings.
    pub fn new() -> Self {
        Self::with_settings(ManagerSettings::default())
    }

    /// Creates a control setup with custom manager settings.
    pub fn with_settings(settings: ManagerSettings) -> Self {
        let orchestrator = Arc::new(MockOrchestrator::new());
        Self::build(settings, orchestrator.clone(), orchestrator)
    }

    /// Creates a control setup whose installs wait at a gate.
    ///
    /// `orchestrator` still records every call that passes the gate.
    pub fn gated() -> (Self, Arc<GatedOrchestrator>) {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let gate = Arc::new(GatedOrchestrator::new(orchestrator.clone()));
        let control = Self::build(ManagerSettings::default(), orchestrator, gate.clone());
        (control, gate)
    }

    fn build(
        settings: ManagerSettings,
        orchestrator: Arc<MockOrchestrator>,
        client: Arc<dyn OrchestrationClient>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(MemoryRegistry::new());
        let registrar = Arc::new(MockRegistrar::default());

        let manager = DeploymentManager::new(
            store.clone(),
            registry.clone(),
            Arc::new(PrefixedNamespaces::default()),
            client,
            registrar.clone(),
            settings,
        );

        Self {
            store,
            registry,
            orchestrator,
            registrar,
            manager,
        }
    }

    /// Number of rows in the record store.
    pub fn row_count(&self) -> usize {
        self.store.len().unwrap()
    }
}

impl Default for TestControl {
    fn default() -> Self {
        Self::new()
    }
}
