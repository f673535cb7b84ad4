//! Orchestrator whose installs block until a test lets them through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kubeserve_control::orchestration::{
    InstallRequest, OrchestrationClient, ReleaseState, UninstallOutcome,
};
use kubeserve_control::{ExternalError, MockOrchestrator, ReleaseName};
use tokio::sync::Notify;

/// Wraps a [`MockOrchestrator`]; every install parks until [`open`] is called.
///
/// [`open`]: GatedOrchestrator::open
pub struct GatedOrchestrator {
    inner: Arc<MockOrchestrator>,
    started: Notify,
    release: Notify,
}

impl GatedOrchestrator {
    pub fn new(inner: Arc<MockOrchestrator>) -> Self {
        Self {
            inner,
            started: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Resolves once an install has reached the gate.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let one parked (or the next) install through.
    pub fn open(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl OrchestrationClient for GatedOrchestrator {
    async fn install(&self, request: &InstallRequest) -> Result<(), ExternalError> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.install(request).await
    }

    async fn uninstall(
        &self,
        release: &ReleaseName,
        namespace: &str,
        timeout: Duration,
    ) -> Result<UninstallOutcome, ExternalError> {
        self.inner.uninstall(release, namespace, timeout).await
    }

    async fn status(
        &self,
        release: &ReleaseName,
        namespace: &str,
    ) -> Result<ReleaseState, ExternalError> {
        self.inner.status(release, namespace).await
    }
}
