//! Recovery of deployments stuck in provisioning.
//!
//! A row that is still provisioning long after its workflow should have
//! resolved means the process died mid-workflow. Whether the release exists
//! is unknown until the orchestrator is asked; the sweep resolves each such
//! row to either rolled back or live.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ControlError, ControlResult};
use crate::state::AnyDeployment;
use crate::store::DeploymentFilter;
use crate::types::{DeploymentId, Phase};

use super::DeploymentManager;

/// Counts from one reconcile sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Stale provisioning rows found.
    pub examined: usize,
    /// Rows whose release was absent and that were deleted.
    pub rolled_back: usize,
    /// Rows whose release existed and that were exposed and marked live.
    pub recovered: usize,
    /// Rows left for a later sweep.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    RolledBack,
    Recovered,
    Skipped,
    // Resolved by another workflow while waiting for the lock.
    AlreadyResolved,
}

impl DeploymentManager {
    /// Resolve every provisioning row older than `grace`.
    ///
    /// Idempotent, and safe to run concurrently with requests: each row is
    /// handled under the same row lock as deploy and delete.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, grace: Duration) -> ControlResult<ReconcileReport> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| ControlError::Config(format!("invalid reconcile grace period: {e}")))?;
        let cutoff = Utc::now() - grace;

        let stale = self
            .store
            .list(
                &DeploymentFilter::new()
                    .with_phase(Phase::Provisioning)
                    .created_before(cutoff),
            )
            .await?;

        let mut report = ReconcileReport::default();
        for record in stale {
            report.examined += 1;
            let outcome = match self.reconcile_one(&record.id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        deployment_id = %record.id,
                        release = %record.release_name,
                        namespace = %record.namespace,
                        error = %e,
                        "reconcile failed, leaving row for next sweep"
                    );
                    Outcome::Skipped
                }
            };
            match outcome {
                Outcome::RolledBack => report.rolled_back += 1,
                Outcome::Recovered => report.recovered += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::AlreadyResolved => {}
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                rolled_back = report.rolled_back,
                recovered = report.recovered,
                skipped = report.skipped,
                "reconcile sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `cancel` fires.
    ///
    /// The first sweep runs immediately. Failures are logged and retried on
    /// the next tick.
    pub async fn reconcile_every(
        &self,
        interval: Duration,
        grace: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.reconcile(grace).await {
                warn!(error = %e, "reconcile sweep failed");
            }
        }
    }

    async fn reconcile_one(&self, id: &DeploymentId) -> ControlResult<Outcome> {
        let _guard = self.store.lock(id).await;

        let Some(record) = self.store.get(id).await? else {
            return Ok(Outcome::AlreadyResolved);
        };
        let Ok(provisioning) = AnyDeployment::from_record(record).try_into_provisioning() else {
            return Ok(Outcome::AlreadyResolved);
        };

        let release = provisioning.release();
        let namespace = provisioning.namespace();

        let state = match self.orchestrator.status(release, namespace).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    release = %release,
                    namespace,
                    error = %e,
                    "release status unavailable, skipping"
                );
                return Ok(Outcome::Skipped);
            }
        };

        if !state.exists {
            if let Err(e) = self.registrar.unexpose(namespace, release).await {
                warn!(
                    release = %release,
                    namespace,
                    error = %e,
                    "failed to remove route of absent release"
                );
            }
            let rolled_back = provisioning.roll_back();
            self.store.delete(rolled_back.id()).await?;
            info!(
                deployment_id = %rolled_back.id(),
                release = %rolled_back.release(),
                "stale deployment rolled back"
            );
            return Ok(Outcome::RolledBack);
        }

        let url = match self.expose(provisioning.record()).await {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    release = %release,
                    namespace,
                    error = %e,
                    "failed to expose recovered release, skipping"
                );
                return Ok(Outcome::Skipped);
            }
        };

        self.store.mark_live(provisioning.id(), &url).await?;
        let live = provisioning.go_live(url);
        info!(
            deployment_id = %live.id(),
            release = %live.release(),
            healthy = state.healthy,
            url = ?live.record().url,
            "stale deployment recovered"
        );
        Ok(Outcome::Recovered)
    }
}
