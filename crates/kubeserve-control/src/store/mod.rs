//! Deployment record storage.
//!
//! The store is the only durable record of which deployments should exist.
//! Rows are written exclusively by the deployment manager; a row exists
//! while provisioning is in flight or once its release is live. PostgreSQL
//! backs production deployments and an in-memory store backs tests.

mod lock;
mod memory;
mod postgres;

pub use lock::{RowGuard, RowLocks};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ControlResult;
use crate::types::{DeploymentId, DeploymentRecord, Phase, VersionId};

/// Filter criteria for listing deployments.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Filter by version.
    pub version_id: Option<VersionId>,
    /// Filter by phase.
    pub phase: Option<Phase>,
    /// Only rows created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl DeploymentFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version_id: None,
            phase: None,
            created_before: None,
            limit: None,
            offset: None,
        }
    }

    /// Filter by version.
    #[must_use]
    pub const fn with_version(mut self, version_id: VersionId) -> Self {
        self.version_id = Some(version_id);
        self
    }

    /// Filter by phase.
    #[must_use]
    pub const fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Only rows created before `cutoff`.
    #[must_use]
    pub const fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether a record satisfies the filter, ignoring pagination.
    #[must_use]
    pub fn matches(&self, record: &DeploymentRecord) -> bool {
        self.version_id.map_or(true, |v| record.version_id == v)
            && self.phase.map_or(true, |p| record.phase() == p)
            && self.created_before.map_or(true, |c| record.created_at < c)
    }
}

/// Backend for storing deployment records.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment record.
    ///
    /// Fails with [`ControlError::DuplicateRelease`] if another row already
    /// uses the release name.
    ///
    /// [`ControlError::DuplicateRelease`]: crate::error::ControlError::DuplicateRelease
    async fn insert(&self, record: &DeploymentRecord) -> ControlResult<()>;

    /// Get a deployment by ID.
    ///
    /// Returns `None` if the deployment does not exist.
    async fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentRecord>>;

    /// Record the public URL, marking the deployment live.
    ///
    /// Also updates the `updated_at` timestamp.
    async fn mark_live(&self, id: &DeploymentId, url: &str) -> ControlResult<()>;

    /// List deployments matching the filter criteria.
    ///
    /// Results are ordered by `created_at` descending (newest first).
    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>>;

    /// Delete a deployment record.
    ///
    /// Fails with `DeploymentNotFound` if no such row exists.
    async fn delete(&self, id: &DeploymentId) -> ControlResult<()>;

    /// Wait for exclusive access to a row.
    ///
    /// The row does not need to exist yet; the guard serialises every
    /// workflow touching that id until it is dropped.
    async fn lock(&self, id: &DeploymentId) -> RowGuard;

    /// Check the backend is reachable.
    async fn ping(&self) -> ControlResult<()> {
        Ok(())
    }
}
