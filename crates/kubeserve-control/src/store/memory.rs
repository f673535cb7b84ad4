//! In-memory deployment store for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentId, DeploymentRecord};

use super::{DeploymentFilter, DeploymentStore, RowGuard, RowLocks};

/// In-memory deployment store.
///
/// Enforces the same uniqueness rules as the PostgreSQL store. Data is lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
    locks: RowLocks,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> ControlResult<usize> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(deployments.len())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let key = record.id.as_str().to_owned();
        if deployments.contains_key(&key) {
            return Err(ControlError::internal(format!(
                "deployment {key} already exists"
            )));
        }
        if deployments
            .values()
            .any(|r| r.release_name == record.release_name)
        {
            return Err(ControlError::DuplicateRelease(
                record.release_name.to_string(),
            ));
        }

        deployments.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(deployments.get(id.as_str()).cloned())
    }

    async fn mark_live(&self, id: &DeploymentId, url: &str) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::DeploymentNotFound(id.to_string()))?;

        record.url = Some(url.to_owned());
        record.updated_at = chrono::Utc::now();

        Ok(())
    }

    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = deployments
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        #[allow(clippy::as_conversions)]
        let offset = filter.offset.unwrap_or(0) as usize;
        let results = results.into_iter().skip(offset);

        match filter.limit {
            #[allow(clippy::as_conversions)]
            Some(limit) => Ok(results.take(limit as usize).collect()),
            None => Ok(results.collect()),
        }
    }

    async fn delete(&self, id: &DeploymentId) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if deployments.remove(id.as_str()).is_none() {
            return Err(ControlError::DeploymentNotFound(id.to_string()));
        }

        Ok(())
    }

    async fn lock(&self, id: &DeploymentId) -> RowGuard {
        self.locks.acquire(id).await
    }
}
