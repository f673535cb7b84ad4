//! Per-row mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::DeploymentId;

/// Table of per-deployment async mutexes.
///
/// Entries are created on first use and dropped again once no guard or
/// waiter references them, so the table only holds rows currently in play.
/// Exclusion is per process.
#[derive(Debug, Clone, Default)]
pub struct RowLocks {
    rows: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RowLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a row.
    pub async fn acquire(&self, id: &DeploymentId) -> RowGuard {
        let mutex = Arc::clone(&self.rows.entry(id.as_str().to_owned()).or_default());
        let guard = mutex.lock_owned().await;
        RowGuard {
            id: id.as_str().to_owned(),
            rows: Arc::clone(&self.rows),
            guard: Some(guard),
        }
    }

    /// Number of rows with a live guard or waiter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row is locked or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Exclusive access to one deployment row, released on drop.
#[derive(Debug)]
#[must_use = "the row is unlocked as soon as the guard is dropped"]
pub struct RowGuard {
    id: String,
    rows: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RowGuard {
    /// Id of the locked row.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: nobody holds or awaits the row.
        self.rows
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
