//! Model version registry and tenant namespaces.
//!
//! The registry itself is owned by another service; this module only reads
//! it. Deployments consume two facts from it: whether a version may be
//! deployed, and which tenant owns it.

mod postgres;

pub use postgres::PostgresRegistry;

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::{TenantId, VersionId};

/// Lifecycle state of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// Uploaded, not yet picked up.
    Pending,
    /// Artifact is being built or validated.
    Building,
    /// Artifact is stored and deployable.
    Ready,
    /// Build or validation failed.
    Failed,
}

impl VersionState {
    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VersionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "building" => Ok(Self::Building),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown version state: {s}")),
        }
    }
}

/// A model version as seen by the deployment orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVersion {
    /// Version id.
    pub id: VersionId,
    /// Owning tenant.
    pub owner: TenantId,
    /// Lifecycle state.
    pub state: VersionState,
    /// Reference to the stored artifact, e.g. `s3://models/7/v1.pkl`.
    pub store_reference: String,
}

impl ModelVersion {
    /// Check the version can be deployed: ready, with a non-empty reference.
    pub fn ensure_deployable(&self) -> ControlResult<()> {
        if self.state != VersionState::Ready || self.store_reference.trim().is_empty() {
            return Err(ControlError::VersionNotReady {
                version: self.id,
                state: self.state,
            });
        }
        Ok(())
    }
}

/// Read access to model versions.
#[async_trait]
pub trait VersionRegistry: Send + Sync {
    /// Look up a version.
    ///
    /// Returns [`ControlError::VersionNotFound`] if it does not exist.
    async fn get_version(&self, id: VersionId) -> ControlResult<ModelVersion>;
}

/// Supplies the namespace a tenant's releases live in.
///
/// The namespace is assumed to exist and be isolated already.
pub trait NamespaceProvider: Send + Sync {
    /// Namespace for the given tenant.
    fn namespace_for(&self, tenant: TenantId) -> String;
}

/// Namespaces named `{prefix}{tenant}`, e.g. `user-7`.
#[derive(Debug, Clone)]
pub struct PrefixedNamespaces {
    prefix: String,
}

impl PrefixedNamespaces {
    /// Create a provider with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for PrefixedNamespaces {
    fn default() -> Self {
        Self::new("user-")
    }
}

impl NamespaceProvider for PrefixedNamespaces {
    fn namespace_for(&self, tenant: TenantId) -> String {
        format!("{}{}", self.prefix, tenant)
    }
}

/// In-memory version registry for testing and `memory://` deployments.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    versions: RwLock<HashMap<VersionId, ModelVersion>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a version.
    pub fn insert(&self, version: ModelVersion) -> ControlResult<()> {
        let mut versions = self
            .versions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        versions.insert(version.id, version);
        Ok(())
    }
}

#[async_trait]
impl VersionRegistry for MemoryRegistry {
    async fn get_version(&self, id: VersionId) -> ControlResult<ModelVersion> {
        let versions = self
            .versions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        versions
            .get(&id)
            .cloned()
            .ok_or(ControlError::VersionNotFound(id))
    }
}
