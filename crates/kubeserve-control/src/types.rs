//! Core types for kubeserve-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Unique identifier for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique deployment ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a model version in the version registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(i64);

impl VersionId {
    /// Wrap a registry version id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw registry id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the platform user owning a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    /// Wrap a platform user id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw user id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the installed release backing a deployment.
///
/// Derived from the deployment id and its creation time, so repeated
/// deploy/delete cycles of one version never reuse a name that may still be
/// draining. Always a valid DNS label of at most 53 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseName(String);

impl ReleaseName {
    /// Derive the release name for a deployment.
    #[must_use]
    pub fn derive(id: &DeploymentId, created_at: DateTime<Utc>) -> Self {
        Self(format!("model-{}-{}", id.as_str(), created_at.timestamp()))
    }

    /// Wrap a stored release name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ReleaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated, strictly positive replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Replicas(u32);

impl Replicas {
    /// Validate a requested replica count against the tenant's upper bound.
    pub fn new(requested: u32, max: u32) -> ControlResult<Self> {
        if requested == 0 || requested > max {
            return Err(ControlError::InvalidReplicaCount { requested, max });
        }
        Ok(Self(requested))
    }

    /// Wrap a count read back from storage, where it was validated on write.
    #[must_use]
    pub(crate) const fn from_stored(count: u32) -> Self {
        Self(count)
    }

    /// The replica count.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Replicas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a persisted deployment is in its lifecycle.
///
/// Only two phases are ever persisted: a row exists while provisioning is in
/// flight or once the release is live. Rolled-back and torn-down deployments
/// have no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Row inserted, URL not yet recorded.
    Provisioning,
    /// Release installed and exposed, URL recorded.
    Live,
}

impl Phase {
    /// Get the phase name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "provisioning" => Ok(Self::Provisioning),
            "live" => Ok(Self::Live),
            _ => Err(format!("unknown deployment phase: {s}")),
        }
    }
}

/// A deployment as stored in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Surrogate id, assigned at creation.
    pub id: DeploymentId,
    /// Version this deployment runs.
    pub version_id: VersionId,
    /// Release name, derived from the id.
    pub release_name: ReleaseName,
    /// Tenant namespace the release lives in.
    pub namespace: String,
    /// Desired replica count.
    pub replicas: Replicas,
    /// Public URL, set once the deployment is live.
    pub url: Option<String>,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// When the deployment was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a new record for a deployment that is about to be provisioned.
    #[must_use]
    pub fn new(version_id: VersionId, namespace: impl Into<String>, replicas: Replicas) -> Self {
        let id = DeploymentId::generate();
        let now = Utc::now();
        Self {
            release_name: ReleaseName::derive(&id, now),
            id,
            version_id,
            namespace: namespace.into(),
            replicas,
            url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lifecycle phase implied by the row.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        if self.url.is_some() {
            Phase::Live
        } else {
            Phase::Provisioning
        }
    }
}
