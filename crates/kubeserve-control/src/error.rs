//! Error types for kubeserve-control.

use std::time::Duration;

use crate::registry::VersionState;
use crate::types::VersionId;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Reason string reported for external calls that exceeded their deadline.
pub const TIMEOUT_REASON: &str = "timeout";

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The version registry has no such version.
    #[error("model version not found: {0}")]
    VersionNotFound(VersionId),

    /// The version exists but cannot be deployed yet.
    #[error("cannot deploy version {version} with status '{state}', version must be ready")]
    VersionNotReady {
        /// Version that was requested.
        version: VersionId,
        /// State the version is currently in.
        state: VersionState,
    },

    /// The stored artifact reference has no container/key separator.
    #[error("malformed artifact reference: {0:?}")]
    MalformedReference(String),

    /// Replica count outside `1..=max`.
    #[error("invalid replica count {requested}: must be between 1 and {max}")]
    InvalidReplicaCount {
        /// Replica count the caller asked for.
        requested: u32,
        /// Upper bound enforced for the tenant.
        max: u32,
    },

    /// Installing the packaged workload failed (or timed out).
    #[error("install failed: {reason}")]
    InstallFailed {
        /// Short reason, `"timeout"` when the deadline was hit.
        reason: String,
        /// Raw output of the installer, for diagnostics.
        output: String,
    },

    /// Creating the public route failed (or timed out).
    #[error("expose failed: {reason}")]
    ExposeFailed {
        /// Short reason, `"timeout"` when the deadline was hit.
        reason: String,
    },

    /// Deployment not found.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// A deployment row with the same release name already exists.
    #[error("release name already in use: {0}")]
    DuplicateRelease(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build an install failure from the external call that produced it.
    #[must_use]
    pub fn install_failed(error: &ExternalError) -> Self {
        Self::InstallFailed {
            reason: error.reason().to_owned(),
            output: error.output().to_owned(),
        }
    }

    /// Build an expose failure from the external call that produced it.
    #[must_use]
    pub fn expose_failed(error: &ExternalError) -> Self {
        Self::ExposeFailed {
            reason: error.reason().to_owned(),
        }
    }

    /// Returns true if the failure was an external deadline being hit.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::InstallFailed { reason, .. } | Self::ExposeFailed { reason } => {
                reason == TIMEOUT_REASON
            }
            _ => false,
        }
    }

    /// Returns true for errors caused by the request itself.
    ///
    /// Validation errors are raised before any row is written or any
    /// external call is made.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::VersionNotReady { .. }
                | Self::MalformedReference(_)
                | Self::InvalidReplicaCount { .. }
        )
    }

    /// Stable machine-readable code for API consumers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        if self.is_timeout() {
            return "timeout";
        }
        match self {
            Self::VersionNotFound(_) => "version_not_found",
            Self::VersionNotReady { .. } => "version_not_ready",
            Self::MalformedReference(_) => "malformed_reference",
            Self::InvalidReplicaCount { .. } => "invalid_replica_count",
            Self::InstallFailed { .. } => "install_failed",
            Self::ExposeFailed { .. } => "expose_failed",
            Self::DeploymentNotFound(_) => "deployment_not_found",
            Self::DuplicateRelease(_) => "duplicate_release",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Serialisation(_) => "serialisation",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the same request unchanged can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InstallFailed { .. } | Self::ExposeFailed { .. } | Self::Database(_) => true,
            Self::DuplicateRelease(_) | Self::Internal(_) => true,
            _ => false,
        }
    }
}

/// Failure of a call against the orchestrator or the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    /// The call did not return before its deadline.
    #[error("{operation} timed out after {}s", limit.as_secs())]
    Timeout {
        /// Operation that was attempted (e.g. "install").
        operation: &'static str,
        /// Deadline that was exceeded.
        limit: Duration,
    },

    /// The call returned a failure.
    #[error("{operation} failed: {reason}")]
    Failed {
        /// Operation that was attempted.
        operation: &'static str,
        /// Short human-readable reason.
        reason: String,
        /// Raw output captured from the external system.
        output: String,
    },
}

impl ExternalError {
    /// Create a failure without captured output.
    #[must_use]
    pub fn failed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            reason: reason.into(),
            output: String::new(),
        }
    }

    /// Short reason, `"timeout"` for deadline failures.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Timeout { .. } => TIMEOUT_REASON,
            Self::Failed { reason, .. } => reason,
        }
    }

    /// Raw output captured from the external system, if any.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Timeout { .. } => "",
            Self::Failed { output, .. } => output,
        }
    }

    /// Returns true if the deadline was hit.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
