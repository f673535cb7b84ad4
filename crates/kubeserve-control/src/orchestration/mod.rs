//! Orchestration client for packaged workload releases.
//!
//! A release is one installed instance of the serving template in a tenant
//! namespace. The client installs, uninstalls and inspects releases; it says
//! nothing about workload readiness. Every call is bounded by a timeout and
//! reports failure as a typed [`ExternalError`].

mod helm;

pub use helm::HelmClient;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{OrchestratorBackend, OrchestratorConfig};
use crate::error::{ControlResult, ExternalError};
use crate::locator::ArtifactLocation;
use crate::types::{ReleaseName, Replicas};

/// Object store endpoint and credentials handed to the serving workload.
#[derive(Clone)]
pub struct ObjectStoreParams {
    /// Endpoint host (and port), e.g. `minio.storage:9000`.
    pub endpoint: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: SecretString,
    /// Whether the endpoint speaks TLS.
    pub use_ssl: bool,
}

impl fmt::Debug for ObjectStoreParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreParams")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

/// Container image the serving workload runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Image repository.
    pub repository: String,
    /// Image tag.
    pub tag: String,
}

/// Every value the serving template accepts.
#[derive(Debug, Clone)]
pub struct InstallParameters {
    /// Object store the artifact is fetched from.
    pub object_store: ObjectStoreParams,
    /// Full artifact reference as stored in the registry.
    pub artifact_reference: String,
    /// Parsed container and key of the artifact.
    pub artifact: ArtifactLocation,
    /// Desired replica count.
    pub replicas: Replicas,
    /// Serving image.
    pub image: ImageRef,
    /// Public path the endpoint will be reachable under.
    pub public_path: String,
}

/// One rendered template value.
///
/// Text values are passed to the template as strings even when they look
/// like numbers or booleans; typed values are left to the template engine
/// to coerce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    /// Kept as a string.
    Text(String),
    /// Coerced by the template engine (`true`, `2`).
    Typed(String),
}

impl TemplateValue {
    /// The raw value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(v) | Self::Typed(v) => v,
        }
    }

    /// Whether the value must stay a string.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

impl InstallParameters {
    /// Render as template `key=value` pairs.
    ///
    /// Routing is owned by the endpoint registrar, so the template's own
    /// ingress is always disabled. Values are returned unescaped; the secret
    /// key is exposed here and nowhere else.
    #[must_use]
    pub fn to_set_values(&self) -> Vec<(&'static str, TemplateValue)> {
        use TemplateValue::{Text, Typed};

        vec![
            ("model.s3Path", Text(self.artifact_reference.clone())),
            ("model.s3Bucket", Text(self.artifact.container.clone())),
            ("model.s3Key", Text(self.artifact.key.clone())),
            ("model.s3Endpoint", Text(self.object_store.endpoint.clone())),
            ("model.s3AccessKey", Text(self.object_store.access_key.clone())),
            (
                "model.s3SecretKey",
                Text(self.object_store.secret_key.expose_secret().to_owned()),
            ),
            ("model.s3UseSSL", Typed(self.object_store.use_ssl.to_string())),
            ("deployment.replicas", Typed(self.replicas.to_string())),
            ("deployment.image.repository", Text(self.image.repository.clone())),
            ("deployment.image.tag", Text(self.image.tag.clone())),
            ("deployment.publicPath", Text(self.public_path.clone())),
            ("ingress.enabled", Typed("false".to_owned())),
            ("monitoring.serviceMonitor.enabled", Typed("true".to_owned())),
        ]
    }
}

/// Request to install a release.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Release name.
    pub release: ReleaseName,
    /// Tenant namespace.
    pub namespace: String,
    /// Template reference (chart path or repository reference).
    pub template: String,
    /// Template values.
    pub parameters: InstallParameters,
    /// Hard wall-clock limit for the call.
    pub timeout: Duration,
}

/// Outcome of a successful uninstall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// The release existed and was removed.
    Removed,
    /// The release was already absent.
    NotFound,
}

/// Best-effort view of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseState {
    /// Whether the release exists.
    pub exists: bool,
    /// Whether the orchestrator reports it as successfully deployed.
    pub healthy: bool,
}

/// Client for the external packaging system.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    /// Install a release. Success means the install was accepted, not that
    /// the workload is ready.
    async fn install(&self, request: &InstallRequest) -> Result<(), ExternalError>;

    /// Uninstall a release. An absent release is [`UninstallOutcome::NotFound`].
    async fn uninstall(
        &self,
        release: &ReleaseName,
        namespace: &str,
        timeout: Duration,
    ) -> Result<UninstallOutcome, ExternalError>;

    /// Inspect a release.
    async fn status(&self, release: &ReleaseName, namespace: &str)
        -> Result<ReleaseState, ExternalError>;
}

/// Create an orchestration client from configuration.
pub fn create_client(config: &OrchestratorConfig) -> ControlResult<Arc<dyn OrchestrationClient>> {
    match config.backend {
        OrchestratorBackend::Helm => Ok(Arc::new(HelmClient::new(config))),
        OrchestratorBackend::Mock => Ok(Arc::new(MockOrchestrator::default())),
    }
}

/// A call recorded by [`MockOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationCall {
    /// `install(release, namespace)`.
    Install {
        /// Release name.
        release: String,
        /// Namespace.
        namespace: String,
    },
    /// `uninstall(release, namespace)`.
    Uninstall {
        /// Release name.
        release: String,
        /// Namespace.
        namespace: String,
    },
    /// `status(release, namespace)`.
    Status {
        /// Release name.
        release: String,
        /// Namespace.
        namespace: String,
    },
}

#[derive(Debug, Default)]
struct MockState {
    releases: HashMap<(String, String), InstallParameters>,
    calls: Vec<OrchestrationCall>,
    install_error: Option<ExternalError>,
    uninstall_error: Option<ExternalError>,
    status_error: Option<ExternalError>,
}

/// In-memory orchestrator for testing.
///
/// Keeps the set of installed releases and every call made. Failures can be
/// injected per operation; an injected failure leaves the release set
/// untouched.
#[derive(Debug, Default)]
pub struct MockOrchestrator {
    state: RwLock<MockState>,
}

impl MockOrchestrator {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock is recovered: injected failures must never be skipped.
    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Make every subsequent install fail with `error` (`None` clears it).
    pub fn fail_installs(&self, error: Option<ExternalError>) {
        self.with_state(|s| s.install_error = error);
    }

    /// Make every subsequent uninstall fail with `error` (`None` clears it).
    pub fn fail_uninstalls(&self, error: Option<ExternalError>) {
        self.with_state(|s| s.uninstall_error = error);
    }

    /// Make every subsequent status call fail with `error` (`None` clears it).
    pub fn fail_status(&self, error: Option<ExternalError>) {
        self.with_state(|s| s.status_error = error);
    }

    /// Pretend a release was installed out of band.
    pub fn insert_release(&self, release: &ReleaseName, namespace: &str, parameters: InstallParameters) {
        self.with_state(|s| {
            s.releases
                .insert((namespace.to_owned(), release.as_str().to_owned()), parameters);
        });
    }

    /// Whether the release is currently installed.
    #[must_use]
    pub fn contains(&self, release: &ReleaseName, namespace: &str) -> bool {
        self.with_state(|s| {
            s.releases
                .contains_key(&(namespace.to_owned(), release.as_str().to_owned()))
        })
    }

    /// Values the release was installed with.
    #[must_use]
    pub fn parameters(&self, release: &ReleaseName, namespace: &str) -> Option<InstallParameters> {
        self.with_state(|s| {
            s.releases
                .get(&(namespace.to_owned(), release.as_str().to_owned()))
                .cloned()
        })
    }

    /// Number of installed releases.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.with_state(|s| s.releases.len())
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<OrchestrationCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Release names passed to `uninstall`, in order.
    #[must_use]
    pub fn uninstall_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                OrchestrationCall::Uninstall { release, .. } => Some(release),
                _ => None,
            })
            .collect()
    }

    /// Release names passed to `install`, in order.
    #[must_use]
    pub fn install_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                OrchestrationCall::Install { release, .. } => Some(release),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl OrchestrationClient for MockOrchestrator {
    async fn install(&self, request: &InstallRequest) -> Result<(), ExternalError> {
        self.with_state(|s| {
            let release = request.release.as_str().to_owned();
            s.calls.push(OrchestrationCall::Install {
                release: release.clone(),
                namespace: request.namespace.clone(),
            });
            if let Some(error) = s.install_error.clone() {
                return Err(error);
            }
            let key = (request.namespace.clone(), release);
            if s.releases.contains_key(&key) {
                return Err(ExternalError::failed(
                    "install",
                    format!("cannot re-use a name that is still in use: {}", key.1),
                ));
            }
            s.releases.insert(key, request.parameters.clone());
            Ok(())
        })
    }

    async fn uninstall(
        &self,
        release: &ReleaseName,
        namespace: &str,
        _timeout: Duration,
    ) -> Result<UninstallOutcome, ExternalError> {
        self.with_state(|s| {
            s.calls.push(OrchestrationCall::Uninstall {
                release: release.as_str().to_owned(),
                namespace: namespace.to_owned(),
            });
            if let Some(error) = s.uninstall_error.clone() {
                return Err(error);
            }
            let key = (namespace.to_owned(), release.as_str().to_owned());
            Ok(match s.releases.remove(&key) {
                Some(_) => UninstallOutcome::Removed,
                None => UninstallOutcome::NotFound,
            })
        })
    }

    async fn status(
        &self,
        release: &ReleaseName,
        namespace: &str,
    ) -> Result<ReleaseState, ExternalError> {
        self.with_state(|s| {
            s.calls.push(OrchestrationCall::Status {
                release: release.as_str().to_owned(),
                namespace: namespace.to_owned(),
            });
            if let Some(error) = s.status_error.clone() {
                return Err(error);
            }
            let exists = s
                .releases
                .contains_key(&(namespace.to_owned(), release.as_str().to_owned()));
            Ok(ReleaseState {
                exists,
                healthy: exists,
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_parameters() -> InstallParameters {
        InstallParameters {
            object_store: ObjectStoreParams {
                endpoint: "minio:9000".to_owned(),
                access_key: "minioadmin".to_owned(),
                secret_key: SecretString::from("s3cr3t".to_owned()),
                use_ssl: false,
            },
            artifact_reference: "s3://models/7/model.pkl".to_owned(),
            artifact: ArtifactLocation::parse("s3://models/7/model.pkl").unwrap(),
            replicas: Replicas::new(2, 10).unwrap(),
            image: ImageRef {
                repository: "kubeserve/inference".to_owned(),
                tag: "latest".to_owned(),
            },
            public_path: "/api/v1/predict/model-x-1".to_owned(),
        }
    }

    fn request(release: &str) -> InstallRequest {
        InstallRequest {
            release: ReleaseName::new(release),
            namespace: "user-7".to_owned(),
            template: "./charts/model-serving".to_owned(),
            parameters: test_parameters(),
            timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn set_values_cover_every_template_key() {
        let values: HashMap<_, _> = test_parameters().to_set_values().into_iter().collect();
        assert_eq!(values["model.s3Path"].as_str(), "s3://models/7/model.pkl");
        assert_eq!(values["model.s3Bucket"].as_str(), "models");
        assert_eq!(values["model.s3Key"].as_str(), "7/model.pkl");
        assert_eq!(values["model.s3SecretKey"].as_str(), "s3cr3t");
        assert_eq!(values["model.s3UseSSL"].as_str(), "false");
        assert_eq!(values["deployment.replicas"].as_str(), "2");
        assert_eq!(values["deployment.publicPath"].as_str(), "/api/v1/predict/model-x-1");
        assert_eq!(values["ingress.enabled"].as_str(), "false");
        assert_eq!(values["monitoring.serviceMonitor.enabled"].as_str(), "true");
    }

    #[test]
    fn credentials_and_paths_stay_strings() {
        let mut parameters = test_parameters();
        parameters.object_store.access_key = "12345".to_owned();
        parameters.object_store.secret_key = SecretString::from("true".to_owned());
        parameters.image.tag = "1.10".to_owned();

        let values: HashMap<_, _> = parameters.to_set_values().into_iter().collect();
        for key in [
            "model.s3Path",
            "model.s3Bucket",
            "model.s3Key",
            "model.s3Endpoint",
            "model.s3AccessKey",
            "model.s3SecretKey",
            "deployment.image.repository",
            "deployment.image.tag",
            "deployment.publicPath",
        ] {
            assert!(values[key].is_text(), "{key} must be passed as a string");
        }
        assert_eq!(values["model.s3AccessKey"], TemplateValue::Text("12345".to_owned()));
        assert!(!values["deployment.replicas"].is_text());
        assert!(!values["model.s3UseSSL"].is_text());
    }

    #[test]
    fn debug_output_redacts_the_secret_key() {
        let rendered = format!("{:?}", test_parameters());
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn mock_tracks_releases() {
        let mock = MockOrchestrator::new();
        let release = ReleaseName::new("model-a-1");

        mock.install(&request("model-a-1")).await.unwrap();
        assert!(mock.contains(&release, "user-7"));
        assert!(mock.status(&release, "user-7").await.unwrap().exists);

        let outcome = mock
            .uninstall(&release, "user-7", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, UninstallOutcome::Removed);

        let outcome = mock
            .uninstall(&release, "user-7", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, UninstallOutcome::NotFound);
        assert_eq!(mock.uninstall_calls(), vec!["model-a-1", "model-a-1"]);
    }

    #[tokio::test]
    async fn injected_install_failure_leaves_no_release() {
        let mock = MockOrchestrator::new();
        mock.fail_installs(Some(ExternalError::Timeout {
            operation: "install",
            limit: Duration::from_secs(300),
        }));

        let err = mock.install(&request("model-b-1")).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(mock.release_count(), 0);
        assert_eq!(mock.install_calls(), vec!["model-b-1"]);
    }

    #[tokio::test]
    async fn injected_failure_survives_a_poisoned_lock() {
        let mock = MockOrchestrator::new();
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            mock.with_state(|_| panic!("test thread died holding the lock"));
        }));
        assert!(poisoned.is_err());
        assert!(mock.state.is_poisoned());

        mock.fail_installs(Some(ExternalError::failed("install", "quota exceeded")));
        assert!(mock.install(&request("model-c-1")).await.is_err());
        assert_eq!(mock.release_count(), 0);
        assert_eq!(mock.install_calls(), vec!["model-c-1"]);
    }
}
