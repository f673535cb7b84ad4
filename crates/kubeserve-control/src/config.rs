//! Configuration for kubeserve-control.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

const ENV_PREFIX: &str = "KUBESERVE_CONTROL_";

/// `database.url` value selecting the in-memory store and registry.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Release orchestrator configuration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Public routing configuration.
    #[serde(default)]
    pub ingress: IngressConfig,

    /// Object store handed to serving workloads.
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Deployment behaviour configuration.
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `KUBESERVE_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("control.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Whether the in-memory store and registry are selected.
    #[must_use]
    pub fn uses_memory_store(&self) -> bool {
        self.database.url == MEMORY_DATABASE_URL
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

const fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8083)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, or `memory://`.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/kubeserve".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Which orchestration client to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorBackend {
    /// The `helm` CLI.
    #[default]
    Helm,

    /// In-memory mock for testing.
    Mock,
}

/// Serving image configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Image repository.
    #[serde(default = "default_image_repository")]
    pub repository: String,

    /// Image tag.
    #[serde(default = "default_image_tag")]
    pub tag: String,
}

fn default_image_repository() -> String {
    "kubeserve/inference-server".to_owned()
}

fn default_image_tag() -> String {
    "latest".to_owned()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            repository: default_image_repository(),
            tag: default_image_tag(),
        }
    }
}

/// Release orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Client implementation.
    #[serde(default)]
    pub backend: OrchestratorBackend,

    /// Path or name of the `helm` binary.
    #[serde(default = "default_helm_binary")]
    pub helm_binary: String,

    /// Kubeconfig to use instead of the ambient one.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Serving template (chart path or repository reference).
    #[serde(default = "default_chart")]
    pub chart: String,

    /// Limit for install and uninstall calls in seconds.
    #[serde(default = "default_orchestrator_timeout_secs")]
    pub timeout_secs: u64,

    /// Limit for status calls in seconds.
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,

    /// Serving image.
    #[serde(default)]
    pub image: ImageConfig,
}

fn default_helm_binary() -> String {
    "helm".to_owned()
}

fn default_chart() -> String {
    "./charts/model-serving".to_owned()
}

const fn default_orchestrator_timeout_secs() -> u64 {
    300 // 5 minutes
}

const fn default_status_timeout_secs() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend: OrchestratorBackend::default(),
            helm_binary: default_helm_binary(),
            kubeconfig: None,
            chart: default_chart(),
            timeout_secs: default_orchestrator_timeout_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            image: ImageConfig::default(),
        }
    }
}

/// Which endpoint registrar to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressBackend {
    /// Kubernetes Ingress resources applied with `kubectl`.
    #[default]
    Kubectl,

    /// In-memory mock for testing.
    Mock,
}

/// Public routing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    /// Registrar implementation.
    #[serde(default)]
    pub backend: IngressBackend,

    /// Path or name of the `kubectl` binary.
    #[serde(default = "default_kubectl_binary")]
    pub kubectl_binary: String,

    /// Kubeconfig to use instead of the ambient one.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Ingress class.
    #[serde(default = "default_ingress_class")]
    pub class: String,

    /// URL scheme of public endpoints.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Public host name.
    #[serde(default = "default_host")]
    pub host: String,

    /// Public path prefix; endpoints live at `/{path_prefix}/{release}`.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Port of the service created by the serving template.
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Limit for routing calls in seconds.
    #[serde(default = "default_ingress_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra annotations on every Ingress (e.g. a cert-manager issuer).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_kubectl_binary() -> String {
    "kubectl".to_owned()
}

fn default_ingress_class() -> String {
    "nginx".to_owned()
}

fn default_scheme() -> String {
    "http".to_owned()
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_path_prefix() -> String {
    "api/v1/predict".to_owned()
}

const fn default_service_port() -> u16 {
    80
}

const fn default_ingress_timeout_secs() -> u64 {
    60
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            backend: IngressBackend::default(),
            kubectl_binary: default_kubectl_binary(),
            kubeconfig: None,
            class: default_ingress_class(),
            scheme: default_scheme(),
            host: default_host(),
            path_prefix: default_path_prefix(),
            service_port: default_service_port(),
            timeout_secs: default_ingress_timeout_secs(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Object store handed to serving workloads.
#[derive(Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Endpoint host and port.
    #[serde(default = "default_object_store_endpoint")]
    pub endpoint: String,

    /// Access key id.
    #[serde(default)]
    pub access_key: String,

    /// Secret access key.
    #[serde(default)]
    pub secret_key: String,

    /// Whether the endpoint speaks TLS.
    #[serde(default)]
    pub use_ssl: bool,
}

fn default_object_store_endpoint() -> String {
    "minio.kubeserve-system.svc.cluster.local:9000".to_owned()
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_object_store_endpoint(),
            access_key: String::new(),
            secret_key: String::new(),
            use_ssl: false,
        }
    }
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

/// Deployment behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Upper bound on replicas per deployment.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    /// Tenant namespaces are `{namespace_prefix}{user id}`.
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Seconds between background reconcile sweeps; 0 disables them.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Age in seconds after which a provisioning row counts as stale.
    #[serde(default = "default_reconcile_grace_secs")]
    pub reconcile_grace_secs: u64,
}

const fn default_max_replicas() -> u32 {
    10
}

fn default_namespace_prefix() -> String {
    "user-".to_owned()
}

const fn default_reconcile_interval_secs() -> u64 {
    60
}

const fn default_reconcile_grace_secs() -> u64 {
    900 // 15 minutes
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            max_replicas: default_max_replicas(),
            namespace_prefix: default_namespace_prefix(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            reconcile_grace_secs: default_reconcile_grace_secs(),
        }
    }
}
