//! Public routing for releases.
//!
//! The registrar owns the routing resource (host + path to internal service)
//! of each release and computes the URL tenants call. The path always ends
//! in the release name, so repeated deploy/delete cycles of one version
//! never share a route.

mod kubectl;

pub use kubectl::IngressRegistrar;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::config::{IngressBackend, IngressConfig};
use crate::error::{ControlResult, ExternalError};
use crate::types::ReleaseName;

/// Request to expose a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposeRequest {
    /// Tenant namespace.
    pub namespace: String,
    /// Release to route to.
    pub release: ReleaseName,
    /// Internal service backing the release.
    pub service_name: String,
    /// Internal service port.
    pub service_port: u16,
    /// Public host name.
    pub public_host: String,
    /// Public path prefix, without the release segment.
    pub path_prefix: String,
}

impl ExposeRequest {
    /// Public path of the release, `/{prefix}/{release}`.
    #[must_use]
    pub fn public_path(&self) -> String {
        public_path(&self.path_prefix, &self.release)
    }
}

/// Creates and removes public routes.
#[async_trait]
pub trait EndpointRegistrar: Send + Sync {
    /// Create or update the route and return the public URL.
    ///
    /// Exposing twice with the same request yields the same URL and leaves
    /// one route.
    async fn expose(&self, request: &ExposeRequest) -> Result<String, ExternalError>;

    /// Remove the route. A missing route is success.
    async fn unexpose(&self, namespace: &str, release: &ReleaseName) -> Result<(), ExternalError>;
}

/// `/{prefix}/{release}`, tolerating stray slashes in the prefix.
#[must_use]
pub fn public_path(prefix: &str, release: &ReleaseName) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("/{release}")
    } else {
        format!("/{prefix}/{release}")
    }
}

/// `{scheme}://{host}/{prefix}/{release}`.
#[must_use]
pub fn public_url(scheme: &str, host: &str, prefix: &str, release: &ReleaseName) -> String {
    format!(
        "{scheme}://{}{}",
        host.trim_end_matches('/'),
        public_path(prefix, release)
    )
}

/// Create a registrar from configuration.
pub fn create_registrar(config: &IngressConfig) -> ControlResult<Arc<dyn EndpointRegistrar>> {
    match config.backend {
        IngressBackend::Kubectl => Ok(Arc::new(IngressRegistrar::new(config))),
        IngressBackend::Mock => Ok(Arc::new(MockRegistrar::new(config.scheme.clone()))),
    }
}

#[derive(Debug, Default)]
struct MockRoutes {
    routes: HashMap<(String, String), String>,
    expose_calls: usize,
    unexpose_calls: usize,
    expose_error: Option<ExternalError>,
    unexpose_error: Option<ExternalError>,
}

/// In-memory registrar for testing.
#[derive(Debug)]
pub struct MockRegistrar {
    scheme: String,
    state: RwLock<MockRoutes>,
}

impl Default for MockRegistrar {
    fn default() -> Self {
        Self::new("http")
    }
}

impl MockRegistrar {
    /// Create a registrar producing URLs with `scheme`.
    #[must_use]
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            state: RwLock::new(MockRoutes::default()),
        }
    }

    // A poisoned lock is recovered: injected failures must never be skipped.
    fn with_state<T>(&self, f: impl FnOnce(&mut MockRoutes) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Make every subsequent expose fail with `error` (`None` clears it).
    pub fn fail_exposes(&self, error: Option<ExternalError>) {
        self.with_state(|s| s.expose_error = error);
    }

    /// Make every subsequent unexpose fail with `error` (`None` clears it).
    pub fn fail_unexposes(&self, error: Option<ExternalError>) {
        self.with_state(|s| s.unexpose_error = error);
    }

    /// URL of the route for a release, if one exists.
    #[must_use]
    pub fn route(&self, namespace: &str, release: &ReleaseName) -> Option<String> {
        self.with_state(|s| {
            s.routes
                .get(&(namespace.to_owned(), release.as_str().to_owned()))
                .cloned()
        })
    }

    /// Number of routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.with_state(|s| s.routes.len())
    }

    /// Number of expose calls, including failed ones.
    #[must_use]
    pub fn expose_calls(&self) -> usize {
        self.with_state(|s| s.expose_calls)
    }

    /// Number of unexpose calls, including failed ones.
    #[must_use]
    pub fn unexpose_calls(&self) -> usize {
        self.with_state(|s| s.unexpose_calls)
    }
}

#[async_trait]
impl EndpointRegistrar for MockRegistrar {
    async fn expose(&self, request: &ExposeRequest) -> Result<String, ExternalError> {
        self.with_state(|s| {
            s.expose_calls += 1;
            if let Some(error) = s.expose_error.clone() {
                return Err(error);
            }
            let url = public_url(
                &self.scheme,
                &request.public_host,
                &request.path_prefix,
                &request.release,
            );
            s.routes.insert(
                (request.namespace.clone(), request.release.as_str().to_owned()),
                url.clone(),
            );
            Ok(url)
        })
    }

    async fn unexpose(&self, namespace: &str, release: &ReleaseName) -> Result<(), ExternalError> {
        self.with_state(|s| {
            s.unexpose_calls += 1;
            if let Some(error) = s.unexpose_error.clone() {
                return Err(error);
            }
            s.routes
                .remove(&(namespace.to_owned(), release.as_str().to_owned()));
            Ok(())
        })
    }
}
