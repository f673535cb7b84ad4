//! Kubernetes Ingress registrar driven through `kubectl`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::command::{self, CommandError, CommandOutput};
use crate::config::IngressConfig;
use crate::error::ExternalError;
use crate::types::ReleaseName;

use super::{public_url, EndpointRegistrar, ExposeRequest};

/// Registrar that manages one `networking.k8s.io/v1` Ingress per release.
///
/// The Ingress is named after the release and applied declaratively, so
/// exposing an already exposed release updates it in place.
#[derive(Debug, Clone)]
pub struct IngressRegistrar {
    binary: String,
    kubeconfig: Option<PathBuf>,
    class: String,
    scheme: String,
    annotations: BTreeMap<String, String>,
    timeout: Duration,
}

impl IngressRegistrar {
    /// Create a registrar from configuration.
    #[must_use]
    pub fn new(config: &IngressConfig) -> Self {
        Self {
            binary: config.kubectl_binary.clone(),
            kubeconfig: config.kubeconfig.clone(),
            class: config.class.clone(),
            scheme: config.scheme.clone(),
            annotations: config.annotations.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Render the Ingress manifest for a request.
    #[must_use]
    pub fn manifest(&self, request: &ExposeRequest) -> serde_json::Value {
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "name": request.release.as_str(),
                "namespace": request.namespace,
                "labels": {
                    "app.kubernetes.io/managed-by": "kubeserve-control",
                    "app.kubernetes.io/instance": request.release.as_str(),
                },
                "annotations": self.annotations,
            },
            "spec": {
                "ingressClassName": self.class,
                "rules": [{
                    "host": request.public_host,
                    "http": {
                        "paths": [{
                            "path": request.public_path(),
                            "pathType": "Prefix",
                            "backend": {
                                "service": {
                                    "name": request.service_name,
                                    "port": { "number": request.service_port },
                                },
                            },
                        }],
                    },
                }],
            },
        })
    }

    async fn kubectl(
        &self,
        operation: &'static str,
        mut args: Vec<String>,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, ExternalError> {
        if let Some(ref kubeconfig) = self.kubeconfig {
            args.push("--kubeconfig".to_owned());
            args.push(kubeconfig.display().to_string());
        }

        let output = command::run(&self.binary, &args, stdin, self.timeout)
            .await
            .map_err(|e| match e {
                CommandError::TimedOut { limit, .. } => ExternalError::Timeout { operation, limit },
                other => ExternalError::failed(operation, other.to_string()),
            })?;

        if output.success {
            Ok(output)
        } else {
            Err(ExternalError::Failed {
                operation,
                reason: output
                    .stderr
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map_or_else(|| output.exit_description(), ToOwned::to_owned),
                output: output.combined(),
            })
        }
    }
}

#[async_trait]
impl EndpointRegistrar for IngressRegistrar {
    async fn expose(&self, request: &ExposeRequest) -> Result<String, ExternalError> {
        let manifest = serde_json::to_vec(&self.manifest(request))
            .map_err(|e| ExternalError::failed("expose", format!("failed to render ingress: {e}")))?;

        let args = vec![
            "apply".to_owned(),
            "--namespace".to_owned(),
            request.namespace.clone(),
            "-f".to_owned(),
            "-".to_owned(),
        ];
        self.kubectl("expose", args, Some(&manifest)).await?;

        info!(
            release = %request.release,
            namespace = %request.namespace,
            path = %request.public_path(),
            "ingress applied"
        );

        Ok(public_url(
            &self.scheme,
            &request.public_host,
            &request.path_prefix,
            &request.release,
        ))
    }

    async fn unexpose(&self, namespace: &str, release: &ReleaseName) -> Result<(), ExternalError> {
        let args = vec![
            "delete".to_owned(),
            "ingress".to_owned(),
            release.as_str().to_owned(),
            "--namespace".to_owned(),
            namespace.to_owned(),
            "--ignore-not-found".to_owned(),
        ];
        self.kubectl("unexpose", args, None).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn request() -> ExposeRequest {
        ExposeRequest {
            namespace: "user-7".to_owned(),
            release: ReleaseName::new("model-abc-1700000000"),
            service_name: "model-abc-1700000000".to_owned(),
            service_port: 80,
            public_host: "localhost".to_owned(),
            path_prefix: "api/v1/predict".to_owned(),
        }
    }

    /// A fake kubectl recording its arguments and stdin next to itself.
    fn fake_kubectl(body: &str) -> (tempfile::TempDir, IngressRegistrar) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubectl");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{args}'\ncat > '{stdin}'\n{body}\n",
            args = dir.path().join("args").display(),
            stdin = dir.path().join("stdin").display(),
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = IngressConfig {
            kubectl_binary: path.display().to_string(),
            ..IngressConfig::default()
        };
        (dir, IngressRegistrar::new(&config))
    }

    #[test]
    fn manifest_routes_release_path_to_service() {
        let registrar = IngressRegistrar::new(&IngressConfig::default());
        let manifest = registrar.manifest(&request());

        assert_eq!(manifest["metadata"]["name"], "model-abc-1700000000");
        assert_eq!(manifest["spec"]["ingressClassName"], "nginx");
        let path = &manifest["spec"]["rules"][0]["http"]["paths"][0];
        assert_eq!(path["path"], "/api/v1/predict/model-abc-1700000000");
        assert_eq!(path["pathType"], "Prefix");
        assert_eq!(path["backend"]["service"]["port"]["number"], 80);
    }

    #[tokio::test]
    async fn expose_applies_manifest_from_stdin() {
        let (dir, registrar) = fake_kubectl("exit 0");
        let url = registrar.expose(&request()).await.unwrap();
        assert_eq!(url, "http://localhost/api/v1/predict/model-abc-1700000000");

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(args.lines().collect::<Vec<_>>(), ["apply", "--namespace", "user-7", "-f", "-"]);

        let applied: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("stdin")).unwrap()).unwrap();
        assert_eq!(applied["kind"], "Ingress");
    }

    #[tokio::test]
    async fn expose_twice_yields_the_same_url() {
        let (_dir, registrar) = fake_kubectl("exit 0");
        let first = registrar.expose(&request()).await.unwrap();
        let second = registrar.expose(&request()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unexpose_ignores_missing_ingress() {
        let (dir, registrar) = fake_kubectl("exit 0");
        registrar
            .unexpose("user-7", &ReleaseName::new("model-abc-1700000000"))
            .await
            .unwrap();

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert!(args.lines().any(|a| a == "--ignore-not-found"));
    }

    #[tokio::test]
    async fn expose_failure_surfaces_stderr() {
        let (_dir, registrar) =
            fake_kubectl("echo 'error: the server could not find the requested resource' >&2\nexit 1");
        let err = registrar.expose(&request()).await.unwrap_err();
        assert_eq!(err.reason(), "error: the server could not find the requested resource");
    }
}
