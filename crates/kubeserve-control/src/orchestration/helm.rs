//! Helm CLI orchestration client.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{self, CommandError, CommandOutput};
use crate::config::OrchestratorConfig;
use crate::error::ExternalError;
use crate::types::ReleaseName;

use super::{InstallRequest, OrchestrationClient, ReleaseState, UninstallOutcome};

const DEPLOYED_STATUS: &str = "deployed";

/// Orchestration client driving the `helm` binary.
#[derive(Debug, Clone)]
pub struct HelmClient {
    binary: String,
    kubeconfig: Option<PathBuf>,
    status_timeout: Duration,
}

impl HelmClient {
    /// Create a client from configuration.
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            binary: config.helm_binary.clone(),
            kubeconfig: config.kubeconfig.clone(),
            status_timeout: Duration::from_secs(config.status_timeout_secs),
        }
    }

    async fn helm(
        &self,
        operation: &'static str,
        mut args: Vec<String>,
        limit: Duration,
    ) -> Result<CommandOutput, ExternalError> {
        if let Some(ref kubeconfig) = self.kubeconfig {
            args.push("--kubeconfig".to_owned());
            args.push(kubeconfig.display().to_string());
        }

        command::run(&self.binary, &args, None, limit)
            .await
            .map_err(|e| match e {
                CommandError::TimedOut { limit, .. } => ExternalError::Timeout { operation, limit },
                other => ExternalError::failed(operation, other.to_string()),
            })
    }
}

#[async_trait]
impl OrchestrationClient for HelmClient {
    async fn install(&self, request: &InstallRequest) -> Result<(), ExternalError> {
        let mut args = vec![
            "install".to_owned(),
            request.release.as_str().to_owned(),
            request.template.clone(),
            "--namespace".to_owned(),
            request.namespace.clone(),
        ];
        for (key, value) in request.parameters.to_set_values() {
            let flag = if value.is_text() { "--set-string" } else { "--set" };
            args.push(flag.to_owned());
            args.push(format!("{key}={}", escape_set_value(value.as_str())));
        }

        info!(
            release = %request.release,
            namespace = %request.namespace,
            chart = %request.template,
            "installing release"
        );

        let output = self.helm("install", args, request.timeout).await?;
        if output.success {
            Ok(())
        } else {
            Err(command_failure("install", &output))
        }
    }

    async fn uninstall(
        &self,
        release: &ReleaseName,
        namespace: &str,
        timeout: Duration,
    ) -> Result<UninstallOutcome, ExternalError> {
        let args = vec![
            "uninstall".to_owned(),
            release.as_str().to_owned(),
            "--namespace".to_owned(),
            namespace.to_owned(),
        ];

        let output = self.helm("uninstall", args, timeout).await?;
        if output.success {
            return Ok(UninstallOutcome::Removed);
        }
        if is_not_found(&output) {
            debug!(release = %release, namespace, "release already absent");
            return Ok(UninstallOutcome::NotFound);
        }
        Err(command_failure("uninstall", &output))
    }

    async fn status(
        &self,
        release: &ReleaseName,
        namespace: &str,
    ) -> Result<ReleaseState, ExternalError> {
        let args = vec![
            "status".to_owned(),
            release.as_str().to_owned(),
            "--namespace".to_owned(),
            namespace.to_owned(),
            "--output".to_owned(),
            "json".to_owned(),
        ];

        let output = self.helm("status", args, self.status_timeout).await?;
        if !output.success {
            if is_not_found(&output) {
                return Ok(ReleaseState::default());
            }
            return Err(command_failure("status", &output));
        }

        let parsed: serde_json::Value = serde_json::from_str(&output.stdout).map_err(|e| {
            ExternalError::Failed {
                operation: "status",
                reason: format!("unparseable status output: {e}"),
                output: output.stdout.clone(),
            }
        })?;

        let status = parsed
            .pointer("/info/status")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        Ok(ReleaseState {
            exists: true,
            healthy: status.eq_ignore_ascii_case(DEPLOYED_STATUS),
        })
    }
}

fn is_not_found(output: &CommandOutput) -> bool {
    output.stderr.to_ascii_lowercase().contains("not found")
}

fn command_failure(operation: &'static str, output: &CommandOutput) -> ExternalError {
    let reason = output
        .stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(|| output.exit_description(), ToOwned::to_owned);

    ExternalError::Failed {
        operation,
        reason,
        output: output.combined(),
    }
}

// `--set` splits on commas and treats backslash as an escape.
fn escape_set_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
