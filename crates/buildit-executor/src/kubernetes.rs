//! Kubernetes `CommandLauncher` (C3) — runs a step's script inside a
//! pod created for that single run, via `kube`'s exec-attach API.

use async_trait::async_trait;
use futures::{AsyncReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use buildit_core::{CommandLauncher, CommandOutput, Error, LauncherKind, Result};

const POD_READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const POD_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs each script in a fresh pod named `buildit-step-<uuid>` in
/// `namespace`, running `image` with an idle command, execs the script
/// into it once the pod is `Running`, then deletes the pod.
pub struct KubernetesLauncher {
    client: Client,
    namespace: String,
    image: String,
}

impl KubernetesLauncher {
    pub async fn new(namespace: impl Into<String>, image: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(format!("failed to build kube client: {e}")))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            image: image.into(),
        })
    }

    pub fn with_client(client: Client, namespace: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            image: image.into(),
        }
    }

    fn pod_name() -> String {
        format!("buildit-step-{}", uuid::Uuid::now_v7())
    }

    async fn wait_until_running(pods: &Api<Pod>, name: &str) -> Result<()> {
        let deadline = Instant::now() + POD_READY_TIMEOUT;
        loop {
            let pod = pods
                .get(name)
                .await
                .map_err(|e| Error::Execution(format!("failed to poll pod {name}: {e}")))?;
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown");
            if phase == "Running" {
                return Ok(());
            }
            if phase == "Failed" {
                return Err(Error::Execution(format!("pod {name} entered Failed phase")));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "pod {name} did not reach Running within {POD_READY_TIMEOUT:?}"
                )));
            }
            tokio::time::sleep(POD_READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl CommandLauncher for KubernetesLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Kubernetes
    }

    async fn is_available(&self) -> bool {
        Api::<Pod>::default_namespaced(self.client.clone())
            .list(&Default::default())
            .await
            .is_ok()
    }

    async fn run(
        &self,
        script: &str,
        work_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput> {
        let started = Instant::now();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = Self::pod_name();

        let env_vars: Vec<_> = env
            .iter()
            .map(|(k, v)| json!({"name": k, "value": v}))
            .collect();
        let pod: Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "step",
                    "image": self.image,
                    "command": ["sh", "-c", "sleep infinity"],
                    "env": env_vars,
                    "workingDir": work_dir.to_string_lossy(),
                }],
            },
        }))
        .map_err(|e| Error::Internal(format!("failed to build pod manifest: {e}")))?;

        debug!(pod = %name, namespace = %self.namespace, "creating pod");
        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| Error::Execution(format!("failed to create pod: {e}")))?;

        let result = Self::run_in_pod(&pods, &name, script).await;

        if let Err(e) = pods.delete(&name, &DeleteParams::default()).await {
            warn!(pod = %name, error = %e, "failed to delete pod after run");
        }

        let (exit_code, stdout, stderr) = result?;
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

impl KubernetesLauncher {
    async fn run_in_pod(
        pods: &Api<Pod>,
        name: &str,
        script: &str,
    ) -> Result<(i32, Vec<u8>, Vec<u8>)> {
        Self::wait_until_running(pods, name).await?;

        let attach_params = AttachParams::default()
            .stdout(true)
            .stderr(true)
            .container("step");
        let mut attached = pods
            .exec(name, vec!["sh", "-c", script], &attach_params)
            .await
            .map_err(|e| Error::Execution(format!("exec into pod {name} failed: {e}")))?;

        let mut stdout = Vec::new();
        if let Some(mut stream) = attached.stdout().map(|s| s.boxed()) {
            let _ = stream.read_to_end(&mut stdout).await;
        }
        let mut stderr = Vec::new();
        if let Some(mut stream) = attached.stderr().map(|s| s.boxed()) {
            let _ = stream.read_to_end(&mut stderr).await;
        }

        let status = match attached.take_status() {
            Some(fut) => fut.await,
            None => None,
        };
        let exit_code = match status {
            Some(status) if status.status.as_deref() == Some("Success") => 0,
            Some(status) => status
                .details
                .and_then(|d| d.causes)
                .and_then(|causes| causes.into_iter().find_map(|c| c.message))
                .and_then(|msg| msg.parse::<i32>().ok())
                .unwrap_or(1),
            None => 0,
        };

        Ok((exit_code, stdout, stderr))
    }
}
