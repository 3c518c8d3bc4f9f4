//! Docker `CommandLauncher` (C3) — runs a step's script inside a
//! short-lived container, the development/small-deployment backend the
//! teacher workspace used for its `Executor` contract, adapted to the
//! run-a-script contract this engine requires instead of spawn/logs/wait.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use buildit_core::{CommandLauncher, CommandOutput, Error, LauncherKind, Result};

const CONTAINER_WORKDIR: &str = "/workspace";

/// Runs each script in a fresh container from `image`, mounting the step's
/// `work_dir` at `/workspace`. One container per `run` call; the container
/// is always removed afterwards, success or failure.
pub struct DockerLauncher {
    docker: Docker,
    image: String,
}

impl DockerLauncher {
    pub fn new(image: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Internal(format!("failed to connect to docker: {e}")))?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    pub fn with_client(docker: Docker, image: impl Into<String>) -> Self {
        Self {
            docker,
            image: image.into(),
        }
    }

    fn container_name() -> String {
        format!("buildit-step-{}", uuid::Uuid::now_v7())
    }

    async fn collect_logs(&self, container_id: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        use bollard::container::LogOutput;
        use bollard::container::LogsOptions;

        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                follow: false,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    stdout.extend_from_slice(&message)
                }
                Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => warn!(error = %e, "log stream error"),
            }
        }
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl CommandLauncher for DockerLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Docker
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn run(
        &self,
        script: &str,
        work_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput> {
        let started = Instant::now();
        let container_name = Self::container_name();

        info!(image = %self.image, "pulling image");
        let mut pull_stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: self.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = pull_stream.next().await {
            if let Err(e) = result {
                warn!(error = %e, "image pull warning, continuing (image may already be local)");
            }
        }

        let env_list: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                work_dir.to_string_lossy(),
                CONTAINER_WORKDIR
            )]),
            ..Default::default()
        };
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]),
            env: Some(env_list),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        debug!(container = %container_name, "creating container");
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::Execution(format!("failed to create container: {e}")))?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Execution(format!("failed to start container: {e}")))?;

        let mut wait_stream = self
            .docker
            .wait_container(&container.id, None::<WaitContainerOptions<String>>);
        let mut exit_code = -1;
        while let Some(result) = wait_stream.next().await {
            match result {
                Ok(response) => exit_code = response.status_code as i32,
                Err(e) => {
                    return Err(Error::Execution(format!("container wait failed: {e}")));
                }
            }
        }

        let (stdout, stderr) = self.collect_logs(&container.id).await?;

        self.docker
            .remove_container(
                &container.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::Execution(format!("failed to remove container: {e}")))?;

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}
