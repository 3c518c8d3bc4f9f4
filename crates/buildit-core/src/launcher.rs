//! The `CommandLauncher` contract (C3, §6).
//!
//! This is the sole collaborator boundary for running step work: the engine
//! itself never spawns a process, container, or pod. Concrete launchers
//! (local process, Docker, Kubernetes, SSH, a CI agent) live outside this
//! crate and are supplied by the embedder.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// What kind of launcher is in play, surfaced in step result metadata
/// (§4.4 step 7) so observability can tell which backend ran a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherKind {
    Local,
    Docker,
    Kubernetes,
    Ssh,
    Agent,
}

impl LauncherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LauncherKind::Local => "local",
            LauncherKind::Docker => "docker",
            LauncherKind::Kubernetes => "kubernetes",
            LauncherKind::Ssh => "ssh",
            LauncherKind::Agent => "agent",
        }
    }
}

/// Output of a single `run` invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_ms: i64,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Abstraction over local/docker/k8s execution (§6). Implementations must
/// not mutate `env`/`work_dir` observably, must fully consume output
/// streams before returning, and must terminate the underlying process
/// within a bounded delay when the caller is cancelled.
#[async_trait]
pub trait CommandLauncher: Send + Sync {
    fn kind(&self) -> LauncherKind;

    /// Whether this launcher's backend is currently reachable.
    async fn is_available(&self) -> bool;

    async fn run(
        &self,
        script: &str,
        work_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput>;
}
