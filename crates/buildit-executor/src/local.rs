//! Local process `CommandLauncher` (C3) — runs a step's script as a shell
//! subprocess on the host the engine is running on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use buildit_core::{CommandLauncher, CommandOutput, Error, LauncherKind, Result};

/// Runs scripts through `/bin/sh -c` (or `cmd /C` on Windows) in a child
/// process, inheriting none of the parent's environment beyond what's
/// explicitly passed in `env`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalLauncher;

impl LocalLauncher {
    pub fn new() -> Self {
        Self
    }

    #[cfg(unix)]
    fn shell_command(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(windows)]
    fn shell_command(script: &str) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(script);
        cmd
    }
}

#[async_trait]
impl CommandLauncher for LocalLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Local
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run(
        &self,
        script: &str,
        work_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput> {
        let started = Instant::now();
        let mut cmd = Self::shell_command(script);
        cmd.current_dir(work_dir)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Execution(format!("failed to spawn shell: {e}")))?;

        // Stdout and stderr are drained concurrently: reading one to
        // completion before touching the other can deadlock once either
        // pipe's OS buffer fills while the process is still writing to both.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_fut = async {
            let mut buf = Vec::new();
            if let Some(out) = stdout_pipe.as_mut() {
                out.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let stderr_fut = async {
            let mut buf = Vec::new();
            if let Some(err) = stderr_pipe.as_mut() {
                err.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let (stdout, stderr) = tokio::try_join!(stdout_fut, stderr_fut)
            .map_err(|e| Error::Execution(format!("failed to read child output: {e}")))?;

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Execution(format!("failed to wait for child: {e}")))?;

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_reports_success_and_captures_stdout() {
        let launcher = LocalLauncher::new();
        let output = launcher
            .run("echo hello", &std::env::temp_dir(), &HashMap::new())
            .await
            .unwrap();
        assert!(output.is_success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let launcher = LocalLauncher::new();
        let output = launcher
            .run("exit 7", &std::env::temp_dir(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 7);
        assert!(!output.is_success());
    }
}
