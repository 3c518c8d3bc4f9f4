//! Built-in step handlers (C6).
//!
//! Each handler implements the four-phase lifecycle the step executor (C7)
//! drives it through: `validate` (structural, no I/O), `prepare` (acquire
//! resources / resolve paths), `execute` (do the work), `cleanup` (always
//! runs, even on failure or cancellation). Leaf handlers (`Shell`, `Echo`,
//! `ArchiveArtifacts`, `PublishTestResults`, `Stash`, `Unstash`) do the
//! actual work; composite handlers (`Dir`, `WithEnv`, `Parallel`, `Retry`,
//! `Timeout`) recurse into nested steps via `ctx.step_executor()`.

use async_trait::async_trait;
use chrono::Utc;
use glob::glob;
use std::sync::Arc;

use buildit_core::{Error, ExecutionContext, Result, Step, StepResult, StepStatus};

/// A handler for one step variant, registered under that variant's
/// `variant_tag()` in the `StepHandlerRegistry`.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Structural validation independent of any context. Default
    /// delegates to `Step::validate`.
    fn validate(&self, step: &Step) -> Result<()> {
        step.validate().map_err(Error::Validation)
    }

    /// Resource acquisition ahead of `execute`. Most handlers need none;
    /// the default is a no-op.
    async fn prepare(&self, _step: &Step, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult>;

    /// Runs after `execute`, win or lose. Most handlers need none.
    async fn cleanup(&self, _step: &Step, _ctx: &ExecutionContext, _result: &StepResult) {}
}

/// Runs a handler through its full four-phase lifecycle.
pub async fn run_handler(
    handler: &dyn StepHandler,
    step: &Step,
    ctx: &ExecutionContext,
) -> Result<StepResult> {
    handler.validate(step).map_err(|e| {
        ctx.logger().error(&e.to_string(), &Default::default());
        e
    })?;
    handler.prepare(step, ctx).await?;
    let result = handler.execute(step, ctx).await;
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            let now = Utc::now();
            StepResult::leaf(classify_status(&e), now, now).with_error(e.to_string())
        }
    };
    handler.cleanup(step, ctx, &result).await;
    Ok(result)
}

fn classify_status(err: &Error) -> StepStatus {
    if err.is_cancelled() {
        StepStatus::Cancelled
    } else if err.is_timeout() {
        StepStatus::Timeout
    } else if matches!(err, Error::Validation(_)) {
        StepStatus::ValidationFailed
    } else {
        StepStatus::Failure
    }
}

/// Sequentially executes `steps` through `ctx.step_executor()`, stopping at
/// the first non-success result (fail-fast), and rolls the results up into
/// a single composite `StepResult`.
async fn execute_sequence(steps: &[Step], ctx: &ExecutionContext) -> Result<StepResult> {
    let started_at = Utc::now();
    let mut nested = Vec::with_capacity(steps.len());
    let mut failed = false;
    for step in steps {
        let r = ctx.step_executor().execute_step(step, ctx).await?;
        let is_success = r.status.is_success();
        nested.push(r);
        if !is_success {
            failed = true;
            break;
        }
    }
    let ended_at = Utc::now();
    let status = if failed {
        // Propagate the concrete terminal status of the failing nested step.
        nested.last().map(|r| r.status).unwrap_or(StepStatus::Failure)
    } else {
        StepStatus::Success
    };
    Ok(StepResult::leaf(status, started_at, ended_at).with_nested(nested))
}

pub struct EchoHandler;

#[async_trait]
impl StepHandler for EchoHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Echo { message } = step else {
            return Err(Error::Internal("EchoHandler given non-Echo step".into()));
        };
        let started_at = Utc::now();
        ctx.logger().stdout(message);
        let ended_at = Utc::now();
        Ok(StepResult::leaf(StepStatus::Success, started_at, ended_at))
    }
}

/// Default cap on captured stdout/stderr per shell step (§4.2: "bounded
/// buffer (default 1 MiB, configurable)").
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Keeps only the last `max_bytes` of `data`, prefixing a truncation marker
/// when bytes were dropped (§4.2 "on overflow, oldest bytes retained with a
/// truncation marker").
fn bounded_tail(data: &[u8], max_bytes: usize) -> Vec<u8> {
    if data.len() <= max_bytes {
        return data.to_vec();
    }
    let marker = format!(
        "...[truncated {} bytes]...\n",
        data.len() - max_bytes
    );
    let mut out = Vec::with_capacity(marker.len() + max_bytes);
    out.extend_from_slice(marker.as_bytes());
    out.extend_from_slice(&data[data.len() - max_bytes..]);
    out
}

pub struct ShellHandler {
    max_output_bytes: usize,
}

impl ShellHandler {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

impl Default for ShellHandler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

#[async_trait]
impl StepHandler for ShellHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Shell { script, timeout, .. } = step else {
            return Err(Error::Internal("ShellHandler given non-Shell step".into()));
        };
        let started_at = Utc::now();
        let run = ctx.launcher().run(script, ctx.work_dir(), ctx.environment());
        let output = match timeout {
            Some(d) => tokio::time::timeout(*d, run)
                .await
                .map_err(|_| Error::Timeout(format!("shell step exceeded {:?}", d)))??,
            None => run.await?,
        };
        let ended_at = Utc::now();
        let stdout = bounded_tail(&output.stdout, self.max_output_bytes);
        let stderr = bounded_tail(&output.stderr, self.max_output_bytes);
        ctx.logger().stdout(&String::from_utf8_lossy(&stdout));
        if !stderr.is_empty() {
            ctx.logger().stderr(&String::from_utf8_lossy(&stderr));
        }
        let status = if output.is_success() {
            StepStatus::Success
        } else {
            StepStatus::Failure
        };
        let mut result = StepResult::leaf(status, started_at, ended_at)
            .with_metadata("exit_code", serde_json::json!(output.exit_code));
        if !output.is_success() {
            result = result.with_error(format!("exit code {}", output.exit_code));
        }
        Ok(result)
    }
}

pub struct DirHandler;

#[async_trait]
impl StepHandler for DirHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Dir { path, steps } = step else {
            return Err(Error::Internal("DirHandler given non-Dir step".into()));
        };
        let new_dir = ctx.work_dir().join(path);
        let derived = ctx.copy(Some(new_dir), None, None);
        execute_sequence(steps, &derived).await
    }
}

pub struct WithEnvHandler;

#[async_trait]
impl StepHandler for WithEnvHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::WithEnv { variables, steps } = step else {
            return Err(Error::Internal("WithEnvHandler given non-WithEnv step".into()));
        };
        let derived = ctx.with_merged_env(variables);
        execute_sequence(steps, &derived).await
    }
}

pub struct RetryHandler;

#[async_trait]
impl StepHandler for RetryHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Retry { times, steps } = step else {
            return Err(Error::Internal("RetryHandler given non-Retry step".into()));
        };
        let started_at = Utc::now();
        let mut attempts = Vec::new();
        let mut last = None;
        for attempt in 0..*times {
            let r = execute_sequence(steps, ctx).await?;
            let succeeded = r.status.is_success();
            attempts.push(r.clone());
            last = Some(r);
            if succeeded {
                break;
            }
            ctx.logger().warn(
                &format!("retry attempt {}/{} failed", attempt + 1, times),
                &Default::default(),
            );
        }
        let ended_at = Utc::now();
        let status = last.as_ref().map(|r| r.status).unwrap_or(StepStatus::Failure);
        let attempt_count = attempts.len();
        Ok(StepResult::leaf(status, started_at, ended_at)
            .with_nested(attempts)
            .with_metadata("attemptCount", serde_json::json!(attempt_count))
            .with_metadata("retriesUsed", serde_json::json!(attempt_count.saturating_sub(1))))
    }
}

pub struct TimeoutHandler;

#[async_trait]
impl StepHandler for TimeoutHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Timeout { duration, steps } = step else {
            return Err(Error::Internal("TimeoutHandler given non-Timeout step".into()));
        };
        let started_at = Utc::now();
        match tokio::time::timeout(*duration, execute_sequence(steps, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                let ended_at = Utc::now();
                Ok(StepResult::leaf(StepStatus::Timeout, started_at, ended_at)
                    .with_error(format!("step exceeded {:?}", duration)))
            }
        }
    }
}

pub struct ParallelHandler;

#[async_trait]
impl StepHandler for ParallelHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Parallel { branches, fail_fast } = step else {
            return Err(Error::Internal("ParallelHandler given non-Parallel step".into()));
        };
        let started_at = Utc::now();
        let cancel = Arc::new(tokio::sync::Notify::new());
        let mut handles = Vec::with_capacity(branches.len());
        for (name, steps) in branches {
            ctx.event_publisher().branch_started(name);
            let ctx = ctx.clone();
            let steps = steps.clone();
            let name = name.clone();
            let cancel = cancel.clone();
            let fail_fast = *fail_fast;
            handles.push(tokio::spawn(async move {
                if fail_fast {
                    tokio::select! {
                        result = execute_sequence(&steps, &ctx) => (name, result),
                        _ = cancel.notified() => {
                            let now = Utc::now();
                            (name, Ok(StepResult::leaf(StepStatus::Cancelled, now, now)))
                        }
                    }
                } else {
                    (name, execute_sequence(&steps, &ctx).await)
                }
            }));
        }

        let mut nested = Vec::with_capacity(handles.len());
        let mut any_failed = false;
        for handle in handles {
            let (name, result) = handle
                .await
                .map_err(|e| Error::Internal(format!("parallel branch panicked: {e}")))?;
            let result = result?;
            if !result.status.is_success() {
                any_failed = true;
                if *fail_fast {
                    cancel.notify_waiters();
                }
            }
            ctx.event_publisher().branch_completed(&name, &result);
            nested.push(result);
        }
        let ended_at = Utc::now();
        let status = if any_failed { StepStatus::Failure } else { StepStatus::Success };
        Ok(StepResult::leaf(status, started_at, ended_at).with_nested(nested))
    }
}

pub struct ArchiveArtifactsHandler;

#[async_trait]
impl StepHandler for ArchiveArtifactsHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::ArchiveArtifacts { pattern, allow_empty, fingerprint } = step else {
            return Err(Error::Internal("ArchiveArtifactsHandler given wrong step".into()));
        };
        let started_at = Utc::now();
        let full_pattern = ctx.work_dir().join(pattern);
        let matches = glob(&full_pattern.to_string_lossy())
            .map_err(|e| Error::Validation(format!("invalid archive pattern: {e}")))?
            .filter_map(|p| p.ok())
            .collect::<Vec<_>>();
        if matches.is_empty() && !allow_empty {
            return Err(Error::Execution(format!(
                "archiveArtifacts pattern {pattern:?} matched no files"
            )));
        }
        std::fs::create_dir_all(ctx.artifact_dir()).map_err(|e| Error::Execution(e.to_string()))?;
        let mut fingerprints = serde_json::Map::new();
        for path in &matches {
            if let Some(file_name) = path.file_name() {
                let dest = ctx.artifact_dir().join(file_name);
                std::fs::copy(path, &dest).map_err(|e| Error::Execution(e.to_string()))?;
                if *fingerprint {
                    if let Ok(bytes) = std::fs::read(path) {
                        use sha2::{Digest, Sha256};
                        let digest = Sha256::digest(&bytes);
                        fingerprints.insert(
                            file_name.to_string_lossy().to_string(),
                            serde_json::Value::String(hex::encode(digest)),
                        );
                    }
                }
            }
        }
        let ended_at = Utc::now();
        let mut result = StepResult::leaf(StepStatus::Success, started_at, ended_at)
            .with_metadata("archived_count", serde_json::json!(matches.len()));
        if *fingerprint {
            result = result.with_metadata("fingerprints", serde_json::Value::Object(fingerprints));
        }
        Ok(result)
    }
}

pub struct PublishTestResultsHandler;

#[async_trait]
impl StepHandler for PublishTestResultsHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::PublishTestResults { pattern, allow_empty } = step else {
            return Err(Error::Internal("PublishTestResultsHandler given wrong step".into()));
        };
        let started_at = Utc::now();
        let full_pattern = ctx.work_dir().join(pattern);
        let matches = glob(&full_pattern.to_string_lossy())
            .map_err(|e| Error::Validation(format!("invalid test results pattern: {e}")))?
            .filter_map(|p| p.ok())
            .collect::<Vec<_>>();
        if matches.is_empty() && !allow_empty {
            return Err(Error::Execution(format!(
                "publishTestResults pattern {pattern:?} matched no files"
            )));
        }
        let ended_at = Utc::now();
        Ok(StepResult::leaf(StepStatus::Success, started_at, ended_at)
            .with_metadata("report_count", serde_json::json!(matches.len())))
    }
}

pub struct StashHandler;

#[async_trait]
impl StepHandler for StashHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Stash { name, includes, excludes } = step else {
            return Err(Error::Internal("StashHandler given non-Stash step".into()));
        };
        let started_at = Utc::now();
        ctx.stash_store()
            .stash(name, ctx.work_dir(), includes, excludes)
            .await?;
        let ended_at = Utc::now();
        Ok(StepResult::leaf(StepStatus::Success, started_at, ended_at))
    }
}

pub struct UnstashHandler;

#[async_trait]
impl StepHandler for UnstashHandler {
    async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let Step::Unstash { name } = step else {
            return Err(Error::Internal("UnstashHandler given non-Unstash step".into()));
        };
        let started_at = Utc::now();
        ctx.stash_store().unstash(name, ctx.work_dir()).await?;
        let ended_at = Utc::now();
        Ok(StepResult::leaf(StepStatus::Success, started_at, ended_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_core::ExecutionContext;

    #[test]
    fn bounded_tail_passes_through_short_input() {
        let data = b"hello";
        assert_eq!(bounded_tail(data, 1024), data.to_vec());
    }

    #[test]
    fn bounded_tail_keeps_newest_bytes_and_marks_truncation() {
        let data = vec![b'a'; 100];
        let out = bounded_tail(&data, 10);
        assert!(out.len() > 10);
        assert!(out.ends_with(&vec![b'a'; 10][..]));
        assert!(String::from_utf8_lossy(&out).contains("truncated"));
    }

    #[tokio::test]
    async fn echo_handler_succeeds() {
        let ctx = ExecutionContext::new_for_test();
        let step = Step::echo("hello");
        let result = run_handler(&EchoHandler, &step, &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);
    }
}
