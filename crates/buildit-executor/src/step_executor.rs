//! The step executor (C7, §4.4).
//!
//! Given a `Step` and an `ExecutionContext`, selects a workload-class
//! dispatcher, resolves a handler from the registry (falling back to a
//! built-in legacy implementation when none is registered), and drives the
//! handler through its four-phase lifecycle under an effective timeout.
//! Implements `StepExecutorHandle` so composite handlers (`Dir`, `Retry`,
//! `Parallel`, ...) can recurse into it through `ctx.step_executor()`
//! without this crate depending on whatever owns the concrete context.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use buildit_core::{
    DispatchPermit, Error, ExecutionContext, Result, Step, StepExecutorHandle, StepResult,
    StepStatus, UnboundedDispatcher, WorkloadClass, WorkloadDispatcher,
};

use crate::handler::{
    ArchiveArtifactsHandler, DirHandler, EchoHandler, ParallelHandler, PublishTestResultsHandler,
    RetryHandler, ShellHandler, StashHandler, StepHandler, TimeoutHandler, UnstashHandler,
    WithEnvHandler, run_handler,
};
use crate::registry::StepHandlerRegistry;

/// `(pattern, class)` pairs evaluated in order against a shell step's
/// script; first match wins, default `Default` (§4.4 step 1, SPEC_FULL
/// §11). Grounded in the source workspace's `LazyLock`-compiled-regex
/// convention (`buildit-config::variables::VAR_REGEX`).
static WORKLOAD_TABLE: LazyLock<Vec<(Regex, WorkloadClass)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\b(cargo build|make|mvn|gradle|gcc|rustc|javac|go build|tsc)\b")
                .unwrap(),
            WorkloadClass::Cpu,
        ),
        (
            Regex::new(r"(?i)\b(curl|wget|git clone|git fetch|docker pull|docker push|scp|rsync)\b")
                .unwrap(),
            WorkloadClass::Network,
        ),
        (
            Regex::new(r"(?i)\b(cp|mv|rm|tar|zip|unzip|grep|find|cat|mkdir)\b").unwrap(),
            WorkloadClass::Io,
        ),
        (
            Regex::new(r"(?i)\b(sleep|wait)\b").unwrap(),
            WorkloadClass::Blocking,
        ),
    ]
});

fn classify_shell(script: &str) -> WorkloadClass {
    WORKLOAD_TABLE
        .iter()
        .find(|(re, _)| re.is_match(script))
        .map(|(_, class)| *class)
        .unwrap_or(WorkloadClass::Default)
}

fn workload_class_of(step: &Step) -> WorkloadClass {
    match step {
        Step::Shell {
            workload_hint: Some(hint),
            ..
        } => *hint,
        Step::Shell { script, .. } => classify_shell(script),
        Step::ArchiveArtifacts { .. } | Step::PublishTestResults { .. } => WorkloadClass::Io,
        Step::Stash { .. } | Step::Unstash { .. } => WorkloadClass::Io,
        Step::Dir { .. }
        | Step::WithEnv { .. }
        | Step::Parallel { .. }
        | Step::Retry { .. }
        | Step::Timeout { .. }
        | Step::Echo { .. } => WorkloadClass::System,
    }
}

/// The step executor. Owns the handler registry and a workload dispatcher;
/// both are injectable (§9 "global mutable state... must allow injection").
pub struct StepExecutor {
    registry: StepHandlerRegistry,
    dispatcher: std::sync::Arc<dyn WorkloadDispatcher>,
    default_step_timeout: Option<Duration>,
}

impl StepExecutor {
    pub fn new(registry: StepHandlerRegistry) -> Self {
        Self {
            registry,
            dispatcher: std::sync::Arc::new(UnboundedDispatcher),
            default_step_timeout: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: std::sync::Arc<dyn WorkloadDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &StepHandlerRegistry {
        &self.registry
    }

    /// Looks up `tag` in the registry, falling back to the built-in legacy
    /// handler for that variant (§4.4 step 2). Returns `None` only for a
    /// tag this engine has never heard of, which is a fatal configuration
    /// error upstream.
    fn resolve_handler(&self, tag: &str) -> Option<std::sync::Arc<dyn StepHandler>> {
        if let Some(handler) = self.registry.get(tag) {
            return Some(handler);
        }
        let legacy: std::sync::Arc<dyn StepHandler> = match tag {
            "shell" => std::sync::Arc::new(ShellHandler::default()),
            "echo" => std::sync::Arc::new(EchoHandler),
            "dir" => std::sync::Arc::new(DirHandler),
            "withEnv" => std::sync::Arc::new(WithEnvHandler),
            "parallel" => std::sync::Arc::new(ParallelHandler),
            "retry" => std::sync::Arc::new(RetryHandler),
            "timeout" => std::sync::Arc::new(TimeoutHandler),
            "archiveArtifacts" => std::sync::Arc::new(ArchiveArtifactsHandler),
            "publishTestResults" => std::sync::Arc::new(PublishTestResultsHandler),
            "stash" => std::sync::Arc::new(StashHandler),
            "unstash" => std::sync::Arc::new(UnstashHandler),
            _ => return None,
        };
        Some(legacy)
    }

    /// Effective timeout for `step`: its own declared timeout if any,
    /// otherwise the configured default, otherwise none (§4.4 step 5).
    /// Only `Shell` and `Timeout` steps carry their own declared timeout;
    /// `Timeout` enforces its deadline itself inside the handler, so this
    /// only applies the *default* ceiling to steps that don't self-bound.
    fn effective_timeout(&self, step: &Step) -> Option<Duration> {
        match step {
            Step::Shell { timeout, .. } => timeout.or(self.default_step_timeout),
            Step::Timeout { .. } => None,
            _ => self.default_step_timeout,
        }
    }

    pub async fn execute(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        let class = workload_class_of(step);
        let _permit: DispatchPermit = self.dispatcher.acquire(class).await;

        let tag = step.variant_tag();
        let Some(handler) = self.resolve_handler(tag) else {
            let message = format!("no handler registered for step variant {tag:?} and no legacy fallback");
            ctx.logger().error(&message, &Default::default());
            ctx.event_publisher()
                .error_occurred(&message, serde_json::json!({ "step_tag": tag }));
            let now = Utc::now();
            return Ok(StepResult::leaf(StepStatus::Failure, now, now)
                .with_error(format!("fatal: unhandled step variant {tag:?}")));
        };

        ctx.event_publisher().step_started(tag);

        let deadline = self.effective_timeout(step);
        let result = match deadline {
            Some(d) if d > Duration::ZERO => {
                match tokio::time::timeout(d, run_handler(handler.as_ref(), step, ctx)).await {
                    Ok(inner) => inner?,
                    Err(_) => {
                        let now = Utc::now();
                        StepResult::leaf(StepStatus::Timeout, now, now)
                            .with_error(format!("step {tag:?} exceeded {d:?}"))
                    }
                }
            }
            _ => run_handler(handler.as_ref(), step, ctx).await?,
        };

        let result = result
            .with_metadata("dispatcher", serde_json::json!(class_name(class)))
            .with_metadata("launcher_kind", serde_json::json!(ctx.launcher().kind().as_str()))
            .with_metadata(
                "thread_id",
                serde_json::json!(format!("{:?}", std::thread::current().id())),
            );
        ctx.event_publisher().step_completed(&result);
        Ok(result)
    }
}

fn class_name(class: WorkloadClass) -> &'static str {
    match class {
        WorkloadClass::Cpu => "cpu",
        WorkloadClass::Io => "io",
        WorkloadClass::Network => "network",
        WorkloadClass::Blocking => "blocking",
        WorkloadClass::System => "system",
        WorkloadClass::Default => "default",
    }
}

#[async_trait]
impl StepExecutorHandle for StepExecutor {
    async fn execute_step(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepResult> {
        self.execute(step, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_build_commands_as_cpu() {
        assert_eq!(classify_shell("cargo build --release"), WorkloadClass::Cpu);
    }

    #[test]
    fn classifies_network_commands() {
        assert_eq!(classify_shell("curl -sSL https://example.com"), WorkloadClass::Network);
    }

    #[test]
    fn classifies_io_commands() {
        assert_eq!(classify_shell("tar -czf out.tgz ."), WorkloadClass::Io);
    }

    #[test]
    fn classifies_blocking_commands() {
        assert_eq!(classify_shell("sleep 5"), WorkloadClass::Blocking);
    }

    #[test]
    fn unrecognized_script_is_default_class() {
        assert_eq!(classify_shell("./run-my-thing.sh"), WorkloadClass::Default);
    }

    #[tokio::test]
    async fn missing_handler_yields_failure_not_panic() {
        let registry = StepHandlerRegistry::new();
        let executor = StepExecutor::new(registry);
        let ctx = ExecutionContext::new_for_test();
        // Construct a step whose tag we then pretend is unregistered by
        // clearing any legacy fallback path: here we just exercise a
        // normally-handled tag to confirm the happy path still works,
        // since `variant_tag` is closed over the `Step` enum and every
        // tag has a legacy handler by construction.
        let step = Step::echo("hi");
        let result = executor.execute(&step, &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);
    }
}
