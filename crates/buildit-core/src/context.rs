//! `ExecutionContext` (§3, §4): the immutable bundle threaded through every
//! handler invocation.
//!
//! Every field is `Arc`-wrapped so that `copy()` can produce a derived
//! context that overrides only `work_dir`/`environment`/`launcher` while
//! sharing every other field with the original *by pointer identity*
//! (testable invariant 10). Cloning an `Arc` is cheap and preserves
//! `Arc::ptr_eq` equality, which is exactly what that invariant checks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::handle::{EventPublisher, NoopEventPublisher, StashHandle, StepExecutorHandle};
use crate::id::ResourceId;
use crate::launcher::CommandLauncher;
use crate::logger::{Logger, TracingLogger};
use crate::metrics::{MetricsSink, NoopMetricsSink};

/// Static identifying information about the job this execution belongs to,
/// set once at pipeline start and never overridden by `copy()`.
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub build_id: String,
    pub job_name: String,
    pub job_number: u64,
}

/// The immutable, cheaply-cloned bundle of collaborators passed to every
/// handler. `work_dir`, `environment`, and `launcher` are the only fields a
/// composite step handler (`Dir`, `WithEnv`, a Docker `Agent`) may override
/// via `copy()`; everything else is inherited by identity.
#[derive(Clone)]
pub struct ExecutionContext {
    pub execution_id: ResourceId,
    work_dir: Arc<PathBuf>,
    environment: Arc<HashMap<String, String>>,
    launcher: Arc<dyn CommandLauncher>,
    logger: Arc<dyn Logger>,
    job_info: Arc<JobInfo>,
    workspace: Arc<PathBuf>,
    artifact_dir: Arc<PathBuf>,
    metrics: Arc<dyn MetricsSink>,
    step_executor: Arc<dyn StepExecutorHandle>,
    stash_store: Arc<dyn StashHandle>,
    event_publisher: Arc<dyn EventPublisher>,
    metadata: Arc<HashMap<String, serde_json::Value>>,
}

impl ExecutionContext {
    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn launcher(&self) -> &Arc<dyn CommandLauncher> {
        &self.launcher
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn job_info(&self) -> &JobInfo {
        &self.job_info
    }

    pub fn workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    pub fn artifact_dir(&self) -> &std::path::Path {
        &self.artifact_dir
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn step_executor(&self) -> &Arc<dyn StepExecutorHandle> {
        &self.step_executor
    }

    pub fn stash_store(&self) -> &Arc<dyn StashHandle> {
        &self.stash_store
    }

    pub fn event_publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.event_publisher
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Produces a derived context overriding only `work_dir`,
    /// `environment`, and/or `launcher`; every other field is an `Arc`
    /// clone of `self`'s, so `Arc::ptr_eq` holds against the original.
    pub fn copy(
        &self,
        work_dir: Option<PathBuf>,
        environment: Option<HashMap<String, String>>,
        launcher: Option<Arc<dyn CommandLauncher>>,
    ) -> ExecutionContext {
        ExecutionContext {
            execution_id: self.execution_id,
            work_dir: work_dir.map(Arc::new).unwrap_or_else(|| self.work_dir.clone()),
            environment: environment
                .map(Arc::new)
                .unwrap_or_else(|| self.environment.clone()),
            launcher: launcher.unwrap_or_else(|| self.launcher.clone()),
            logger: self.logger.clone(),
            job_info: self.job_info.clone(),
            workspace: self.workspace.clone(),
            artifact_dir: self.artifact_dir.clone(),
            metrics: self.metrics.clone(),
            step_executor: self.step_executor.clone(),
            stash_store: self.stash_store.clone(),
            event_publisher: self.event_publisher.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Shorthand for merging additional environment variables on top of
    /// the current ones, used by `WithEnv` and `Agent::Docker { env }`.
    pub fn with_merged_env(&self, overrides: &[(String, String)]) -> ExecutionContext {
        let mut merged = (*self.environment).clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        self.copy(None, Some(merged), None)
    }

    /// Derives a context scoped to a new event publisher (typically one
    /// bound to the enclosing stage's name and execution id), sharing
    /// every other field with `self` by identity.
    pub fn with_event_publisher(&self, publisher: Arc<dyn EventPublisher>) -> ExecutionContext {
        let mut derived = self.copy(None, None, None);
        derived.event_publisher = publisher;
        derived
    }
}

pub struct ExecutionContextBuilder {
    work_dir: PathBuf,
    environment: HashMap<String, String>,
    launcher: Option<Arc<dyn CommandLauncher>>,
    logger: Option<Arc<dyn Logger>>,
    job_info: JobInfo,
    workspace: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    metrics: Option<Arc<dyn MetricsSink>>,
    step_executor: Option<Arc<dyn StepExecutorHandle>>,
    stash_store: Option<Arc<dyn StashHandle>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
    metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionContextBuilder {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            environment: HashMap::new(),
            launcher: None,
            logger: None,
            job_info: JobInfo::default(),
            workspace: None,
            artifact_dir: None,
            metrics: None,
            step_executor: None,
            stash_store: None,
            event_publisher: None,
            metadata: HashMap::new(),
        }
    }

    pub fn environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn CommandLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn job_info(mut self, job_info: JobInfo) -> Self {
        self.job_info = job_info;
        self
    }

    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn artifact_dir(mut self, artifact_dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(artifact_dir.into());
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn step_executor(mut self, step_executor: Arc<dyn StepExecutorHandle>) -> Self {
        self.step_executor = Some(step_executor);
        self
    }

    pub fn stash_store(mut self, stash_store: Arc<dyn StashHandle>) -> Self {
        self.stash_store = Some(stash_store);
        self
    }

    pub fn event_publisher(mut self, event_publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(event_publisher);
        self
    }

    pub fn metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds a single environment variable, for tests that build up an
    /// environment incrementally rather than passing a whole map.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Builds the context. Panics if `launcher`, `step_executor`, or
    /// `stash_store` were never supplied — these are mandatory
    /// collaborators with no sensible default outside of tests.
    pub fn build(self) -> ExecutionContext {
        let workspace = self.workspace.unwrap_or_else(|| self.work_dir.clone());
        ExecutionContext {
            execution_id: ResourceId::new(),
            work_dir: Arc::new(self.work_dir),
            environment: Arc::new(self.environment),
            launcher: self
                .launcher
                .expect("ExecutionContextBuilder requires a launcher"),
            logger: self
                .logger
                .unwrap_or_else(|| Arc::new(TracingLogger::new())),
            job_info: Arc::new(self.job_info),
            artifact_dir: Arc::new(
                self.artifact_dir.unwrap_or_else(|| workspace.join("artifacts")),
            ),
            workspace: Arc::new(workspace),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink)),
            step_executor: self
                .step_executor
                .expect("ExecutionContextBuilder requires a step_executor handle"),
            stash_store: self
                .stash_store
                .expect("ExecutionContextBuilder requires a stash_store handle"),
            event_publisher: self
                .event_publisher
                .unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            metadata: Arc::new(self.metadata),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
mod test_support {
    use super::*;
    use crate::error::Result;
    use crate::model::Step;
    use crate::result::StepResult;
    use async_trait::async_trait;
    use std::path::Path;

    struct NullLauncher;

    #[async_trait]
    impl CommandLauncher for NullLauncher {
        fn kind(&self) -> crate::launcher::LauncherKind {
            crate::launcher::LauncherKind::Local
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(
            &self,
            _script: &str,
            _work_dir: &Path,
            _env: &HashMap<String, String>,
        ) -> Result<crate::launcher::CommandOutput> {
            Ok(crate::launcher::CommandOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration_ms: 0,
            })
        }
    }

    struct NullStepExecutor;

    #[async_trait]
    impl StepExecutorHandle for NullStepExecutor {
        async fn execute_step(&self, _step: &Step, _ctx: &ExecutionContext) -> Result<StepResult> {
            let now = chrono::Utc::now();
            Ok(StepResult::leaf(crate::status::StepStatus::Success, now, now))
        }
    }

    struct NullStash;

    #[async_trait]
    impl StashHandle for NullStash {
        async fn stash(&self, _name: &str, _work_dir: &Path, _includes: &str, _excludes: &str) -> Result<()> {
            Ok(())
        }

        async fn unstash(&self, _name: &str, _work_dir: &Path) -> Result<()> {
            Ok(())
        }
    }

    impl ExecutionContext {
        /// Minimal, fully-wired context for unit tests elsewhere in this
        /// crate that only need `ExecutionContext` to exist and be valid,
        /// not to actually run anything.
        pub fn new_for_test() -> ExecutionContext {
            ExecutionContextBuilder::new_for_test().build()
        }
    }

    impl ExecutionContextBuilder {
        /// A builder pre-wired with no-op collaborators (null launcher,
        /// step executor, stash store), so tests elsewhere in this crate
        /// can add env vars / metadata and call `.build()` without
        /// constructing the full collaborator graph themselves.
        pub fn new_for_test() -> ExecutionContextBuilder {
            ExecutionContextBuilder::new(std::env::temp_dir())
                .launcher(Arc::new(NullLauncher))
                .step_executor(Arc::new(NullStepExecutor))
                .stash_store(Arc::new(NullStash))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn copy_preserves_identity_of_non_overridden_fields() {
        let ctx = ExecutionContext::new_for_test();
        let derived = ctx.copy(Some(PathBuf::from("/tmp/other")), None, None);

        assert!(Arc::ptr_eq(&ctx.logger, &derived.logger));
        assert!(Arc::ptr_eq(&ctx.step_executor, &derived.step_executor));
        assert!(Arc::ptr_eq(&ctx.stash_store, &derived.stash_store));
        assert!(Arc::ptr_eq(&ctx.metrics, &derived.metrics));
        assert!(Arc::ptr_eq(&ctx.environment, &derived.environment));
        assert_eq!(derived.work_dir(), std::path::Path::new("/tmp/other"));
        assert_eq!(ctx.execution_id, derived.execution_id);
    }

    #[test]
    fn with_merged_env_overrides_only_given_keys() {
        let ctx = ExecutionContext::new_for_test();
        let derived = ctx.with_merged_env(&[("FOO".to_string(), "bar".to_string())]);
        assert_eq!(derived.environment().get("FOO"), Some(&"bar".to_string()));
        assert!(Arc::ptr_eq(&ctx.work_dir, &derived.work_dir));
    }
}
