//! Step handler registry (C5), built-in step handlers (C6), the step
//! executor (C7), and `CommandLauncher` (C3) backends for the BuildIt
//! pipeline engine.
//!
//! - `registry`/`handler` implement C5/C6: the variant-keyed strategy
//!   table and the per-variant four-phase lifecycle logic.
//! - `step_executor` implements C7: handler resolution (with legacy
//!   fallback), workload-class dispatch, and timeout enforcement.
//! - `local`/`docker`/`kubernetes` are example `CommandLauncher`
//!   implementations; embedders may supply their own instead.

pub mod docker;
pub mod handler;
pub mod kubernetes;
pub mod local;
pub mod registry;
pub mod step_executor;

pub use docker::DockerLauncher;
pub use handler::{
    ArchiveArtifactsHandler, DirHandler, EchoHandler, ParallelHandler, PublishTestResultsHandler,
    RetryHandler, ShellHandler, StashHandler, StepHandler, TimeoutHandler, UnstashHandler,
    WithEnvHandler, run_handler,
};
pub use kubernetes::KubernetesLauncher;
pub use local::LocalLauncher;
pub use registry::StepHandlerRegistry;
pub use step_executor::StepExecutor;

/// Installs the built-in handlers (§4.1 "default registration pass") into
/// `registry`. Idempotent; last-write-wins, so calling it twice is safe.
pub fn register_builtin_handlers(registry: &StepHandlerRegistry) {
    registry.register("shell", std::sync::Arc::new(ShellHandler::default()));
    registry.register("echo", std::sync::Arc::new(EchoHandler));
    registry.register("dir", std::sync::Arc::new(DirHandler));
    registry.register("withEnv", std::sync::Arc::new(WithEnvHandler));
    registry.register("parallel", std::sync::Arc::new(ParallelHandler));
    registry.register("retry", std::sync::Arc::new(RetryHandler));
    registry.register("timeout", std::sync::Arc::new(TimeoutHandler));
    registry.register("archiveArtifacts", std::sync::Arc::new(ArchiveArtifactsHandler));
    registry.register(
        "publishTestResults",
        std::sync::Arc::new(PublishTestResultsHandler),
    );
    registry.register("stash", std::sync::Arc::new(StashHandler));
    registry.register("unstash", std::sync::Arc::new(UnstashHandler));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builtin_handlers_populates_every_variant_tag() {
        let registry = StepHandlerRegistry::new();
        register_builtin_handlers(&registry);
        for tag in [
            "shell",
            "echo",
            "dir",
            "withEnv",
            "parallel",
            "retry",
            "timeout",
            "archiveArtifacts",
            "publishTestResults",
            "stash",
            "unstash",
        ] {
            assert!(registry.has(tag), "missing builtin handler for {tag}");
        }
    }
}
