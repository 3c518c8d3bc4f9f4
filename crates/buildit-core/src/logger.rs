//! The `Logger` contract (§6) and its default `tracing`-backed implementation.

use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe logging sink handed to every handler invocation via
/// `ExecutionContext`. Output may be interleaved across threads.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str, metadata: &HashMap<String, String>);
    fn warn(&self, msg: &str, metadata: &HashMap<String, String>);
    fn error(&self, msg: &str, metadata: &HashMap<String, String>);
    fn debug(&self, msg: &str, metadata: &HashMap<String, String>);
    fn stdout(&self, line: &str);
    fn stderr(&self, line: &str);
    fn start_section(&self, name: &str);
    fn end_section(&self);
}

/// Default `Logger` forwarding to `tracing` spans/events, matching the
/// rest of the workspace's choice of `tracing` for structured logging.
#[derive(Default)]
pub struct TracingLogger {
    section: Mutex<Vec<String>>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_section(&self) -> Option<String> {
        self.section.lock().unwrap().last().cloned()
    }
}

impl Logger for TracingLogger {
    fn info(&self, msg: &str, metadata: &HashMap<String, String>) {
        tracing::info!(section = self.current_section(), ?metadata, "{}", msg);
    }

    fn warn(&self, msg: &str, metadata: &HashMap<String, String>) {
        tracing::warn!(section = self.current_section(), ?metadata, "{}", msg);
    }

    fn error(&self, msg: &str, metadata: &HashMap<String, String>) {
        tracing::error!(section = self.current_section(), ?metadata, "{}", msg);
    }

    fn debug(&self, msg: &str, metadata: &HashMap<String, String>) {
        tracing::debug!(section = self.current_section(), ?metadata, "{}", msg);
    }

    fn stdout(&self, line: &str) {
        tracing::info!(stream = "stdout", "{}", line);
    }

    fn stderr(&self, line: &str) {
        tracing::info!(stream = "stderr", "{}", line);
    }

    fn start_section(&self, name: &str) {
        self.section.lock().unwrap().push(name.to_string());
    }

    fn end_section(&self) {
        self.section.lock().unwrap().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_stack_nests_and_pops() {
        let logger = TracingLogger::new();
        logger.start_section("outer");
        logger.start_section("inner");
        assert_eq!(logger.current_section(), Some("inner".to_string()));
        logger.end_section();
        assert_eq!(logger.current_section(), Some("outer".to_string()));
        logger.end_section();
        assert_eq!(logger.current_section(), None);
    }
}
