//! Agent selection (§3, §4.7).

use std::collections::HashMap;

/// Where a stage or pipeline should run. The engine does not interpret an
/// agent beyond selecting a `CommandLauncher`; it is the embedder's job to
/// configure a launcher coherently with the agent kind (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Agent {
    /// Any available agent; no constraint.
    Any,
    /// No agent; steps that need one will fail validation.
    None,
    /// A named label selector.
    Label { name: String },
    /// Run inside a Docker container.
    Docker {
        image: String,
        args: Vec<String>,
        volumes: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Run inside a Kubernetes pod defined by a pod-template YAML document.
    Kubernetes { yaml: String, namespace: String },
}

impl Default for Agent {
    fn default() -> Self {
        Agent::Any
    }
}
