//! The stage executor (C8, §4.5): evaluates `stage.when`, merges
//! environment and agent, iterates steps in order through the step
//! executor, runs post-actions, and publishes lifecycle events.

use std::collections::HashMap;
use std::sync::Arc;

use buildit_core::{
    Agent, Error, ExecutionContext, PostAction, PostActionScope, Stage, StageResult, StageStatus,
    StepResult, StepStatus,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::event_bus::{Event, EventBus, ScopedEventPublisher};

/// Resolves an effective `Agent` to a launcher, so the stage executor can
/// honor §4.7 ("the launcher is expected to be configured coherently with
/// the agent kind before execution") without this crate needing to know
/// about Docker/Kubernetes/local launcher construction itself. An embedder
/// not supplying one simply runs every stage under the context's existing
/// launcher, which satisfies `Agent::Any`.
pub trait AgentResolver: Send + Sync {
    fn resolve(&self, agent: &Agent) -> Option<Arc<dyn buildit_core::CommandLauncher>>;
}

/// Picks the effective agent per §4.7: stage wins, else the pipeline's,
/// else `Agent::Any`.
pub fn effective_agent<'a>(stage: &'a Stage, pipeline_agent: Option<&'a Agent>) -> &'a Agent {
    stage
        .agent
        .as_ref()
        .or(pipeline_agent)
        .unwrap_or(&Agent::Any)
}

fn error_to_step_result(tag: &str, err: &Error) -> StepResult {
    let now = Utc::now();
    let status = if err.is_cancelled() {
        StepStatus::Cancelled
    } else if err.is_timeout() {
        StepStatus::Timeout
    } else if matches!(err, Error::Validation(_)) {
        StepStatus::ValidationFailed
    } else {
        StepStatus::Failure
    };
    StepResult::leaf(status, now, now).with_error(format!("{tag}: {err}"))
}

/// Runs `stage` to completion. `previous_outcome` is the prior recorded
/// status of a stage with this name, if the embedder tracks per-pipeline
/// history across invocations; `Changed` post-actions never fire without
/// one, since this runtime keeps no history of its own (persistence across
/// runs is out of scope).
pub async fn execute_stage(
    stage: &Stage,
    pipeline_agent: Option<&Agent>,
    ctx: &ExecutionContext,
    bus: &Arc<EventBus>,
    agent_resolver: Option<&dyn AgentResolver>,
    previous_outcome: Option<StageStatus>,
) -> StageResult {
    let execution_id = ctx.execution_id;

    if let Some(when) = &stage.when {
        if !when.evaluate(ctx) {
            info!(stage = %stage.name, "stage skipped, when condition false");
            let result = StageResult::skipped(stage.name.clone(), "when condition evaluated false");
            bus.publish(Event::StageCompleted {
                execution_id,
                timestamp: Utc::now(),
                result: Box::new(result.clone()),
            });
            return result;
        }
    }

    let merged_env: Vec<(String, String)> = stage
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut derived = ctx.with_merged_env(&merged_env);

    let agent = effective_agent(stage, pipeline_agent);
    if !matches!(agent, Agent::Any) {
        if let Some(resolver) = agent_resolver {
            if let Some(launcher) = resolver.resolve(agent) {
                derived = derived.copy(None, None, Some(launcher));
            } else {
                warn!(stage = %stage.name, ?agent, "no launcher resolved for agent, keeping inherited launcher");
            }
        }
    }

    let publisher = Arc::new(ScopedEventPublisher::new(
        bus.clone(),
        execution_id,
        stage.name.clone(),
    ));
    let derived = derived.with_event_publisher(publisher);

    bus.publish(Event::StageStarted {
        execution_id,
        timestamp: Utc::now(),
        stage_name: stage.name.clone(),
    });

    let started_at = Utc::now();
    let mut step_results = Vec::with_capacity(stage.steps.len());
    for step in &stage.steps {
        let tag = step.variant_tag();
        let result = match derived.step_executor().execute_step(step, &derived).await {
            Ok(result) => result,
            Err(err) => error_to_step_result(tag, &err),
        };
        let should_stop = stage.fail_fast && result.status.is_failure_like();
        step_results.push(result);
        if should_stop {
            break;
        }
    }
    let ended_at = Utc::now();

    let status = StageStatus::from_step_statuses(step_results.iter().map(|r| &r.status));
    let changed = previous_outcome.map(|prev| prev != status).unwrap_or(false);

    let mut post_results = Vec::new();
    let (cleanup_actions, other_actions): (Vec<&PostAction>, Vec<&PostAction>) = stage
        .post_actions
        .iter()
        .partition(|action| action.scope == PostActionScope::Cleanup);
    for action in other_actions.into_iter().chain(cleanup_actions) {
        let applies = match action.scope {
            PostActionScope::Always => true,
            PostActionScope::Success => status.is_success(),
            PostActionScope::Failure => status == StageStatus::Failure,
            PostActionScope::Changed => changed,
            PostActionScope::Cleanup => true,
        };
        if !applies {
            continue;
        }
        for step in &action.steps {
            let tag = step.variant_tag();
            let result = match derived.step_executor().execute_step(step, &derived).await {
                Ok(result) => result,
                Err(err) => error_to_step_result(tag, &err),
            };
            if result.status.is_failure_like() {
                warn!(stage = %stage.name, scope = ?action.scope, "post-action step failed");
            }
            post_results.push(result);
        }
    }

    let mut metadata = HashMap::new();
    if changed {
        metadata.insert("stage_changed".to_string(), serde_json::json!(true));
    }

    let result = StageResult {
        name: stage.name.clone(),
        status,
        started_at: Some(started_at),
        ended_at: Some(ended_at),
        duration: (ended_at - started_at).to_std().unwrap_or_default(),
        steps: step_results,
        post_actions: post_results,
        metadata,
    };

    info!(stage = %stage.name, status = ?result.status, "stage completed");
    bus.publish(Event::StageCompleted {
        execution_id,
        timestamp: Utc::now(),
        result: Box::new(result.clone()),
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_core::model::Step;

    fn stage_with_steps(steps: Vec<Step>) -> Stage {
        Stage::builder("build").steps(steps).build()
    }

    #[tokio::test]
    async fn skipped_when_when_condition_false() {
        let stage = Stage::builder("build")
            .step(Step::echo("hi"))
            .when(buildit_core::WhenCondition::Environment {
                name: "NEVER".to_string(),
                value: "set".to_string(),
            })
            .build();
        let ctx = ExecutionContext::new_for_test();
        let bus = Arc::new(EventBus::new(8));
        let result = execute_stage(&stage, None, &ctx, &bus, None, None).await;
        assert_eq!(result.status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn fail_fast_stops_remaining_steps() {
        let stage = Stage::builder("build")
            .steps(vec![Step::echo("a"), Step::echo("b")])
            .fail_fast(true)
            .build();
        let ctx = ExecutionContext::new_for_test();
        let bus = Arc::new(EventBus::new(8));
        let result = execute_stage(&stage, None, &ctx, &bus, None, None).await;
        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_post_action_always_runs() {
        let stage = stage_with_steps(vec![Step::echo("a")])
            .clone();
        let mut stage = stage;
        stage.post_actions.push(PostAction {
            scope: PostActionScope::Cleanup,
            steps: vec![Step::echo("cleanup")],
        });
        let ctx = ExecutionContext::new_for_test();
        let bus = Arc::new(EventBus::new(8));
        let result = execute_stage(&stage, None, &ctx, &bus, None, None).await;
        assert_eq!(result.post_actions.len(), 1);
    }

    #[tokio::test]
    async fn changed_post_action_fires_when_outcome_differs_from_prior() {
        let mut stage = stage_with_steps(vec![Step::echo("a")]);
        stage.post_actions.push(PostAction {
            scope: PostActionScope::Changed,
            steps: vec![Step::echo("notify")],
        });
        let ctx = ExecutionContext::new_for_test();
        let bus = Arc::new(EventBus::new(8));
        let result = execute_stage(
            &stage,
            None,
            &ctx,
            &bus,
            None,
            Some(StageStatus::Failure),
        )
        .await;
        assert_eq!(result.post_actions.len(), 1);
    }

    #[tokio::test]
    async fn changed_post_action_does_not_fire_without_prior_outcome() {
        let mut stage = stage_with_steps(vec![Step::echo("a")]);
        stage.post_actions.push(PostAction {
            scope: PostActionScope::Changed,
            steps: vec![Step::echo("notify")],
        });
        let ctx = ExecutionContext::new_for_test();
        let bus = Arc::new(EventBus::new(8));
        let result = execute_stage(&stage, None, &ctx, &bus, None, None).await;
        assert!(result.post_actions.is_empty());
    }
}
