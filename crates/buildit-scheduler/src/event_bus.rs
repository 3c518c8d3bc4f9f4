//! The event bus (C12, §6): in-process pub/sub of pipeline lifecycle
//! events over a bounded channel. Built on `tokio::sync::broadcast`, whose
//! built-in behavior — a full channel drops the oldest unread event and
//! tells lagging receivers how many they missed — is exactly the overflow
//! policy §6 asks for ("overflow drops the oldest event and records a
//! counter"); [`EventSubscription::recv`] turns that lag notification into
//! the counter increment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use buildit_core::{PipelineResult, ResourceId, StageResult, StepResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

/// A lifecycle event published by the pipeline/stage/step executors.
/// Every variant carries `execution_id` and `timestamp`; scope-specific
/// payload follows (§6).
#[derive(Debug, Clone)]
pub enum Event {
    PipelineStarted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        pipeline_id: String,
    },
    PipelineCompleted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        result: Box<PipelineResult>,
    },
    StageStarted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        stage_name: String,
    },
    StageCompleted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        result: Box<StageResult>,
    },
    StepStarted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        stage_name: String,
        step_tag: &'static str,
    },
    StepCompleted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        stage_name: String,
        result: Box<StepResult>,
    },
    BranchStarted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        branch_name: String,
    },
    BranchCompleted {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        branch_name: String,
        result: Box<StepResult>,
    },
    ErrorOccurred {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        message: String,
        detail: Value,
    },
    CancellationRequested {
        execution_id: ResourceId,
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

impl Event {
    pub fn execution_id(&self) -> ResourceId {
        match self {
            Event::PipelineStarted { execution_id, .. }
            | Event::PipelineCompleted { execution_id, .. }
            | Event::StageStarted { execution_id, .. }
            | Event::StageCompleted { execution_id, .. }
            | Event::StepStarted { execution_id, .. }
            | Event::StepCompleted { execution_id, .. }
            | Event::BranchStarted { execution_id, .. }
            | Event::BranchCompleted { execution_id, .. }
            | Event::ErrorOccurred { execution_id, .. }
            | Event::CancellationRequested { execution_id, .. } => *execution_id,
        }
    }
}

/// A subscriber's view onto the bus. Dropping it is equivalent to
/// unsubscribing — `broadcast::Receiver`'s `Drop` deregisters it from the
/// sender's fanout.
pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Awaits the next event, transparently skipping past any gap caused
    /// by overflow and folding it into the bus's dropped-event counter.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process pub/sub of lifecycle events (C12). `publish` never blocks:
/// a full channel overwrites the oldest unread slot rather than applying
/// backpressure to the publisher.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes `event` to every current subscriber. No-op if there are
    /// no subscribers at all.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            dropped: self.dropped.clone(),
        }
    }

    /// Count of events dropped due to channel overflow, across all
    /// subscribers that have observed a lag so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Implements `buildit_core::EventPublisher` over an `EventBus`, scoped to
/// one stage's execution. Attached to the derived `ExecutionContext` the
/// stage executor passes down, so the step executor and `Parallel` handler
/// can publish `StepStarted`/`StepCompleted`/`BranchStarted`/
/// `BranchCompleted`/`ErrorOccurred` without depending on this crate.
pub struct ScopedEventPublisher {
    bus: Arc<EventBus>,
    execution_id: ResourceId,
    stage_name: String,
}

impl ScopedEventPublisher {
    pub fn new(bus: Arc<EventBus>, execution_id: ResourceId, stage_name: String) -> Self {
        Self {
            bus,
            execution_id,
            stage_name,
        }
    }
}

impl buildit_core::EventPublisher for ScopedEventPublisher {
    fn step_started(&self, step_tag: &'static str) {
        self.bus.publish(Event::StepStarted {
            execution_id: self.execution_id,
            timestamp: Utc::now(),
            stage_name: self.stage_name.clone(),
            step_tag,
        });
    }

    fn step_completed(&self, result: &StepResult) {
        self.bus.publish(Event::StepCompleted {
            execution_id: self.execution_id,
            timestamp: Utc::now(),
            stage_name: self.stage_name.clone(),
            result: Box::new(result.clone()),
        });
    }

    fn branch_started(&self, branch_name: &str) {
        self.bus.publish(Event::BranchStarted {
            execution_id: self.execution_id,
            timestamp: Utc::now(),
            branch_name: branch_name.to_string(),
        });
    }

    fn branch_completed(&self, branch_name: &str, result: &StepResult) {
        self.bus.publish(Event::BranchCompleted {
            execution_id: self.execution_id,
            timestamp: Utc::now(),
            branch_name: branch_name.to_string(),
            result: Box::new(result.clone()),
        });
    }

    fn error_occurred(&self, message: &str, detail: Value) {
        self.bus.publish(Event::ErrorOccurred {
            execution_id: self.execution_id,
            timestamp: Utc::now(),
            message: message.to_string(),
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event(id: ResourceId) -> Event {
        Event::PipelineStarted {
            execution_id: id,
            timestamp: Utc::now(),
            pipeline_id: "p".to_string(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        let id = ResourceId::new();
        bus.publish(test_event(id));
        bus.publish(Event::CancellationRequested {
            execution_id: id,
            timestamp: Utc::now(),
            reason: "user requested".to_string(),
        });

        assert!(matches!(sub.recv().await, Some(Event::PipelineStarted { .. })));
        assert!(matches!(
            sub.recv().await,
            Some(Event::CancellationRequested { .. })
        ));
    }

    #[tokio::test]
    async fn overflow_increments_dropped_counter_instead_of_blocking_publish() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        let id = ResourceId::new();
        for _ in 0..5 {
            bus.publish(test_event(id));
        }
        // Drain; the receiver should observe a lag rather than panic/hang.
        let mut seen = 0;
        while let Some(_event) = sub.recv().await {
            seen += 1;
            if seen >= 2 {
                break;
            }
        }
        assert!(bus.dropped_count() >= 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new(4);
        bus.publish(test_event(ResourceId::new()));
    }

    #[tokio::test]
    async fn scoped_publisher_tags_events_with_stage_and_execution() {
        use buildit_core::EventPublisher;

        let bus = Arc::new(EventBus::new(8));
        let mut sub = bus.subscribe();
        let id = ResourceId::new();
        let publisher = ScopedEventPublisher::new(bus, id, "build".to_string());

        publisher.step_started("shell");
        match sub.recv().await {
            Some(Event::StepStarted {
                execution_id,
                stage_name,
                step_tag,
                ..
            }) => {
                assert_eq!(execution_id, id);
                assert_eq!(stage_name, "build");
                assert_eq!(step_tag, "shell");
            }
            other => panic!("expected StepStarted, got {other:?}"),
        }
    }
}
