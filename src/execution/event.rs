//! Semantic events emitted during a plan run.
//!
//! The bus is a thin wrapper over `tokio::sync::broadcast`; delivery to
//! external consumers (bus, callback, channel) is their concern, not ours.
//! Emitting never fails: a bus with no subscribers simply drops the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::plan::TaskStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum PlanEvent {
    RunStarted {
        plan_id: Uuid,
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        plan_id: Uuid,
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        plan_id: Uuid,
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        error: String,
    },
    RunCancelled {
        plan_id: Uuid,
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        plan_id: Uuid,
        task_id: Uuid,
        timestamp: DateTime<Utc>,
        status_before: TaskStatus,
    },
    TaskCompleted {
        plan_id: Uuid,
        task_id: Uuid,
        timestamp: DateTime<Utc>,
        status_before: TaskStatus,
        status_after: TaskStatus,
    },
    TaskFailed {
        plan_id: Uuid,
        task_id: Uuid,
        timestamp: DateTime<Utc>,
        status_before: TaskStatus,
        status_after: TaskStatus,
        error: String,
    },
    TaskSkipped {
        plan_id: Uuid,
        task_id: Uuid,
        timestamp: DateTime<Utc>,
        status_before: TaskStatus,
    },
}

impl PlanEvent {
    pub fn plan_id(&self) -> Uuid {
        match self {
            PlanEvent::RunStarted { plan_id, .. }
            | PlanEvent::RunCompleted { plan_id, .. }
            | PlanEvent::RunFailed { plan_id, .. }
            | PlanEvent::RunCancelled { plan_id, .. }
            | PlanEvent::TaskStarted { plan_id, .. }
            | PlanEvent::TaskCompleted { plan_id, .. }
            | PlanEvent::TaskFailed { plan_id, .. }
            | PlanEvent::TaskSkipped { plan_id, .. } => *plan_id,
        }
    }

    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            PlanEvent::TaskStarted { task_id, .. }
            | PlanEvent::TaskCompleted { task_id, .. }
            | PlanEvent::TaskFailed { task_id, .. }
            | PlanEvent::TaskSkipped { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlanEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn emit(&self, event: PlanEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let plan_id = Uuid::new_v4();
        bus.emit(PlanEvent::RunStarted {
            plan_id,
            execution_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.plan_id(), plan_id);
        assert!(event.task_id().is_none());
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(PlanEvent::RunCancelled {
            plan_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn test_event_serde_tags() {
        let event = PlanEvent::TaskSkipped {
            plan_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status_before: TaskStatus::Pending,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"task_skipped\""));
        assert!(json.contains("\"status_before\":\"pending\""));
    }
}
