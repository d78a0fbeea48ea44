//! Execution scheduling: options, results, capabilities and the scheduler
//! that drives a plan's tasks to completion.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod event;
pub mod executor;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use event::{EventBus, PlanEvent};
pub use executor::{OutcomeStatus, TaskCondition, TaskExecutor, TaskOutcome};
pub use retry::RetryPolicy;
pub use scheduler::PlanScheduler;
pub use service::PlanExecutionService;

use crate::plan::TaskStatus;

/// Read-only context handed to the executor and condition capabilities for
/// each task dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub plan_id: Uuid,
    pub context_id: Uuid,
    pub execution_id: Uuid,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

/// Per-run overrides on top of the plan's configured execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_limit: Option<usize>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_failed_tasks: Option<bool>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

/// Terminal status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Task counts by final status, aggregated into the run result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl TaskStatusCounts {
    pub fn tally(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status {
                TaskStatus::Pending | TaskStatus::Ready => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

/// Structured result of a run attempt. Callers always receive one of these
/// once a run has started; only precondition violations surface as errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff no task ended failed or cancelled.
    pub success: bool,
    pub status: RunStatus,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub tasks_status: TaskStatusCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
