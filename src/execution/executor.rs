//! Capabilities the scheduler consumes: the task executor that performs the
//! actual work, and the admission predicate for the conditional strategy.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::ExecutionContext;
use crate::plan::PlanTask;

/// Outcome reported by an executor for one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn completed() -> Self {
        Self {
            status: OutcomeStatus::Completed,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// Performs the actual work of a task. The scheduler is agnostic to the
/// implementation; it only reacts to the reported outcome.
///
/// `cancel` flips to `true` when the run is cancelled; implementations are
/// expected to honor it cooperatively and return promptly. An `Err` signals
/// an infrastructure failure and is folded into a task failure with the
/// cause preserved.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &PlanTask,
        context: &ExecutionContext,
        cancel: watch::Receiver<bool>,
    ) -> Result<TaskOutcome>;
}

/// Admission predicate for the conditional strategy: `false` skips the task
/// without dispatching it.
pub trait TaskCondition: Send + Sync {
    fn evaluate(&self, task: &PlanTask, context: &ExecutionContext) -> bool;
}

impl<F> TaskCondition for F
where
    F: Fn(&PlanTask, &ExecutionContext) -> bool + Send + Sync,
{
    fn evaluate(&self, task: &PlanTask, context: &ExecutionContext) -> bool {
        self(task, context)
    }
}
