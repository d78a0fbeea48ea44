//! Status state machines for tasks and plans.
//!
//! Transitions are checked, never forced: an illegal request returns `false`
//! and leaves the status untouched, since callers routinely probe transitions
//! before committing to them.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a single task within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    /// Whether transitioning from `self` to `next` is legal.
    ///
    /// `Completed` and `Skipped` are terminal. `Failed` re-opens through the
    /// retry path, `Cancelled` only through explicit reinstatement.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready | InProgress | Cancelled | Skipped)
                | (Ready, InProgress | Cancelled | Skipped)
                | (InProgress, Completed | Failed | Cancelled)
                | (Failed, Pending | InProgress | Skipped)
                | (Cancelled, Pending)
        )
    }

    /// Terminal from the scheduler's point of view: nothing more will happen
    /// to this task during a run.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Skipped
        )
    }

    pub fn is_completed(self) -> bool {
        self == TaskStatus::Completed
    }

    pub fn is_failed(self) -> bool {
        self == TaskStatus::Failed
    }

    pub fn is_in_progress(self) -> bool {
        self == TaskStatus::InProgress
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

/// Lifecycle status of a plan aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Approved,
    Active,
    Completed,
    Failed,
    Archived,
}

impl PlanStatus {
    /// Plan status advances monotonically, with `Failed` as a recovery fork
    /// back to `Draft` or `Active`. `Archived` has no way out.
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (Draft, Approved)
                | (Approved, Active)
                | (Active, Completed | Failed)
                | (Completed, Archived)
                | (Failed, Draft | Active | Archived)
        )
    }

    /// Whether tasks and dependencies may still be added to the plan.
    pub fn allows_mutation(self) -> bool {
        self != PlanStatus::Archived
    }
}

impl Default for PlanStatus {
    fn default() -> Self {
        PlanStatus::Draft
    }
}
