//! Plan progress recomputation.

use serde::{Deserialize, Serialize};

use super::PlanTask;

/// Completion summary of a plan, recomputed after every task-status mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    /// `round(completed / total * 100)`; 0 when the plan has no tasks.
    pub percentage: u8,
}

/// Recompute progress from the current task set.
pub fn compute_progress(tasks: &[PlanTask]) -> PlanProgress {
    let total_tasks = tasks.len();
    let completed_tasks = tasks.iter().filter(|t| t.status.is_completed()).count();
    let percentage = if total_tasks == 0 {
        0
    } else {
        ((completed_tasks as f64 / total_tasks as f64) * 100.0).round() as u8
    };
    PlanProgress {
        total_tasks,
        completed_tasks,
        percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::state::TaskStatus;

    fn tasks_with(completed: usize, total: usize) -> Vec<PlanTask> {
        (0..total)
            .map(|i| {
                let mut t = PlanTask::new(&format!("t{i}"));
                if i < completed {
                    t.status = TaskStatus::Completed;
                }
                t
            })
            .collect()
    }

    #[test]
    fn test_empty_plan_is_zero_percent() {
        let progress = compute_progress(&[]);
        assert_eq!(progress.total_tasks, 0);
        assert_eq!(progress.completed_tasks, 0);
        assert_eq!(progress.percentage, 0);
    }

    #[test]
    fn test_percentage_rounds() {
        // 1/3 rounds down to 33, 2/3 rounds up to 67.
        assert_eq!(compute_progress(&tasks_with(1, 3)).percentage, 33);
        assert_eq!(compute_progress(&tasks_with(2, 3)).percentage, 67);
        assert_eq!(compute_progress(&tasks_with(1, 8)).percentage, 13);
    }

    #[test]
    fn test_all_completed() {
        let progress = compute_progress(&tasks_with(4, 4));
        assert_eq!(progress.completed_tasks, 4);
        assert_eq!(progress.percentage, 100);
    }

    #[test]
    fn test_failed_tasks_do_not_count_as_completed() {
        let mut tasks = tasks_with(1, 2);
        tasks[1].status = TaskStatus::Failed;
        let progress = compute_progress(&tasks);
        assert_eq!(progress.completed_tasks, 1);
        assert_eq!(progress.percentage, 50);
    }
}
