//! Repository-backed execution flow: load a plan, run it, persist the
//! outcome.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use super::scheduler::PlanScheduler;
use super::{ExecutionOptions, ExecutionResult};
use crate::error::{PlanError, Result};
use crate::plan::{validation, PlanStatus};
use crate::repository::PlanRepository;

/// Orchestrates a full run against stored plans.
///
/// Drives the plan status alongside the task run: `approved` plans are
/// activated before dispatch, and the run outcome moves the plan to
/// `completed` or `failed`. Every status change is persisted through the
/// repository.
pub struct PlanExecutionService {
    repository: Arc<dyn PlanRepository>,
    scheduler: PlanScheduler,
}

impl PlanExecutionService {
    pub fn new(repository: Arc<dyn PlanRepository>, scheduler: PlanScheduler) -> Self {
        Self {
            repository,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &PlanScheduler {
        &self.scheduler
    }

    pub async fn execute_plan(
        &self,
        plan_id: Uuid,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        // The sender must outlive the run; see [`PlanScheduler::run`].
        let (tx, rx) = watch::channel(false);
        let result = self.execute_plan_with_cancel(plan_id, options, rx).await;
        drop(tx);
        result
    }

    /// Execute a stored plan end to end.
    ///
    /// Fails with [`PlanError::PlanNotFound`] for an unknown ID and with
    /// [`PlanError::PlanNotExecutable`] before any task is dispatched when
    /// the plan is not in a runnable state.
    pub async fn execute_plan_with_cancel(
        &self,
        plan_id: Uuid,
        options: &ExecutionOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        let mut plan = self
            .repository
            .find_by_id(plan_id)
            .await?
            .ok_or(PlanError::PlanNotFound(plan_id))?;

        let gate = validation::validate_plan_executability(&plan);
        if !gate.valid {
            return Err(PlanError::PlanNotExecutable(
                gate.errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        if plan.status == PlanStatus::Approved {
            plan.update_status(PlanStatus::Active);
            self.repository.update(&plan).await?;
        }

        let result = self
            .scheduler
            .run_with_cancel(&mut plan, options, cancel)
            .await?;

        let final_status = if result.success {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        plan.update_status(final_status);
        self.repository.update(&plan).await?;

        info!(
            %plan_id, execution_id = %result.execution_id,
            plan_status = ?plan.status, success = result.success,
            "plan execution persisted"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::executor::{TaskExecutor, TaskOutcome};
    use crate::execution::ExecutionContext;
    use crate::plan::{Plan, PlanTask};
    use crate::repository::InMemoryPlanRepository;
    use async_trait::async_trait;

    struct AlwaysCompletes;

    #[async_trait]
    impl TaskExecutor for AlwaysCompletes {
        async fn execute(
            &self,
            _task: &PlanTask,
            _context: &ExecutionContext,
            _cancel: watch::Receiver<bool>,
        ) -> anyhow::Result<TaskOutcome> {
            Ok(TaskOutcome::completed())
        }
    }

    fn service_with(repo: Arc<InMemoryPlanRepository>) -> PlanExecutionService {
        PlanExecutionService::new(repo, PlanScheduler::new(Arc::new(AlwaysCompletes)))
    }

    #[tokio::test]
    async fn test_execute_unknown_plan_fails() {
        let service = service_with(Arc::new(InMemoryPlanRepository::new()));
        let result = service
            .execute_plan(Uuid::new_v4(), &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(PlanError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn test_draft_plan_is_not_executable() {
        let repo = Arc::new(InMemoryPlanRepository::new());
        let mut plan = Plan::new(Uuid::new_v4(), "draft");
        plan.add_task(PlanTask::new("t1")).unwrap();
        repo.save(&plan).await.unwrap();

        let service = service_with(repo);
        let result = service
            .execute_plan(plan.plan_id, &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(PlanError::PlanNotExecutable(_))));
    }

    #[tokio::test]
    async fn test_successful_run_completes_and_persists_plan() {
        let repo = Arc::new(InMemoryPlanRepository::new());
        let mut plan = Plan::new(Uuid::new_v4(), "runnable");
        plan.add_task(PlanTask::new("t1")).unwrap();
        plan.update_status(PlanStatus::Approved);
        repo.save(&plan).await.unwrap();

        let service = service_with(repo.clone());
        let result = service
            .execute_plan(plan.plan_id, &ExecutionOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.tasks_status.completed, 1);

        let stored = repo.find_by_id(plan.plan_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PlanStatus::Completed);
        assert_eq!(stored.progress.percentage, 100);
    }
}
