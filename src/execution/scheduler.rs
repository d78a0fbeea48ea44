//! The execution scheduler: drives a plan's tasks to a terminal state
//! according to its execution strategy.
//!
//! One coordinator owns the `&mut Plan` for the whole run (the single-writer
//! discipline is enforced by the borrow), dispatches work through the
//! injected [`TaskExecutor`] and reacts to completion signals to decide the
//! next admission. It never blocks on a single task.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event::{EventBus, PlanEvent};
use super::executor::{TaskCondition, TaskExecutor, TaskOutcome};
use super::retry::RetryPolicy;
use super::{ExecutionContext, ExecutionOptions, ExecutionResult, RunStatus, TaskStatusCounts};
use crate::error::{PlanError, Result};
use crate::plan::{graph, validation, DependencyCriticality, ExecutionStrategy, Plan, PlanTask, TaskStatus};

/// Settings for one run, resolved from the plan configuration with
/// per-request overrides applied.
#[derive(Debug, Clone)]
struct RunSettings {
    strategy: ExecutionStrategy,
    parallel_limit: usize,
    task_timeout: Option<Duration>,
    run_timeout: Option<Duration>,
    retry_failed_tasks: bool,
    retry: RetryPolicy,
}

impl RunSettings {
    fn resolve(plan: &Plan, options: &ExecutionOptions) -> Self {
        let execution = &plan.configuration.execution;
        Self {
            strategy: plan.execution_strategy,
            parallel_limit: options.parallel_limit.unwrap_or(execution.parallel_limit).max(1),
            task_timeout: options.task_timeout.or(execution.task_timeout),
            run_timeout: options.run_timeout.or(execution.run_timeout),
            retry_failed_tasks: options
                .retry_failed_tasks
                .unwrap_or(execution.retry_failed_tasks),
            retry: execution.retry.clone(),
        }
    }

    /// Retries per task; zero unless retrying is enabled for the run.
    fn max_retries(&self) -> u32 {
        if self.retry_failed_tasks {
            self.retry.max_retries
        } else {
            0
        }
    }
}

/// Outcome of one dispatch attempt, reported back to the coordinator.
type AttemptResult = (Uuid, u32, TaskOutcome);

pub struct PlanScheduler {
    executor: Arc<dyn TaskExecutor>,
    condition: Option<Arc<dyn TaskCondition>>,
    events: EventBus,
}

impl PlanScheduler {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            condition: None,
            events: EventBus::new(),
        }
    }

    /// Install the admission predicate used by the conditional strategy.
    pub fn with_condition(mut self, condition: Arc<dyn TaskCondition>) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Access the event bus to subscribe to run/task events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run the plan to completion without external cancellation.
    pub async fn run(&self, plan: &mut Plan, options: &ExecutionOptions) -> Result<ExecutionResult> {
        // The sender must outlive the run: dropping it would make
        // `changed()` resolve immediately in cooperative executors.
        let (tx, rx) = watch::channel(false);
        let result = self.run_with_cancel(plan, options, rx).await;
        drop(tx);
        result
    }

    /// Run the plan, honoring a cooperative cancellation signal.
    ///
    /// Fails before any task is dispatched when the plan is not executable;
    /// once the run starts, the outcome is always a structured
    /// [`ExecutionResult`].
    pub async fn run_with_cancel(
        &self,
        plan: &mut Plan,
        options: &ExecutionOptions,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        let gate = validation::validate_plan_executability(plan);
        if !gate.valid {
            return Err(PlanError::PlanNotExecutable(
                gate.errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        let settings = RunSettings::resolve(plan, options);
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = tokio::time::Instant::now();
        let context = ExecutionContext {
            plan_id: plan.plan_id,
            context_id: plan.context_id,
            execution_id,
            variables: options.variables.clone(),
        };

        info!(
            plan_id = %plan.plan_id, %execution_id, strategy = ?settings.strategy,
            tasks = plan.tasks.len(), "plan run started"
        );
        self.events.emit(PlanEvent::RunStarted {
            plan_id: plan.plan_id,
            execution_id,
            timestamp: started_at,
        });

        let drive = self.drive(plan, &settings, &context, cancel.clone());
        let timed_out = match settings.run_timeout {
            Some(limit) => timeout(limit, drive).await.is_err(),
            None => {
                drive.await;
                false
            }
        };

        if timed_out {
            // The strategy future was dropped; abandon whatever it had in
            // flight and cancel everything not yet terminal.
            warn!(plan_id = %plan.plan_id, %execution_id, "run timed out, aborting remaining tasks");
            cancel_remaining(plan);
        } else if *cancel.borrow() {
            cancel_remaining(plan);
        }

        let counts = TaskStatusCounts::tally(plan.tasks.iter().map(|t| t.status));
        let success = counts.failed == 0 && counts.cancelled == 0;
        let cancelled = *cancel.borrow();
        let status = if timed_out {
            RunStatus::Failed
        } else if cancelled {
            RunStatus::Cancelled
        } else if success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let error = if timed_out {
            Some("run timed out".to_string())
        } else if counts.failed > 0 {
            Some(format!("{} tasks failed", counts.failed))
        } else if counts.cancelled > 0 {
            Some(format!("{} tasks cancelled", counts.cancelled))
        } else {
            None
        };

        let completed_at = Utc::now();
        let event = match status {
            RunStatus::Completed => PlanEvent::RunCompleted {
                plan_id: plan.plan_id,
                execution_id,
                timestamp: completed_at,
            },
            RunStatus::Cancelled => PlanEvent::RunCancelled {
                plan_id: plan.plan_id,
                execution_id,
                timestamp: completed_at,
            },
            RunStatus::Failed => PlanEvent::RunFailed {
                plan_id: plan.plan_id,
                execution_id,
                timestamp: completed_at,
                error: error.clone().unwrap_or_default(),
            },
        };
        self.events.emit(event);
        info!(
            plan_id = %plan.plan_id, %execution_id, ?status,
            completed = counts.completed, failed = counts.failed, skipped = counts.skipped,
            "plan run finished"
        );

        Ok(ExecutionResult {
            success: success && !timed_out,
            status,
            execution_id,
            started_at,
            completed_at,
            execution_time_ms: started.elapsed().as_millis() as u64,
            tasks_status: counts,
            error,
        })
    }

    async fn drive(
        &self,
        plan: &mut Plan,
        settings: &RunSettings,
        context: &ExecutionContext,
        cancel: watch::Receiver<bool>,
    ) {
        match settings.strategy {
            ExecutionStrategy::Sequential => {
                self.run_ordered(plan, settings, context, cancel, false).await;
            }
            ExecutionStrategy::Conditional => {
                self.run_ordered(plan, settings, context, cancel, true).await;
            }
            ExecutionStrategy::Parallel => {
                let order = graph::topological_order(&plan.tasks, &plan.dependencies);
                let mut poisoned = HashSet::new();
                self.run_bounded(plan, order, settings, context, cancel, &mut poisoned)
                    .await;
            }
            ExecutionStrategy::Hybrid => {
                let level_groups = graph::levels(&plan.tasks, &plan.dependencies);
                let mut poisoned = HashSet::new();
                for group in level_groups {
                    if *cancel.borrow() {
                        break;
                    }
                    // All predecessors live in earlier levels and are
                    // terminal by the time a level starts.
                    self.run_bounded(plan, group, settings, context, cancel.clone(), &mut poisoned)
                        .await;
                }
            }
        }
    }

    /// Sequential and conditional strategies: one task at a time in
    /// topological order.
    async fn run_ordered(
        &self,
        plan: &mut Plan,
        settings: &RunSettings,
        context: &ExecutionContext,
        cancel: watch::Receiver<bool>,
        use_condition: bool,
    ) {
        let order = graph::topological_order(&plan.tasks, &plan.dependencies);
        let mut poisoned: HashSet<Uuid> = HashSet::new();

        for (index, task_id) in order.iter().copied().enumerate() {
            if *cancel.borrow() {
                break;
            }
            if !dispatchable(plan, task_id) {
                continue;
            }
            if self.skip_poisoned(plan, task_id, &poisoned) {
                poisoned.insert(task_id);
                continue;
            }
            if use_condition && !self.admit(plan, task_id, context) {
                continue;
            }

            let status = self.run_single_task(plan, task_id, settings, context, &cancel).await;
            if status == TaskStatus::Failed {
                poisoned.insert(task_id);
                if !settings.retry_failed_tasks {
                    // Abort the rest of the run: critical dependents of the
                    // failure are skipped, unrelated tasks keep their
                    // pre-run state.
                    for rest in order.iter().copied().skip(index + 1) {
                        if dispatchable(plan, rest) && self.skip_poisoned(plan, rest, &poisoned) {
                            poisoned.insert(rest);
                        }
                    }
                    break;
                }
            }
        }
    }

    /// Bounded-parallel admission over `pending`, shared by the parallel
    /// strategy (whole graph) and the hybrid strategy (one level at a time).
    ///
    /// A task backing off before a retry does not occupy an in-flight slot:
    /// its delay runs in a separate waiting set and the task re-enters
    /// admission once the delay elapses, so long backoffs cannot starve
    /// other tasks.
    async fn run_bounded(
        &self,
        plan: &mut Plan,
        pending: Vec<Uuid>,
        settings: &RunSettings,
        context: &ExecutionContext,
        cancel: watch::Receiver<bool>,
        poisoned: &mut HashSet<Uuid>,
    ) {
        let mut pending: Vec<Uuid> = pending
            .into_iter()
            .filter(|&id| dispatchable(plan, id))
            .collect();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, AttemptResult>> =
            FuturesUnordered::new();
        // Backoff timers and the retries whose delay has elapsed.
        let mut waiting: FuturesUnordered<BoxFuture<'static, (Uuid, u32)>> =
            FuturesUnordered::new();
        let mut ready_retries: VecDeque<(Uuid, u32)> = VecDeque::new();

        loop {
            if *cancel.borrow() {
                for task_id in pending.drain(..) {
                    plan.update_task_status(task_id, TaskStatus::Cancelled, None);
                }
                // Tasks mid-backoff stay failed; no further attempts.
                waiting.clear();
                ready_retries.clear();
            }

            // Re-admit elapsed retries first; they already hold a started
            // event and only need a free slot.
            while in_flight.len() < settings.parallel_limit {
                let Some((task_id, attempt)) = ready_retries.pop_front() else {
                    break;
                };
                plan.update_task_status(task_id, TaskStatus::InProgress, None);
                let Some(task) = plan.task(task_id).cloned() else {
                    continue;
                };
                in_flight.push(self.attempt(task, attempt, settings, context, &cancel));
            }

            // Admit every eligible task up to the remaining capacity. Tasks
            // poisoned by an upstream failure are skipped without dispatch.
            let mut index = 0;
            while index < pending.len() {
                let task_id = pending[index];
                if self.skip_poisoned(plan, task_id, poisoned) {
                    poisoned.insert(task_id);
                    pending.remove(index);
                    continue;
                }
                if in_flight.len() >= settings.parallel_limit {
                    break;
                }
                if eligible(plan, task_id) {
                    pending.remove(index);
                    let Some(task) = plan.task(task_id).cloned() else {
                        continue;
                    };
                    self.start_task(plan, task_id);
                    in_flight.push(self.attempt(task, 1, settings, context, &cancel));
                } else {
                    index += 1;
                }
            }

            if in_flight.is_empty() && waiting.is_empty() {
                if pending.is_empty() && ready_retries.is_empty() {
                    break;
                }
                // Nothing running and nothing eligible: only reachable if the
                // graph was cyclic despite validation. Leave the rest pending.
                warn!(plan_id = %plan.plan_id, stuck = pending.len(), "no eligible tasks, aborting admission");
                break;
            }

            tokio::select! {
                Some((task_id, attempt, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    if outcome.is_completed() {
                        self.finish_task(plan, task_id, TaskStatus::Completed, None);
                    } else {
                        let error = outcome.error.clone().unwrap_or_else(|| "task failed".to_string());
                        let retries_left = !*cancel.borrow() && attempt <= settings.max_retries();
                        if retries_left {
                            plan.update_task_status(task_id, TaskStatus::Failed, Some(error));
                            let delay = settings.retry.delay_for_attempt(attempt);
                            debug!(%task_id, attempt, delay_ms = delay.as_millis() as u64, "retrying failed task");
                            waiting.push(Box::pin(async move {
                                tokio::time::sleep(delay).await;
                                (task_id, attempt + 1)
                            }));
                        } else {
                            self.finish_task(plan, task_id, TaskStatus::Failed, Some(error));
                            poisoned.insert(task_id);
                        }
                    }
                }
                Some(retry) = waiting.next(), if !waiting.is_empty() => {
                    ready_retries.push_back(retry);
                }
                else => break,
            }
        }
    }

    /// Execute one task inline with the retry loop, mutating the plan on
    /// every attempt. Used by the ordered strategies.
    async fn run_single_task(
        &self,
        plan: &mut Plan,
        task_id: Uuid,
        settings: &RunSettings,
        context: &ExecutionContext,
        cancel: &watch::Receiver<bool>,
    ) -> TaskStatus {
        self.start_task(plan, task_id);
        let mut attempt = 1u32;
        loop {
            let Some(task) = plan.task(task_id).cloned() else {
                return TaskStatus::Failed;
            };
            let outcome = execute_attempt(
                self.executor.clone(),
                task,
                context.clone(),
                cancel.clone(),
                settings.task_timeout,
            )
            .await;

            if outcome.is_completed() {
                self.finish_task(plan, task_id, TaskStatus::Completed, None);
                return TaskStatus::Completed;
            }

            let error = outcome.error.unwrap_or_else(|| "task failed".to_string());
            if *cancel.borrow() || attempt > settings.max_retries() {
                self.finish_task(plan, task_id, TaskStatus::Failed, Some(error));
                return TaskStatus::Failed;
            }

            plan.update_task_status(task_id, TaskStatus::Failed, Some(error));
            let delay = settings.retry.delay_for_attempt(attempt);
            debug!(%task_id, attempt, delay_ms = delay.as_millis() as u64, "retrying failed task");
            tokio::time::sleep(delay).await;
            plan.update_task_status(task_id, TaskStatus::InProgress, None);
            attempt += 1;
        }
    }

    /// Build the boxed attempt future for the bounded-parallel loop. The
    /// future owns its task snapshot and never touches the plan.
    fn attempt(
        &self,
        task: PlanTask,
        attempt: u32,
        settings: &RunSettings,
        context: &ExecutionContext,
        cancel: &watch::Receiver<bool>,
    ) -> BoxFuture<'static, AttemptResult> {
        let executor = self.executor.clone();
        let task_id = task.task_id;
        let context = context.clone();
        let cancel = cancel.clone();
        let task_timeout = settings.task_timeout;
        Box::pin(async move {
            let outcome = execute_attempt(executor, task, context, cancel, task_timeout).await;
            (task_id, attempt, outcome)
        })
    }

    fn admit(&self, plan: &mut Plan, task_id: Uuid, context: &ExecutionContext) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        let Some(task) = plan.task(task_id) else {
            return false;
        };
        if condition.evaluate(task, context) {
            return true;
        }
        let status_before = task.status;
        plan.update_task_status(task_id, TaskStatus::Skipped, None);
        debug!(plan_id = %plan.plan_id, %task_id, "task skipped by condition");
        self.events.emit(PlanEvent::TaskSkipped {
            plan_id: plan.plan_id,
            task_id,
            timestamp: Utc::now(),
            status_before,
        });
        false
    }

    /// Skip `task_id` if a critical dependency's upstream is poisoned
    /// (failed, or skipped because of a failure). Returns true when skipped.
    fn skip_poisoned(&self, plan: &mut Plan, task_id: Uuid, poisoned: &HashSet<Uuid>) -> bool {
        if !is_poisoned_by(plan, task_id, poisoned) {
            return false;
        }
        let Some(task) = plan.task(task_id) else {
            return false;
        };
        let status_before = task.status;
        plan.update_task_status(task_id, TaskStatus::Skipped, None);
        debug!(plan_id = %plan.plan_id, %task_id, "task skipped: critical upstream failed");
        self.events.emit(PlanEvent::TaskSkipped {
            plan_id: plan.plan_id,
            task_id,
            timestamp: Utc::now(),
            status_before,
        });
        true
    }

    fn start_task(&self, plan: &mut Plan, task_id: Uuid) {
        let status_before = plan.task(task_id).map(|t| t.status).unwrap_or_default();
        plan.update_task_status(task_id, TaskStatus::InProgress, None);
        debug!(plan_id = %plan.plan_id, %task_id, "task started");
        self.events.emit(PlanEvent::TaskStarted {
            plan_id: plan.plan_id,
            task_id,
            timestamp: Utc::now(),
            status_before,
        });
    }

    fn finish_task(
        &self,
        plan: &mut Plan,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    ) {
        let status_before = plan.task(task_id).map(|t| t.status).unwrap_or_default();
        plan.update_task_status(task_id, status, error.clone());
        match status {
            TaskStatus::Completed => {
                debug!(plan_id = %plan.plan_id, %task_id, "task completed");
                self.events.emit(PlanEvent::TaskCompleted {
                    plan_id: plan.plan_id,
                    task_id,
                    timestamp: Utc::now(),
                    status_before,
                    status_after: status,
                });
            }
            TaskStatus::Failed => {
                warn!(plan_id = %plan.plan_id, %task_id, error = ?error, "task failed");
                self.events.emit(PlanEvent::TaskFailed {
                    plan_id: plan.plan_id,
                    task_id,
                    timestamp: Utc::now(),
                    status_before,
                    status_after: status,
                    error: error.unwrap_or_default(),
                });
            }
            _ => {}
        }
    }
}

/// A task may be dispatched only from a non-terminal resting state.
fn dispatchable(plan: &Plan, task_id: Uuid) -> bool {
    matches!(
        plan.task(task_id).map(|t| t.status),
        Some(TaskStatus::Pending | TaskStatus::Ready)
    )
}

/// Eligible for admission: every predecessor has reached a terminal state.
fn eligible(plan: &Plan, task_id: Uuid) -> bool {
    plan.predecessors(task_id)
        .iter()
        .all(|pred| plan.task(*pred).map(|t| t.status.is_finished()).unwrap_or(true))
}

/// Whether a critical edge connects `task_id` to a poisoned upstream.
fn is_poisoned_by(plan: &Plan, task_id: Uuid, poisoned: &HashSet<Uuid>) -> bool {
    plan.dependencies.iter().any(|dep| {
        dep.target_task_id == task_id
            && dep.criticality == DependencyCriticality::Critical
            && poisoned.contains(&dep.source_task_id)
    })
}

fn cancel_remaining(plan: &mut Plan) {
    let remaining: Vec<Uuid> = plan
        .tasks
        .iter()
        .filter(|t| !t.status.is_finished())
        .map(|t| t.task_id)
        .collect();
    for task_id in remaining {
        plan.update_task_status(task_id, TaskStatus::Cancelled, None);
    }
}

/// One executor call with the per-task timeout applied. Timeout expiry and
/// infrastructure errors both fold into a failed outcome so they flow
/// through the same retry policy.
async fn execute_attempt(
    executor: Arc<dyn TaskExecutor>,
    task: PlanTask,
    context: ExecutionContext,
    cancel: watch::Receiver<bool>,
    task_timeout: Option<Duration>,
) -> TaskOutcome {
    let call = executor.execute(&task, &context, cancel);
    let result = match task_timeout {
        Some(limit) => match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                return TaskOutcome::failed(format!(
                    "task timed out after {}ms",
                    limit.as_millis()
                ))
            }
        },
        None => call.await,
    };
    match result {
        Ok(outcome) => outcome,
        Err(e) => TaskOutcome::failed(format!("{e:#}")),
    }
}
