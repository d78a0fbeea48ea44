//! The plan aggregate: tasks, dependency edges, configuration and progress.
//!
//! All mutation goes through [`Plan`]'s methods so the structural invariants
//! hold after every change: unique task IDs, referentially intact and acyclic
//! dependency edges, status transitions per the state machines in [`state`],
//! and progress recomputed on every task-status change.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub mod graph;
pub mod progress;
pub mod state;
pub mod validation;

pub use progress::{compute_progress, PlanProgress};
pub use state::{PlanStatus, TaskStatus};
pub use validation::{ValidationError, ValidationResult};

use crate::error::{PlanError, Result};
use crate::execution::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Policy governing dispatch order and concurrency during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One task at a time, in topological order.
    Sequential,
    /// Bounded-parallel admission as predecessors finish.
    Parallel,
    /// Topological order with a per-task admission predicate.
    Conditional,
    /// Dependency levels processed in order, bounded-parallel within a level.
    Hybrid,
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        ExecutionStrategy::Sequential
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Atomic,
    Composite,
    Milestone,
    Checkpoint,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Atomic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

/// Whether a failed upstream blocks (critical) or merely informs a dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCriticality {
    Critical,
    Important,
    Optional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_type: String,
    pub amount: f64,
    pub unit: String,
    pub mandatory: bool,
}

/// A unit of work tracked inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub task_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    /// Denormalized view of incoming edges; kept in sync by
    /// [`Plan::add_dependency`].
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub actual_duration: Option<Duration>,
    /// Completion percentage, 0-100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_resolver: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PlanTask {
    pub fn new(name: &str) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            status: TaskStatus::Pending,
            priority: Priority::default(),
            task_type: TaskType::default(),
            dependencies: Vec::new(),
            estimated_duration: None,
            actual_duration: None,
            progress: 0,
            resource_requirements: Vec::new(),
            assignee: None,
            failure_resolver: None,
            parameters: HashMap::new(),
            metadata: HashMap::new(),
            error: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition, stamping timestamps as side effects.
    ///
    /// Returns `false` and leaves the task untouched when the transition is
    /// illegal. First entry into `in_progress` records the start time; entry
    /// into any terminal state records the end time and derives the actual
    /// duration.
    pub fn apply_status(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskStatus::Completed => {
                let now = Utc::now();
                self.completed_at = Some(now);
                self.progress = 100;
                if let Some(started) = self.started_at {
                    self.actual_duration = (now - started).to_std().ok();
                }
            }
            TaskStatus::Failed => {
                self.completed_at = Some(Utc::now());
                self.retry_count += 1;
            }
            TaskStatus::Cancelled | TaskStatus::Skipped => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending | TaskStatus::Ready => {}
        }
        true
    }
}

/// A directed constraint between two tasks of the same plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDependency {
    pub id: Uuid,
    pub source_task_id: Uuid,
    pub target_task_id: Uuid,
    pub dependency_type: DependencyType,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub lag: Option<Duration>,
    pub criticality: DependencyCriticality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl PlanDependency {
    pub fn new(
        source_task_id: Uuid,
        target_task_id: Uuid,
        dependency_type: DependencyType,
        criticality: DependencyCriticality,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_task_id,
            target_task_id,
            dependency_type,
            lag: None,
            criticality,
            condition: None,
        }
    }
}

fn default_parallel_limit() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Upper bound on concurrently in-progress tasks for the parallel and
    /// hybrid strategies.
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<Duration>,
    /// When false a failed task aborts the rest of a sequential run instead
    /// of being retried.
    #[serde(default)]
    pub retry_failed_tasks: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            parallel_limit: default_parallel_limit(),
            task_timeout: None,
            run_timeout: None,
            retry_failed_tasks: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub notify_on_task_completion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    TimeOptimal,
    ResourceOptimal,
    CostOptimal,
    Balanced,
}

impl Default for OptimizationStrategy {
    fn default() -> Self {
        OptimizationStrategy::Balanced
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: OptimizationStrategy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub emit_task_events: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfiguration {
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub optimization: OptimizationSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

/// The aggregate root describing a set of tasks, their dependencies and
/// execution policy. Exclusively owns its tasks; nothing is shared across
/// plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub context_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
    #[serde(default)]
    pub dependencies: Vec<PlanDependency>,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub progress: PlanProgress,
    #[serde(default)]
    pub configuration: PlanConfiguration,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(context_id: Uuid, name: &str) -> Self {
        let now = Utc::now();
        Self {
            plan_id: Uuid::new_v4(),
            context_id,
            name: name.to_string(),
            description: None,
            status: PlanStatus::Draft,
            version: 0,
            goals: Vec::new(),
            tasks: Vec::new(),
            dependencies: Vec::new(),
            execution_strategy: ExecutionStrategy::default(),
            priority: Priority::default(),
            progress: PlanProgress::default(),
            configuration: PlanConfiguration::default(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, task_id: Uuid) -> Option<&PlanTask> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn has_task(&self, task_id: Uuid) -> bool {
        self.task(task_id).is_some()
    }

    /// IDs of direct predecessors of `task_id` per the dependency edges.
    pub fn predecessors(&self, task_id: Uuid) -> Vec<Uuid> {
        self.dependencies
            .iter()
            .filter(|d| d.target_task_id == task_id)
            .map(|d| d.source_task_id)
            .collect()
    }

    /// Add a task to the plan.
    ///
    /// Duplicate task IDs are a programmer error and fail with
    /// [`PlanError::DuplicateTask`]; an archived plan rejects benignly with
    /// `Ok(false)`.
    pub fn add_task(&mut self, task: PlanTask) -> Result<bool> {
        if !self.status.allows_mutation() {
            return Ok(false);
        }
        if self.has_task(task.task_id) {
            return Err(PlanError::DuplicateTask(task.task_id));
        }
        debug!(plan_id = %self.plan_id, task_id = %task.task_id, name = %task.name, "task added");
        self.tasks.push(task);
        self.touch();
        self.progress = compute_progress(&self.tasks);
        Ok(true)
    }

    /// Add a dependency edge, enforcing graph invariants at insertion time.
    ///
    /// Benign rejects (`Ok(false)`, graph unchanged): missing endpoint,
    /// self-loop, duplicate `(source, target)` edge, edge that would close a
    /// cycle, archived plan. A duplicate dependency ID is a programmer error.
    pub fn add_dependency(&mut self, dependency: PlanDependency) -> Result<bool> {
        if !self.status.allows_mutation() {
            return Ok(false);
        }
        if self.dependencies.iter().any(|d| d.id == dependency.id) {
            return Err(PlanError::DuplicateDependency(dependency.id));
        }
        if !self.has_task(dependency.source_task_id) || !self.has_task(dependency.target_task_id) {
            return Ok(false);
        }
        if dependency.source_task_id == dependency.target_task_id {
            return Ok(false);
        }
        if self.dependencies.iter().any(|d| {
            d.source_task_id == dependency.source_task_id
                && d.target_task_id == dependency.target_task_id
        }) {
            return Ok(false);
        }
        if graph::would_create_cycle(
            &self.tasks,
            &self.dependencies,
            dependency.source_task_id,
            dependency.target_task_id,
        ) {
            debug!(
                plan_id = %self.plan_id,
                source = %dependency.source_task_id,
                target = %dependency.target_task_id,
                "dependency rejected: would create a cycle"
            );
            return Ok(false);
        }

        let source = dependency.source_task_id;
        let target = dependency.target_task_id;
        if let Some(task) = self.tasks.iter_mut().find(|t| t.task_id == target) {
            task.dependencies.push(source);
        }
        self.dependencies.push(dependency);
        self.touch();
        debug!(plan_id = %self.plan_id, %source, %target, "dependency added");
        Ok(true)
    }

    /// Transition a task's status, recomputing progress on success.
    ///
    /// Returns `false` on an unknown task or an illegal transition; the plan
    /// is left unchanged in both cases.
    pub fn update_task_status(
        &mut self,
        task_id: Uuid,
        next: TaskStatus,
        error: Option<String>,
    ) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.task_id == task_id) else {
            return false;
        };
        let before = task.status;
        if !task.apply_status(next) {
            debug!(
                plan_id = %self.plan_id, %task_id,
                from = ?before, to = ?next,
                "illegal task transition rejected"
            );
            return false;
        }
        if let Some(message) = error {
            task.error = Some(message);
        }
        self.progress = compute_progress(&self.tasks);
        self.touch();
        debug!(plan_id = %self.plan_id, %task_id, from = ?before, to = ?next, "task status updated");
        true
    }

    /// Advance the plan's own status through the allowed transition table.
    pub fn update_status(&mut self, next: PlanStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        debug!(plan_id = %self.plan_id, from = ?self.status, to = ?next, "plan status updated");
        self.status = next;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
