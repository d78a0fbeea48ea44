//! Task-plan orchestration: a plan aggregate with a validated dependency
//! graph, a status state machine per task and plan, and an async scheduler
//! that drives tasks to completion under one of four execution strategies.
//!
//! The crate is embedding-oriented: callers supply a [`TaskExecutor`] that
//! performs the actual work, pick a strategy on the plan, and get back a
//! structured [`ExecutionResult`]. Nothing here spawns its own runtime.

pub mod error;
pub mod execution;
pub mod plan;
pub mod repository;

pub use error::{PlanError, Result};
pub use execution::{
    EventBus, ExecutionContext, ExecutionOptions, ExecutionResult, PlanEvent, PlanExecutionService,
    PlanScheduler, RetryPolicy, RunStatus, TaskCondition, TaskExecutor, TaskOutcome,
};
pub use plan::{
    DependencyCriticality, DependencyType, ExecutionStrategy, Plan, PlanDependency, PlanStatus,
    PlanTask, TaskStatus,
};
pub use repository::{InMemoryPlanRepository, PlanRepository};
