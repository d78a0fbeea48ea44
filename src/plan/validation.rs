//! Stateless structural validation of a plan snapshot.
//!
//! Every function here is pure and reports every violation it finds, not
//! just the first, so a caller can surface a complete picture in one pass.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{Plan, PlanDependency, PlanStatus, PlanTask};

pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_DESCRIPTION_LENGTH: usize = 2000;
/// Upper bound on tasks per plan, mirrored in [`validate_plan`].
pub const MAX_TASKS_PER_PLAN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

pub fn validate_name(name: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if name.trim().is_empty() {
        errors.push(ValidationError::new("name", "Plan name must not be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        errors.push(ValidationError::new(
            "name",
            format!("Plan name exceeds {MAX_NAME_LENGTH} characters"),
        ));
    }
    errors
}

pub fn validate_description(description: Option<&str>) -> Vec<ValidationError> {
    match description {
        Some(text) if text.len() > MAX_DESCRIPTION_LENGTH => vec![ValidationError::new(
            "description",
            format!("Description exceeds {MAX_DESCRIPTION_LENGTH} characters"),
        )],
        _ => Vec::new(),
    }
}

/// Reject any transition out of the archived terminal status; everything else
/// defers to the plan status table.
pub fn validate_status_transition(current: PlanStatus, next: PlanStatus) -> bool {
    if current == PlanStatus::Archived {
        return false;
    }
    current.can_transition_to(next)
}

/// Detect duplicate task IDs and empty task names.
pub fn validate_tasks(tasks: &[PlanTask]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.task_id) {
            errors.push(ValidationError::new(
                "tasks",
                format!("Duplicate task ID: {}", task.task_id),
            ));
        }
        if task.name.trim().is_empty() {
            errors.push(ValidationError::new(
                "tasks",
                format!("Task {} has an empty name", task.task_id),
            ));
        }
    }
    errors
}

/// Detect duplicate dependency IDs, dangling endpoints and self-loops.
pub fn validate_dependencies(
    tasks: &[PlanTask],
    dependencies: &[PlanDependency],
) -> Vec<ValidationError> {
    let task_ids: HashSet<_> = tasks.iter().map(|t| t.task_id).collect();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for dep in dependencies {
        if !seen.insert(dep.id) {
            errors.push(ValidationError::new(
                "dependencies",
                format!("Duplicate dependency ID: {}", dep.id),
            ));
        }
        if !task_ids.contains(&dep.source_task_id) {
            errors.push(ValidationError::new(
                "dependencies",
                format!(
                    "Dependency {} references unknown source task {}",
                    dep.id, dep.source_task_id
                ),
            ));
        }
        if !task_ids.contains(&dep.target_task_id) {
            errors.push(ValidationError::new(
                "dependencies",
                format!(
                    "Dependency {} references unknown target task {}",
                    dep.id, dep.target_task_id
                ),
            ));
        }
        if dep.source_task_id == dep.target_task_id {
            errors.push(ValidationError::new(
                "dependencies",
                format!("Dependency {} is a self-loop", dep.id),
            ));
        }
    }
    errors
}

/// Full structural validation of a plan snapshot.
pub fn validate_plan(plan: &Plan) -> ValidationResult {
    let mut errors = validate_name(&plan.name);
    errors.extend(validate_description(plan.description.as_deref()));
    errors.extend(validate_tasks(&plan.tasks));
    errors.extend(validate_dependencies(&plan.tasks, &plan.dependencies));
    if plan.tasks.len() > MAX_TASKS_PER_PLAN {
        errors.push(ValidationError::new(
            "tasks",
            format!("Plan exceeds the maximum of {MAX_TASKS_PER_PLAN} tasks"),
        ));
    }
    if let Err(e) = super::graph::validate_acyclic(&plan.tasks, &plan.dependencies) {
        errors.push(ValidationError::new("dependencies", e.to_string()));
    }
    ValidationResult::from_errors(errors)
}

/// Gate used by the scheduler before any task is dispatched: the plan must be
/// approved or active and must have at least one task.
pub fn validate_plan_executability(plan: &Plan) -> ValidationResult {
    let mut errors = Vec::new();
    if !matches!(plan.status, PlanStatus::Approved | PlanStatus::Active) {
        errors.push(ValidationError::new(
            "status",
            format!("Plan status {:?} does not allow execution", plan.status),
        ));
    }
    if plan.tasks.is_empty() {
        errors.push(ValidationError::new("tasks", "Plan has no tasks to execute"));
    }
    ValidationResult::from_errors(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DependencyCriticality, DependencyType};
    use uuid::Uuid;

    fn valid_plan() -> Plan {
        let mut plan = Plan::new(Uuid::new_v4(), "release checklist");
        for i in 0..3 {
            plan.add_task(PlanTask::new(&format!("t{i}"))).unwrap();
        }
        plan
    }

    #[test]
    fn test_validate_name_bounds() {
        assert!(validate_name("ok").is_empty());
        assert_eq!(validate_name("  ").len(), 1);
        assert_eq!(validate_name(&"x".repeat(300)).len(), 1);
    }

    #[test]
    fn test_validate_tasks_reports_every_violation() {
        let mut tasks = vec![PlanTask::new("a"), PlanTask::new(""), PlanTask::new("c")];
        tasks[2].task_id = tasks[0].task_id;
        let errors = validate_tasks(&tasks);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("Duplicate task ID")));
        assert!(errors.iter().any(|e| e.message.contains("empty name")));
    }

    #[test]
    fn test_validate_dependencies_dangling_and_self_loop() {
        let tasks = vec![PlanTask::new("a")];
        let a = tasks[0].task_id;
        let stranger = Uuid::new_v4();
        let deps = vec![
            PlanDependency::new(
                a,
                stranger,
                DependencyType::FinishToStart,
                DependencyCriticality::Critical,
            ),
            PlanDependency::new(
                a,
                a,
                DependencyType::FinishToStart,
                DependencyCriticality::Optional,
            ),
        ];
        let errors = validate_dependencies(&tasks, &deps);
        assert!(errors.iter().any(|e| e.message.contains("unknown target")));
        assert!(errors.iter().any(|e| e.message.contains("self-loop")));
    }

    #[test]
    fn test_validate_plan_accepts_well_formed_plan() {
        let result = validate_plan(&valid_plan());
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_validate_plan_is_idempotent() {
        let mut plan = valid_plan();
        plan.name = String::new();
        plan.tasks.push(PlanTask::new(""));
        let first = validate_plan(&plan);
        let second = validate_plan(&plan);
        assert_eq!(first, second);
        assert!(!first.valid);
    }

    #[test]
    fn test_executability_requires_approved_or_active() {
        let mut plan = valid_plan();
        assert!(!validate_plan_executability(&plan).valid);

        plan.update_status(PlanStatus::Approved);
        assert!(validate_plan_executability(&plan).valid);

        plan.update_status(PlanStatus::Active);
        assert!(validate_plan_executability(&plan).valid);
    }

    #[test]
    fn test_executability_requires_tasks() {
        let mut plan = Plan::new(Uuid::new_v4(), "empty");
        plan.update_status(PlanStatus::Approved);
        let result = validate_plan_executability(&plan);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.field == "tasks"));
    }

    #[test]
    fn test_no_transition_out_of_archived() {
        for next in [
            PlanStatus::Draft,
            PlanStatus::Approved,
            PlanStatus::Active,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            assert!(!validate_status_transition(PlanStatus::Archived, next));
        }
        assert!(validate_status_transition(
            PlanStatus::Draft,
            PlanStatus::Approved
        ));
    }
}
