use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Task {0} already exists in plan")]
    DuplicateTask(Uuid),

    #[error("Dependency {0} already exists in plan")]
    DuplicateDependency(Uuid),

    #[error("Circular dependency detected at task {0}")]
    CircularDependency(Uuid),

    #[error("Plan is not executable: {}", .0.join(", "))]
    PlanNotExecutable(Vec<String>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let id = Uuid::new_v4();
        assert_eq!(
            PlanError::PlanNotFound(id).to_string(),
            format!("Plan not found: {id}")
        );
        assert_eq!(
            PlanError::PlanNotExecutable(vec!["no tasks".into(), "draft".into()]).to_string(),
            "Plan is not executable: no tasks, draft"
        );
    }

    #[test]
    fn test_repository_error_preserves_cause() {
        let err = PlanError::from(anyhow::anyhow!("connection refused"));
        assert!(matches!(err, PlanError::Repository(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
