//! Persistence seam for plans.
//!
//! The execution service only needs load/store; backends are swappable
//! behind [`PlanRepository`]. The in-memory implementation backs tests and
//! single-process embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PlanError, Result};
use crate::plan::Plan;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<Plan>>;

    /// Insert a new plan. Replaces silently when the ID already exists;
    /// callers that care use [`PlanRepository::update`].
    async fn save(&self, plan: &Plan) -> Result<()>;

    /// Replace an existing plan. Fails with [`PlanError::PlanNotFound`] when
    /// it was never saved.
    async fn update(&self, plan: &Plan) -> Result<()>;

    async fn delete(&self, plan_id: Uuid) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Plan>>;
}

#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<RwLock<HashMap<Uuid, Plan>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        Ok(self.plans.read().await.get(&plan_id).cloned())
    }

    async fn save(&self, plan: &Plan) -> Result<()> {
        self.plans.write().await.insert(plan.plan_id, plan.clone());
        Ok(())
    }

    async fn update(&self, plan: &Plan) -> Result<()> {
        let mut plans = self.plans.write().await;
        if !plans.contains_key(&plan.plan_id) {
            return Err(PlanError::PlanNotFound(plan.plan_id));
        }
        plans.insert(plan.plan_id, plan.clone());
        Ok(())
    }

    async fn delete(&self, plan_id: Uuid) -> Result<bool> {
        Ok(self.plans.write().await.remove(&plan_id).is_some())
    }

    async fn list(&self) -> Result<Vec<Plan>> {
        Ok(self.plans.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_find_round_trip() {
        let repo = InMemoryPlanRepository::new();
        let plan = Plan::new(Uuid::new_v4(), "stored plan");
        repo.save(&plan).await.unwrap();

        let loaded = repo.find_by_id(plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.plan_id, plan.plan_id);
        assert_eq!(loaded.name, "stored plan");
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_requires_existing_plan() {
        let repo = InMemoryPlanRepository::new();
        let plan = Plan::new(Uuid::new_v4(), "never saved");
        assert!(matches!(
            repo.update(&plan).await,
            Err(PlanError::PlanNotFound(_))
        ));

        repo.save(&plan).await.unwrap();
        repo.update(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let repo = InMemoryPlanRepository::new();
        let plan = Plan::new(Uuid::new_v4(), "to delete");
        repo.save(&plan).await.unwrap();

        assert!(repo.delete(plan.plan_id).await.unwrap());
        assert!(!repo.delete(plan.plan_id).await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }
}
