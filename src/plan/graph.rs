//! Pure dependency-graph analysis over a plan's tasks and edges.
//!
//! Adjacency is always derived from the ID pairs on [`PlanDependency`]
//! edges, never from object references, so the plan stays trivially
//! serializable and these functions stay safe to call concurrently.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use super::{PlanDependency, PlanTask};
use crate::error::{PlanError, Result};

/// Build a source -> targets adjacency map from dependency edges.
///
/// Edges whose endpoints are not in the task set are ignored here; referential
/// integrity is the validation service's job.
fn adjacency(tasks: &[PlanTask], dependencies: &[PlanDependency]) -> HashMap<Uuid, Vec<Uuid>> {
    let ids: HashSet<Uuid> = tasks.iter().map(|t| t.task_id).collect();
    let mut adj: HashMap<Uuid, Vec<Uuid>> = tasks.iter().map(|t| (t.task_id, Vec::new())).collect();
    for dep in dependencies {
        if ids.contains(&dep.source_task_id) && ids.contains(&dep.target_task_id) {
            adj.entry(dep.source_task_id)
                .or_default()
                .push(dep.target_task_id);
        }
    }
    adj
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Detect cycles with a three-color depth-first search.
///
/// Returns the first task at which a back edge was found; the full cycle path
/// is not enumerated.
pub fn validate_acyclic(tasks: &[PlanTask], dependencies: &[PlanDependency]) -> Result<()> {
    let adj = adjacency(tasks, dependencies);
    let mut marks: HashMap<Uuid, Mark> = tasks.iter().map(|t| (t.task_id, Mark::Unvisited)).collect();

    fn visit(node: Uuid, adj: &HashMap<Uuid, Vec<Uuid>>, marks: &mut HashMap<Uuid, Mark>) -> Result<()> {
        marks.insert(node, Mark::InProgress);
        for &next in adj.get(&node).into_iter().flatten() {
            match marks.get(&next).copied().unwrap_or(Mark::Unvisited) {
                Mark::InProgress => return Err(PlanError::CircularDependency(next)),
                Mark::Unvisited => visit(next, adj, marks)?,
                Mark::Done => {}
            }
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for task in tasks {
        if marks.get(&task.task_id).copied() == Some(Mark::Unvisited) {
            visit(task.task_id, &adj, &mut marks)?;
        }
    }
    Ok(())
}

/// Whether adding `source -> target` would close a cycle.
///
/// Trial check used by the aggregate before committing an edge: a cycle exists
/// exactly when `source` is already reachable from `target`.
pub fn would_create_cycle(
    tasks: &[PlanTask],
    dependencies: &[PlanDependency],
    source: Uuid,
    target: Uuid,
) -> bool {
    if source == target {
        return true;
    }
    let adj = adjacency(tasks, dependencies);
    let mut stack = vec![target];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == source {
            return true;
        }
        if seen.insert(node) {
            stack.extend(adj.get(&node).into_iter().flatten().copied());
        }
    }
    false
}

/// Topological order via Kahn's algorithm.
///
/// Zero in-degree tasks are seeded in original insertion order so the result
/// is deterministic. If the graph turns out cyclic despite upstream
/// validation, the original insertion order is returned instead of failing.
pub fn topological_order(tasks: &[PlanTask], dependencies: &[PlanDependency]) -> Vec<Uuid> {
    let adj = adjacency(tasks, dependencies);
    let mut in_degree: HashMap<Uuid, usize> = tasks.iter().map(|t| (t.task_id, 0)).collect();
    for targets in adj.values() {
        for target in targets {
            *in_degree.entry(*target).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<Uuid> = tasks
        .iter()
        .filter(|t| in_degree.get(&t.task_id) == Some(&0))
        .map(|t| t.task_id)
        .collect();
    let mut sorted = Vec::with_capacity(tasks.len());

    while let Some(node) = queue.pop_front() {
        sorted.push(node);
        for &next in adj.get(&node).into_iter().flatten() {
            let degree = in_degree.entry(next).or_insert(0);
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
                queue.push_back(next);
            }
        }
    }

    if sorted.len() != tasks.len() {
        // Defensive fallback, not a normal path: upstream cycle checks should
        // make this unreachable.
        return tasks.iter().map(|t| t.task_id).collect();
    }
    sorted
}

/// Group tasks into dependency levels for layered parallel execution.
///
/// A task's level is `1 + max(level of its predecessors)`; predecessor-free
/// tasks sit at level 0. Within a level tasks keep insertion order.
pub fn levels(tasks: &[PlanTask], dependencies: &[PlanDependency]) -> Vec<Vec<Uuid>> {
    let order = topological_order(tasks, dependencies);
    let ids: HashSet<Uuid> = tasks.iter().map(|t| t.task_id).collect();
    let mut predecessors: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for dep in dependencies {
        if ids.contains(&dep.source_task_id) && ids.contains(&dep.target_task_id) {
            predecessors
                .entry(dep.target_task_id)
                .or_default()
                .push(dep.source_task_id);
        }
    }

    let mut level_of: HashMap<Uuid, usize> = HashMap::new();
    for id in &order {
        let level = predecessors
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|pred| level_of.get(pred))
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        level_of.insert(*id, level);
    }

    let depth = level_of.values().max().map(|m| m + 1).unwrap_or(0);
    let mut groups = vec![Vec::new(); depth];
    for task in tasks {
        if let Some(&level) = level_of.get(&task.task_id) {
            groups[level].push(task.task_id);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DependencyCriticality, DependencyType, PlanTask};

    fn task(name: &str) -> PlanTask {
        PlanTask::new(name)
    }

    fn edge(source: Uuid, target: Uuid) -> PlanDependency {
        PlanDependency::new(
            source,
            target,
            DependencyType::FinishToStart,
            DependencyCriticality::Important,
        )
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let tasks = vec![task("a"), task("b"), task("c"), task("d")];
        let (a, b, c, d) = (
            tasks[0].task_id,
            tasks[1].task_id,
            tasks[2].task_id,
            tasks[3].task_id,
        );
        let deps = vec![edge(a, c), edge(b, c), edge(c, d)];

        let order = topological_order(&tasks, &deps);
        assert_eq!(order.len(), 4);
        let pos = |id: Uuid| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(c));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_topological_order_deterministic_tie_break() {
        let tasks = vec![task("t1"), task("t2"), task("t3")];
        let order = topological_order(&tasks, &[]);
        // No edges: insertion order wins.
        assert_eq!(order, vec![tasks[0].task_id, tasks[1].task_id, tasks[2].task_id]);
    }

    #[test]
    fn test_topological_order_contains_every_task_once() {
        let tasks: Vec<PlanTask> = (0..8).map(|i| task(&format!("t{i}"))).collect();
        let deps = vec![
            edge(tasks[0].task_id, tasks[3].task_id),
            edge(tasks[1].task_id, tasks[3].task_id),
            edge(tasks[3].task_id, tasks[7].task_id),
            edge(tasks[2].task_id, tasks[5].task_id),
        ];
        let order = topological_order(&tasks, &deps);
        assert_eq!(order.len(), tasks.len());
        let unique: HashSet<Uuid> = order.iter().copied().collect();
        assert_eq!(unique.len(), tasks.len());
    }

    #[test]
    fn test_validate_acyclic_detects_cycle() {
        let tasks = vec![task("a"), task("b"), task("c")];
        let (a, b, c) = (tasks[0].task_id, tasks[1].task_id, tasks[2].task_id);
        let deps = vec![edge(a, b), edge(b, c), edge(c, a)];

        assert!(matches!(
            validate_acyclic(&tasks, &deps),
            Err(PlanError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_validate_acyclic_passes_dag() {
        let tasks = vec![task("a"), task("b"), task("c")];
        let deps = vec![
            edge(tasks[0].task_id, tasks[1].task_id),
            edge(tasks[0].task_id, tasks[2].task_id),
            edge(tasks[1].task_id, tasks[2].task_id),
        ];
        assert!(validate_acyclic(&tasks, &deps).is_ok());
    }

    #[test]
    fn test_would_create_cycle() {
        let tasks = vec![task("a"), task("b"), task("c")];
        let (a, b, c) = (tasks[0].task_id, tasks[1].task_id, tasks[2].task_id);
        let deps = vec![edge(a, b), edge(b, c)];

        assert!(would_create_cycle(&tasks, &deps, c, a));
        assert!(would_create_cycle(&tasks, &deps, b, a));
        assert!(would_create_cycle(&tasks, &deps, a, a));
        assert!(!would_create_cycle(&tasks, &deps, a, c));
    }

    #[test]
    fn test_levels_diamond() {
        let tasks = vec![task("a"), task("b"), task("c"), task("d")];
        let (a, b, c, d) = (
            tasks[0].task_id,
            tasks[1].task_id,
            tasks[2].task_id,
            tasks[3].task_id,
        );
        let deps = vec![edge(a, b), edge(a, c), edge(b, d), edge(c, d)];

        let groups = levels(&tasks, &deps);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], vec![a]);
        assert_eq!(groups[1], vec![b, c]);
        assert_eq!(groups[2], vec![d]);
    }

    #[test]
    fn test_levels_independent_tasks_single_level() {
        let tasks = vec![task("a"), task("b"), task("c")];
        let groups = levels(&tasks, &[]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_empty_graph() {
        assert!(topological_order(&[], &[]).is_empty());
        assert!(levels(&[], &[]).is_empty());
        assert!(validate_acyclic(&[], &[]).is_ok());
    }
}
