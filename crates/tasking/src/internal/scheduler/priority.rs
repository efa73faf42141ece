use std::collections::VecDeque;

use crate::internal::cluster::Cluster;
use crate::internal::common::Set;
use crate::internal::common::error::TaskingError;
use crate::internal::common::ids::TaskId;
use crate::internal::model::task::{EventKind, Task, TaskState};

/// Tasks sharing the subject of `tasks[index]` whose kinds it (transitively)
/// depends on.
fn dependencies(cluster: &Cluster, tasks: &[Task], index: usize) -> Vec<usize> {
    let mut found = Vec::new();
    let mut visited: Set<usize> = Set::new();
    visited.insert(index);
    let mut queue = VecDeque::from([index]);
    while let Some(current) = queue.pop_front() {
        let Some(kind) = cluster.task_kind(&tasks[current].kind) else {
            continue;
        };
        for dependency in &kind.spec.dependencies {
            for (other, task) in tasks.iter().enumerate() {
                if task.kind != *dependency
                    || !same_subject(task, &tasks[index])
                    || !visited.insert(other)
                {
                    continue;
                }
                found.push(other);
                queue.push_back(other);
            }
        }
    }
    found
}

fn same_subject(a: &Task, b: &Task) -> bool {
    a.subject.is_some() && a.subject == b.subject
}

/// Raises the priority of dependencies to the priority of the tasks that
/// depend on them, which prevents priority inversion.
///
/// Only dependencies that are still waiting to run (or pending) are raised.
/// Returns the ids of the escalated tasks.
pub fn escalate(tasks: &mut [Task], cluster: &Cluster) -> Vec<TaskId> {
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
    let mut escalated: Vec<TaskId> = Vec::new();
    for index in 0..tasks.len() {
        let priority = tasks[index].priority;
        let by = tasks[index].id;
        for dependency in dependencies(cluster, tasks, index) {
            let task = &mut tasks[dependency];
            if !task.state_in(&[
                TaskState::Ready,
                TaskState::Pending,
                TaskState::Postponed,
                TaskState::QuotaBlocked,
            ]) || task.priority >= priority
            {
                continue;
            }
            task.priority = priority;
            let reason = format!("Escalated:{}, by:{}", task.id, by);
            log::info!("{reason}");
            task.event(EventKind::Escalated, reason);
            if !escalated.contains(&task.id) {
                escalated.push(task.id);
            }
        }
    }
    escalated
}

/// Fails when a task kind depends on itself, directly or transitively.
pub fn validate_dependencies(cluster: &Cluster, kind: &str) -> crate::Result<()> {
    let mut visited: Set<String> = Set::new();
    let mut queue: VecDeque<String> = VecDeque::from([kind.to_string()]);
    while let Some(current) = queue.pop_front() {
        let Some(definition) = cluster.task_kind(&current) else {
            continue;
        };
        for dependency in &definition.spec.dependencies {
            if dependency == kind {
                return Err(TaskingError::DependencyCyclic(format!(
                    "{kind} -> {current} -> {dependency}"
                )));
            }
            if visited.insert(dependency.clone()) {
                queue.push_back(dependency.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::cluster::TaskKind;
    use crate::internal::cluster::simulator::Simulator;
    use crate::internal::model::subject::Subject;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn task(id: u64, kind: &str, priority: i32, state: TaskState) -> Task {
        Task {
            id: id.into(),
            kind: kind.to_string(),
            priority,
            state,
            subject: Some(Subject::Application(1.into())),
            ..Default::default()
        }
    }

    fn kind(name: &str, dependencies: &[&str]) -> TaskKind {
        let mut kind = TaskKind {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        kind.spec.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        kind
    }

    async fn cluster(sim: Arc<Simulator>) -> Cluster {
        let cluster = Cluster::new(sim, true);
        cluster.refresh().await.unwrap();
        cluster
    }

    #[tokio::test]
    async fn test_escalate_transitive() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        let cluster = cluster(sim).await;
        let mut tasks = vec![
            task(1, "language-discovery", 0, TaskState::Ready),
            task(2, "tech-discovery", 0, TaskState::Pending),
            task(3, "analyzer", 30, TaskState::Ready),
        ];
        let escalated = escalate(&mut tasks, &cluster);
        assert_eq!(escalated.len(), 2);
        assert!(tasks.iter().all(|t| t.priority == 30));
        let ld = tasks.iter().find(|t| t.id.as_num() == 1).unwrap();
        assert_eq!(
            ld.last_event(EventKind::Escalated).unwrap().reason,
            "Escalated:1, by:3"
        );
    }

    #[tokio::test]
    async fn test_escalate_only_raises() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        let cluster = cluster(sim).await;
        let mut tasks = vec![
            task(1, "language-discovery", 50, TaskState::Ready),
            task(2, "tech-discovery", 5, TaskState::Running),
            task(3, "analyzer", 30, TaskState::Ready),
        ];
        let mut other = task(4, "language-discovery", 0, TaskState::Ready);
        other.subject = Some(Subject::Application(2.into()));
        tasks.push(other);
        let escalated = escalate(&mut tasks, &cluster);
        assert!(escalated.is_empty());
        let priorities: Vec<(u64, i32)> = {
            let mut p: Vec<_> = tasks.iter().map(|t| (t.id.as_num(), t.priority)).collect();
            p.sort();
            p
        };
        assert_eq!(priorities, vec![(1, 50), (2, 5), (3, 30), (4, 0)]);
    }

    #[tokio::test]
    async fn test_validate_dependencies() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        sim.add_task_kind(kind("a", &["b"]));
        sim.add_task_kind(kind("b", &["c"]));
        sim.add_task_kind(kind("c", &["a"]));
        let cluster = cluster(sim).await;
        assert!(validate_dependencies(&cluster, "analyzer").is_ok());
        assert!(matches!(
            validate_dependencies(&cluster, "a"),
            Err(TaskingError::DependencyCyclic(_))
        ));
    }
}
