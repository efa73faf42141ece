use crate::internal::cluster::Cluster;
use crate::internal::common::Map;
use crate::internal::common::ids::TaskId;
use crate::internal::model::task::{EventKind, Task, TaskState};

/// Tasks considered by one postpone pass, indexed by subject.
///
/// Kind and addon keys have the form `<subject>:<kind|addon>`; tasks without
/// a subject are only indexed by isolation.
pub struct Domain<'a> {
    tasks: &'a [Task],
    by_kind: Map<String, Vec<usize>>,
    by_addon: Map<String, Vec<usize>>,
    isolated: Vec<usize>,
}

impl<'a> Domain<'a> {
    pub fn new(tasks: &'a [Task]) -> Self {
        let mut domain = Domain {
            tasks,
            by_kind: Default::default(),
            by_addon: Default::default(),
            isolated: Default::default(),
        };
        for (index, task) in tasks.iter().enumerate() {
            if let Some(key) = kind_key(task) {
                domain.by_kind.entry(key).or_default().push(index);
            }
            if let Some(key) = addon_key(task) {
                domain.by_addon.entry(key).or_default().push(index);
            }
            if task.policy.isolated {
                domain.isolated.push(index);
            }
        }
        domain
    }

    fn first_other(&self, indices: Option<&Vec<usize>>, id: TaskId) -> Option<&'a Task> {
        let tasks = self.tasks;
        indices?
            .iter()
            .map(|index| &tasks[*index])
            .find(|other| other.id != id)
    }

    /// Another task with the same subject and kind.
    pub fn match_kind(&self, task: &Task) -> Option<&'a Task> {
        let key = kind_key(task)?;
        self.first_other(self.by_kind.get(&key), task.id)
    }

    /// Another task with the same subject and addon.
    pub fn match_addon(&self, task: &Task) -> Option<&'a Task> {
        let key = addon_key(task)?;
        self.first_other(self.by_addon.get(&key), task.id)
    }

    /// Another isolated task.
    pub fn match_isolated(&self, task: &Task) -> Option<&'a Task> {
        self.first_other(Some(&self.isolated), task.id)
    }
}

fn kind_key(task: &Task) -> Option<String> {
    if task.kind.is_empty() {
        return None;
    }
    Some(format!("{}:{}", task.subject?.key(), task.kind))
}

fn addon_key(task: &Task) -> Option<String> {
    if task.addon.is_empty() {
        return None;
    }
    Some(format!("{}:{}", task.subject?.key(), task.addon))
}

/// Decides whether a ready task must wait for another task in the domain.
/// Returns the reason when it must.
pub trait Rule {
    fn matches(&mut self, task: &Task, domain: &Domain) -> Option<String>;
}

/// An isolated task runs alone.
pub struct RuleIsolated;

impl Rule for RuleIsolated {
    fn matches(&mut self, task: &Task, domain: &Domain) -> Option<String> {
        let other = domain.match_isolated(task)?;
        Some(format!(
            "Rule:Isolated matched:{}, other:{}",
            task.id, other.id
        ))
    }
}

/// At most one task per subject and kind (or addon) runs at a time.
#[derive(Default)]
pub struct RuleUnique {
    /// Postponed task -> the task it waits for.
    matched: Map<TaskId, TaskId>,
}

impl Rule for RuleUnique {
    fn matches(&mut self, task: &Task, domain: &Domain) -> Option<String> {
        let other = domain
            .match_kind(task)
            .or_else(|| domain.match_addon(task))?;
        if self.matched.contains_key(&other.id) {
            return None;
        }
        self.matched.insert(task.id, other.id);
        Some(format!("Rule:Unique matched:{}, other:{}", task.id, other.id))
    }
}

/// A task waits for tasks of the kinds its kind depends on.
pub struct RuleDependency<'c> {
    pub cluster: &'c Cluster,
}

impl Rule for RuleDependency<'_> {
    fn matches(&mut self, task: &Task, domain: &Domain) -> Option<String> {
        if task.kind.is_empty() {
            return None;
        }
        let kind = self.cluster.task_kind(&task.kind)?;
        kind.spec.dependencies.iter().find_map(|dependency| {
            let wanted = Task {
                kind: dependency.clone(),
                subject: task.subject,
                ..Default::default()
            };
            domain.match_kind(&wanted).map(|other| {
                format!("Rule:Dependency matched:{}, other:{}", task.id, other.id)
            })
        })
    }
}

/// Postpones ready tasks that conflict with other tasks and releases
/// postponed tasks that no longer do.
///
/// Tasks are considered lowest priority first, newest first, so the oldest
/// task of the highest priority wins a conflict. The list is left in that
/// order.
pub fn postpone(tasks: &mut [Task], cluster: &Cluster) {
    if tasks.is_empty() {
        return;
    }
    tasks.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.id.cmp(&a.id)));
    let mut postponed: Map<TaskId, String> = Map::default();
    let mut released: Vec<TaskId> = Vec::new();
    {
        let domain = Domain::new(tasks);
        let mut rules: Vec<Box<dyn Rule + '_>> = vec![
            Box::new(RuleIsolated),
            Box::new(RuleUnique::default()),
            Box::new(RuleDependency { cluster }),
        ];
        for task in tasks.iter() {
            if !task.state_in(&[TaskState::Ready, TaskState::Postponed, TaskState::QuotaBlocked]) {
                continue;
            }
            // Unlike a first-match chain, every rule sees every task so each
            // keeps its own bookkeeping; the first match gives the reason.
            let mut matched = None;
            for rule in rules.iter_mut() {
                if let Some(reason) = rule.matches(task, &domain) {
                    matched.get_or_insert(reason);
                }
            }
            match matched {
                Some(reason) => {
                    log::info!("{reason}");
                    postponed.insert(task.id, reason);
                }
                None if task.state == TaskState::Postponed => released.push(task.id),
                None => {}
            }
        }
    }
    for task in tasks.iter_mut() {
        if let Some(reason) = postponed.remove(&task.id) {
            log::info!("Task {} postponed: {reason}", task.id);
            task.state = TaskState::Postponed;
            task.event(EventKind::Postponed, reason);
        } else if released.contains(&task.id) {
            task.state = TaskState::Ready;
        }
    }
}
