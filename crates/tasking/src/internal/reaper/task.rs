use chrono::{DateTime, TimeDelta, Utc};

use crate::internal::cluster::ClusterClient;
use crate::internal::common::Set;
use crate::internal::common::ids::TaskGroupId;
use crate::internal::configuration::ReaperConfiguration;
use crate::internal::model::group::{GroupMode, TaskGroup};
use crate::internal::model::task::{EventKind, Task, TaskState};
use crate::internal::scheduler::task::delete_pod;
use crate::internal::store::{Store, TaskFilter};

/// Ready groups older than this give up their bucket, in minutes.
const GROUP_RELEASE_AGE: i64 = 60;

fn elapsed(since: DateTime<Utc>, minutes: i64) -> bool {
    Utc::now() - since > TimeDelta::minutes(minutes)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Verdict {
    Keep,
    Release,
    Delete,
}

/// Deletes tasks past their TTL and releases the resources of old tasks.
pub struct TaskReaper<'a> {
    pub store: &'a dyn Store,
    pub client: &'a dyn ClusterClient,
    pub config: &'a ReaperConfiguration,
}

impl TaskReaper<'_> {
    /// A task TTL deletes the task. Without one, the configured threshold
    /// (when the state has one) only releases it.
    fn verdict(&self, task: &Task) -> Verdict {
        let rule = |since: DateTime<Utc>, ttl: i64, threshold: Option<i64>| {
            if ttl > 0 {
                return if elapsed(since, ttl) {
                    Verdict::Delete
                } else {
                    Verdict::Keep
                };
            }
            match threshold {
                Some(minutes) if elapsed(since, minutes) => Verdict::Release,
                _ => Verdict::Keep,
            }
        };
        let ttl = &task.ttl;
        let terminated = task.terminated.unwrap_or(task.create_time);
        match task.state {
            TaskState::Created => rule(task.create_time, ttl.created, Some(self.config.created)),
            TaskState::Ready
            | TaskState::Postponed
            | TaskState::QuotaBlocked
            | TaskState::Pending => rule(task.create_time, ttl.pending, None),
            TaskState::Running => rule(
                task.started.unwrap_or(task.create_time),
                ttl.running,
                None,
            ),
            TaskState::Succeeded => rule(terminated, ttl.succeeded, Some(self.config.succeeded)),
            TaskState::Failed => rule(terminated, ttl.failed, Some(self.config.failed)),
            TaskState::Canceled => Verdict::Keep,
        }
    }

    pub async fn run(&self) -> crate::Result<()> {
        log::debug!("Reaping tasks.");
        let tasks = self.store.find_tasks(&TaskFilter::default())?;
        let groups = self.store.list_groups()?;
        let pipelines: Set<TaskGroupId> = groups
            .iter()
            .filter(|g| g.mode == GroupMode::Pipeline)
            .map(|g| g.id)
            .collect();
        // Pipelines that can still make progress.
        let live: Set<TaskGroupId> = tasks
            .iter()
            .filter(|t| !t.state.is_terminal())
            .filter_map(|t| t.task_group)
            .filter(|g| pipelines.contains(g))
            .collect();

        for task in tasks.into_iter().filter(|t| !t.reaped) {
            let group = task.task_group;
            let result = match self.verdict(&task) {
                Verdict::Keep => continue,
                Verdict::Delete if group.is_some_and(|g| live.contains(&g)) => continue,
                Verdict::Release
                    if task.state == TaskState::Created
                        && group.is_some_and(|g| pipelines.contains(&g)) =>
                {
                    continue;
                }
                Verdict::Delete => self.delete(task).await,
                Verdict::Release => self.release(task).await,
            };
            if let Err(error) = result {
                log::error!("Task reaper: {error}");
            }
        }
        Ok(())
    }

    /// Frees the bucket, attachments and pod of the task. The row stays.
    async fn release(&self, mut task: Task) -> crate::Result<()> {
        if task.has_pod() {
            let terminated = task.terminated;
            delete_pod(&mut task, self.client).await?;
            if terminated.is_some() {
                task.terminated = terminated;
            }
        }
        task.reaped = true;
        if task.bucket.take().is_some() {
            log::info!("Task {} bucket released.", task.id);
        }
        task.attached.clear();
        task.event(EventKind::Released, "");
        self.store.update_task(&task)
    }

    async fn delete(&self, mut task: Task) -> crate::Result<()> {
        if let Err(error) = delete_pod(&mut task, self.client).await {
            log::error!("Task {} pod not deleted: {error}", task.id);
        }
        self.store.delete_task(task.id)?;
        log::info!("Task {} deleted.", task.id);
        Ok(())
    }
}

/// Deletes stale groups and releases the buckets of submitted ones.
pub struct GroupReaper<'a> {
    pub store: &'a dyn Store,
    pub config: &'a ReaperConfiguration,
}

impl GroupReaper<'_> {
    pub fn run(&self) -> crate::Result<()> {
        log::debug!("Reaping groups.");
        for group in self.store.list_groups()? {
            let result = match group.state {
                TaskState::Created if elapsed(group.create_time, self.config.created) => {
                    self.delete(&group)
                }
                TaskState::Ready if elapsed(group.create_time, GROUP_RELEASE_AGE) => {
                    let members = self.store.find_tasks(&TaskFilter::group(group.id))?;
                    if members.is_empty() {
                        self.delete(&group)
                    } else {
                        self.release(group)
                    }
                }
                _ => Ok(()),
            };
            if let Err(error) = result {
                log::error!("Group reaper: {error}");
            }
        }
        Ok(())
    }

    fn release(&self, mut group: TaskGroup) -> crate::Result<()> {
        let mut changed = false;
        if group.bucket.take().is_some() {
            log::info!("Group {} bucket released.", group.id);
            changed = true;
        }
        if !group.list.is_empty() {
            group.list.clear();
            changed = true;
        }
        if changed {
            self.store.update_group(&group)?;
        }
        Ok(())
    }

    fn delete(&self, group: &TaskGroup) -> crate::Result<()> {
        self.store.delete_group(group.id)?;
        log::info!("Group {} deleted.", group.id);
        Ok(())
    }
}
