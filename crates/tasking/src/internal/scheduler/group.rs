use crate::internal::cluster::ClusterClient;
use crate::internal::common::error::TaskingError;
use crate::internal::common::json::merged;
use crate::internal::model::group::{GroupMode, TaskGroup};
use crate::internal::model::task::{EventKind, Task, TaskState};
use crate::internal::scheduler::manager::Manager;
use crate::internal::scheduler::task::cancel;
use crate::internal::store::{Store, TaskFilter};

/// Member tasks built from the group templates.
///
/// Batch groups push their settings into every member; pipeline groups only
/// start the first member, the others wait in `Created`.
pub fn propagate(group: &TaskGroup) -> Vec<Task> {
    group
        .list
        .iter()
        .enumerate()
        .map(|(index, template)| {
            let mut task = template.clone();
            task.create_user = group.create_user.clone();
            task.update_user = group.update_user.clone();
            match group.mode {
                GroupMode::Batch => {
                    task.state = group.state;
                    task.kind = group.kind.clone();
                    task.addon = group.addon.clone();
                    task.extensions = group.extensions.clone();
                    task.priority = group.priority;
                    task.policy = group.policy.clone();
                    task.bucket = group.bucket;
                    task.data = merged(std::mem::take(&mut task.data), &group.data);
                }
                GroupMode::Pipeline if index == 0 => {
                    task.state = group.state;
                    task.bucket = group.bucket;
                }
                GroupMode::Pipeline => {}
            }
            task
        })
        .collect()
}

/// Submits the group: marks it ready and creates its member tasks.
pub fn submit(manager: &Manager, mut group: TaskGroup) -> crate::Result<TaskGroup> {
    if group.list.iter().any(|task| task.id.is_set()) {
        return Err(TaskingError::BadRequest(
            "tasks already created".to_string(),
        ));
    }
    group.state = TaskState::Ready;
    let members = propagate(&group);
    let store = manager.store();
    let mut group = if group.id.is_set() {
        store.update_group(&group)?;
        group
    } else {
        store.create_group(group)?
    };
    group.tasks.clear();
    for mut task in members {
        task.task_group = Some(group.id);
        let task = manager.create(task)?;
        group.tasks.push(task.id);
    }
    store.update_group(&group)?;
    log::info!(
        "Group {} submitted ({:?}): {} tasks.",
        group.id,
        group.mode,
        group.tasks.len()
    );
    Ok(group)
}

/// Moves a pipeline along after one of its members terminated.
///
/// On success the next member still in `Created` becomes ready; on failure
/// every unfinished member is canceled. Returns the members that changed.
pub async fn advance_pipeline(
    task: &Task,
    store: &dyn Store,
    client: &dyn ClusterClient,
) -> crate::Result<Vec<Task>> {
    let Some(group_id) = task.task_group else {
        return Ok(Vec::new());
    };
    let Some(group) = store.get_group(group_id)? else {
        return Ok(Vec::new());
    };
    if group.mode != GroupMode::Pipeline {
        return Ok(Vec::new());
    }
    let mut members = store.find_tasks(&TaskFilter::group(group_id))?;
    members.sort_by_key(|member| member.id);
    let mut updated = Vec::new();
    for mut member in members.into_iter().filter(|m| m.id != task.id) {
        match task.state {
            TaskState::Succeeded => {
                if member.state == TaskState::Created {
                    log::info!("Pipeline {group_id}: task {} ready.", member.id);
                    member.state = TaskState::Ready;
                    updated.push(member);
                    break;
                }
            }
            TaskState::Failed => {
                if member.state.is_terminal() {
                    continue;
                }
                let reason = format!(
                    "Canceled:{}, when (pipelined) task:{} failed.",
                    member.id, task.id
                );
                member.event(EventKind::Canceled, reason);
                if let Err(error) = cancel(&mut member, client).await {
                    log::error!("Pipeline {group_id}: task {} not canceled: {error}", member.id);
                }
                updated.push(member);
            }
            _ => break,
        }
    }
    Ok(updated)
}
