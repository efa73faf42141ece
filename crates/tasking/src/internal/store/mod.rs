mod memory;

pub use memory::MemoryStore;

use crate::internal::common::ids::{
    ApplicationId, BucketId, FileId, PlatformId, TagId, TaskGroupId, TaskId,
};
use crate::internal::model::Referencing;
use crate::internal::model::group::TaskGroup;
use crate::internal::model::storage::{Bucket, File};
use crate::internal::model::subject::{Application, Platform, Tag, TagCategory};
use crate::internal::model::task::{Task, TaskState};

/// Query over tasks. Results are ordered by `priority DESC, id ASC`.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    /// Empty means any state.
    pub states: Vec<TaskState>,
    pub group: Option<TaskGroupId>,
    pub retained: Option<bool>,
}

impl TaskFilter {
    pub fn states(states: &[TaskState]) -> Self {
        TaskFilter {
            states: states.to_vec(),
            ..Default::default()
        }
    }

    pub fn group(group: TaskGroupId) -> Self {
        TaskFilter {
            group: Some(group),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        (self.states.is_empty() || task.state_in(&self.states))
            && self.group.is_none_or(|g| task.task_group == Some(g))
            && self.retained.is_none_or(|r| task.retained == r)
    }
}

/// Persistent store used by the scheduler and the reapers.
pub trait Store: Send + Sync {
    /// Assigns the id and create time, then inserts the task.
    fn create_task(&self, task: Task) -> crate::Result<Task>;
    fn get_task(&self, id: TaskId) -> crate::Result<Option<Task>>;
    fn find_tasks(&self, filter: &TaskFilter) -> crate::Result<Vec<Task>>;
    fn update_task(&self, task: &Task) -> crate::Result<()>;
    /// Writes all tasks or none of them.
    fn update_tasks(&self, tasks: &[Task]) -> crate::Result<()>;
    fn delete_task(&self, id: TaskId) -> crate::Result<()>;

    fn create_group(&self, group: TaskGroup) -> crate::Result<TaskGroup>;
    fn get_group(&self, id: TaskGroupId) -> crate::Result<Option<TaskGroup>>;
    fn list_groups(&self) -> crate::Result<Vec<TaskGroup>>;
    fn update_group(&self, group: &TaskGroup) -> crate::Result<()>;
    fn delete_group(&self, id: TaskGroupId) -> crate::Result<()>;

    fn create_bucket(&self) -> crate::Result<Bucket>;
    fn list_buckets(&self) -> crate::Result<Vec<Bucket>>;
    fn update_bucket(&self, bucket: &Bucket) -> crate::Result<()>;
    fn delete_bucket(&self, id: BucketId) -> crate::Result<()>;

    fn create_file(&self, name: &str) -> crate::Result<File>;
    fn get_file(&self, id: FileId) -> crate::Result<Option<File>>;
    fn list_files(&self) -> crate::Result<Vec<File>>;
    fn update_file(&self, file: &File) -> crate::Result<()>;
    fn delete_file(&self, id: FileId) -> crate::Result<()>;

    fn application(&self, id: ApplicationId) -> crate::Result<Option<Application>>;
    fn platform(&self, id: PlatformId) -> crate::Result<Option<Platform>>;
    fn tag(&self, id: TagId) -> crate::Result<Option<Tag>>;
    fn tag_category_by_name(&self, name: &str) -> crate::Result<Option<TagCategory>>;

    /// Calls `visitor` with every row that may reference buckets or files.
    fn visit_references(&self, visitor: &mut dyn FnMut(&dyn Referencing)) -> crate::Result<()>;
}
