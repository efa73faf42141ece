use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Priority;
use crate::internal::common::ids::{BucketId, TaskGroupId, TaskId};
use crate::internal::model::Referencing;
use crate::internal::model::task::{Task, TaskPolicy, TaskState};

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    #[default]
    Batch,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: TaskGroupId,
    pub create_time: DateTime<Utc>,
    pub create_user: String,
    pub update_user: String,
    pub name: String,
    pub mode: GroupMode,
    pub kind: String,
    pub addon: String,
    pub extensions: Vec<String>,
    pub state: TaskState,
    pub priority: Priority,
    pub policy: TaskPolicy,
    pub data: serde_json::Value,
    pub bucket: Option<BucketId>,
    /// Task templates; consumed by submit.
    pub list: Vec<Task>,
    /// Created member tasks, in submission order.
    pub tasks: Vec<TaskId>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self {
            id: TaskGroupId::default(),
            create_time: Utc::now(),
            create_user: String::new(),
            update_user: String::new(),
            name: String::new(),
            mode: GroupMode::Batch,
            kind: String::new(),
            addon: String::new(),
            extensions: Vec::new(),
            state: TaskState::Created,
            priority: 0,
            policy: TaskPolicy::default(),
            data: serde_json::Value::Null,
            bucket: None,
            list: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

impl Referencing for TaskGroup {
    fn bucket_refs(&self) -> Vec<BucketId> {
        self.bucket.into_iter().collect()
    }
}
