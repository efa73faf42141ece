use derive_builder::Builder;

use crate::Priority;
use crate::internal::common::ids::ApplicationId;
use crate::internal::model::subject::Subject;
use crate::internal::model::task::{Task, TaskPolicy, TaskState};

/// Task as submitted by a user.
#[derive(Builder, Clone)]
#[builder(pattern = "owned")]
pub struct TaskConfig {
    #[builder(setter(into))]
    kind: String,
    #[builder(default = "TaskState::Ready")]
    state: TaskState,
    #[builder(default)]
    priority: Priority,
    #[builder(default, setter(strip_option))]
    application: Option<u64>,
    #[builder(default)]
    isolated: bool,
}

impl From<TaskConfig> for Task {
    fn from(config: TaskConfig) -> Self {
        let TaskConfig {
            kind,
            state,
            priority,
            application,
            isolated,
        } = config;
        Task {
            name: format!("{kind}-test"),
            create_user: "tester".to_string(),
            kind,
            state,
            priority,
            policy: TaskPolicy {
                isolated,
                ..Default::default()
            },
            subject: application.map(|id| Subject::Application(ApplicationId::new(id))),
            ..Default::default()
        }
    }
}
