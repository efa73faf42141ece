use std::sync::Arc;

use async_trait::async_trait;

use crate::internal::auth::{AuthError, Claims, Validator};
use crate::internal::cluster::{ClusterClient, POD_PENDING, POD_RUNNING, pod_phase};
use crate::internal::common::ids::TaskId;
use crate::internal::model::task::TaskState;
use crate::internal::store::Store;

/// Accepts task tokens only while the task and its pod are alive.
pub struct TaskValidator {
    store: Arc<dyn Store>,
    client: Arc<dyn ClusterClient>,
}

impl TaskValidator {
    pub fn new(store: Arc<dyn Store>, client: Arc<dyn ClusterClient>) -> Self {
        TaskValidator { store, client }
    }
}

#[async_trait]
impl Validator for TaskValidator {
    async fn validate(&self, claims: &Claims) -> Result<(), AuthError> {
        let Some(id) = claims.task else {
            return Ok(());
        };
        let task = self
            .store
            .get_task(TaskId::new(id))
            .ok()
            .flatten()
            .ok_or_else(|| {
                AuthError::not_valid(format!("Task ({id}) referenced by token: not found."))
            })?;
        if !task.state_in(&[TaskState::Pending, TaskState::Running]) {
            return Err(AuthError::not_valid(format!(
                "Task ({id}) referenced by token: not running."
            )));
        }
        let name = task.pod_name().unwrap_or_default();
        let pod = self.client.get_pod(name).await.map_err(|_| {
            AuthError::not_valid(format!("Pod ({name}) referenced by token: not found."))
        })?;
        let phase = pod_phase(&pod);
        if !matches!(phase, POD_PENDING | POD_RUNNING) {
            return Err(AuthError::not_valid(format!(
                "Pod ({}) referenced by token: not running. Phase: {phase}",
                task.pod
            )));
        }
        Ok(())
    }
}
