mod cache;
mod resource;
pub mod simulator;

pub use cache::Cluster;
pub use resource::{
    Addon, AddonSpec, Extension, ExtensionSpec, GROUP, ResourceCondition, ResourceStatus, Tackle,
    TaskKind, TaskKindSpec, VERSION,
};

use std::pin::Pin;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod, ResourceQuota, Secret};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Label carried by every pod created for a task.
pub const TASK_LABEL: &str = "task";
pub const APP_LABEL: &str = "app";
pub const ROLE_LABEL: &str = "role";

pub const POD_PENDING: &str = "Pending";
pub const POD_RUNNING: &str = "Running";
pub const POD_SUCCEEDED: &str = "Succeeded";
pub const POD_FAILED: &str = "Failed";

pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("{0}")]
    Other(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Access to the namespace the hub runs in.
///
/// Every call is scoped to that namespace. Pod deletion uses a zero grace
/// period.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    fn namespace(&self) -> &str;

    async fn list_tackles(&self) -> ClusterResult<Vec<Tackle>>;
    async fn list_addons(&self) -> ClusterResult<Vec<Addon>>;
    async fn list_extensions(&self) -> ClusterResult<Vec<Extension>>;
    async fn list_task_kinds(&self) -> ClusterResult<Vec<TaskKind>>;
    async fn list_pods(&self) -> ClusterResult<Vec<Pod>>;
    async fn list_quotas(&self) -> ClusterResult<Vec<ResourceQuota>>;
    /// Events whose involved object has the given name.
    async fn list_events(&self, involved: &str) -> ClusterResult<Vec<Event>>;

    async fn get_pod(&self, name: &str) -> ClusterResult<Pod>;
    async fn create_pod(&self, pod: &Pod) -> ClusterResult<Pod>;
    async fn delete_pod(&self, name: &str) -> ClusterResult<()>;

    async fn create_secret(&self, secret: &Secret) -> ClusterResult<Secret>;
    async fn update_secret(&self, secret: &Secret) -> ClusterResult<Secret>;
    async fn delete_secret(&self, name: &str) -> ClusterResult<()>;

    /// Follows the log of a container until the container exits.
    async fn pod_logs(&self, pod: &str, container: &str) -> ClusterResult<LogStream>;
    async fn exec(&self, pod: &str, container: &str, command: Vec<String>) -> ClusterResult<()>;
}

/// Phase of a pod, empty when the status is missing.
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
}

pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// Pod is pending and the scheduler reported it as unschedulable.
pub fn pod_unschedulable(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "PodScheduled" && c.reason.as_deref() == Some("Unschedulable"))
        })
        .map(|c| c.message.as_deref().unwrap_or_default())
}
