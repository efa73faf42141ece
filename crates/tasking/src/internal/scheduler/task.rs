use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use crate::internal::auth::{ADDON_ROLE, Provider};
use crate::internal::cluster::{
    Addon, Cluster, ClusterClient, ClusterError, Extension, POD_FAILED, POD_PENDING, POD_RUNNING,
    POD_SUCCEEDED, pod_name, pod_phase, pod_unschedulable,
};
use crate::internal::common::error::{SoftError, TaskingError};
use crate::internal::common::utils::ref_matches;
use crate::internal::configuration::TaskingConfiguration;
use crate::internal::model::task::{EventKind, Task, TaskState};
use crate::internal::scheduler::pod::{ADDON_CONTAINER, add_secret_owner, build_pod, build_secret};
use crate::internal::scheduler::quota::Quota;
use crate::internal::scheduler::selector::Selector;
use crate::internal::store::Store;

/// Exit code of a container killed by the OOM killer.
const OOM_KILLED: i32 = 137;

/// Whether the addon `task` reference matches the task kind.
pub fn match_task(addon: &Addon, kind: &str) -> Result<bool, SoftError> {
    ref_matches(addon.spec.task.trim(), kind).map_err(|e| SoftError::AddonTaskNotValid {
        name: addon.name().to_string(),
        reason: e.to_string(),
    })
}

/// Whether the extension `addon` reference matches the addon.
pub fn match_addon(extension: &Extension, addon: &Addon) -> Result<bool, SoftError> {
    ref_matches(extension.spec.addon.trim(), addon.name()).map_err(|e| {
        SoftError::ExtAddonNotValid {
            name: extension.name().to_string(),
            reason: e.to_string(),
        }
    })
}

/// Init containers followed by containers.
fn container_statuses(pod: &Pod) -> impl Iterator<Item = &ContainerStatus> {
    let status = pod.status.as_ref();
    status
        .and_then(|s| s.init_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .chain(
            status
                .and_then(|s| s.container_statuses.as_ref())
                .into_iter()
                .flatten(),
        )
}

fn quota_reason(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    if !(lower.contains("quota") && lower.contains("exceeded")) {
        return None;
    }
    let reason = match message.split_once(':') {
        Some((_, reason)) => reason.trim(),
        None => message,
    };
    Some(reason.to_string())
}

fn missing_priority_class(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("no PriorityClass with name ")?;
    Some(rest.split_whitespace().next().unwrap_or_default().to_string())
}

/// Deletes the task pod (grace period 0) and records it.
///
/// A pod that is already gone is not an error.
pub async fn delete_pod(task: &mut Task, client: &dyn ClusterClient) -> crate::Result<()> {
    let Some(name) = task.pod_name().map(str::to_string) else {
        return Ok(());
    };
    match client.delete_pod(&name).await {
        Ok(()) => {}
        Err(error) if error.is_not_found() => {}
        Err(error) => return Err(error.into()),
    }
    let pod = std::mem::take(&mut task.pod);
    task.event(EventKind::PodDeleted, pod);
    task.terminated = Some(Utc::now());
    log::info!("Task {} pod deleted: {name}", task.id);
    Ok(())
}

/// Deletes the pod, marks the task canceled and releases its bucket.
pub async fn cancel(task: &mut Task, client: &dyn ClusterClient) -> crate::Result<()> {
    delete_pod(task, client).await?;
    task.state = TaskState::Canceled;
    task.event(EventKind::Canceled, "");
    task.bucket = None;
    log::info!("Task {} canceled.", task.id);
    Ok(())
}

/// Starts tasks on the cluster and follows their pods.
pub struct TaskRunner<'a> {
    pub cluster: &'a Cluster,
    pub store: &'a dyn Store,
    pub auth: &'a dyn Provider,
    pub config: &'a TaskingConfiguration,
}

impl TaskRunner<'_> {
    fn client(&self) -> &dyn ClusterClient {
        self.cluster.client().as_ref()
    }

    /// Picks the addon when the task names none.
    pub fn select_addon(&self, task: &mut Task) -> crate::Result<Arc<Addon>> {
        if !task.addon.is_empty() {
            return self
                .cluster
                .addon(&task.addon)
                .ok_or_else(|| SoftError::AddonNotFound(task.addon.clone()).into());
        }
        let kind = self
            .cluster
            .task_kind(&task.kind)
            .ok_or_else(|| SoftError::KindNotFound(task.kind.clone()))?;
        let selector = Selector::new(self.store, task.subject);
        let mut selected = None;
        for addon in self.cluster.addons() {
            if !match_task(&addon, kind.name())? {
                continue;
            }
            if selector.matches(&addon.spec.selector)? {
                selected = Some(addon);
                break;
            }
        }
        let addon = selected.ok_or(SoftError::AddonNotSelected)?;
        if !addon.ready() {
            return Err(SoftError::NotReady {
                kind: Addon::KIND.to_string(),
                name: addon.name().to_string(),
                reason: addon.not_ready_reason(),
            }
            .into());
        }
        task.addon = addon.name().to_string();
        task.event(EventKind::AddonSelected, addon.name());
        Ok(addon)
    }

    /// Picks every matching extension when the task names none.
    pub fn select_extensions(&self, task: &mut Task, addon: &Addon) -> crate::Result<()> {
        if !task.extensions.is_empty() {
            return Ok(());
        }
        let selector = Selector::new(self.store, task.subject);
        for extension in self.cluster.extensions() {
            if !match_addon(&extension, addon)? {
                continue;
            }
            if selector.matches(&extension.spec.selector)? {
                task.extensions.push(extension.name().to_string());
                task.event(EventKind::ExtensionSelected, extension.name());
            }
        }
        Ok(())
    }

    /// Creates the pod of a task.
    ///
    /// Returns whether the pod was created. Task-local failures are folded
    /// into the task: retried ones leave it schedulable, the others fail it.
    pub async fn run(&self, task: &mut Task, quota: &mut Quota) -> crate::Result<bool> {
        match self.start(task, quota).await {
            Ok(()) => {
                quota.created();
                Ok(true)
            }
            Err(TaskingError::SoftError(error)) => {
                if !error.retry() {
                    log::info!("Task {} failed: {error}", task.id);
                    task.fail(error.to_string());
                }
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    async fn start(&self, task: &mut Task, quota: &Quota) -> crate::Result<()> {
        if quota.exhausted() {
            let reason = quota.to_string();
            task.state = TaskState::QuotaBlocked;
            task.event(EventKind::QuotaBlocked, reason.as_str());
            return Err(SoftError::QuotaExceeded(reason).into());
        }
        let addon = self
            .cluster
            .addon(&task.addon)
            .ok_or_else(|| SoftError::AddonNotFound(task.addon.clone()))?;
        let extensions = self.cluster.find_extensions(&task.extensions)?;
        for extension in &extensions {
            if !match_addon(extension, &addon)? {
                return Err(SoftError::ExtensionNotValid {
                    name: extension.name().to_string(),
                    addon: addon.name().to_string(),
                }
                .into());
            }
        }
        let owner = self
            .cluster
            .tackle()
            .ok_or_else(|| TaskingError::GenericError("Tackle CR not found.".to_string()))?;

        let mut claims = serde_json::Map::new();
        claims.insert("task".to_string(), task.id.as_num().into());
        let token = self
            .auth
            .new_token(&format!("addon:{}", addon.name()), &ADDON_ROLE, claims)?;
        let namespace = self.cluster.namespace();
        let client = self.client();
        let mut secret = client
            .create_secret(&build_secret(task, namespace, token))
            .await?;
        let secret_name = secret.metadata.name.clone().unwrap_or_default();

        let extensions: Vec<&Extension> = extensions.iter().map(Arc::as_ref).collect();
        let pod = build_pod(
            task,
            &addon,
            &extensions,
            &owner,
            &secret,
            namespace,
            self.config,
        );
        let pod = match client.create_pod(&pod).await {
            Ok(pod) => pod,
            Err(error) => {
                if let Err(e) = client.delete_secret(&secret_name).await {
                    log::warn!("Secret {secret_name} not deleted: {e}");
                }
                return Err(self.create_failed(task, error));
            }
        };
        let name = pod_name(&pod).to_string();
        add_secret_owner(&mut secret, &pod);
        if let Err(error) = client.update_secret(&secret).await {
            if let Err(e) = client.delete_pod(&name).await {
                log::warn!("Pod {name} not deleted: {e}");
            }
            if let Err(e) = client.delete_secret(&secret_name).await {
                log::warn!("Secret {secret_name} not deleted: {e}");
            }
            return Err(error.into());
        }
        task.started = Some(Utc::now());
        task.state = TaskState::Pending;
        task.pod = format!("{namespace}/{name}");
        task.event(EventKind::PodCreated, task.pod.clone());
        log::info!("Task {} pod created: {}", task.id, task.pod);
        Ok(())
    }

    fn create_failed(&self, task: &mut Task, error: ClusterError) -> TaskingError {
        match &error {
            ClusterError::Forbidden(message) => {
                if let Some(reason) = quota_reason(message) {
                    task.state = TaskState::QuotaBlocked;
                    task.event(EventKind::QuotaBlocked, reason.as_str());
                    return SoftError::QuotaExceeded(reason).into();
                }
                if let Some(name) = missing_priority_class(message) {
                    return SoftError::PriorityNotFound(name).into();
                }
                SoftError::PodRejected(message.clone()).into()
            }
            ClusterError::BadRequest(message) | ClusterError::Invalid(message) => {
                match missing_priority_class(message) {
                    Some(name) => SoftError::PriorityNotFound(name).into(),
                    None => SoftError::PodRejected(message.clone()).into(),
                }
            }
            _ => error.into(),
        }
    }

    /// Updates the task from its pod as seen by the last cluster refresh.
    ///
    /// Returns the pod when it exists.
    pub async fn reflect(&self, task: &mut Task) -> Option<Arc<Pod>> {
        let Some(pod) = task.pod_name().and_then(|name| self.cluster.pod(name)) else {
            log::info!("Task {} pod not found: {}", task.id, task.pod);
            let pod = std::mem::take(&mut task.pod);
            task.state = TaskState::Ready;
            task.event(EventKind::PodNotFound, pod);
            task.terminated = None;
            task.started = None;
            return None;
        };
        match pod_phase(&pod) {
            POD_PENDING => self.pod_pending(task, &pod),
            POD_RUNNING => self.pod_running(task, &pod).await,
            POD_SUCCEEDED => pod_succeeded(task),
            POD_FAILED => self.pod_failed(task, &pod).await,
            _ => {}
        }
        Some(pod)
    }

    fn pod_pending(&self, task: &mut Task, pod: &Pod) {
        if let Some(message) = pod_unschedulable(pod) {
            task.event(EventKind::PodUnschedulable, message);
            return;
        }
        let mut started = 0;
        for status in container_statuses(pod) {
            if status.started == Some(true) {
                started += 1;
            }
            let Some(waiting) = status.state.as_ref().and_then(|s| s.waiting.as_ref()) else {
                continue;
            };
            let reason = waiting.reason.as_deref().unwrap_or_default();
            if self.config.is_waiting_terminal(reason) {
                task.event(EventKind::ImageError, reason);
                task.fail(format!("Container ({}) failed: {reason}", status.name));
                log::info!("Task {} container {} failed: {reason}", task.id, status.name);
                return;
            }
            task.event(EventKind::PodPending, reason);
        }
        if started > 0 {
            task.state = TaskState::Running;
            task.event(EventKind::PodRunning, "");
        }
    }

    async fn pod_running(&self, task: &mut Task, pod: &Pod) {
        task.state = TaskState::Running;
        task.event(EventKind::PodRunning, "");
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .into_iter()
            .flatten();
        for status in statuses {
            let Some(terminated) = status.state.as_ref().and_then(|s| s.terminated.as_ref())
            else {
                continue;
            };
            if terminated.exit_code != 0 {
                self.pod_failed(task, pod).await;
                return;
            }
            if status.name == ADDON_CONTAINER {
                pod_succeeded(task);
            }
        }
    }

    async fn pod_failed(&self, task: &mut Task, pod: &Pod) {
        for status in container_statuses(pod) {
            let Some(terminated) = status.state.as_ref().and_then(|s| s.terminated.as_ref())
            else {
                continue;
            };
            let reason = terminated.reason.clone().unwrap_or_default();
            task.event(EventKind::PodFailed, reason.as_str());
            match terminated.exit_code {
                0 => continue,
                OOM_KILLED if task.retries < self.config.retries => {
                    let name = pod_name(pod);
                    if let Err(error) = self.client().delete_pod(name).await {
                        log::warn!("Task {} pod {name} not deleted: {error}", task.id);
                    }
                    task.pod.clear();
                    task.state = TaskState::Ready;
                    task.started = None;
                    task.terminated = None;
                    task.errors.clear();
                    task.retries += 1;
                    log::info!(
                        "Task {} container {} OOM killed; retry {}.",
                        task.id,
                        status.name,
                        task.retries
                    );
                    return;
                }
                _ => {
                    task.fail(format!("Container ({}) failed: {reason}", status.name));
                    return;
                }
            }
        }
        // No container explains the failure.
        let reason = pod
            .status
            .as_ref()
            .and_then(|s| s.reason.as_deref())
            .unwrap_or_default();
        task.fail(format!("Pod ({}) failed: {reason}", pod_name(pod)));
    }
}

fn pod_succeeded(task: &mut Task) {
    task.state = TaskState::Succeeded;
    task.event(EventKind::PodSucceeded, "");
    task.terminated = Some(Utc::now());
}
