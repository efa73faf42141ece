use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::internal::auth::Provider;
use crate::internal::cluster::{Cluster, ClusterClient, POD_RUNNING, pod_name, pod_phase};
use crate::internal::common::Set;
use crate::internal::common::error::{SoftError, TaskingError};
use crate::internal::common::ids::TaskId;
use crate::internal::common::json::merged;
use crate::internal::configuration::TaskingConfiguration;
use crate::internal::model::task::{EventKind, Task, TaskState};
use crate::internal::scheduler::capacity::CapacityMonitor;
use crate::internal::scheduler::collector::LogManager;
use crate::internal::scheduler::group::advance_pipeline;
use crate::internal::scheduler::priority::{escalate, validate_dependencies};
use crate::internal::scheduler::quota::Quota;
use crate::internal::scheduler::rules::postpone;
use crate::internal::scheduler::snapshot::{ensure_terminated, snapshot};
use crate::internal::scheduler::task::{TaskRunner, cancel, delete_pod};
use crate::internal::store::{Store, TaskFilter};

/// Deferred work executed by the manager loop between two sweeps.
pub type Action = BoxFuture<'static, crate::Result<()>>;

/// How long the action queue may stay empty before the drain stops.
const ACTION_IDLE: Duration = Duration::from_millis(10);
const SLOW_UPDATE: Duration = Duration::from_secs(3);

/// Drives tasks from ready to terminal.
///
/// Every tick refreshes the cluster view, removes pods nobody owns, drains
/// the action queue, reflects the pods of started tasks and finally starts
/// as many ready tasks as capacity and quota allow.
pub struct Manager {
    config: Arc<TaskingConfiguration>,
    store: Arc<dyn Store>,
    cluster: Arc<Cluster>,
    auth: Arc<dyn Provider>,
    capacity: Arc<CapacityMonitor>,
    logs: LogManager,
    actions: UnboundedSender<Action>,
    queue: tokio::sync::Mutex<UnboundedReceiver<Action>>,
}

impl Manager {
    pub fn new(
        config: Arc<TaskingConfiguration>,
        store: Arc<dyn Store>,
        cluster: Arc<Cluster>,
        auth: Arc<dyn Provider>,
        capacity: Arc<CapacityMonitor>,
        token: CancellationToken,
    ) -> Self {
        let (actions, queue) = unbounded_channel();
        let logs = LogManager::new(store.clone(), cluster.client().clone(), token);
        Manager {
            config,
            store,
            cluster,
            auth,
            capacity,
            logs,
            actions,
            queue: tokio::sync::Mutex::new(queue),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn config(&self) -> &TaskingConfiguration {
        &self.config
    }

    pub fn logs(&self) -> &LogManager {
        &self.logs
    }

    fn client(&self) -> &dyn ClusterClient {
        self.cluster.client().as_ref()
    }

    fn runner(&self) -> TaskRunner<'_> {
        TaskRunner {
            cluster: &self.cluster,
            store: self.store.as_ref(),
            auth: self.auth.as_ref(),
            config: &self.config,
        }
    }

    /// One pass of the control loop.
    pub async fn tick(&self) {
        if let Err(error) = self.cluster.refresh().await {
            if error.is_not_reconciled() {
                log::info!("{error}");
            } else {
                log::error!("Cluster refresh failed: {error}");
            }
            return;
        }
        report("Orphan pod sweep", self.delete_orphan_pods().await);
        report("Retained pod sweep", self.delete_retained_pods().await);
        self.run_actions().await;
        report("Running task update", self.update_running().await);
        report("Zombie sweep", self.delete_zombies().await);
        report("Ready task start", self.start_ready().await);
    }

    /// Validates the references of a new task and inserts it.
    ///
    /// The kind supplies the default priority and data; the caller's data
    /// wins over the kind data.
    pub fn create(&self, mut requested: Task) -> crate::Result<Task> {
        if !requested.state_in(&[TaskState::Created, TaskState::Ready]) {
            return Err(TaskingError::BadRequest(
                "state must be (Created|Ready)".to_string(),
            ));
        }
        self.find_refs(&mut requested)?;
        let task = Task {
            create_user: requested.create_user,
            update_user: requested.update_user,
            name: requested.name,
            kind: requested.kind,
            addon: requested.addon,
            extensions: requested.extensions,
            state: requested.state,
            locator: requested.locator,
            priority: requested.priority,
            policy: requested.policy,
            ttl: requested.ttl,
            data: requested.data,
            subject: requested.subject,
            task_group: requested.task_group,
            bucket: requested.bucket,
            ..Default::default()
        };
        let task = self.store.create_task(task)?;
        log::debug!("Task {} created ({}).", task.id, task.state);
        Ok(task)
    }

    /// Applies a user update.
    ///
    /// Created tasks accept every user field. Tasks waiting to run accept
    /// only name, locator, policy and TTL. Updates of other tasks are
    /// discarded.
    pub fn update(&self, requested: &Task) -> crate::Result<()> {
        let mut found = self.get(requested.id)?;
        match found.state {
            TaskState::Created => {
                let mut requested = requested.clone();
                self.find_refs(&mut requested)?;
                found.update_user = requested.update_user;
                found.name = requested.name;
                found.kind = requested.kind;
                found.addon = requested.addon;
                found.extensions = requested.extensions;
                found.state = requested.state;
                found.locator = requested.locator;
                found.priority = requested.priority;
                found.policy = requested.policy;
                found.ttl = requested.ttl;
                found.data = requested.data;
                found.subject = requested.subject;
                found.task_group = requested.task_group;
            }
            TaskState::Ready
            | TaskState::Pending
            | TaskState::QuotaBlocked
            | TaskState::Postponed => {
                found.update_user.clone_from(&requested.update_user);
                found.name.clone_from(&requested.name);
                found.locator.clone_from(&requested.locator);
                found.policy = requested.policy.clone();
                found.ttl = requested.ttl.clone();
            }
            _ => {
                log::debug!("Task {} update discarded ({}).", found.id, found.state);
                return Ok(());
            }
        }
        self.store.update_task(&found)
    }

    /// Queues deletion of the task pod and row.
    pub fn delete(&self, id: TaskId) -> crate::Result<()> {
        let task = self.get(id)?;
        self.action(delete_action(self.store.clone(), self.cluster.clone(), task))
    }

    /// Queues cancellation. Terminal tasks are left alone.
    pub fn cancel(&self, id: TaskId) -> crate::Result<()> {
        self.get(id)?;
        self.action(cancel_action(self.store.clone(), self.cluster.clone(), id))
    }

    pub fn action(
        &self,
        action: impl Future<Output = crate::Result<()>> + Send + 'static,
    ) -> crate::Result<()> {
        self.actions
            .send(Box::pin(action))
            .map_err(|_| TaskingError::GenericError("Action queue closed.".to_string()))
    }

    fn get(&self, id: TaskId) -> crate::Result<Task> {
        self.store
            .get_task(id)?
            .ok_or_else(|| TaskingError::NotFound(format!("Task {id}")))
    }

    fn find_refs(&self, task: &mut Task) -> crate::Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if !task.addon.is_empty() && self.cluster.addon(&task.addon).is_none() {
            return Err(SoftError::AddonNotFound(task.addon.clone()).into());
        }
        self.cluster.find_extensions(&task.extensions)?;
        if task.kind.is_empty() {
            return Ok(());
        }
        let kind = self
            .cluster
            .task_kind(&task.kind)
            .ok_or_else(|| SoftError::KindNotFound(task.kind.clone()))?;
        validate_dependencies(&self.cluster, kind.name())?;
        if task.priority == 0 {
            task.priority = kind.spec.priority;
        }
        task.data = merged(kind.spec.data.clone(), &task.data);
        Ok(())
    }

    /// Executes queued actions until the queue stays empty for a moment.
    async fn run_actions(&self) {
        let mut queue = self.queue.lock().await;
        while let Ok(Some(action)) = tokio::time::timeout(ACTION_IDLE, queue.recv()).await {
            match AssertUnwindSafe(action).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => log::error!("Action failed: {error}"),
                Err(_) => log::error!("Action failed: panicked."),
            }
        }
    }

    /// Deletes task pods that no task refers to.
    async fn delete_orphan_pods(&self) -> crate::Result<()> {
        let owned: Set<String> = self
            .store
            .find_tasks(&TaskFilter::default())?
            .into_iter()
            .filter(Task::has_pod)
            .map(|task| task.pod)
            .collect();
        let namespace = self.cluster.namespace();
        for pod in self.cluster.task_pods() {
            let name = pod_name(&pod);
            let reference = format!("{namespace}/{name}");
            if owned.contains(&reference) {
                continue;
            }
            log::info!("Orphan pod found: {reference}");
            match self.client().delete_pod(name).await {
                Ok(()) => {}
                Err(error) if error.is_not_found() => {}
                Err(error) => log::error!("Orphan pod {reference} not deleted: {error}"),
            }
        }
        Ok(())
    }

    /// Seconds the pod of a terminated task is kept.
    fn pod_retention(&self, task: &Task) -> i64 {
        match task.state {
            TaskState::Succeeded => self.config.pod_retention.succeeded,
            _ => self.config.pod_retention.failed,
        }
    }

    fn retention_expired(&self, task: &Task) -> bool {
        let since = task.terminated.unwrap_or(task.create_time);
        Utc::now() - since >= TimeDelta::seconds(self.pod_retention(task))
    }

    async fn delete_retained_pods(&self) -> crate::Result<()> {
        let retained = TaskFilter {
            retained: Some(true),
            ..Default::default()
        };
        let mut updated = Vec::new();
        for mut task in self.store.find_tasks(&retained)? {
            if !self.retention_expired(&task) {
                continue;
            }
            if let Err(error) = delete_pod(&mut task, self.client()).await {
                log::error!("Task {} retained pod not deleted: {error}", task.id);
                continue;
            }
            task.retained = false;
            updated.push(task);
        }
        self.batch_update(&updated)
    }

    /// Reflects pods of started tasks and finishes terminated ones.
    async fn update_running(&self) -> crate::Result<()> {
        let mark = Instant::now();
        let tasks = self
            .store
            .find_tasks(&TaskFilter::states(&[TaskState::Pending, TaskState::Running]))?;
        if tasks.is_empty() {
            return Ok(());
        }
        let runner = self.runner();
        let mut updated = Vec::new();
        for mut task in tasks {
            if let Some(pod) = runner.reflect(&mut task).await {
                if let Err(error) = self.logs.ensure_collection(&mut task, &pod) {
                    log::error!("Task {} log collection not started: {error}", task.id);
                    continue;
                }
                if task.state_in(&[TaskState::Succeeded, TaskState::Failed]) {
                    log::info!("Task {} completed ({}).", task.id, task.state);
                    match self.finish(&mut task, &pod).await {
                        Ok(advanced) => updated.extend(advanced),
                        Err(error) => {
                            log::error!("Task {} not finished: {error}", task.id);
                            continue;
                        }
                    }
                }
            }
            updated.push(task);
        }
        let result = self.batch_update(&updated);
        let elapsed = mark.elapsed();
        if elapsed > SLOW_UPDATE {
            log::info!(
                "Running tasks updated. duration: {}, threshold: {}",
                humantime::format_duration(elapsed),
                humantime::format_duration(SLOW_UPDATE)
            );
        }
        result
    }

    /// Snapshot, pod retention and pipeline advancement of a task that just
    /// terminated. Returns the pipeline members that changed.
    async fn finish(&self, task: &mut Task, pod: &Pod) -> crate::Result<Vec<Task>> {
        let client = self.client();
        snapshot(task, pod, client, self.store.as_ref()).await?;
        let mut retention = self.pod_retention(task);
        if retention > 0 {
            if let Err(error) = ensure_terminated(task, pod, client).await {
                log::info!("Task {} pod not examined: {error}", task.id);
                retention = 0;
            }
        }
        if retention == 0 {
            delete_pod(task, client).await?;
        } else {
            task.retained = true;
        }
        advance_pipeline(task, self.store.as_ref(), client).await
    }

    /// Deletes running pods of terminated tasks that ignored the kill.
    async fn delete_zombies(&self) -> crate::Result<()> {
        let namespace = self.cluster.namespace();
        let running: Set<String> = self
            .cluster
            .task_pods()
            .iter()
            .filter(|pod| pod_phase(pod) == POD_RUNNING)
            .map(|pod| format!("{namespace}/{}", pod_name(pod)))
            .collect();
        if running.is_empty() {
            return Ok(());
        }
        let terminated = self
            .store
            .find_tasks(&TaskFilter::states(&[TaskState::Succeeded, TaskState::Failed]))?;
        for mut task in terminated {
            if !running.contains(&task.pod) {
                continue;
            }
            let Some(killed) = task.last_event(EventKind::ContainerKilled) else {
                continue;
            };
            if Utc::now() - killed.last <= TimeDelta::seconds(60) {
                continue;
            }
            log::info!("Task {} zombie detected: {}", task.id, task.pod);
            match delete_pod(&mut task, self.client()).await {
                Ok(()) => {
                    task.retained = false;
                    self.store.update_task(&task)?;
                }
                Err(error) => log::error!("Task {} zombie not deleted: {error}", task.id),
            }
        }
        Ok(())
    }

    async fn start_ready(&self) -> crate::Result<()> {
        if self.capacity.exceeded() {
            log::info!("Capacity exceeded: pod creation paused.");
            return Ok(());
        }
        let mut quota = Quota::new(&self.cluster);
        let tasks = self.store.find_tasks(&TaskFilter::states(&[
            TaskState::Ready,
            TaskState::Postponed,
            TaskState::QuotaBlocked,
            TaskState::Pending,
            TaskState::Running,
        ]))?;
        if tasks.is_empty() {
            return Ok(());
        }
        // Running tasks only block others through the postpone rules.
        let (running, mut tasks): (Vec<Task>, Vec<Task>) = tasks
            .into_iter()
            .partition(|t| t.state == TaskState::Running);
        if !self.config.enabled {
            for task in &mut tasks {
                task.fail("Tasking is disabled.");
            }
            return self.batch_update(&tasks);
        }

        for id in escalate(&mut tasks, &self.cluster) {
            let Some(task) = tasks
                .iter_mut()
                .find(|t| t.id == id && t.state == TaskState::Pending)
            else {
                continue;
            };
            delete_pod(task, self.client()).await?;
            task.state = TaskState::Ready;
            task.started = None;
            task.terminated = None;
        }

        let runner = self.runner();
        let mut failed = Vec::new();
        let mut kept = Vec::new();
        for mut task in tasks {
            // Pending tasks only take part in the rules.
            if task.state == TaskState::Pending {
                kept.push(task);
                continue;
            }
            let selected = runner
                .select_addon(&mut task)
                .and_then(|addon| runner.select_extensions(&mut task, &addon));
            match selected {
                Ok(()) => kept.push(task),
                Err(TaskingError::SoftError(error)) => {
                    log::info!("Task {} failed: {error}", task.id);
                    task.fail(error.to_string());
                    failed.push(task);
                }
                Err(error) => return Err(error),
            }
        }
        self.batch_update(&failed)?;
        let mut tasks = kept;
        tasks.extend(running);
        postpone(&mut tasks, &self.cluster);
        self.batch_update(&tasks)?;

        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        let capacity = self.capacity.current().max(1);
        let mut scheduled = self.cluster.task_pods_scheduled().len();
        let mut requested = tasks.len();
        let mut created = 0;
        let mut result = Ok(());
        for task in tasks.iter_mut() {
            if !task.state_in(&[TaskState::Ready, TaskState::QuotaBlocked]) {
                requested -= 1;
                continue;
            }
            if scheduled >= capacity {
                break;
            }
            match runner.run(task, &mut quota).await {
                Ok(true) => {
                    scheduled += 1;
                    created += 1;
                    log::info!("Task {} started.", task.id);
                }
                Ok(false) => break,
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        log::info!(
            "Task pods created. requested: {requested}, scheduled: {scheduled}, capacity: {capacity}, quota: {quota}, created: {created}"
        );
        self.batch_update(&tasks)?;
        result
    }

    /// Writes the scheduler fields of every task that changed.
    ///
    /// User fields are taken from the stored rows, so edits made since the
    /// tasks were loaded survive. All rows are written at once; when that
    /// fails they are written one by one.
    fn batch_update(&self, tasks: &[Task]) -> crate::Result<()> {
        let mut changed = Vec::new();
        for task in tasks {
            let Some(mut stored) = self.store.get_task(task.id)? else {
                continue;
            };
            if !task.scheduler_changed(&stored) {
                continue;
            }
            stored.set_scheduler_fields(task);
            changed.push(stored);
        }
        if changed.is_empty() {
            return Ok(());
        }
        if let Err(error) = self.store.update_tasks(&changed) {
            log::warn!("Batch update failed, updating one by one: {error}");
            for task in &changed {
                if let Err(error) = self.store.update_task(task) {
                    log::error!("Task {} not updated: {error}", task.id);
                }
            }
        }
        Ok(())
    }
}

async fn delete_action(
    store: Arc<dyn Store>,
    cluster: Arc<Cluster>,
    mut task: Task,
) -> crate::Result<()> {
    delete_pod(&mut task, cluster.client().as_ref()).await?;
    store.delete_task(task.id)?;
    log::info!("Task {} deleted.", task.id);
    Ok(())
}

async fn cancel_action(
    store: Arc<dyn Store>,
    cluster: Arc<Cluster>,
    id: TaskId,
) -> crate::Result<()> {
    let Some(mut task) = store.get_task(id)? else {
        return Ok(());
    };
    if task.state.is_terminal() {
        return Ok(());
    }
    let client = cluster.client().as_ref();
    if let Some(pod) = task.pod_name().and_then(|name| cluster.pod(name)) {
        if let Err(error) = snapshot(&mut task, &pod, client, store.as_ref()).await {
            log::error!("Task {id} snapshot not created: {error}");
        }
    }
    cancel(&mut task, client).await?;
    store.update_task(&task)
}

fn report(step: &str, result: crate::Result<()>) {
    if let Err(error) = result {
        log::error!("{step} failed: {error}");
    }
}

/// Runs the manager until cancelled.
pub async fn manager_process(manager: Arc<Manager>, token: CancellationToken) {
    log::info!("Manager started.");
    let mut ticker = tokio::time::interval(manager.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => manager.tick().await,
        }
    }
    log::info!("Manager stopped.");
}
