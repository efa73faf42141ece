//! In-process cluster used in disconnected mode and by tests.
//!
//! Pods progress through their phases purely as a function of time:
//! Pending for `pending`, Running for `running`, then terminated. The clock
//! can be moved forward with [`Simulator::advance`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
    ContainerStatus, Event, EventSource, ObjectReference, Pod, PodCondition, PodStatus,
    ResourceQuota, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::internal::cluster::cache::quantity_value;
use crate::internal::cluster::{
    Addon, ClusterClient, ClusterError, ClusterResult, Extension, LogStream, POD_FAILED,
    POD_PENDING, POD_RUNNING, POD_SUCCEEDED, Tackle, TaskKind, pod_phase,
};
use crate::internal::common::Map;
use crate::internal::common::utils::random_suffix;

const SEED: &str = include_str!("seed.yaml");

pub const DEFAULT_PENDING: Duration = Duration::from_secs(10);
pub const DEFAULT_RUNNING: Duration = Duration::from_secs(20);

struct PodEntry {
    pod: Pod,
    created: Instant,
}

#[derive(Default)]
struct State {
    offset: Duration,
    uid: u64,
    pods: Map<String, PodEntry>,
    secrets: Map<String, Secret>,
    quotas: Map<String, ResourceQuota>,
    tackles: Map<String, Tackle>,
    addons: Map<String, Addon>,
    extensions: Map<String, Extension>,
    kinds: Map<String, TaskKind>,
    events: Map<String, Vec<Event>>,
    /// Exit code forced on pods whose name starts with the key.
    exit_codes: Vec<(String, i32)>,
    /// Waiting reason forced on pending pods whose name starts with the key.
    waiting: Vec<(String, String)>,
    execs: Vec<(String, String)>,
    failing_exec: bool,
}

impl State {
    fn next_uid(&mut self) -> String {
        self.uid += 1;
        format!("00000000-0000-4000-8000-{:012}", self.uid)
    }
}

#[derive(Deserialize)]
struct SeedHeader {
    kind: String,
}

pub struct Simulator {
    namespace: String,
    pending: Duration,
    running: Duration,
    failure_probability: f64,
    state: Mutex<State>,
}

fn conflict(kind: &str, name: &str) -> ClusterError {
    ClusterError::Conflict(format!("({kind}) {name} already exists."))
}

fn not_found(kind: &str, name: &str) -> ClusterError {
    ClusterError::NotFound(format!("({kind}) {name} not found."))
}

fn now_time() -> Time {
    Time(Utc::now())
}

impl Simulator {
    pub fn new(namespace: &str) -> Self {
        Simulator {
            namespace: namespace.to_string(),
            pending: DEFAULT_PENDING,
            running: DEFAULT_RUNNING,
            failure_probability: 0.0,
            state: Default::default(),
        }
    }

    /// Simulator holding the built-in tackle, addons, extensions and task kinds.
    pub fn seeded(namespace: &str) -> crate::Result<Self> {
        let simulator = Self::new(namespace);
        simulator.seed(SEED)?;
        Ok(simulator)
    }

    pub fn with_timing(mut self, pending: Duration, running: Duration) -> Self {
        self.pending = pending;
        self.running = running;
        self
    }

    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = probability;
        self
    }

    /// Loads `---` separated resource documents.
    pub fn seed(&self, documents: &str) -> crate::Result<()> {
        for document in documents.split("\n---\n") {
            if document.trim().is_empty() {
                continue;
            }
            let header: SeedHeader = serde_yaml::from_str(document)?;
            match header.kind.as_str() {
                Tackle::KIND => self.add_tackle(serde_yaml::from_str(document)?),
                Addon::KIND => self.add_addon(serde_yaml::from_str(document)?),
                Extension::KIND => self.add_extension(serde_yaml::from_str(document)?),
                TaskKind::KIND => self.add_task_kind(serde_yaml::from_str(document)?),
                kind => {
                    return Err(format!("unsupported seed resource kind: {kind}").into());
                }
            }
        }
        Ok(())
    }

    pub fn add_tackle(&self, tackle: Tackle) {
        self.state
            .lock()
            .tackles
            .insert(tackle.name().to_string(), tackle);
    }

    pub fn add_addon(&self, addon: Addon) {
        self.state
            .lock()
            .addons
            .insert(addon.name().to_string(), addon);
    }

    pub fn add_extension(&self, extension: Extension) {
        self.state
            .lock()
            .extensions
            .insert(extension.name().to_string(), extension);
    }

    pub fn add_task_kind(&self, kind: TaskKind) {
        self.state
            .lock()
            .kinds
            .insert(kind.name().to_string(), kind);
    }

    pub fn add_quota(&self, quota: ResourceQuota) {
        let name = quota.metadata.name.clone().unwrap_or_default();
        self.state.lock().quotas.insert(name, quota);
    }

    pub fn remove_quotas(&self) {
        self.state.lock().quotas.clear();
    }

    pub fn remove_extension(&self, name: &str) {
        self.state.lock().extensions.remove(name);
    }

    pub fn addons(&self) -> Vec<Addon> {
        self.state
            .lock()
            .addons
            .sorted_values()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Moves the simulated clock forward.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().offset += duration;
    }

    /// Pods whose name starts with `prefix` terminate with `code`.
    pub fn set_exit_code(&self, prefix: &str, code: i32) {
        let mut state = self.state.lock();
        state.exit_codes.retain(|(p, _)| p != prefix);
        state.exit_codes.push((prefix.to_string(), code));
    }

    /// Pending pods whose name starts with `prefix` report the waiting reason.
    pub fn set_waiting_reason(&self, prefix: &str, reason: &str) {
        self.state
            .lock()
            .waiting
            .push((prefix.to_string(), reason.to_string()));
    }

    pub fn set_failing_exec(&self, failing: bool) {
        self.state.lock().failing_exec = failing;
    }

    /// (pod, container) pairs that received an exec.
    pub fn execs(&self) -> Vec<(String, String)> {
        self.state.lock().execs.clone()
    }

    pub fn pod_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().pods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().secrets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.state.lock().secrets.get(name).cloned()
    }

    /// Deterministic failure decision based on the pod name.
    fn pod_failed(&self, name: &str) -> bool {
        if self.failure_probability == 0.0 {
            return false;
        }
        let mut hash: u32 = 0;
        for ch in name.chars() {
            hash = (hash * 31 + ch as u32) % 100;
        }
        (hash as f64) < self.failure_probability * 100.0
    }

    fn exit_code(&self, state: &State, name: &str) -> i32 {
        match state
            .exit_codes
            .iter()
            .rev()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
        {
            Some((_, code)) => *code,
            None if self.pod_failed(name) => 1,
            None => 0,
        }
    }

    /// Recomputes the pod status from its age.
    fn update_pod(&self, state: &State, entry: &mut PodEntry) {
        let elapsed = (Instant::now() + state.offset).saturating_duration_since(entry.created);
        let name = entry.pod.metadata.name.clone().unwrap_or_default();
        let containers: Vec<String> = entry
            .pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();
        let status = entry.pod.status.get_or_insert_with(PodStatus::default);

        if elapsed < self.pending {
            let reason = state
                .waiting
                .iter()
                .find(|(prefix, _)| name.starts_with(prefix.as_str()))
                .map(|(_, reason)| reason.clone())
                .unwrap_or_else(|| "ContainerCreating".to_string());
            status.phase = Some(POD_PENDING.to_string());
            status.container_statuses = Some(
                containers
                    .into_iter()
                    .map(|name| ContainerStatus {
                        name,
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting {
                                reason: Some(reason.clone()),
                                message: Some("Container is being created".to_string()),
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
            );
            return;
        }

        if elapsed < self.pending + self.running {
            status.phase = Some(POD_RUNNING.to_string());
            status.conditions = Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                last_transition_time: Some(now_time()),
                ..Default::default()
            }]);
            let started = Utc::now()
                - chrono::TimeDelta::from_std(elapsed - self.pending).unwrap_or_default();
            status.container_statuses = Some(
                containers
                    .into_iter()
                    .map(|name| ContainerStatus {
                        name,
                        ready: true,
                        started: Some(true),
                        state: Some(ContainerState {
                            running: Some(ContainerStateRunning {
                                started_at: Some(Time(started)),
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
            );
            return;
        }

        let code = self.exit_code(state, &name);
        let phase = if code == 0 { POD_SUCCEEDED } else { POD_FAILED };
        status.phase = Some(phase.to_string());
        status.container_statuses = Some(
            containers
                .into_iter()
                .enumerate()
                .map(|(index, name)| {
                    // Extensions stop cleanly; only the addon carries the exit code.
                    let code = if index == 0 { code } else { 0 };
                    let reason = match code {
                        0 => "Completed",
                        137 => "OOMKilled",
                        _ => "Error",
                    };
                    ContainerStatus {
                        name,
                        state: Some(ContainerState {
                            terminated: Some(ContainerStateTerminated {
                                exit_code: code,
                                reason: Some(reason.to_string()),
                                finished_at: Some(now_time()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }
                })
                .collect(),
        );
    }

    fn refresh_pods(&self, state: &mut State) {
        let mut pods = std::mem::take(&mut state.pods);
        for entry in pods.values_mut() {
            self.update_pod(state, entry);
        }
        state.pods = pods;
    }

    fn check_quota(&self, state: &State, name: &str) -> ClusterResult<()> {
        let used = state
            .pods
            .values()
            .filter(|e| !matches!(pod_phase(&e.pod), POD_SUCCEEDED | POD_FAILED))
            .count() as i64;
        for (quota_name, quota) in state.quotas.iter() {
            let limit = quota
                .spec
                .as_ref()
                .and_then(|s| s.hard.as_ref())
                .and_then(|hard| hard.get("pods"))
                .and_then(quantity_value);
            if let Some(limit) = limit {
                if used >= limit {
                    return Err(ClusterError::Forbidden(format!(
                        "pods \"{name}\" is forbidden: exceeded quota: {quota_name}, requested: pods=1, used: pods={used}, limited: pods={limit}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn record_event(state: &mut State, pod: &str, reason: &str, message: &str) {
        let now = now_time();
        let events = state.events.entry(pod.to_string()).or_default();
        let sequence = events.len();
        events.push(Event {
            metadata: ObjectMeta {
                name: Some(format!("{pod}.{sequence}")),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(pod.to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some("Normal".to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            source: Some(EventSource {
                component: Some("simulator".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
}

#[async_trait]
impl ClusterClient for Simulator {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list_tackles(&self) -> ClusterResult<Vec<Tackle>> {
        Ok(self.state.lock().tackles.values().cloned().collect())
    }

    async fn list_addons(&self) -> ClusterResult<Vec<Addon>> {
        Ok(self.state.lock().addons.values().cloned().collect())
    }

    async fn list_extensions(&self) -> ClusterResult<Vec<Extension>> {
        Ok(self.state.lock().extensions.values().cloned().collect())
    }

    async fn list_task_kinds(&self) -> ClusterResult<Vec<TaskKind>> {
        Ok(self.state.lock().kinds.values().cloned().collect())
    }

    async fn list_pods(&self) -> ClusterResult<Vec<Pod>> {
        let mut state = self.state.lock();
        self.refresh_pods(&mut state);
        Ok(state.pods.values().map(|e| e.pod.clone()).collect())
    }

    async fn list_quotas(&self) -> ClusterResult<Vec<ResourceQuota>> {
        Ok(self.state.lock().quotas.values().cloned().collect())
    }

    async fn list_events(&self, involved: &str) -> ClusterResult<Vec<Event>> {
        Ok(self
            .state
            .lock()
            .events
            .get(involved)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_pod(&self, name: &str) -> ClusterResult<Pod> {
        let mut state = self.state.lock();
        self.refresh_pods(&mut state);
        state
            .pods
            .get(name)
            .map(|e| e.pod.clone())
            .ok_or_else(|| not_found("Pod", name))
    }

    async fn create_pod(&self, pod: &Pod) -> ClusterResult<Pod> {
        let mut state = self.state.lock();
        self.refresh_pods(&mut state);
        let mut pod = pod.clone();
        let name = match (&pod.metadata.name, &pod.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{prefix}{}", random_suffix(5)),
            (None, None) => {
                return Err(ClusterError::Invalid(
                    "name or generateName is required".to_string(),
                ));
            }
        };
        if state.pods.contains_key(&name) {
            return Err(conflict("Pod", &name));
        }
        self.check_quota(&state, &name)?;
        pod.metadata.name = Some(name.clone());
        pod.metadata.namespace = Some(self.namespace.clone());
        if pod.metadata.uid.is_none() {
            pod.metadata.uid = Some(state.next_uid());
        }
        pod.status = Some(PodStatus {
            phase: Some(POD_PENDING.to_string()),
            conditions: Some(vec![PodCondition {
                type_: "PodScheduled".to_string(),
                status: "True".to_string(),
                last_transition_time: Some(now_time()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        let mut entry = PodEntry {
            pod,
            created: Instant::now() + state.offset,
        };
        self.update_pod(&state, &mut entry);
        let created = entry.pod.clone();
        state.pods.insert(name.clone(), entry);
        Self::record_event(
            &mut state,
            &name,
            "Scheduled",
            &format!("Successfully assigned {}/{name}", self.namespace),
        );
        Ok(created)
    }

    async fn delete_pod(&self, name: &str) -> ClusterResult<()> {
        let mut state = self.state.lock();
        match state.pods.remove(name) {
            Some(_) => {
                state.events.remove(name);
                Ok(())
            }
            None => Err(not_found("Pod", name)),
        }
    }

    async fn create_secret(&self, secret: &Secret) -> ClusterResult<Secret> {
        let mut state = self.state.lock();
        let mut secret = secret.clone();
        let name = match (&secret.metadata.name, &secret.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{prefix}{}", random_suffix(5)),
            (None, None) => {
                return Err(ClusterError::Invalid(
                    "name or generateName is required".to_string(),
                ));
            }
        };
        if state.secrets.contains_key(&name) {
            return Err(conflict("Secret", &name));
        }
        secret.metadata.name = Some(name.clone());
        secret.metadata.namespace = Some(self.namespace.clone());
        secret.metadata.uid = Some(state.next_uid());
        state.secrets.insert(name, secret.clone());
        Ok(secret)
    }

    async fn update_secret(&self, secret: &Secret) -> ClusterResult<Secret> {
        let mut state = self.state.lock();
        let name = secret.metadata.name.clone().unwrap_or_default();
        match state.secrets.get_mut(&name) {
            Some(existing) => {
                *existing = secret.clone();
                Ok(secret.clone())
            }
            None => Err(not_found("Secret", &name)),
        }
    }

    async fn delete_secret(&self, name: &str) -> ClusterResult<()> {
        match self.state.lock().secrets.remove(name) {
            Some(_) => Ok(()),
            None => Err(not_found("Secret", name)),
        }
    }

    async fn pod_logs(&self, pod: &str, container: &str) -> ClusterResult<LogStream> {
        if !self.state.lock().pods.contains_key(pod) {
            return Err(not_found("Pod", pod));
        }
        let text = format!("[{pod}/{container}] started.\n[{pod}/{container}] done.\n");
        Ok(Box::pin(std::io::Cursor::new(text.into_bytes())))
    }

    async fn exec(&self, pod: &str, container: &str, _command: Vec<String>) -> ClusterResult<()> {
        let mut state = self.state.lock();
        if !state.pods.contains_key(pod) {
            return Err(not_found("Pod", pod));
        }
        if state.failing_exec {
            return Err(ClusterError::Other(format!(
                "exec in {pod}/{container} failed"
            )));
        }
        state.execs.push((pod.to_string(), container.to_string()));
        Ok(())
    }
}
