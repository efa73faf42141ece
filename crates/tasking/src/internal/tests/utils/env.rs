use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::internal::auth::NoAuth;
use crate::internal::cluster::Cluster;
use crate::internal::cluster::simulator::{DEFAULT_PENDING, DEFAULT_RUNNING, Simulator};
use crate::internal::common::ids::{ApplicationId, TaskId};
use crate::internal::configuration::TaskingConfiguration;
use crate::internal::model::subject::Application;
use crate::internal::model::task::{EventKind, Task, TaskState};
use crate::internal::scheduler::capacity::CapacityMonitor;
use crate::internal::scheduler::manager::Manager;
use crate::internal::store::{MemoryStore, Store};
use crate::internal::tests::utils::task::TaskConfigBuilder;

pub const NAMESPACE: &str = "konveyor-tackle";

/// Configuration used by the tests: pods of terminated tasks are deleted
/// right away.
pub fn test_config() -> TaskingConfiguration {
    let mut config = TaskingConfiguration::default();
    config.pod_retention.succeeded = 0;
    config.pod_retention.failed = 0;
    config
}

/// A manager running against the seeded simulator.
pub struct TestEnv {
    _dir: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub sim: Arc<Simulator>,
    pub manager: Manager,
}

impl TestEnv {
    pub async fn new(config: TaskingConfiguration, capacity: usize) -> TestEnv {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::TempDir::with_prefix("tasking").unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()).unwrap());
        for id in 1..=3 {
            store.insert_application(Application {
                id: ApplicationId::new(id),
                name: format!("app-{id}"),
                bucket: None,
                tags: Vec::new(),
            });
        }
        let sim = Arc::new(Simulator::seeded(NAMESPACE).unwrap());
        let cluster = Arc::new(Cluster::new(sim.clone(), config.enabled));
        cluster.refresh().await.unwrap();
        let manager = Manager::new(
            Arc::new(config),
            store.clone(),
            cluster,
            Arc::new(NoAuth),
            Arc::new(CapacityMonitor::new(capacity)),
            CancellationToken::new(),
        );
        TestEnv {
            _dir: dir,
            store,
            sim,
            manager,
        }
    }

    pub fn submit(&self, builder: TaskConfigBuilder) -> Task {
        let task: Task = builder.build().unwrap().into();
        self.manager.create(task).unwrap()
    }

    pub fn task(&self, id: TaskId) -> Task {
        self.store.get_task(id).unwrap().unwrap()
    }

    pub fn state(&self, id: TaskId) -> TaskState {
        self.task(id).state
    }

    pub async fn tick(&self) {
        self.manager.tick().await;
    }

    /// Moves pods created now out of Pending, then ticks.
    pub async fn tick_running(&self) {
        self.sim.advance(DEFAULT_PENDING);
        self.tick().await;
    }

    /// Moves running pods to termination, then ticks.
    pub async fn tick_terminated(&self) {
        self.sim.advance(DEFAULT_RUNNING);
        self.tick().await;
    }

    /// Pods currently existing for the task.
    pub fn pods_of(&self, id: TaskId) -> Vec<String> {
        let prefix = format!("task-{id}-");
        self.sim
            .pod_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect()
    }

    pub fn event_count(&self, id: TaskId, kind: EventKind) -> usize {
        self.task(id)
            .events
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }
}
