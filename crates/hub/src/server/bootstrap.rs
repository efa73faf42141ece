use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use tasking::TaskingConfiguration;
use tasking::auth::{Builtin, Provider, TaskValidator};
use tasking::cluster::simulator::Simulator;
use tasking::cluster::{Cluster, ClusterClient};
use tasking::reaper::reaper_process;
use tasking::scheduler::{CapacityMonitor, Manager, capacity_process, manager_process};
use tasking::store::{MemoryStore, Store};

use crate::common::cli::ServeOpts;
use crate::server::kubernetes::KubeClient;

/// Where buckets and files live. A temporary directory is removed on drop.
enum DataDir {
    Fixed(PathBuf),
    Temporary(TempDir),
}

impl DataDir {
    fn open(path: Option<&PathBuf>) -> crate::Result<Self> {
        match path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Ok(DataDir::Fixed(path.clone()))
            }
            None => Ok(DataDir::Temporary(TempDir::with_prefix("hub")?)),
        }
    }

    fn path(&self) -> &std::path::Path {
        match self {
            DataDir::Fixed(path) => path,
            DataDir::Temporary(dir) => dir.path(),
        }
    }
}

/// Every long running part of the hub, wired together.
pub struct Services {
    _data_dir: DataDir,
    pub config: Arc<TaskingConfiguration>,
    pub store: Arc<MemoryStore>,
    pub client: Arc<dyn ClusterClient>,
    pub cluster: Arc<Cluster>,
    pub auth: Arc<Builtin>,
    pub capacity: Arc<CapacityMonitor>,
    pub manager: Arc<Manager>,
}

async fn cluster_client(opts: &ServeOpts) -> crate::Result<Arc<dyn ClusterClient>> {
    if opts.task.simulated {
        log::info!("Using simulated cluster in namespace {}.", opts.namespace);
        return Ok(Arc::new(Simulator::seeded(&opts.namespace)?));
    }
    let client = KubeClient::try_default(opts.namespace.as_str()).await?;
    log::info!("Using cluster namespace {}.", opts.namespace);
    Ok(Arc::new(client))
}

impl Services {
    pub async fn new(
        opts: &ServeOpts,
        client: Arc<dyn ClusterClient>,
        token: CancellationToken,
    ) -> crate::Result<Self> {
        let config = Arc::new(opts.tasking_configuration());
        let data_dir = DataDir::open(opts.data_dir.as_ref())?;
        log::info!("Data directory: {}", data_dir.path().display());
        let store = Arc::new(MemoryStore::new(data_dir.path())?);

        let cluster = Arc::new(Cluster::new(client.clone(), config.enabled));
        if let Err(error) = cluster.refresh().await {
            // The loops keep refreshing; resources may be reconciled later.
            log::warn!("Initial cluster refresh failed: {error}");
        }

        let auth = Arc::new(Builtin::new(&opts.token_key)?);
        auth.register(Arc::new(TaskValidator::new(
            store.clone() as Arc<dyn Store>,
            client.clone(),
        )));

        let capacity = Arc::new(CapacityMonitor::default());
        let manager = Arc::new(Manager::new(
            config.clone(),
            store.clone() as Arc<dyn Store>,
            cluster.clone(),
            auth.clone() as Arc<dyn Provider>,
            capacity.clone(),
            token,
        ));
        Ok(Services {
            _data_dir: data_dir,
            config,
            store,
            client,
            cluster,
            auth,
            capacity,
            manager,
        })
    }

    /// Starts the manager, capacity monitor and reaper loops.
    pub fn spawn(&self, token: &CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        set.spawn(manager_process(self.manager.clone(), token.clone()));
        set.spawn(capacity_process(
            self.capacity.clone(),
            self.cluster.clone(),
            self.config.interval,
            token.clone(),
        ));
        set.spawn(reaper_process(
            self.store.clone() as Arc<dyn Store>,
            self.client.clone(),
            self.config.clone(),
            token.clone(),
        ));
        set
    }
}

/// Runs the hub until SIGINT or until one of its loops ends.
pub async fn serve(opts: ServeOpts) -> crate::Result<()> {
    let token = CancellationToken::new();
    let client = cluster_client(&opts).await?;
    let services = Services::new(&opts, client, token.clone()).await?;
    let mut loops = services.spawn(&token);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received SIGINT, attempting to stop");
        }
        Some(result) = loops.join_next() => {
            if let Err(error) = result {
                log::error!("Hub loop failed: {error}");
            }
        }
    }
    log::info!("Stopping hub");
    token.cancel();
    while let Some(result) = loops.join_next().await {
        if let Err(error) = result {
            log::error!("Hub loop failed: {error}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cli::{RootOptions, SubCommand};
    use clap::Parser;
    use std::time::Duration;
    use tasking::model::{Application, Subject, Task, TaskState};

    fn opts(data_dir: &std::path::Path) -> ServeOpts {
        let args = [
            "hub",
            "serve",
            "--task-simulated",
            "--task-frequency",
            "10ms",
            "--task-pod-retain-succeeded",
            "0",
            "--data-dir",
            data_dir.to_str().unwrap(),
        ];
        match RootOptions::try_parse_from(args).unwrap().subcmd {
            SubCommand::Serve(opts) => opts,
        }
    }

    #[tokio::test]
    async fn test_serve_simulated_task() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::with_prefix("hub").unwrap();
        let opts = opts(dir.path());
        let sim = Arc::new(
            Simulator::seeded(&opts.namespace)
                .unwrap()
                .with_timing(Duration::ZERO, Duration::from_millis(50)),
        );
        let token = CancellationToken::new();
        let services = Services::new(&opts, sim.clone(), token.clone())
            .await
            .unwrap();
        services.store.insert_application(Application {
            id: 1.into(),
            name: "app".into(),
            bucket: None,
            tags: Vec::new(),
        });
        let task = services
            .manager
            .create(Task {
                name: "analyze".into(),
                kind: "analyzer".into(),
                state: TaskState::Ready,
                subject: Some(Subject::Application(1.into())),
                ..Default::default()
            })
            .unwrap();

        let mut loops = services.spawn(&token);
        let store = services.store.clone();
        let finished = tokio::time::timeout(Duration::from_secs(10), async move {
            loop {
                let state = store.get_task(task.id).unwrap().unwrap().state;
                if state.is_terminal() {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(finished, TaskState::Succeeded);

        token.cancel();
        while let Some(result) = loops.join_next().await {
            result.unwrap();
        }
    }
}
