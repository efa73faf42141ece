//! Background sweepers for tasks, task groups, buckets and files.

mod storage;
mod task;

pub use storage::{BucketReaper, FileReaper};
pub use task::{GroupReaper, TaskReaper};

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::internal::cluster::ClusterClient;
use crate::internal::configuration::TaskingConfiguration;
use crate::internal::store::Store;

/// Runs every reaper once. Tasks are reaped before the storage they hold.
pub async fn reap(store: &dyn Store, client: &dyn ClusterClient, config: &TaskingConfiguration) {
    let reaper = &config.reaper;
    let tasks = TaskReaper {
        store,
        client,
        config: reaper,
    };
    if let Err(error) = tasks.run().await {
        log::error!("Task reaper failed: {error}");
    }
    let groups = GroupReaper {
        store,
        config: reaper,
    };
    if let Err(error) = groups.run() {
        log::error!("Group reaper failed: {error}");
    }
    let buckets = BucketReaper {
        store,
        ttl: reaper.bucket_ttl,
    };
    if let Err(error) = buckets.run() {
        log::error!("Bucket reaper failed: {error}");
    }
    let files = FileReaper {
        store,
        ttl: reaper.file_ttl,
    };
    if let Err(error) = files.run() {
        log::error!("File reaper failed: {error}");
    }
}

pub async fn reaper_process(
    store: Arc<dyn Store>,
    client: Arc<dyn ClusterClient>,
    config: Arc<TaskingConfiguration>,
    token: CancellationToken,
) {
    log::info!("Reaper started.");
    let mut ticker = tokio::time::interval(config.reaper.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => reap(store.as_ref(), client.as_ref(), &config).await,
        }
    }
    log::info!("Reaper stopped.");
}
