use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::internal::cluster::{ClusterClient, LogStream, pod_name};
use crate::internal::common::Set;
use crate::internal::model::task::Task;
use crate::internal::store::Store;

const BUFFER_SIZE: usize = 0x8000;

/// Keeps one log collector running per pod container.
///
/// Collectors unregister themselves when their log stream ends, so a
/// container whose stream broke gets a new collector on the next call to
/// [`LogManager::ensure_collection`]. The new collector resumes after the
/// bytes already in the file.
pub struct LogManager {
    store: Arc<dyn Store>,
    client: Arc<dyn ClusterClient>,
    collectors: Arc<Mutex<Set<String>>>,
    token: CancellationToken,
}

/// Where a collector writes and how much of the stream is already there.
struct Target {
    path: PathBuf,
    skip: u64,
}

impl LogManager {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn ClusterClient>,
        token: CancellationToken,
    ) -> Self {
        LogManager {
            store,
            client,
            collectors: Default::default(),
            token,
        }
    }

    /// Number of running collectors.
    pub fn active(&self) -> usize {
        self.collectors.lock().len()
    }

    /// Starts a collector for every container that is not waiting and has
    /// none yet. Log files are attached to the task.
    pub fn ensure_collection(&self, task: &mut Task, pod: &Pod) -> crate::Result<()> {
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .into_iter()
            .flatten();
        let pod = pod_name(pod);
        for status in statuses {
            if status.state.as_ref().is_some_and(|s| s.waiting.is_some()) {
                continue;
            }
            let key = format!("{pod}.{}", status.name);
            if self.collectors.lock().contains(&key) {
                continue;
            }
            let target = self.target(task, &status.name)?;
            self.collectors.lock().insert(key.clone());
            self.spawn(key, pod.to_string(), status.name.clone(), target);
        }
        Ok(())
    }

    /// The attached `<container>.log` file, created and attached when missing.
    fn target(&self, task: &mut Task, container: &str) -> crate::Result<Target> {
        let name = format!("{container}.log");
        let attached = task.attached.iter().rev().find(|a| a.name == name);
        if let Some(file) = attached.and_then(|a| self.store.get_file(a.id).transpose()) {
            let file = file?;
            let skip = std::fs::metadata(&file.path).map(|m| m.len()).unwrap_or(0);
            return Ok(Target {
                path: file.path,
                skip,
            });
        }
        let file = self.store.create_file(&name)?;
        task.attach(file.id, name);
        Ok(Target {
            path: file.path,
            skip: 0,
        })
    }

    fn spawn(&self, key: String, pod: String, container: String, target: Target) {
        let client = self.client.clone();
        let collectors = self.collectors.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = collect(client.as_ref(), &pod, &container, &target) => result,
                _ = token.cancelled() => Ok(()),
            };
            if let Err(error) = result {
                log::error!("Log collection of {pod}/{container} failed: {error}");
            }
            collectors.lock().remove(&key);
        });
    }
}

async fn collect(
    client: &dyn ClusterClient,
    pod: &str,
    container: &str,
    target: &Target,
) -> crate::Result<()> {
    let stream = client.pod_logs(pod, container).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target.path)
        .await?;
    copy(stream, &mut file, target.skip).await
}

/// Copies the stream into the file, discarding the first `skip` bytes.
async fn copy(mut stream: LogStream, file: &mut tokio::fs::File, mut skip: u64) -> crate::Result<()> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
        let offset = skip.min(n as u64) as usize;
        skip -= offset as u64;
        if offset == n {
            continue;
        }
        file.write_all(&buffer[offset..n]).await?;
        file.sync_data().await?;
    }
}
