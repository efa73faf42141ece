use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use parking_lot::RwLock;

use crate::internal::cluster::{
    Addon, ClusterClient, ClusterError, ClusterResult, Extension, POD_FAILED, POD_SUCCEEDED,
    TASK_LABEL, Tackle, TaskKind, pod_name, pod_phase,
};
use crate::internal::common::Map;
use crate::internal::common::error::{SoftError, TaskingError};

/// Timeout of a single cluster read.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Snapshot {
    tackle: Option<Arc<Tackle>>,
    addons: Map<String, Arc<Addon>>,
    extensions: Map<String, Arc<Extension>>,
    kinds: Map<String, Arc<TaskKind>>,
    quotas: Map<String, Arc<ResourceQuota>>,
    task_pods: Map<String, Arc<Pod>>,
    other_pods: Map<String, Arc<Pod>>,
}

/// Cached view of the cluster objects the scheduler works with.
///
/// Readers get `Arc` snapshots of individual objects; `refresh` replaces the
/// whole view at once.
pub struct Cluster {
    client: Arc<dyn ClusterClient>,
    enabled: bool,
    snapshot: RwLock<Snapshot>,
}

async fn read<T>(what: &str, fut: impl Future<Output = ClusterResult<T>>) -> ClusterResult<T> {
    match tokio::time::timeout(READ_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::Timeout(format!("list {what}"))),
    }
}

fn by_name<T>(items: Vec<T>, name: impl Fn(&T) -> &str) -> Map<String, Arc<T>> {
    items
        .into_iter()
        .map(|item| (name(&item).to_string(), Arc::new(item)))
        .collect()
}

/// Integer value of a quantity such as `10`, `2k` or `1M`.
pub(crate) fn quantity_value(quantity: &Quantity) -> Option<i64> {
    let value = quantity.0.trim();
    let (number, factor) = match value.char_indices().last() {
        Some((i, 'k')) => (&value[..i], 1_000),
        Some((i, 'M')) => (&value[..i], 1_000_000),
        Some((i, 'G')) => (&value[..i], 1_000_000_000),
        _ => (value, 1),
    };
    number.parse::<i64>().ok().map(|n| n * factor)
}

impl Cluster {
    pub fn new(client: Arc<dyn ClusterClient>, enabled: bool) -> Self {
        Cluster {
            client,
            enabled,
            snapshot: Default::default(),
        }
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    pub fn namespace(&self) -> &str {
        self.client.namespace()
    }

    /// Reloads every object type from the cluster.
    ///
    /// The objects are fetched first and swapped in under the write lock.
    /// Fails with `NotReconciled` when an addon has not been reconciled yet,
    /// leaving the previous view in place.
    pub async fn refresh(&self) -> crate::Result<()> {
        if !self.enabled {
            *self.snapshot.write() = Snapshot::default();
            return Ok(());
        }
        let client = &self.client;
        let tackle = read("tackle", client.list_tackles())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TaskingError::GenericError("Tackle CR not found.".to_string()))?;
        let addons = read("addons", client.list_addons()).await?;
        if let Some(addon) = addons.iter().find(|a| !a.reconciled()) {
            return Err(SoftError::NotReconciled {
                kind: Addon::KIND.to_string(),
                name: addon.name().to_string(),
            }
            .into());
        }
        let extensions = read("extensions", client.list_extensions()).await?;
        let kinds = read("tasks", client.list_task_kinds()).await?;
        let pods = read("pods", client.list_pods()).await?;
        let quotas = read("quotas", client.list_quotas()).await?;

        let mut snapshot = Snapshot {
            tackle: Some(Arc::new(tackle)),
            addons: by_name(addons, |a| a.name()),
            extensions: by_name(extensions, |e| e.name()),
            kinds: by_name(kinds, |k| k.name()),
            quotas: by_name(quotas, |q| q.metadata.name.as_deref().unwrap_or_default()),
            ..Default::default()
        };
        for pod in pods {
            let is_task = pod
                .metadata
                .labels
                .as_ref()
                .is_some_and(|labels| labels.contains_key(TASK_LABEL));
            let name = pod_name(&pod).to_string();
            if is_task {
                snapshot.task_pods.insert(name, Arc::new(pod));
            } else {
                snapshot.other_pods.insert(name, Arc::new(pod));
            }
        }
        *self.snapshot.write() = snapshot;
        Ok(())
    }

    pub fn tackle(&self) -> Option<Arc<Tackle>> {
        self.snapshot.read().tackle.clone()
    }

    pub fn addon(&self, name: &str) -> Option<Arc<Addon>> {
        self.snapshot.read().addons.get(name).cloned()
    }

    /// All addons, ordered by name.
    pub fn addons(&self) -> Vec<Arc<Addon>> {
        self.snapshot
            .read()
            .addons
            .sorted_values()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn extension(&self, name: &str) -> Option<Arc<Extension>> {
        self.snapshot.read().extensions.get(name).cloned()
    }

    /// All extensions, ordered by name.
    pub fn extensions(&self) -> Vec<Arc<Extension>> {
        self.snapshot
            .read()
            .extensions
            .sorted_values()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Resolves extension names, keeping the requested order.
    pub fn find_extensions(&self, names: &[String]) -> Result<Vec<Arc<Extension>>, SoftError> {
        let snapshot = self.snapshot.read();
        names
            .iter()
            .map(|name| {
                snapshot
                    .extensions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SoftError::ExtensionNotFound(name.clone()))
            })
            .collect()
    }

    pub fn task_kind(&self, name: &str) -> Option<Arc<TaskKind>> {
        self.snapshot.read().kinds.get(name).cloned()
    }

    /// Task pod or other pod by name.
    pub fn pod(&self, name: &str) -> Option<Arc<Pod>> {
        let snapshot = self.snapshot.read();
        snapshot
            .task_pods
            .get(name)
            .or_else(|| snapshot.other_pods.get(name))
            .cloned()
    }

    pub fn task_pods(&self) -> Vec<Arc<Pod>> {
        self.snapshot
            .read()
            .task_pods
            .sorted_values()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn other_pods(&self) -> Vec<Arc<Pod>> {
        self.snapshot
            .read()
            .other_pods
            .sorted_values()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Task pods that have not terminated.
    pub fn task_pods_scheduled(&self) -> Vec<Arc<Pod>> {
        self.task_pods()
            .into_iter()
            .filter(|pod| !matches!(pod_phase(pod), POD_SUCCEEDED | POD_FAILED))
            .collect()
    }

    pub fn quotas(&self) -> Vec<Arc<ResourceQuota>> {
        self.snapshot
            .read()
            .quotas
            .sorted_values()
            .into_iter()
            .cloned()
            .collect()
    }

    /// The most restrictive `pods` limit across all quotas.
    pub fn pod_quota(&self) -> Option<usize> {
        self.quotas()
            .iter()
            .filter_map(|q| {
                q.spec
                    .as_ref()
                    .and_then(|s| s.hard.as_ref())
                    .and_then(|hard| hard.get("pods"))
                    .and_then(quantity_value)
            })
            .map(|n| n.max(0) as usize)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::cluster::simulator::Simulator;
    use k8s_openapi::api::core::v1::ResourceQuotaSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn quota(name: &str, pods: &str) -> ResourceQuota {
        ResourceQuota {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(BTreeMap::from([(
                    "pods".to_string(),
                    Quantity(pods.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_quantity_value() {
        assert_eq!(quantity_value(&Quantity("10".into())), Some(10));
        assert_eq!(quantity_value(&Quantity("2k".into())), Some(2000));
        assert_eq!(quantity_value(&Quantity("x".into())), None);
    }

    #[tokio::test]
    async fn test_refresh_seeded() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        let cluster = Cluster::new(sim.clone(), true);
        cluster.refresh().await.unwrap();
        assert!(cluster.tackle().is_some());
        assert!(cluster.addon("analyzer").is_some());
        assert!(cluster.task_kind("analyzer").is_some());
        assert_eq!(cluster.pod_quota(), None);

        sim.add_quota(quota("small", "3"));
        sim.add_quota(quota("large", "10"));
        cluster.refresh().await.unwrap();
        assert_eq!(cluster.pod_quota(), Some(3));
    }

    #[tokio::test]
    async fn test_refresh_disabled_is_empty() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        let cluster = Cluster::new(sim, false);
        cluster.refresh().await.unwrap();
        assert!(cluster.tackle().is_none());
        assert!(cluster.addons().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_not_reconciled() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        let mut addon = sim.addons().remove(0);
        addon.metadata.generation = Some(addon.status.observed_generation + 1);
        sim.add_addon(addon);
        let cluster = Cluster::new(sim, true);
        let error = cluster.refresh().await.unwrap_err();
        assert!(error.is_not_reconciled());
    }

    #[tokio::test]
    async fn test_find_extensions() {
        let sim = Arc::new(Simulator::seeded("konveyor-tackle").unwrap());
        let cluster = Cluster::new(sim, true);
        cluster.refresh().await.unwrap();
        let found = cluster.find_extensions(&["java".to_string()]).unwrap();
        assert_eq!(found[0].name(), "java");
        assert_eq!(
            cluster
                .find_extensions(&["java".to_string(), "cobol".to_string()])
                .unwrap_err(),
            SoftError::ExtensionNotFound("cobol".to_string())
        );
    }
}
