use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod, ResourceQuota, Secret};
use kube::api::{
    ApiResource, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
    LogParams, PostParams,
};
use kube::core::ErrorResponse;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tokio_util::compat::FuturesAsyncReadCompatExt;

use tasking::cluster::{
    Addon, ClusterClient, ClusterError, ClusterResult, Extension, GROUP, LogStream, Tackle,
    TaskKind, VERSION,
};

/// Cluster client talking to the Kubernetes API server.
pub struct KubeClient {
    client: Client,
    namespace: String,
}

impl KubeClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        KubeClient {
            client,
            namespace: namespace.into(),
        }
    }

    /// Client configured from the environment: in-cluster service account or
    /// the local kubeconfig.
    pub async fn try_default(namespace: impl Into<String>) -> crate::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Lists a custom resource of the tackle group.
    async fn list_custom<T: DeserializeOwned>(&self, kind: &str) -> ClusterResult<Vec<T>> {
        let gvk = GroupVersionKind::gvk(GROUP, VERSION, kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &resource);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(cluster_error)?;
        list.items
            .into_iter()
            .map(|object| {
                serde_json::to_value(object)
                    .and_then(serde_json::from_value)
                    .map_err(|error| ClusterError::Other(format!("{kind}: {error}")))
            })
            .collect()
    }
}

/// Maps API status codes onto the cluster error kinds.
fn cluster_error(error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(ErrorResponse { code, message, .. }) => match code {
            400 => ClusterError::BadRequest(message),
            403 => ClusterError::Forbidden(message),
            404 => ClusterError::NotFound(message),
            409 => ClusterError::Conflict(message),
            422 => ClusterError::Invalid(message),
            408 | 504 => ClusterError::Timeout(message),
            _ => ClusterError::Other(format!("{code}: {message}")),
        },
        error => ClusterError::Other(error.to_string()),
    }
}

fn deleted<T>(result: kube::Result<T>) -> ClusterResult<()> {
    result.map(|_| ()).map_err(cluster_error)
}

#[async_trait]
impl ClusterClient for KubeClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list_tackles(&self) -> ClusterResult<Vec<Tackle>> {
        self.list_custom(Tackle::KIND).await
    }

    async fn list_addons(&self) -> ClusterResult<Vec<Addon>> {
        self.list_custom(Addon::KIND).await
    }

    async fn list_extensions(&self) -> ClusterResult<Vec<Extension>> {
        self.list_custom(Extension::KIND).await
    }

    async fn list_task_kinds(&self) -> ClusterResult<Vec<TaskKind>> {
        self.list_custom(TaskKind::KIND).await
    }

    async fn list_pods(&self) -> ClusterResult<Vec<Pod>> {
        let list = self
            .api::<Pod>()
            .list(&ListParams::default())
            .await
            .map_err(cluster_error)?;
        Ok(list.items)
    }

    async fn list_quotas(&self) -> ClusterResult<Vec<ResourceQuota>> {
        let list = self
            .api::<ResourceQuota>()
            .list(&ListParams::default())
            .await
            .map_err(cluster_error)?;
        Ok(list.items)
    }

    async fn list_events(&self, involved: &str) -> ClusterResult<Vec<Event>> {
        let params = ListParams::default().fields(&format!("involvedObject.name={involved}"));
        let list = self
            .api::<Event>()
            .list(&params)
            .await
            .map_err(cluster_error)?;
        Ok(list.items)
    }

    async fn get_pod(&self, name: &str) -> ClusterResult<Pod> {
        self.api::<Pod>().get(name).await.map_err(cluster_error)
    }

    async fn create_pod(&self, pod: &Pod) -> ClusterResult<Pod> {
        self.api::<Pod>()
            .create(&PostParams::default(), pod)
            .await
            .map_err(cluster_error)
    }

    async fn delete_pod(&self, name: &str) -> ClusterResult<()> {
        let params = DeleteParams::default().grace_period(0);
        deleted(self.api::<Pod>().delete(name, &params).await)
    }

    async fn create_secret(&self, secret: &Secret) -> ClusterResult<Secret> {
        self.api::<Secret>()
            .create(&PostParams::default(), secret)
            .await
            .map_err(cluster_error)
    }

    async fn update_secret(&self, secret: &Secret) -> ClusterResult<Secret> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        self.api::<Secret>()
            .replace(name, &PostParams::default(), secret)
            .await
            .map_err(cluster_error)
    }

    async fn delete_secret(&self, name: &str) -> ClusterResult<()> {
        deleted(
            self.api::<Secret>()
                .delete(name, &DeleteParams::default())
                .await,
        )
    }

    async fn pod_logs(&self, pod: &str, container: &str) -> ClusterResult<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..Default::default()
        };
        let stream = self
            .api::<Pod>()
            .log_stream(pod, &params)
            .await
            .map_err(cluster_error)?;
        Ok(Box::pin(stream.compat()))
    }

    async fn exec(&self, pod: &str, container: &str, command: Vec<String>) -> ClusterResult<()> {
        let params = AttachParams::default()
            .container(container)
            .stdout(false)
            .stderr(true);
        let mut process = self
            .api::<Pod>()
            .exec(pod, command, &params)
            .await
            .map_err(cluster_error)?;
        let status = match process.take_status() {
            Some(status) => status.await,
            None => None,
        };
        if let Err(error) = process.join().await {
            log::debug!("Exec in {pod}/{container} not joined: {error}");
        }
        match status {
            Some(status) if status.status.as_deref() != Some("Success") => Err(
                ClusterError::Other(status.message.unwrap_or_else(|| "exec failed".to_string())),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "denied".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_error_mapping() {
        assert!(cluster_error(api_error(404)).is_not_found());
        assert!(matches!(
            cluster_error(api_error(409)),
            ClusterError::Conflict(_)
        ));
        assert!(matches!(
            cluster_error(api_error(403)),
            ClusterError::Forbidden(_)
        ));
        assert!(matches!(
            cluster_error(api_error(422)),
            ClusterError::Invalid(_)
        ));
        assert!(matches!(
            cluster_error(api_error(504)),
            ClusterError::Timeout(_)
        ));
        match cluster_error(api_error(500)) {
            ClusterError::Other(message) => assert_eq!(message, "500: denied"),
            error => panic!("unexpected {error:?}"),
        }
    }

    #[test]
    fn test_custom_resource_conversion() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "tackle.konveyor.io/v1alpha1",
            "kind": "Addon",
            "metadata": {"name": "analyzer", "generation": 2},
            "spec": {
                "task": "analyzer",
                "container": {"name": "addon", "image": "quay.io/konveyor/analyzer"}
            },
            "status": {"observedGeneration": 2}
        }))
        .unwrap();
        let addon: Addon = serde_json::from_value(serde_json::to_value(object).unwrap()).unwrap();
        assert_eq!(addon.name(), "analyzer");
        assert_eq!(addon.spec.task, "analyzer");
        assert!(addon.reconciled());
    }
}
