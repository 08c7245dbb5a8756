//! Cluster access for the IxiaTG operator
//!
//! [`ClusterApi`] is the narrow surface the reconciler needs. [`K8sClient`]
//! implements it on top of `kube`; tests substitute an in-memory cluster.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
#[cfg(test)]
use mockall::automock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::crd::{IxiaTG, IxiaTGStatus};
use crate::error::{Error, Result};

/// Namespaced object access used by the reconciler.
///
/// Reads return `None` for missing objects, deletes of missing objects
/// succeed, and creates of existing objects fail with
/// [`Error::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_traffic_generator(&self, namespace: &str, name: &str) -> Result<Option<IxiaTG>>;

    async fn list_traffic_generators(&self, namespace: &str) -> Result<Vec<IxiaTG>>;

    async fn update_status(&self, namespace: &str, name: &str, status: &IxiaTGStatus)
        -> Result<()>;

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str, grace_secs: i64) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str, grace_secs: i64) -> Result<()>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Grace period for a delete; negative values mean immediate
fn grace_period(secs: i64) -> u32 {
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

/// Wrapper around kube::Client implementing [`ClusterApi`]
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a client from the default kubeconfig or in-cluster config
    #[instrument(skip_all)]
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        info!("Connected to Kubernetes cluster");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K>(&self, namespace: &str, kind: &'static str, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = object.meta().name.clone().unwrap_or_default();
        match self
            .api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
        {
            Ok(_) => {
                info!(kind, name = %name, namespace, "Created object");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::already_exists(kind, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete<K>(
        &self,
        namespace: &str,
        kind: &'static str,
        name: &str,
        grace_secs: Option<i64>,
    ) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let params = DeleteParams {
            grace_period_seconds: grace_secs.map(grace_period),
            ..Default::default()
        };
        match self.api::<K>(namespace).delete(name, &params).await {
            Ok(_) => {
                info!(kind, name, namespace, "Deleted object");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(kind, name, namespace, "Object already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterApi for K8sClient {
    async fn get_traffic_generator(&self, namespace: &str, name: &str) -> Result<Option<IxiaTG>> {
        self.get_opt(namespace, name).await
    }

    async fn list_traffic_generators(&self, namespace: &str) -> Result<Vec<IxiaTG>> {
        let list = self
            .api::<IxiaTG>(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    #[instrument(skip(self, status))]
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IxiaTGStatus,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        self.api::<IxiaTG>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api::<IxiaTG>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.get_opt(namespace, name).await
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        self.create(namespace, "pod", pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str, grace_secs: i64) -> Result<()> {
        self.delete::<Pod>(namespace, "pod", name, Some(grace_secs))
            .await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.get_opt(namespace, name).await
    }

    #[instrument(skip(self, service), fields(service_name = %service.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        self.create(namespace, "service", service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str, grace_secs: i64) -> Result<()> {
        self.delete::<Service>(namespace, "service", name, Some(grace_secs))
            .await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.get_opt(namespace, name).await
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        self.create(namespace, "configmap", config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<ConfigMap>(namespace, "configmap", name, None)
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.get_opt(namespace, name).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.create(namespace, "secret", secret).await
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.api::<Secret>(namespace)
            .replace(&name, &PostParams::default(), secret)
            .await?;
        info!(name = %name, namespace, "Updated secret");
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Secret>(namespace, "secret", name, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grace_period_is_clamped() {
        assert_eq!(grace_period(5), 5);
        assert_eq!(grace_period(0), 0);
        assert_eq!(grace_period(-1), 0);
        assert_eq!(grace_period(i64::MAX), u32::MAX);
    }
}
