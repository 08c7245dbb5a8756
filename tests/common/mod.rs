//! In-memory cluster and release server shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::error::ErrorResponse;
use kube::ResourceExt;

use ixiatg_operator::config::Config;
use ixiatg_operator::controller::Context;
use ixiatg_operator::crd::{InterfaceSpec, IxiaTG, IxiaTGSpec, IxiaTGStatus, FINALIZER};
use ixiatg_operator::k8s::ClusterApi;
use ixiatg_operator::release::{ManifestFetcher, ReleaseResolver, VersionRegistry};
use ixiatg_operator::{Error, Result};

pub const NAMESPACE: &str = "ixia-c";

/// A mutating call made against [`FakeCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePod(String),
    DeletePod(String),
    CreateService(String),
    DeleteService(String),
    CreateConfigMap(String),
    DeleteConfigMap(String),
    CreateSecret(String),
    ReplaceSecret(String),
    DeleteSecret(String),
    UpdateStatus(String),
    SetFinalizers(String),
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<Key, IxiaTG>,
    pods: BTreeMap<Key, Pod>,
    services: BTreeMap<Key, Service>,
    config_maps: BTreeMap<Key, ConfigMap>,
    secrets: BTreeMap<Key, Secret>,
    calls: Vec<Call>,
    fail_status_updates: bool,
    reject_pod_creates: Option<u16>,
}

/// Cluster keeping every object in memory and recording mutations
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, node: IxiaTG) {
        let mut state = self.state.lock().unwrap();
        state
            .nodes
            .insert(key(&node.namespace_or_default(), &node.name_any()), node);
    }

    pub fn node(&self, name: &str) -> IxiaTG {
        self.state.lock().unwrap().nodes[&key(NAMESPACE, name)].clone()
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .nodes
            .contains_key(&key(NAMESPACE, name))
    }

    pub fn status(&self, name: &str) -> IxiaTGStatus {
        self.node(name).status.unwrap_or_default()
    }

    /// Apply a spec edit, bumping the generation like the API server does
    pub fn edit_node(&self, name: &str, edit: impl FnOnce(&mut IxiaTGSpec)) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&key(NAMESPACE, name)) {
            edit(&mut node.spec);
            node.metadata.generation = Some(node.metadata.generation.unwrap_or(1) + 1);
        }
    }

    pub fn mark_deleting(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&key(NAMESPACE, name)) {
            node.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    pub fn add_config_map(&self, namespace: &str, config_map: ConfigMap) {
        let name = config_map.name_any();
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert(key(namespace, &name), config_map);
    }

    pub fn add_secret(&self, namespace: &str, secret: Secret) {
        let name = secret.name_any();
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(key(namespace, &name), secret);
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&key(NAMESPACE, name))
            .cloned()
    }

    pub fn pod_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.pods.keys().map(|(_, name)| name.clone()).collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.services.keys().map(|(_, name)| name.clone()).collect()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn remove_pod(&self, name: &str) {
        self.state.lock().unwrap().pods.remove(&key(NAMESPACE, name));
    }

    pub fn set_pod_status(&self, name: &str, status: PodStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(pod) = state.pods.get_mut(&key(NAMESPACE, name)) {
            pod.status = Some(status);
        }
    }

    pub fn set_all_pods_phase(&self, phase: &str) {
        let mut state = self.state.lock().unwrap();
        for pod in state.pods.values_mut() {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_status_updates = fail;
    }

    /// Make every pod create fail with an API server rejection of `code`
    pub fn reject_pod_creates(&self, code: Option<u16>) {
        self.state.lock().unwrap().reject_pod_creates = code;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| matches(call))
            .count()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn insert_new<T: Clone>(
    map: &mut BTreeMap<Key, T>,
    kind: &'static str,
    namespace: &str,
    name: String,
    object: &T,
) -> Result<()> {
    let k = key(namespace, &name);
    if map.contains_key(&k) {
        return Err(Error::already_exists(kind, name));
    }
    map.insert(k, object.clone());
    Ok(())
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_traffic_generator(&self, namespace: &str, name: &str) -> Result<Option<IxiaTG>> {
        Ok(self.state.lock().unwrap().nodes.get(&key(namespace, name)).cloned())
    }

    async fn list_traffic_generators(&self, namespace: &str) -> Result<Vec<IxiaTG>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, node)| node.clone())
            .collect())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IxiaTGStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status_updates {
            return Err(Error::already_exists("IxiaTG", name));
        }
        state.calls.push(Call::UpdateStatus(name.to_string()));
        if let Some(node) = state.nodes.get_mut(&key(namespace, name)) {
            node.status = Some(status.clone());
        }
        Ok(())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetFinalizers(name.to_string()));
        let k = key(namespace, name);
        let release = match state.nodes.get_mut(&k) {
            Some(node) => {
                node.metadata.finalizers = Some(finalizers.clone());
                node.is_deleting() && finalizers.is_empty()
            }
            None => false,
        };
        if release {
            state.nodes.remove(&k);
        }
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.state.lock().unwrap().pods.get(&key(namespace, name)).cloned())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        self.record(Call::CreatePod(name.clone()));
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.reject_pod_creates {
            return Err(Error::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("Pod \"{}\" is invalid", name),
                reason: "Invalid".to_string(),
                code,
            })));
        }
        insert_new(&mut state.pods, "Pod", namespace, name, pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, _grace_secs: i64) -> Result<()> {
        self.record(Call::DeletePod(name.to_string()));
        self.state.lock().unwrap().pods.remove(&key(namespace, name));
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .get(&key(namespace, name))
            .cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let name = service.name_any();
        self.record(Call::CreateService(name.clone()));
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.services, "Service", namespace, name, service)
    }

    async fn delete_service(&self, namespace: &str, name: &str, _grace_secs: i64) -> Result<()> {
        self.record(Call::DeleteService(name.to_string()));
        self.state
            .lock()
            .unwrap()
            .services
            .remove(&key(namespace, name));
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let name = config_map.name_any();
        self.record(Call::CreateConfigMap(name.clone()));
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.config_maps, "ConfigMap", namespace, name, config_map)
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteConfigMap(name.to_string()));
        self.state
            .lock()
            .unwrap()
            .config_maps
            .remove(&key(namespace, name));
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        self.record(Call::CreateSecret(name.clone()));
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.secrets, "Secret", namespace, name, secret)
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        self.record(Call::ReplaceSecret(name.clone()));
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(key(namespace, &name), secret.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteSecret(name.to_string()));
        self.state
            .lock()
            .unwrap()
            .secrets
            .remove(&key(namespace, name));
        Ok(())
    }
}

/// Release server serving wrapper documents by URL suffix
#[derive(Default)]
pub struct FakeFetcher {
    documents: Mutex<HashMap<String, String>>,
    urls: Mutex<Vec<String>>,
    down: AtomicBool,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `payload` for requests of `version` (`latest` included)
    pub fn publish(&self, version: &str, payload: &str) {
        let suffix = if version == "latest" {
            "/latest/download/ixia-configmap.yaml".to_string()
        } else {
            format!("/v{}/ixia-configmap.yaml", version)
        };
        self.documents
            .lock()
            .unwrap()
            .insert(suffix, wrapper_document(payload));
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

#[async_trait]
impl ManifestFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::fetch("Got http response 500 Internal Server Error"));
        }
        let documents = self.documents.lock().unwrap();
        documents
            .iter()
            .find(|(suffix, _)| url.ends_with(suffix.as_str()))
            .map(|(_, document)| document.clone())
            .ok_or_else(|| Error::fetch("Got http response 404 Not Found"))
    }
}

/// Release payload with a controller of the given tag
pub fn release_payload(release: &str, controller_tag: &str) -> String {
    format!(
        r#"{{"release": "{release}", "images": [
            {{"name": "controller", "path": "ghcr.io/open-traffic-generator/ixia-c-controller", "tag": "{controller_tag}"}},
            {{"name": "gnmi-server", "path": "ghcr.io/open-traffic-generator/ixia-c-gnmi-server", "tag": "1.8.0"}},
            {{"name": "grpc-server", "path": "ghcr.io/open-traffic-generator/ixia-c-grpc-server", "tag": "0.8.0"}},
            {{"name": "traffic-engine", "path": "ghcr.io/open-traffic-generator/ixia-c-traffic-engine", "tag": "1.6.0.19"}},
            {{"name": "protocol-engine", "path": "ghcr.io/open-traffic-generator/ixia-c-protocol-engine", "tag": "1.00.0.252"}}
        ]}}"#
    )
}

/// Config map shaped document carrying `payload` under `data.versions`
pub fn wrapper_document(payload: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ixiatg-release-config\ndata:\n  versions: '{}'\n",
        payload.replace('\n', " ")
    )
}

pub fn release_config_map(payload: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("ixiatg-release-config".to_string()),
            namespace: Some("ixiatg-op-system".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("versions".to_string(), payload.to_string())])),
        ..Default::default()
    }
}

/// IxiaTG with the finalizer already in place
pub fn node(name: &str, release: &str, desired: &str, interfaces: &[(&str, Option<&str>)]) -> IxiaTG {
    let mut tg = IxiaTG::new(
        name,
        IxiaTGSpec {
            release: release.to_string(),
            desired_state: desired.to_string(),
            interfaces: interfaces
                .iter()
                .map(|(name, group)| InterfaceSpec {
                    name: name.to_string(),
                    group: group.map(str::to_string),
                })
                .collect(),
            ..Default::default()
        },
    );
    tg.metadata.namespace = Some(NAMESPACE.to_string());
    tg.metadata.generation = Some(1);
    tg.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    tg
}

pub fn context(cluster: Arc<FakeCluster>, fetcher: Arc<FakeFetcher>) -> Arc<Context> {
    let config = Arc::new(Config::default());
    let cluster: Arc<dyn ClusterApi> = cluster;
    let resolver = ReleaseResolver::new(VersionRegistry::new(), fetcher, cluster.clone(), config.clone());
    Arc::new(Context::new(cluster, resolver, config))
}
