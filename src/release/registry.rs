//! In-memory cache of resolved releases
//!
//! The registry is created once at startup and shared (cheaply cloned)
//! between the reconciler and the HTTP surface.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::component::{ComponentKind, ComponentRecord, Role};
use super::manifest::PublishedRelease;
use super::version::{is_at_least, Capabilities, ControllerModel};
use crate::config::Config;

/// Where a registry entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Downloaded from the release server; trusted for reuse
    Remote,
    /// Read from the in-cluster config map or pushed over the API;
    /// re-checked against the release server on next use
    LocalFallback,
}

/// Dependency description of one release
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub release: String,
    pub provenance: Provenance,
    pub capabilities: Capabilities,
    /// Components placed in the controller pod, by registry key
    pub controller: BTreeMap<String, ComponentRecord>,
    /// Engine and init components, by registry key (`init1`, `init2`, ...)
    pub engine: BTreeMap<String, ComponentRecord>,
}

impl RegistryEntry {
    /// Bucket the images of a published release and apply the
    /// compatibility rules that depend on component tags.
    pub fn build(release: &PublishedRelease, provenance: Provenance, config: &Config) -> Self {
        let mut controller = BTreeMap::new();
        let mut engine = BTreeMap::new();
        let mut init_seq = 0;

        for image in &release.images {
            let Some(kind) = ComponentKind::from_image_name(&image.name) else {
                warn!(image = %image.name, release = %release.release, "Unknown image name, ignoring");
                continue;
            };
            let record = ComponentRecord::from_image(kind, image, config);
            match kind.role() {
                Role::Controller => {
                    controller.insert(kind.key().to_string(), record);
                }
                Role::Engine => {
                    engine.insert(kind.key().to_string(), record);
                }
                Role::Init => {
                    init_seq += 1;
                    engine.insert(format!("init{}", init_seq), record);
                }
            }
        }

        let mut capabilities = Capabilities::default();
        if let Some(ctrl) = controller.get_mut(ComponentKind::Controller.key()) {
            capabilities.model = Some(if is_at_least(&ctrl.tag, &config.otg_base_version) {
                ControllerModel::Otg
            } else {
                ControllerModel::Legacy
            });
            if is_at_least(&ctrl.tag, &config.grpc_merged_version) {
                capabilities.grpc_merged = true;
                ctrl.default_args
                    .extend(["--grpc-port".to_string(), "40051".to_string()]);
            }
        }
        if capabilities.grpc_merged {
            controller.remove(ComponentKind::Grpc.key());
        }
        if let Some(gnmi) = controller.get_mut(ComponentKind::Gnmi.key()) {
            if is_at_least(&gnmi.tag, &config.gnmi_new_base_version) {
                capabilities.gnmi_http_args = true;
                gnmi.default_args = vec![
                    "-http-server".to_string(),
                    format!("https://localhost:{}", config.controller_https_port),
                    "--debug".to_string(),
                ];
                gnmi.default_command.clear();
            }
        }

        Self {
            release: release.release.clone(),
            provenance,
            capabilities,
            controller,
            engine,
        }
    }

    pub fn controller_component(&self, kind: ComponentKind) -> Option<&ComponentRecord> {
        self.controller.get(kind.key())
    }

    pub fn engine_component(&self, kind: ComponentKind) -> Option<&ComponentRecord> {
        self.engine.get(kind.key())
    }

    /// Init components in manifest order
    pub fn init_components(&self) -> Vec<&ComponentRecord> {
        let mut inits: Vec<(usize, &ComponentRecord)> = self
            .engine
            .iter()
            .filter(|(_, c)| c.role() == Role::Init)
            .filter_map(|(key, c)| {
                key.strip_prefix("init")
                    .and_then(|n| n.parse().ok())
                    .map(|n| (n, c))
            })
            .collect();
        inits.sort_by_key(|(n, _)| *n);
        inits.into_iter().map(|(_, c)| c).collect()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, Arc<RegistryEntry>>,
    latest: Option<String>,
}

/// Summary of the registry contents for the HTTP surface
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub latest: Option<String>,
    pub releases: Vec<ReleaseSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    pub release: String,
    pub provenance: Provenance,
    pub components: Vec<String>,
}

/// Shared, concurrently accessible release cache
#[derive(Debug, Clone, Default)]
pub struct VersionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, release: &str) -> Option<Arc<RegistryEntry>> {
        self.inner.read().await.entries.get(release).cloned()
    }

    /// Store an entry, replacing any previous one for the same release
    pub async fn insert(&self, entry: RegistryEntry) -> Arc<RegistryEntry> {
        let entry = Arc::new(entry);
        let mut state = self.inner.write().await;
        info!(release = %entry.release, provenance = ?entry.provenance, "Release registered");
        state.entries.insert(entry.release.clone(), entry.clone());
        entry
    }

    pub async fn latest(&self) -> Option<String> {
        self.inner.read().await.latest.clone()
    }

    pub async fn set_latest(&self, release: &str) {
        self.inner.write().await.latest = Some(release.to_string());
    }

    /// Entry the latest pointer refers to, if both exist
    pub async fn latest_entry(&self) -> Option<Arc<RegistryEntry>> {
        let state = self.inner.read().await;
        state
            .latest
            .as_ref()
            .and_then(|release| state.entries.get(release).cloned())
    }

    pub async fn summary(&self) -> RegistrySummary {
        let state = self.inner.read().await;
        let mut releases: Vec<ReleaseSummary> = state
            .entries
            .values()
            .map(|entry| ReleaseSummary {
                release: entry.release.clone(),
                provenance: entry.provenance,
                components: entry
                    .controller
                    .keys()
                    .chain(entry.engine.keys())
                    .cloned()
                    .collect(),
            })
            .collect();
        releases.sort_by(|a, b| a.release.cmp(&b.release));
        RegistrySummary {
            latest: state.latest.clone(),
            releases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::manifest::ImageRecord;

    fn image(name: &str, tag: &str) -> ImageRecord {
        ImageRecord {
            name: name.to_string(),
            path: format!("ghcr.io/open-traffic-generator/{}", name),
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    fn release(ctrl_tag: &str, gnmi_tag: &str) -> PublishedRelease {
        PublishedRelease {
            release: "0.0.1-test".to_string(),
            images: vec![
                image("controller", ctrl_tag),
                image("gnmi-server", gnmi_tag),
                image("grpc-server", "0.7.7"),
                image("traffic-engine", "1.4.1.29"),
                image("protocol-engine", "1.00.0.191"),
                image("init-wait", "latest"),
                image("init-sysctl", "latest"),
                image("dashboard", "1"),
            ],
        }
    }

    #[test]
    fn test_bucketing() {
        let config = Config::default();
        let entry = RegistryEntry::build(&release("0.0.1-3000", "1.7.0"), Provenance::Remote, &config);

        assert_eq!(entry.capabilities.model, Some(ControllerModel::Otg));
        assert!(!entry.capabilities.grpc_merged);
        assert!(entry.controller_component(ComponentKind::Grpc).is_some());
        assert!(entry.engine_component(ComponentKind::TrafficEngine).is_some());

        let inits = entry.init_components();
        assert_eq!(inits.len(), 2);
        assert_eq!(inits[0].name, "init-wait");
        assert_eq!(inits[1].name, "init-sysctl");
        assert!(entry.engine.contains_key("init2"));
        assert!(!entry.engine.contains_key("dashboard"));
    }

    #[test]
    fn test_grpc_merged_release() {
        let config = Config::default();
        let entry = RegistryEntry::build(&release("0.0.1-3114", "1.7.9"), Provenance::Remote, &config);

        assert!(entry.capabilities.grpc_merged);
        assert!(entry.controller_component(ComponentKind::Grpc).is_none());
        let ctrl = entry.controller_component(ComponentKind::Controller).unwrap();
        assert_eq!(
            ctrl.effective_args(),
            ["--accept-eula", "--debug", "--grpc-port", "40051"]
        );

        let gnmi = entry.controller_component(ComponentKind::Gnmi).unwrap();
        assert!(entry.capabilities.gnmi_http_args);
        assert_eq!(
            gnmi.effective_args(),
            ["-http-server", "https://localhost:8443", "--debug"]
        );
        assert!(gnmi.effective_command().is_empty());
    }

    #[test]
    fn test_legacy_and_malformed_controller_tags() {
        let config = Config::default();
        let legacy = RegistryEntry::build(&release("0.0.1-2000", "0.0.1"), Provenance::Remote, &config);
        assert_eq!(legacy.capabilities.model, Some(ControllerModel::Legacy));

        let malformed = RegistryEntry::build(&release("nightly", "0.0.1"), Provenance::Remote, &config);
        assert_eq!(malformed.capabilities.model, Some(ControllerModel::Legacy));
        assert!(!malformed.capabilities.grpc_merged);
    }

    #[tokio::test]
    async fn test_latest_pointer() {
        let config = Config::default();
        let registry = VersionRegistry::new();
        assert!(registry.latest_entry().await.is_none());

        let entry = RegistryEntry::build(&release("0.0.1-3000", "1.7.0"), Provenance::LocalFallback, &config);
        registry.insert(entry).await;
        registry.set_latest("0.0.1-test").await;

        let latest = registry.latest_entry().await.unwrap();
        assert_eq!(latest.provenance, Provenance::LocalFallback);

        let summary = registry.summary().await;
        assert_eq!(summary.latest.as_deref(), Some("0.0.1-test"));
        assert_eq!(summary.releases.len(), 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let config = Config::default();
        let registry = VersionRegistry::new();
        let reader = registry.clone();

        tokio_test::block_on(async {
            registry
                .insert(RegistryEntry::build(&release("0.0.1-3000", "1.7.0"), Provenance::Remote, &config))
                .await;
            let entry = reader.get("0.0.1-test").await;
            assert!(entry.is_some());
            assert!(reader.get("0.0.1-other").await.is_none());
        });
    }
}
