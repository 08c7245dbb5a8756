//! Release resolution
//!
//! Turns a requested release (possibly empty or `latest`) into a registry
//! entry. Sources are tried in order: registry cache, release server,
//! in-cluster config map, then whatever the registry already holds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument, warn};

use super::manifest::{parse_payload, payload_from_document};
use super::registry::{Provenance, RegistryEntry, VersionRegistry};
use super::LATEST;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::k8s::ClusterApi;

/// Downloads a release manifest document
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches manifests from the release server over HTTPS
#[derive(Clone)]
pub struct HttpManifestFetcher {
    client: reqwest::Client,
}

impl HttpManifestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("Got http response {}", status)));
        }
        response.text().await.map_err(|e| Error::fetch(e.to_string()))
    }
}

/// Whether the in-cluster config map may stand in for the release server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFallback {
    Allowed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ResolvedRelease {
    /// Release as asked for, with empty normalised to `latest`
    pub requested: String,
    /// Concrete release identifier
    pub release: String,
    pub entry: Arc<RegistryEntry>,
}

#[derive(Clone)]
pub struct ReleaseResolver {
    registry: VersionRegistry,
    fetcher: Arc<dyn ManifestFetcher>,
    cluster: Arc<dyn ClusterApi>,
    config: Arc<Config>,
}

impl ReleaseResolver {
    pub fn new(
        registry: VersionRegistry,
        fetcher: Arc<dyn ManifestFetcher>,
        cluster: Arc<dyn ClusterApi>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            cluster,
            config,
        }
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub async fn resolve(&self, requested: &str) -> Result<ResolvedRelease> {
        self.resolve_with(requested, LocalFallback::Allowed).await
    }

    #[instrument(skip(self))]
    pub async fn resolve_with(
        &self,
        requested: &str,
        fallback: LocalFallback,
    ) -> Result<ResolvedRelease> {
        let key = match requested.trim() {
            "" => LATEST,
            other => other,
        };

        if key != LATEST {
            if let Some(entry) = self.registry.get(key).await {
                if entry.provenance == Provenance::Remote {
                    debug!(release = key, "Release served from registry");
                    metrics::increment_counter!("ixiatg_release_resolve_total", "source" => "cache");
                    return Ok(self.resolved(key, entry));
                }
            }
        }

        match self.fetch_payload(key, fallback).await? {
            Some((payload, provenance)) => {
                self.load_payload(&payload, key, provenance).await?;
                let source = match provenance {
                    Provenance::Remote => "remote",
                    Provenance::LocalFallback => "local",
                };
                metrics::increment_counter!("ixiatg_release_resolve_total", "source" => source);
            }
            None => {
                warn!(release = key, "No release source reachable, using registry contents");
                metrics::increment_counter!("ixiatg_release_resolve_total", "source" => "stale");
            }
        }

        let entry = if key == LATEST {
            self.registry.latest_entry().await
        } else {
            self.registry.get(key).await
        };
        entry
            .map(|entry| self.resolved(key, entry))
            .ok_or_else(|| Error::DependencyNotFound(key.to_string()))
    }

    /// Load a release wrapper document pushed by an operator user. Entries
    /// are recorded as local so the release server is still consulted when
    /// one of them is requested.
    pub async fn load_document(&self, document: &str) -> Result<Vec<String>> {
        let payload = payload_from_document(document)?;
        if payload.trim().is_empty() {
            return Err(Error::manifest("document carries no versions payload"));
        }
        self.load_payload(&payload, LATEST, Provenance::LocalFallback)
            .await
    }

    fn resolved(&self, key: &str, entry: Arc<RegistryEntry>) -> ResolvedRelease {
        ResolvedRelease {
            requested: key.to_string(),
            release: entry.release.clone(),
            entry,
        }
    }

    /// Payload from the release server, else the local config map. A
    /// cluster error reading the config map is returned so the caller can
    /// retry instead of reporting the release as missing.
    async fn fetch_payload(
        &self,
        key: &str,
        fallback: LocalFallback,
    ) -> Result<Option<(String, Provenance)>> {
        let url = self.config.release_url(key);
        match self
            .fetcher
            .fetch(&url)
            .await
            .and_then(|doc| payload_from_document(&doc))
        {
            Ok(payload) if !payload.trim().is_empty() => {
                info!(url = %url, "Fetched release manifest");
                return Ok(Some((payload, Provenance::Remote)));
            }
            Ok(_) => warn!(url = %url, "Release manifest carries no versions payload"),
            Err(e) => warn!(url = %url, error = %e, "Failed to fetch release manifest"),
        }

        if fallback == LocalFallback::Skipped {
            return Ok(None);
        }

        let namespace = &self.config.operator_namespace;
        let name = &self.config.release_config_map;
        match self.cluster.get_config_map(namespace, name).await? {
            Some(config_map) => {
                let payload = config_map
                    .data
                    .and_then(|mut data| data.remove("versions"))
                    .filter(|payload| !payload.trim().is_empty());
                if payload.is_none() {
                    warn!(namespace = %namespace, name = %name, "Release config map has no versions");
                }
                Ok(payload.map(|payload| (payload, Provenance::LocalFallback)))
            }
            None => {
                warn!(namespace = %namespace, name = %name, "Release config map not found");
                Ok(None)
            }
        }
    }

    async fn load_payload(
        &self,
        payload: &str,
        key: &str,
        provenance: Provenance,
    ) -> Result<Vec<String>> {
        let mut loaded = Vec::new();
        for release in parse_payload(payload)?
            .iter()
            .filter(|r| !r.release.is_empty())
        {
            let entry = RegistryEntry::build(release, provenance, &self.config);
            self.registry.insert(entry).await;
            if key == LATEST {
                self.registry.set_latest(&release.release).await;
            }
            loaded.push(release.release.clone());
        }
        Ok(loaded)
    }
}
