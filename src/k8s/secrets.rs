//! Secret replication from the operator namespace
//!
//! The image pull secret and the license secret live next to the operator.
//! When annotated for replication they are copied into each namespace that
//! runs IxiaTG nodes.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, instrument};

use super::client::ClusterApi;
use super::containers::LicenseConfig;
use crate::config::Config;
use crate::error::Result;

pub const REPLICATE_ANNOTATION: &str = "secretsync.ixiatg.com/replicate";
pub const REPLICATED_FROM_LABEL: &str = "secretsync.ixiatg.com/replicated-from";
pub const REPLICATED_TIME_ANNOTATION: &str = "secretsync.ixiatg.com/replicated-time";
pub const REPLICATED_VERSION_ANNOTATION: &str = "secretsync.ixiatg.com/replicated-resource-version";

const LICENSE_ADDRESSES_KEY: &str = "addresses";
const LICENSE_IMAGE_KEY: &str = "image";

/// Outcome of secret reconciliation for one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSync {
    /// Pull secret to reference from pods, present once replicated
    pub pull_secret: Option<String>,
    pub license: LicenseConfig,
}

fn wants_replication(secret: &Secret) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REPLICATE_ANNOTATION))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Copy of `source` for `namespace`, labelled with where it came from
pub fn replica_of(source: &Secret, namespace: &str) -> Secret {
    let source_ns = source.metadata.namespace.clone().unwrap_or_default();
    let name = source.metadata.name.clone().unwrap_or_default();
    let labels = BTreeMap::from([(
        REPLICATED_FROM_LABEL.to_string(),
        format!("{}.{}", source_ns, name),
    )]);
    let annotations = BTreeMap::from([
        (
            REPLICATED_TIME_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc2822(),
        ),
        (
            REPLICATED_VERSION_ANNOTATION.to_string(),
            source.metadata.resource_version.clone().unwrap_or_default(),
        ),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        ..Default::default()
    }
}

fn is_replica(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .map(|l| l.contains_key(REPLICATED_FROM_LABEL))
        .unwrap_or(false)
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string());
    from_data
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|s| s.trim().to_string())
        })
        .filter(|v| !v.is_empty())
}

/// Replicate one secret; returns whether a copy now exists in `namespace`
async fn replicate(cluster: &dyn ClusterApi, source: &Secret, namespace: &str) -> Result<bool> {
    if !wants_replication(source) {
        return Ok(false);
    }
    let mut replica = replica_of(source, namespace);
    let name = replica.metadata.name.clone().unwrap_or_default();
    match cluster.get_secret(namespace, &name).await? {
        None => {
            info!(secret = %name, namespace, "Replicating secret");
            cluster.create_secret(namespace, &replica).await?;
        }
        Some(existing) => {
            info!(secret = %name, namespace, "Refreshing replicated secret");
            replica.metadata.resource_version = existing.metadata.resource_version;
            cluster.replace_secret(namespace, &replica).await?;
        }
    }
    Ok(true)
}

/// Replicate the pull and license secrets into `namespace` and collect the
/// license settings
#[instrument(skip(cluster, config))]
pub async fn reconcile_secrets(
    cluster: &dyn ClusterApi,
    namespace: &str,
    config: &Config,
) -> Result<SecretSync> {
    let mut sync = SecretSync::default();
    let source_ns = &config.operator_namespace;
    // Nodes next to the operator use the sources directly
    let in_source_ns = namespace == source_ns.as_str();

    match cluster.get_secret(source_ns, &config.pull_secret_name).await? {
        Some(pull) => {
            if in_source_ns || replicate(cluster, &pull, namespace).await? {
                sync.pull_secret = Some(config.pull_secret_name.clone());
            }
        }
        None => debug!(namespace = %source_ns, "No pull secret found"),
    }

    match cluster
        .get_secret(source_ns, &config.license_secret_name)
        .await?
    {
        Some(license) => {
            if !in_source_ns {
                replicate(cluster, &license, namespace).await?;
            }
            sync.license = LicenseConfig {
                address: secret_value(&license, LICENSE_ADDRESSES_KEY),
                image: secret_value(&license, LICENSE_IMAGE_KEY),
            };
        }
        None => debug!(namespace = %source_ns, "No license secret found"),
    }

    Ok(sync)
}

/// Remove the replicas made by [`reconcile_secrets`]; secrets without the
/// replication label and anything in the operator namespace are left alone
pub async fn remove_replicas(
    cluster: &dyn ClusterApi,
    namespace: &str,
    config: &Config,
) -> Result<()> {
    if namespace == config.operator_namespace {
        return Ok(());
    }
    for name in [&config.pull_secret_name, &config.license_secret_name] {
        if let Some(secret) = cluster.get_secret(namespace, name).await? {
            if is_replica(&secret) {
                cluster.delete_secret(namespace, name).await?;
            }
        }
    }
    Ok(())
}
