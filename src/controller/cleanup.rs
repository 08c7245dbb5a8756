//! Removal of a deleted node's pods, services and config

use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{plan, Context};
use crate::crd::IxiaTG;
use crate::error::Result;
use crate::k8s::{self, CONTROLLER_CONFIG_MAP};
use crate::release::ControllerModel;

/// Delete everything the node owns.
///
/// Every delete is preceded by a lookup so a repeated call after a partial
/// cleanup skips what is already gone. Objects shared by the namespace are
/// only removed together with its last node.
#[instrument(skip_all, fields(node = %node.name_any()))]
pub async fn cleanup(node: &IxiaTG, ctx: &Context) -> Result<()> {
    let name = node.name_any();
    let namespace = node.namespace_or_default();
    let status = node.status_or_default();
    let grace = ctx.config.termination_grace_secs;

    let peers = ctx.cluster.list_traffic_generators(&namespace).await?;
    let last = !peers
        .iter()
        .any(|peer| peer.name_any() != name && !peer.is_deleting());

    let engine_pods: BTreeSet<&str> = status
        .interfaces
        .iter()
        .map(|intf| intf.pod_name.as_str())
        .collect();
    for pod in engine_pods {
        delete_pod(ctx, &namespace, pod, grace).await?;
        delete_service(ctx, &namespace, &plan::engine_service_name(pod), 0).await?;
    }

    if plan::is_legacy_layout(node) {
        if last {
            let controller = plan::controller_pod_name(&name, ControllerModel::Legacy);
            delete_pod(ctx, &namespace, &controller, grace).await?;
            for service in plan::LEGACY_CONTROLLER_SERVICES {
                delete_service(ctx, &namespace, service, 0).await?;
            }
        }
    } else if !status.api_endpoint.pod_name.is_empty() {
        delete_pod(ctx, &namespace, &status.api_endpoint.pod_name, grace).await?;
        if ctx
            .cluster
            .get_config_map(&namespace, CONTROLLER_CONFIG_MAP)
            .await?
            .is_some()
        {
            ctx.cluster
                .delete_config_map(&namespace, CONTROLLER_CONFIG_MAP)
                .await?;
        }
        for service in &status.api_endpoint.service_names {
            delete_service(ctx, &namespace, service, 0).await?;
        }
    }

    if last {
        k8s::remove_replicas(ctx.cluster.as_ref(), &namespace, &ctx.config).await?;
    }

    info!("Node resources removed");
    Ok(())
}

async fn delete_pod(ctx: &Context, namespace: &str, pod: &str, grace: i64) -> Result<()> {
    if ctx.cluster.get_pod(namespace, pod).await?.is_none() {
        debug!(pod, "Pod already gone");
        return Ok(());
    }
    info!(pod, "Deleting pod");
    ctx.cluster.delete_pod(namespace, pod, grace).await
}

async fn delete_service(ctx: &Context, namespace: &str, service: &str, grace: i64) -> Result<()> {
    if ctx.cluster.get_service(namespace, service).await?.is_none() {
        debug!(service, "Service already gone");
        return Ok(());
    }
    ctx.cluster.delete_service(namespace, service, grace).await
}
