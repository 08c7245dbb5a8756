//! Deployment of a node's controller and engine pods

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{plan, Context};
use crate::crd::{IxiaTG, IxiaTGStatus};
use crate::error::{Error, Result};
use crate::k8s::{self, SecretSync};
use crate::release::{ControllerModel, RegistryEntry};

const POD_RUNNING: &str = "Running";
const POD_FAILED: &str = "Failed";
const IMAGE_PULL_FAILURES: [&str; 2] = ["ErrImagePull", "ImagePullBackOff"];

/// Where a deployment pass left the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Objects were created this pass; pods are not observed yet
    Created,
    /// Every object exists but some pod is not running
    Pending,
    Running,
}

/// Make sure every object of the node exists and report pod health.
///
/// `status` receives the topology plan when it carries none yet.
#[instrument(skip_all, fields(node = %node.name_any()))]
pub async fn deploy(node: &IxiaTG, ctx: &Context, status: &mut IxiaTGStatus) -> Result<Progress> {
    let namespace = node.namespace_or_default();
    let (resolved, model) = ctx.resolve_model(node).await?;

    if status.interfaces.is_empty() {
        let plan = super::plan_node(node, ctx, model).await?;
        status.interfaces = plan.interfaces;
        status.api_endpoint = plan.api_endpoint;
    }

    let secrets = k8s::reconcile_secrets(ctx.cluster.as_ref(), &namespace, &ctx.config).await?;

    let controller_pod = plan::controller_pod_name(&node.name_any(), model);
    let mut created = ensure_controller(node, ctx, &resolved.entry, model, status, &secrets).await?;

    let pods = plan::pod_interfaces(&status.interfaces);
    for (pod_name, interfaces) in &pods {
        created |= ensure_engine(node, ctx, &resolved.entry, pod_name, interfaces, &secrets).await?;
    }

    if created {
        return Ok(Progress::Created);
    }

    let mut pending = false;
    for name in std::iter::once(&controller_pod).chain(pods.keys()) {
        match ctx.cluster.get_pod(&namespace, name).await? {
            Some(pod) => {
                if let Some(reason) = pod_failure(&pod) {
                    return Err(Error::pod_failure(reason));
                }
                if !is_running(&pod) {
                    debug!(pod = %name, "Pod not running yet");
                    pending = true;
                }
            }
            None => {
                debug!(pod = %name, "Pod not found");
                pending = true;
            }
        }
    }

    Ok(if pending {
        Progress::Pending
    } else {
        Progress::Running
    })
}

/// Create the controller pod with its config map and services when absent
async fn ensure_controller(
    node: &IxiaTG,
    ctx: &Context,
    entry: &RegistryEntry,
    model: ControllerModel,
    status: &IxiaTGStatus,
    secrets: &SecretSync,
) -> Result<bool> {
    let namespace = node.namespace_or_default();
    let pod_name = plan::controller_pod_name(&node.name_any(), model);
    if ctx.cluster.get_pod(&namespace, &pod_name).await?.is_some() {
        return Ok(false);
    }

    let containers = k8s::controller_containers(entry, model, &secrets.license, &ctx.config)?;
    if model == ControllerModel::Otg {
        let config_map =
            k8s::location_config_map(&namespace, &plan::pod_interfaces(&status.interfaces))?;
        tolerate_existing(ctx.cluster.create_config_map(&namespace, &config_map).await)?;
    }

    info!(pod = %pod_name, release = %entry.release, "Creating controller pod");
    let pod = k8s::controller_pod(
        &namespace,
        &pod_name,
        model,
        containers,
        secrets.pull_secret.as_deref(),
        &ctx.config,
    );
    tolerate_existing(ctx.cluster.create_pod(&namespace, &pod).await)?;

    for service in k8s::controller_services(node, model, &pod_name, &ctx.config) {
        tolerate_existing(ctx.cluster.create_service(&namespace, &service).await)?;
    }
    Ok(true)
}

/// Create one engine pod and its service when absent
async fn ensure_engine(
    node: &IxiaTG,
    ctx: &Context,
    entry: &RegistryEntry,
    pod_name: &str,
    interfaces: &[String],
    secrets: &SecretSync,
) -> Result<bool> {
    let namespace = node.namespace_or_default();
    if ctx.cluster.get_pod(&namespace, pod_name).await?.is_some() {
        return Ok(false);
    }

    let containers = k8s::engine_containers(entry, pod_name, interfaces)?;
    let init = k8s::init_containers(entry, node, interfaces.len(), &ctx.config);

    info!(pod = %pod_name, interfaces = interfaces.len(), "Creating engine pod");
    let pod = k8s::engine_pod(
        &namespace,
        pod_name,
        init,
        containers,
        secrets.pull_secret.as_deref(),
        &ctx.config,
    );
    tolerate_existing(ctx.cluster.create_pod(&namespace, &pod).await)?;

    let service = k8s::engine_service(&namespace, pod_name);
    tolerate_existing(ctx.cluster.create_service(&namespace, &service).await)?;
    Ok(true)
}

fn tolerate_existing(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::AlreadyExists { kind, name }) => {
            debug!(kind, name = %name, "Already exists");
            Ok(())
        }
        other => other,
    }
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == POD_RUNNING)
        .unwrap_or(false)
}

/// Failure message of a pod that failed or cannot pull one of its images
pub fn pod_failure(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    if status.phase.as_deref() == Some(POD_FAILED) {
        return Some(format!(
            "Pod {} failed - {}",
            pod.name_any(),
            status.reason.as_deref().unwrap_or_default()
        ));
    }

    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .find_map(|container| {
            let waiting = container.state.as_ref()?.waiting.as_ref()?;
            let reason = waiting.reason.as_deref()?;
            IMAGE_PULL_FAILURES.contains(&reason).then(|| {
                format!(
                    "Container {} failed - {}",
                    container.name,
                    waiting.message.as_deref().unwrap_or_default()
                )
            })
        })
}
