//! IxiaTG reconciliation
//!
//! Drives each node through `INITIATED` and `DEPLOYED`, or into `FAILED`.
//! All failure information ends up in the node's status; only transient
//! cluster errors are returned to the runtime, which requeues.

pub mod cleanup;
pub mod deploy;
pub mod plan;

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::crd::{IxiaTG, IxiaTGStatus, NodeState, FINALIZER};
use crate::error::{Error, Result};
use crate::k8s::ClusterApi;
use crate::release::{ControllerModel, ReleaseResolver, ResolvedRelease};

use deploy::Progress;

/// Shared state handed to every reconciliation
pub struct Context {
    pub cluster: Arc<dyn ClusterApi>,
    pub resolver: ReleaseResolver,
    pub config: Arc<Config>,
}

impl Context {
    pub fn new(cluster: Arc<dyn ClusterApi>, resolver: ReleaseResolver, config: Arc<Config>) -> Self {
        Self {
            cluster,
            resolver,
            config,
        }
    }

    /// Resolve the node's release and the controller model it implies
    pub(crate) async fn resolve_model(
        &self,
        node: &IxiaTG,
    ) -> Result<(ResolvedRelease, ControllerModel)> {
        let resolved = self.resolver.resolve(node.requested_release()).await?;
        let model = resolved.entry.capabilities.model.ok_or_else(|| {
            Error::missing_component(format!(
                "Failed to locate Controller entry for version {}",
                resolved.release
            ))
        })?;
        Ok((resolved, model))
    }
}

/// Watch IxiaTG resources cluster-wide until a shutdown signal arrives
pub async fn run(client: Client, ctx: Arc<Context>) {
    let nodes = Api::<IxiaTG>::all(client);
    info!("Starting IxiaTG controller");

    Controller::new(nodes, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(node = %object.name, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    warn!(error = %e, "Reconciliation error");
                }
            }
        })
        .await;

    info!("IxiaTG controller stopped");
}

/// Requeue after a fixed delay; there is no backoff
pub fn error_policy(node: Arc<IxiaTG>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(node = %node.name_any(), error = %error, "Reconciliation failed, requeueing");
    Action::requeue(ctx.config.requeue_delay())
}

/// Reconcile one IxiaTG resource
#[instrument(skip_all, fields(node = %node.name_any(), namespace = %node.namespace_or_default()))]
pub async fn reconcile(node: Arc<IxiaTG>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let result = reconcile_node(&node, &ctx).await;

    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::increment_counter!("ixiatg_reconcile_total", "result" => outcome);
    metrics::histogram!(
        "ixiatg_reconcile_duration_seconds",
        start.elapsed().as_secs_f64()
    );
    result
}

async fn reconcile_node(trigger: &IxiaTG, ctx: &Context) -> Result<Action> {
    let name = trigger.name_any();
    let namespace = trigger.namespace_or_default();

    let Some(node) = ctx
        .cluster
        .get_traffic_generator(&namespace, &name)
        .await?
    else {
        debug!("Resource no longer exists");
        return Ok(Action::await_change());
    };

    if node.is_deleting() {
        if node.has_finalizer() {
            info!("Cleaning up deleted node");
            cleanup::cleanup(&node, ctx).await?;
            let remaining: Vec<String> = node
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != FINALIZER)
                .cloned()
                .collect();
            ctx.cluster
                .set_finalizers(&namespace, &name, remaining)
                .await?;
        }
        return Ok(Action::await_change());
    }

    if !node.has_finalizer() {
        let mut finalizers = node.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        ctx.cluster
            .set_finalizers(&namespace, &name, finalizers)
            .await?;
        debug!("Finalizer added");
    }

    let current = node.current_state();
    let desired = node.desired_state();

    if let Ok(desired) = &desired {
        if current == Some(*desired) {
            return Ok(Action::await_change());
        }
    }
    if current == Some(NodeState::Failed) && !node.spec_changed() {
        debug!("Node failed and spec unchanged");
        return Ok(Action::await_change());
    }
    if current == Some(NodeState::Deployed) && desired == Ok(NodeState::Initiated) {
        debug!("Node already deployed, holding");
        return Ok(Action::await_change());
    }

    match desired {
        Ok(NodeState::Initiated) => initiate(&node, ctx).await,
        Ok(NodeState::Deployed) => deploy(&node, ctx).await,
        Ok(NodeState::Failed) => {
            fail(&node, ctx, format!("Unknown desired state found {}", NodeState::Failed)).await
        }
        Err(raw) => fail(&node, ctx, format!("Unknown desired state found {}", raw)).await,
    }
}

async fn initiate(node: &IxiaTG, ctx: &Context) -> Result<Action> {
    let planned = match ctx.resolve_model(node).await {
        Ok((_, model)) => plan_node(node, ctx, model).await,
        Err(e) => Err(e),
    };
    match planned {
        Ok(plan) => {
            let mut status = node.status_or_default().with_state(NodeState::Initiated);
            status.interfaces = plan.interfaces;
            status.api_endpoint = plan.api_endpoint;
            info!(interfaces = status.interfaces.len(), "Node initiated");
            write_status(node, ctx, status).await?;
            Ok(Action::await_change())
        }
        Err(e) => terminal(node, ctx, e).await,
    }
}

async fn deploy(node: &IxiaTG, ctx: &Context) -> Result<Action> {
    let mut status = node.status_or_default();
    // A recorded plan is only trusted for the generation it was made for
    let replan = status.interfaces.is_empty() || node.spec_changed();
    if replan {
        status.interfaces.clear();
    }

    match deploy::deploy(node, ctx, &mut status).await {
        Ok(Progress::Running) => {
            info!("Node deployed");
            write_status(node, ctx, status.with_state(NodeState::Deployed)).await?;
            Ok(Action::await_change())
        }
        Ok(progress) => {
            debug!(?progress, "Deployment in progress");
            if replan {
                write_status(node, ctx, status.with_state(NodeState::Initiated)).await?;
            }
            Ok(Action::requeue(ctx.config.requeue_delay()))
        }
        Err(e) => terminal(node, ctx, e).await,
    }
}

pub(crate) async fn plan_node(
    node: &IxiaTG,
    ctx: &Context,
    model: ControllerModel,
) -> Result<plan::TopologyPlan> {
    let peers = ctx
        .cluster
        .list_traffic_generators(&node.namespace_or_default())
        .await?;
    plan::validate(node, model, &peers)?;
    plan::plan(node, model, &ctx.config.otg_base_version)
}

/// Transient errors go back to the runtime; everything else fails the node
async fn terminal(node: &IxiaTG, ctx: &Context, error: Error) -> Result<Action> {
    if error.is_transient() {
        return Err(error);
    }
    fail(node, ctx, error.to_string()).await
}

async fn fail(node: &IxiaTG, ctx: &Context, reason: String) -> Result<Action> {
    warn!(reason = %reason, "Node failed");
    write_status(node, ctx, node.status_or_default().failed(reason)).await?;
    Ok(Action::await_change())
}

async fn write_status(node: &IxiaTG, ctx: &Context, mut status: IxiaTGStatus) -> Result<()> {
    status.observed_generation = node.metadata.generation;
    ctx.cluster
        .update_status(&node.namespace_or_default(), &node.name_any(), &status)
        .await
}
