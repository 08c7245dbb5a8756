//! Topology planning: validation and naming
//!
//! Pure functions deciding which pods and services a node needs. The
//! result is recorded on the node's status before anything is deployed.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use crate::crd::{ApiEndpointStatus, IxiaTG, InterfaceStatus};
use crate::error::{Error, Result};
use crate::release::ControllerModel;

/// Interface every legacy engine pod uses
pub const DEFAULT_INTERFACE: &str = "eth1";
/// Pod name of the shared legacy controller
pub const LEGACY_CONTROLLER_POD: &str = "ixia-c";
/// Fixed services in front of the shared legacy controller
pub const LEGACY_CONTROLLER_SERVICES: [&str; 3] = ["ixia-c-service", "grpc-service", "gnmi-service"];

const CONTROLLER_SUFFIX: &str = "-controller";
const PORT_INFIX: &str = "-port-";
const PORT_GROUP_INFIX: &str = "-port-group-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub interfaces: Vec<InterfaceStatus>,
    pub api_endpoint: ApiEndpointStatus,
}

pub fn controller_pod_name(node: &str, model: ControllerModel) -> String {
    match model {
        ControllerModel::Otg => format!("{}{}", node, CONTROLLER_SUFFIX),
        ControllerModel::Legacy => LEGACY_CONTROLLER_POD.to_string(),
    }
}

pub fn controller_service_name(endpoint: &str, node: &str) -> String {
    format!("service-{}-{}{}", endpoint, node, CONTROLLER_SUFFIX)
}

pub fn engine_service_name(pod: &str) -> String {
    format!("service-{}", pod)
}

/// Check the node against every other node in its namespace
pub fn validate(node: &IxiaTG, model: ControllerModel, peers: &[IxiaTG]) -> Result<()> {
    let name = node.name_any();
    let interfaces = &node.spec.interfaces;
    let live: Vec<&IxiaTG> = peers.iter().filter(|p| !p.is_deleting()).collect();

    let mut seen = BTreeSet::new();
    if let Some(dup) = interfaces.iter().find(|i| !seen.insert(i.name.as_str())) {
        return Err(Error::validation(format!(
            "Interface {} specified more than once for node {}",
            dup.name, name
        )));
    }

    match model {
        ControllerModel::Otg => {
            if live.len() > 1 {
                return Err(Error::validation(format!(
                    "Unsupported configuration; multiple ({}) OTG nodes specified",
                    live.len()
                )));
            }
        }
        ControllerModel::Legacy => {
            match interfaces.as_slice() {
                [] => {
                    return Err(Error::validation(format!(
                        "No interface specified for node {}",
                        name
                    )))
                }
                [only] if only.name != DEFAULT_INTERFACE => {
                    return Err(Error::validation(format!(
                        "Unsupported interface {} for Controller version; interface must be {}",
                        only.name, DEFAULT_INTERFACE
                    )))
                }
                [_] => {}
                many => {
                    return Err(Error::validation(format!(
                        "Multiple interfaces ({}) specified for node {}",
                        many.len(),
                        name
                    )))
                }
            }
            if name == LEGACY_CONTROLLER_POD {
                return Err(Error::validation(format!(
                    "Node name {} is reserved for Controller pod, use some other name",
                    LEGACY_CONTROLLER_POD
                )));
            }
            if let Some(first) = live.first() {
                let expected = first.requested_release();
                if let Some(other) = live.iter().find(|p| p.requested_release() != expected) {
                    return Err(Error::validation(format!(
                        "IxiaTG node versions are not consistent; found {} for one and {} for another",
                        other.requested_release(),
                        expected
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Pod and service names for a validated node
pub fn plan(node: &IxiaTG, model: ControllerModel, otg_base_version: &str) -> Result<TopologyPlan> {
    let name = node.name_any();
    let mut interfaces = Vec::with_capacity(node.spec.interfaces.len());
    for intf in &node.spec.interfaces {
        let status = match (model, intf.group.as_deref()) {
            (ControllerModel::Legacy, Some(_)) => {
                return Err(Error::validation(format!(
                    "Group, in config, is not supported for version older than {}",
                    otg_base_version
                )))
            }
            (ControllerModel::Legacy, None) => InterfaceStatus {
                pod_name: name.clone(),
                name: intf.name.clone(),
                interface: DEFAULT_INTERFACE.to_string(),
            },
            (ControllerModel::Otg, Some(group)) => InterfaceStatus {
                pod_name: format!("{}{}{}", name, PORT_GROUP_INFIX, group),
                name: intf.name.clone(),
                interface: intf.name.clone(),
            },
            (ControllerModel::Otg, None) => InterfaceStatus {
                pod_name: format!("{}{}{}", name, PORT_INFIX, intf.name),
                name: intf.name.clone(),
                interface: intf.name.clone(),
            },
        };
        interfaces.push(status);
    }

    let api_endpoint = match model {
        ControllerModel::Otg => ApiEndpointStatus {
            pod_name: controller_pod_name(&name, model),
            service_names: node
                .spec
                .api_endpoint_map
                .keys()
                .map(|endpoint| controller_service_name(endpoint, &name))
                .collect(),
        },
        ControllerModel::Legacy => ApiEndpointStatus {
            pod_name: name.clone(),
            service_names: vec![engine_service_name(&name)],
        },
    };

    Ok(TopologyPlan {
        interfaces,
        api_endpoint,
    })
}

/// Interfaces hosted by each engine pod, in plan order
pub fn pod_interfaces(interfaces: &[InterfaceStatus]) -> BTreeMap<String, Vec<String>> {
    let mut pods: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for intf in interfaces {
        pods.entry(intf.pod_name.clone())
            .or_default()
            .push(intf.interface.clone());
    }
    pods
}

/// Legacy nodes are recorded with the engine pod named after the node
pub fn is_legacy_layout(node: &IxiaTG) -> bool {
    let name = node.name_any();
    node.status
        .as_ref()
        .map(|s| s.interfaces.iter().any(|i| i.pod_name == name))
        .unwrap_or(false)
}
