//! Kubernetes resource builders for IxiaTG topologies
//!
//! Functions to create the Pod, Service and ConfigMap objects of a node
//! from its plan and resolved containers.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, LocalObjectReference, Pod, PodSpec, Service,
    ServicePort, ServiceSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

use crate::config::Config;
use crate::controller::plan::{controller_service_name, engine_service_name, LEGACY_CONTROLLER_SERVICES};
use crate::crd::IxiaTG;
use crate::error::Result;
use crate::release::component::{
    GNMI_PORT, GRPC_PORT, PROTOCOL_ENGINE_PORT, TRAFFIC_ENGINE_PORT,
};
use crate::release::ControllerModel;

/// Name of the config map holding the controller's location map
pub const CONTROLLER_CONFIG_MAP: &str = "controller-config";
const CONTROLLER_CONFIG_FILE: &str = "config.yaml";
const CONFIG_VOLUME: &str = "config";
const SERVICE_DOMAIN: &str = "svc.cluster.local";
const LOAD_BALANCER: &str = "LoadBalancer";

/// Labels selecting the pods of one app
pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    [("app".to_string(), app.to_string())].into_iter().collect()
}

fn pull_secrets(pull_secret: Option<&str>) -> Option<Vec<LocalObjectReference>> {
    pull_secret.map(|name| {
        vec![LocalObjectReference {
            name: Some(name.to_string()),
        }]
    })
}

#[derive(Debug, Serialize)]
struct LocationMap {
    location_map: Vec<Location>,
}

#[derive(Debug, Serialize)]
struct Location {
    location: String,
    endpoint: String,
}

/// Config map telling the controller where each interface's traffic and
/// protocol engines are reachable
pub fn location_config_map(
    namespace: &str,
    pod_interfaces: &BTreeMap<String, Vec<String>>,
) -> Result<ConfigMap> {
    let mut locations = Vec::new();
    for (pod, interfaces) in pod_interfaces {
        let host = format!("{}.{}.{}", engine_service_name(pod), namespace, SERVICE_DOMAIN);
        for (index, intf) in interfaces.iter().enumerate() {
            let traffic = if interfaces.len() > 1 {
                format!("{}:{};{}", host, TRAFFIC_ENGINE_PORT, index + 1)
            } else {
                format!("{}:{}", host, TRAFFIC_ENGINE_PORT)
            };
            locations.push(Location {
                location: intf.clone(),
                endpoint: format!("{}+{}:{}", traffic, host, PROTOCOL_ENGINE_PORT),
            });
        }
    }
    let yaml = serde_yaml::to_string(&LocationMap {
        location_map: locations,
    })?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_CONFIG_MAP.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(CONTROLLER_CONFIG_FILE.to_string(), yaml)])),
        ..Default::default()
    })
}

/// Controller pod; only the OTG model mounts the location map
pub fn controller_pod(
    namespace: &str,
    pod_name: &str,
    model: ControllerModel,
    containers: Vec<Container>,
    pull_secret: Option<&str>,
    config: &Config,
) -> Pod {
    let volumes = (model == ControllerModel::Otg).then(|| {
        vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(CONTROLLER_CONFIG_MAP.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(app_labels(pod_name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            volumes,
            image_pull_secrets: pull_secrets(pull_secret),
            termination_grace_period_seconds: Some(config.termination_grace_secs),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn load_balancer(namespace: &str, name: String, selector: &str, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(app_labels(selector)),
            ports: Some(ports),
            type_: Some(LOAD_BALANCER.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Services in front of the controller pod
pub fn controller_services(
    node: &IxiaTG,
    model: ControllerModel,
    controller_pod: &str,
    config: &Config,
) -> Vec<Service> {
    let namespace = node.namespace_or_default();
    match model {
        ControllerModel::Otg => {
            let name = kube::ResourceExt::name_any(node);
            node.spec
                .api_endpoint_map
                .iter()
                .map(|(endpoint, ports)| {
                    let exposed = ports.out.unwrap_or(ports.in_port);
                    load_balancer(
                        &namespace,
                        controller_service_name(endpoint, &name),
                        controller_pod,
                        vec![port(endpoint, exposed, ports.in_port)],
                    )
                })
                .collect()
        }
        ControllerModel::Legacy => {
            let [https, grpc, gnmi] = LEGACY_CONTROLLER_SERVICES;
            let https_port = config.controller_https_port;
            vec![
                load_balancer(
                    &namespace,
                    https.to_string(),
                    controller_pod,
                    vec![port("ixia-c", https_port, https_port)],
                ),
                load_balancer(
                    &namespace,
                    grpc.to_string(),
                    controller_pod,
                    vec![port("grpc", GRPC_PORT, GRPC_PORT)],
                ),
                load_balancer(
                    &namespace,
                    gnmi.to_string(),
                    controller_pod,
                    vec![port("gnmi", GNMI_PORT, GNMI_PORT)],
                ),
            ]
        }
    }
}

/// Engine pod hosting one or more interfaces
pub fn engine_pod(
    namespace: &str,
    pod_name: &str,
    init_containers: Vec<Container>,
    containers: Vec<Container>,
    pull_secret: Option<&str>,
    config: &Config,
) -> Pod {
    let mut labels = app_labels(pod_name);
    labels.insert("topo".to_string(), namespace.to_string());

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: Some(init_containers),
            containers,
            image_pull_secrets: pull_secrets(pull_secret),
            termination_grace_period_seconds: Some(config.termination_grace_secs),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing an engine pod's traffic and protocol ports
pub fn engine_service(namespace: &str, pod_name: &str) -> Service {
    load_balancer(
        namespace,
        engine_service_name(pod_name),
        pod_name,
        vec![
            port(
                &format!("port-{}", TRAFFIC_ENGINE_PORT),
                TRAFFIC_ENGINE_PORT,
                TRAFFIC_ENGINE_PORT,
            ),
            port(
                &format!("port-{}", PROTOCOL_ENGINE_PORT),
                PROTOCOL_ENGINE_PORT,
                PROTOCOL_ENGINE_PORT,
            ),
        ],
    )
}
