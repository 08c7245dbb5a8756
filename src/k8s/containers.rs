//! Container builders for controller and engine pods
//!
//! Deterministic given a registry entry and the node spec: the same inputs
//! always produce the same containers in the same order.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Probe, ResourceRequirements, SecurityContext,
    TCPSocketAction, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use crate::config::Config;
use crate::crd::IxiaTG;
use crate::error::{Error, Result};
use crate::release::manifest::ImageRecord;
use crate::release::{ComponentKind, ComponentRecord, ControllerModel, RegistryEntry};

const PULL_POLICY: &str = "IfNotPresent";
const LICENSE_ENV: &str = "LICENSE_SERVERS";
const DEFAULT_INIT_CONTAINER: &str = "init-container";
const DEFAULT_INIT_SLEEP: u32 = 10;

const STARTUP_PERIOD: i32 = 3;
const STARTUP_FAILURE: i32 = 20;

/// License server settings read from the operator namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseConfig {
    /// Externally reachable license servers
    pub address: Option<String>,
    /// Image of a license server to run next to the controller
    pub image: Option<String>,
}

fn env_vars(env: BTreeMap<String, String>) -> Option<Vec<EnvVar>> {
    if env.is_empty() {
        return None;
    }
    Some(
        env.into_iter()
            .map(|(name, value)| EnvVar {
                name,
                value: Some(value),
                ..Default::default()
            })
            .collect(),
    )
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn tcp_probe(port: i32, initial_delay: i32, period: i32, failure: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        failure_threshold: Some(failure),
        ..Default::default()
    }
}

fn resources(component: &ComponentRecord, interfaces: usize) -> Option<ResourceRequirements> {
    let requests: BTreeMap<String, Quantity> = component
        .resource_requests(interfaces)
        .into_iter()
        .map(|(k, v)| (k, Quantity(v)))
        .collect();
    (!requests.is_empty()).then(|| ResourceRequirements {
        requests: Some(requests),
        ..Default::default()
    })
}

/// Build the container for one component.
///
/// `overrides` is the top env layer; `interfaces` drives the engine
/// resource floor.
fn container(
    component: &ComponentRecord,
    name: String,
    overrides: &BTreeMap<String, String>,
    interfaces: usize,
    mount_config: bool,
) -> Container {
    let liveness = &component.liveness;
    let liveness_probe = component
        .probe_port
        .filter(|_| liveness.enabled)
        .map(|port| {
            let mut probe = tcp_probe(port, liveness.initial_delay, liveness.period, liveness.failure);
            probe.termination_grace_period_seconds = Some(1);
            probe
        });
    let startup_probe = component
        .probe_port
        .filter(|_| component.startup_enabled)
        .map(|port| tcp_probe(port, 0, STARTUP_PERIOD, STARTUP_FAILURE));

    let volume_mounts = component
        .volume
        .as_ref()
        .filter(|_| mount_config)
        .map(|volume| {
            vec![VolumeMount {
                name: volume.name.clone(),
                mount_path: volume.mount_path.clone(),
                read_only: Some(true),
                ..Default::default()
            }]
        });

    Container {
        name,
        image: Some(component.image()),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        args: non_empty(component.effective_args()),
        command: non_empty(component.effective_command()),
        env: env_vars(component.merged_env(overrides)),
        ports: component.port.map(|port| {
            vec![ContainerPort {
                name: Some(component.container_name.clone()),
                container_port: port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]
        }),
        volume_mounts,
        liveness_probe,
        startup_probe,
        resources: resources(component, interfaces),
        ..Default::default()
    }
}

/// Containers of the controller pod
pub fn controller_containers(
    entry: &RegistryEntry,
    model: ControllerModel,
    license: &LicenseConfig,
    config: &Config,
) -> Result<Vec<Container>> {
    let mut required = vec![ComponentKind::Controller, ComponentKind::Gnmi];
    if !entry.capabilities.grpc_merged {
        required.push(ComponentKind::Grpc);
    }
    if required
        .iter()
        .any(|kind| entry.controller_component(*kind).is_none())
    {
        let expected = if entry.capabilities.grpc_merged {
            "Controller and gNMI"
        } else {
            "Controller, gNMI and gRPC"
        };
        return Err(Error::missing_component(format!(
            "Failed to find required container entries; expect {} entries to be present in configmap for release {}",
            expected, entry.release
        )));
    }

    let mount_config = model == ControllerModel::Otg;
    let mut controller_env = BTreeMap::new();
    let mut license_container = None;

    let manifest_address = entry
        .controller_component(ComponentKind::Controller)
        .and_then(|c| c.env.get(LICENSE_ENV).cloned());
    match license.address.clone().or(manifest_address) {
        Some(address) => {
            controller_env.insert(LICENSE_ENV.to_string(), address);
        }
        None => {
            let component = license_component(entry, license.image.as_deref(), config);
            if let Some(component) = component {
                controller_env.insert(LICENSE_ENV.to_string(), "localhost".to_string());
                license_container = Some(container(
                    &component,
                    component.container_name.clone(),
                    &BTreeMap::new(),
                    1,
                    false,
                ));
            }
        }
    }

    let mut containers = Vec::new();
    for component in entry.controller.values() {
        if component.kind == ComponentKind::LicenseServer {
            continue;
        }
        let overrides = if component.kind == ComponentKind::Controller {
            controller_env.clone()
        } else {
            BTreeMap::new()
        };
        debug!(
            container = %component.container_name,
            image = %component.image(),
            release = %entry.release,
            "Adding controller container"
        );
        containers.push(container(
            component,
            component.container_name.clone(),
            &overrides,
            1,
            mount_config,
        ));
    }
    containers.extend(license_container);
    Ok(containers)
}

/// License server component to run in the controller pod; an image from
/// the license secret replaces whatever the release publishes.
fn license_component(
    entry: &RegistryEntry,
    image_override: Option<&str>,
    config: &Config,
) -> Option<ComponentRecord> {
    let published = entry.controller_component(ComponentKind::LicenseServer);
    match (image_override, published) {
        (Some(image), published) => {
            let (path, tag) = split_image(image);
            let mut component = published.cloned().unwrap_or_else(|| {
                ComponentRecord::from_image(
                    ComponentKind::LicenseServer,
                    &ImageRecord {
                        name: "license-server".to_string(),
                        ..Default::default()
                    },
                    config,
                )
            });
            component.path = path;
            component.tag = tag;
            Some(component)
        }
        (None, Some(published)) => Some(published.clone()),
        (None, None) => None,
    }
}

/// Split `repo/name:tag` into path and tag; a port in the registry host
/// is not mistaken for a tag.
fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((path, tag)) if !tag.contains('/') => (path.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// Engine containers of one engine pod
pub fn engine_containers(
    entry: &RegistryEntry,
    pod_name: &str,
    interfaces: &[String],
) -> Result<Vec<Container>> {
    let engines: Vec<&ComponentRecord> = [ComponentKind::TrafficEngine, ComponentKind::ProtocolEngine]
        .into_iter()
        .filter_map(|kind| entry.engine_component(kind))
        .collect();
    if engines.is_empty() {
        return Err(Error::missing_component(format!(
            "Failed to find traffic or protocol engine entries in configmap for release {}",
            entry.release
        )));
    }

    let iface_list = interfaces
        .iter()
        .map(|intf| format!("virtual@af_packet,{}", intf))
        .collect::<Vec<_>>()
        .join(" ");

    Ok(engines
        .into_iter()
        .map(|component| {
            let overrides = match component.kind {
                ComponentKind::ProtocolEngine => {
                    BTreeMap::from([("INTF_LIST".to_string(), interfaces.join(","))])
                }
                _ => BTreeMap::from([("ARG_IFACE_LIST".to_string(), iface_list.clone())]),
            };
            let mut c = container(
                component,
                format!("{}-{}", pod_name, component.container_name),
                &overrides,
                interfaces.len(),
                false,
            );
            c.security_context = Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            });
            c
        })
        .collect())
}

/// Init containers of one engine pod.
///
/// The node's own init image wins over release-published init images,
/// which win over the operator default.
pub fn init_containers(
    entry: &RegistryEntry,
    node: &IxiaTG,
    interface_count: usize,
    config: &Config,
) -> Vec<Container> {
    let wait_for = (interface_count + 1).to_string();
    let spec_override = node
        .spec
        .init_container
        .as_ref()
        .and_then(|init| init.image.as_ref().map(|image| (image.clone(), init.sleep)));

    let default_container = |image: String, sleep: u32| Container {
        name: DEFAULT_INIT_CONTAINER.to_string(),
        image: Some(image),
        image_pull_policy: Some(PULL_POLICY.to_string()),
        args: Some(vec![wait_for.clone(), sleep.to_string()]),
        ..Default::default()
    };

    if let Some((image, sleep)) = spec_override {
        let sleep = sleep.filter(|s| *s > 0).unwrap_or(DEFAULT_INIT_SLEEP);
        return vec![default_container(image, sleep)];
    }

    let published: Vec<Container> = entry
        .init_components()
        .into_iter()
        .map(|component| {
            let mut c = container(
                component,
                component.container_name.clone(),
                &BTreeMap::new(),
                interface_count,
                false,
            );
            if c.args.is_none() {
                c.args = Some(vec![wait_for.clone(), DEFAULT_INIT_SLEEP.to_string()]);
            }
            c
        })
        .collect();
    if !published.is_empty() {
        return published;
    }

    vec![default_container(
        config.default_init_image.clone(),
        DEFAULT_INIT_SLEEP,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{IxiaTGSpec, InitContainerSpec};
    use crate::release::manifest::PublishedRelease;
    use crate::release::Provenance;

    fn image(name: &str, tag: &str) -> ImageRecord {
        ImageRecord {
            name: name.to_string(),
            path: format!("ghcr.io/open-traffic-generator/{}", name),
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    fn entry(images: Vec<ImageRecord>) -> RegistryEntry {
        RegistryEntry::build(
            &PublishedRelease {
                release: "0.0.1-3400".to_string(),
                images,
            },
            Provenance::Remote,
            &Config::default(),
        )
    }

    fn modern_entry() -> RegistryEntry {
        entry(vec![
            image("controller", "0.0.1-3400"),
            image("gnmi-server", "1.8.0"),
            image("traffic-engine", "1.6.0.19"),
            image("protocol-engine", "1.00.0.252"),
        ])
    }

    fn env_of(c: &Container) -> BTreeMap<String, String> {
        c.env
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_controller_containers_modern() {
        let config = Config::default();
        let containers = controller_containers(
            &modern_entry(),
            ControllerModel::Otg,
            &LicenseConfig::default(),
            &config,
        )
        .unwrap();
        let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["ixia-c", "gnmi"]);

        let ctrl = &containers[0];
        assert_eq!(
            ctrl.args.as_deref().unwrap(),
            ["--accept-eula", "--debug", "--grpc-port", "40051"]
        );
        let mounts = ctrl.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/home/keysight/ixia-c/controller/config");
        let probe = ctrl.liveness_probe.as_ref().unwrap();
        assert_eq!(probe.tcp_socket.as_ref().unwrap().port, IntOrString::Int(8443));
        assert_eq!(probe.period_seconds, Some(10));
        assert_eq!(probe.failure_threshold, Some(6));
        let startup = ctrl.startup_probe.as_ref().unwrap();
        assert_eq!(startup.period_seconds, Some(3));
        assert_eq!(startup.failure_threshold, Some(20));

        let gnmi = &containers[1];
        assert!(gnmi.command.is_none());
        assert_eq!(gnmi.args.as_deref().unwrap()[0], "-http-server");
        assert_eq!(gnmi.ports.as_ref().unwrap()[0].container_port, 50051);
        let requests = gnmi.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["memory"], Quantity("15Mi".to_string()));
    }

    #[test]
    fn test_legacy_controller_has_no_mount() {
        let config = Config::default();
        let legacy = entry(vec![
            image("controller", "0.0.1-2000"),
            image("gnmi-server", "0.7.0"),
            image("grpc-server", "0.7.0"),
        ]);
        let containers = controller_containers(
            &legacy,
            ControllerModel::Legacy,
            &LicenseConfig::default(),
            &config,
        )
        .unwrap();
        assert_eq!(containers.len(), 3);
        assert!(containers.iter().all(|c| c.volume_mounts.is_none()));
        assert_eq!(containers[1].command.as_ref().unwrap()[2], "otg_gnmi");
    }

    #[test]
    fn test_missing_controller_components() {
        let config = Config::default();
        let partial = entry(vec![image("controller", "0.0.1-2000"), image("gnmi-server", "0.7.0")]);
        let err = controller_containers(
            &partial,
            ControllerModel::Legacy,
            &LicenseConfig::default(),
            &config,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to find required container entries; expect Controller, gNMI and gRPC entries to be present in configmap for release 0.0.1-3400"
        );
    }

    #[test]
    fn test_license_address_from_secret() {
        let config = Config::default();
        let mut images = vec![
            image("controller", "0.0.1-3400"),
            image("gnmi-server", "1.8.0"),
            image("license-server", "1.0.0"),
        ];
        images[0].env.insert("LICENSE_SERVERS".into(), "manifest-host".into());
        let license = LicenseConfig {
            address: Some("10.0.0.5".to_string()),
            image: None,
        };
        let containers =
            controller_containers(&entry(images), ControllerModel::Otg, &license, &config).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(env_of(&containers[0])["LICENSE_SERVERS"], "10.0.0.5");
    }

    #[test]
    fn test_license_container_from_secret_image() {
        let config = Config::default();
        let license = LicenseConfig {
            address: None,
            image: Some("registry.local:5000/license-server:2.1".to_string()),
        };
        let containers =
            controller_containers(&modern_entry(), ControllerModel::Otg, &license, &config).unwrap();
        let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["ixia-c", "gnmi", "license-server"]);
        assert_eq!(
            containers[2].image.as_deref(),
            Some("registry.local:5000/license-server:2.1")
        );
        assert_eq!(env_of(&containers[0])["LICENSE_SERVERS"], "localhost");
    }

    #[test]
    fn test_engine_containers() {
        let containers = engine_containers(
            &modern_entry(),
            "otg-port-group-lag",
            &["eth1".to_string(), "eth2".to_string()],
        )
        .unwrap();
        assert_eq!(containers.len(), 2);

        let te = &containers[0];
        assert_eq!(te.name, "otg-port-group-lag-traffic-engine");
        assert_eq!(
            env_of(te)["ARG_IFACE_LIST"],
            "virtual@af_packet,eth1 virtual@af_packet,eth2"
        );
        assert_eq!(env_of(te)["OPT_NO_HUGEPAGES"], "Yes");
        assert_eq!(te.security_context.as_ref().unwrap().privileged, Some(true));

        let pe = &containers[1];
        assert_eq!(pe.name, "otg-port-group-lag-protocol-engine");
        assert_eq!(env_of(pe)["INTF_LIST"], "eth1,eth2");
        let requests = pe.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["memory"], Quantity("420Mi".to_string()));
        assert_eq!(
            pe.liveness_probe.as_ref().unwrap().tcp_socket.as_ref().unwrap().port,
            IntOrString::Int(50071)
        );
    }

    #[test]
    fn test_disabled_liveness() {
        let mut images = vec![image("traffic-engine", "1.6.0.19")];
        images[0].liveness_enable = Some(false);
        let containers = engine_containers(&entry(images), "otg-port-eth1", &["eth1".to_string()]).unwrap();
        assert!(containers[0].liveness_probe.is_none());
        assert!(containers[0].startup_probe.is_some());
    }

    #[test]
    fn test_init_container_precedence() {
        let config = Config::default();
        let mut node = IxiaTG::new("otg", IxiaTGSpec::default());

        let defaults = init_containers(&modern_entry(), &node, 2, &config);
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].image.as_deref(), Some("networkop/init-wait:latest"));
        assert_eq!(defaults[0].args.as_deref().unwrap(), ["3", "10"]);

        let with_init = entry(vec![image("init-wait", "v2")]);
        let published = init_containers(&with_init, &node, 1, &config);
        assert_eq!(published[0].name, "init-wait");
        assert_eq!(published[0].args.as_deref().unwrap(), ["2", "10"]);

        node.spec.init_container = Some(InitContainerSpec {
            image: Some("busybox:1.36".to_string()),
            sleep: Some(30),
        });
        let custom = init_containers(&with_init, &node, 1, &config);
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].name, "init-container");
        assert_eq!(custom[0].image.as_deref(), Some("busybox:1.36"));
        assert_eq!(custom[0].args.as_deref().unwrap(), ["2", "30"]);
    }

    #[test]
    fn test_split_image() {
        assert_eq!(
            split_image("ghcr.io/org/license:1.2"),
            ("ghcr.io/org/license".to_string(), "1.2".to_string())
        );
        assert_eq!(
            split_image("localhost:5000/license"),
            ("localhost:5000/license".to_string(), "latest".to_string())
        );
    }
}
