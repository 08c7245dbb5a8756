//! Release components and their role defaults
//!
//! Every image in a release maps to a [`ComponentKind`]. The kind decides
//! which pod the image runs in and what it gets when the manifest leaves a
//! field empty.

use std::collections::BTreeMap;

use strum::Display;

use super::manifest::ImageRecord;
use crate::config::Config;

pub const GNMI_PORT: i32 = 50051;
pub const GRPC_PORT: i32 = 40051;
pub const LICENSE_PORT: i32 = 7443;
pub const TRAFFIC_ENGINE_PORT: i32 = 5555;
pub const PROTOCOL_ENGINE_PORT: i32 = 50071;

/// Prefix of image names that run as init containers of engine pods
pub const INIT_PREFIX: &str = "init-";

const CONFIG_VOLUME: &str = "config";
const CONFIG_MOUNT_PATH: &str = "/home/keysight/ixia-c/controller/config";

/// Which pod a component is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Role {
    Controller,
    Engine,
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Controller,
    Gnmi,
    Grpc,
    LicenseServer,
    TrafficEngine,
    ProtocolEngine,
    Init,
}

/// Image name to component kind; `init-*` images are matched by prefix
const KIND_TABLE: &[(&str, ComponentKind)] = &[
    ("controller", ComponentKind::Controller),
    ("gnmi-server", ComponentKind::Gnmi),
    ("grpc-server", ComponentKind::Grpc),
    ("license-server", ComponentKind::LicenseServer),
    ("traffic-engine", ComponentKind::TrafficEngine),
    ("protocol-engine", ComponentKind::ProtocolEngine),
];

impl ComponentKind {
    pub fn from_image_name(name: &str) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(image, _)| *image == name)
            .map(|(_, kind)| *kind)
            .or_else(|| name.starts_with(INIT_PREFIX).then_some(ComponentKind::Init))
    }

    pub fn role(self) -> Role {
        match self {
            Self::Controller | Self::Gnmi | Self::Grpc | Self::LicenseServer => Role::Controller,
            Self::TrafficEngine | Self::ProtocolEngine => Role::Engine,
            Self::Init => Role::Init,
        }
    }

    /// Registry key for this kind; only `init` needs the image name
    pub fn key(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Gnmi => "gnmi-server",
            Self::Grpc => "grpc-server",
            Self::LicenseServer => "license-server",
            Self::TrafficEngine => "traffic-engine",
            Self::ProtocolEngine => "protocol-engine",
            Self::Init => "init",
        }
    }

    fn defaults(self, image_name: &str, config: &Config) -> RoleDefaults {
        let https = config.controller_https_port;
        match self {
            Self::Controller => RoleDefaults {
                container_name: "ixia-c".into(),
                args: strings(&["--accept-eula", "--debug"]),
                probe_port: Some(https),
                volume: Some(ConfigVolume {
                    name: CONFIG_VOLUME.into(),
                    mount_path: CONFIG_MOUNT_PATH.into(),
                }),
                floor: ResourceFloor::fixed("10m", 25),
                ..Default::default()
            },
            Self::Gnmi => RoleDefaults {
                container_name: "gnmi".into(),
                command: vec![
                    "python3".into(),
                    "-m".into(),
                    "otg_gnmi".into(),
                    "--server-port".into(),
                    GNMI_PORT.to_string(),
                    "--app-mode".into(),
                    "athena".into(),
                    "--target-host".into(),
                    "localhost".into(),
                    "--target-port".into(),
                    https.to_string(),
                    "--insecure".into(),
                ],
                port: Some(GNMI_PORT),
                probe_port: Some(GNMI_PORT),
                floor: ResourceFloor::fixed("10m", 15),
                ..Default::default()
            },
            Self::Grpc => RoleDefaults {
                container_name: "grpc".into(),
                command: vec![
                    "python3".into(),
                    "-m".into(),
                    "grpc_server".into(),
                    "--app-mode".into(),
                    "athena".into(),
                    "--target-host".into(),
                    "localhost".into(),
                    "--target-port".into(),
                    https.to_string(),
                    "--log-stdout".into(),
                    "--log-debug".into(),
                ],
                port: Some(GRPC_PORT),
                probe_port: Some(GRPC_PORT),
                floor: ResourceFloor::fixed("10m", 15),
                ..Default::default()
            },
            Self::LicenseServer => RoleDefaults {
                container_name: "license-server".into(),
                probe_port: Some(LICENSE_PORT),
                floor: ResourceFloor::fixed("10m", 25),
                ..Default::default()
            },
            Self::TrafficEngine => RoleDefaults {
                container_name: "traffic-engine".into(),
                env: [
                    ("OPT_LISTEN_PORT", TRAFFIC_ENGINE_PORT.to_string()),
                    ("ARG_CORE_LIST", "2 3 4".to_string()),
                    ("ARG_IFACE_LIST", "virtual@af_packet,eth1".to_string()),
                    ("OPT_NO_HUGEPAGES", "Yes".to_string()),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
                probe_port: Some(TRAFFIC_ENGINE_PORT),
                floor: ResourceFloor::scaled("200m", 60, 10),
                ..Default::default()
            },
            Self::ProtocolEngine => RoleDefaults {
                container_name: "protocol-engine".into(),
                probe_port: Some(PROTOCOL_ENGINE_PORT),
                floor: ResourceFloor::scaled("200m", 350, 70),
                ..Default::default()
            },
            Self::Init => RoleDefaults {
                container_name: image_name.to_string(),
                ..Default::default()
            },
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigVolume {
    pub name: String,
    pub mount_path: String,
}

/// Minimum resource request of a role. Engine memory grows with each
/// interface the pod hosts beyond the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFloor {
    pub cpu: String,
    pub memory_mi: u32,
    pub memory_mi_per_extra_interface: u32,
}

impl ResourceFloor {
    fn fixed(cpu: &str, memory_mi: u32) -> Self {
        Self::scaled(cpu, memory_mi, 0)
    }

    fn scaled(cpu: &str, memory_mi: u32, per_interface: u32) -> Self {
        Self {
            cpu: cpu.to_string(),
            memory_mi,
            memory_mi_per_extra_interface: per_interface,
        }
    }

    pub fn memory_for(&self, interfaces: usize) -> String {
        let extra = interfaces.saturating_sub(1) as u32;
        format!(
            "{}Mi",
            self.memory_mi + extra * self.memory_mi_per_extra_interface
        )
    }
}

#[derive(Debug, Clone, Default)]
struct RoleDefaults {
    container_name: String,
    args: Vec<String>,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    port: Option<i32>,
    probe_port: Option<i32>,
    volume: Option<ConfigVolume>,
    floor: ResourceFloor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub enabled: bool,
    pub initial_delay: i32,
    pub period: i32,
    pub failure: i32,
}

/// One image of a release with its role defaults resolved
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub kind: ComponentKind,
    /// Image name as published in the manifest
    pub name: String,
    pub container_name: String,
    pub path: String,
    pub tag: String,
    pub args: Vec<String>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub default_args: Vec<String>,
    pub default_command: Vec<String>,
    pub default_env: BTreeMap<String, String>,
    pub port: Option<i32>,
    pub probe_port: Option<i32>,
    pub volume: Option<ConfigVolume>,
    pub liveness: ProbeSettings,
    pub startup_enabled: bool,
    pub floor: ResourceFloor,
    pub min_resource: BTreeMap<String, String>,
}

impl ComponentRecord {
    pub fn from_image(kind: ComponentKind, image: &ImageRecord, config: &Config) -> Self {
        let defaults = kind.defaults(&image.name, config);
        Self {
            kind,
            name: image.name.clone(),
            container_name: defaults.container_name,
            path: image.path.clone(),
            tag: image.tag.clone(),
            args: image.args.clone(),
            command: image.command.clone(),
            env: image.env.clone(),
            default_args: defaults.args,
            default_command: defaults.command,
            default_env: defaults.env,
            port: defaults.port,
            probe_port: defaults.probe_port,
            volume: defaults.volume,
            liveness: ProbeSettings {
                enabled: image.liveness_enable.unwrap_or(true),
                initial_delay: image
                    .liveness_initial_delay
                    .unwrap_or(config.liveness_initial_delay),
                period: image.liveness_period.unwrap_or(config.liveness_period),
                failure: image.liveness_failure.unwrap_or(config.liveness_failure),
            },
            startup_enabled: image.startup_enable.unwrap_or(true),
            floor: defaults.floor,
            min_resource: image.min_resource.clone(),
        }
    }

    pub fn role(&self) -> Role {
        self.kind.role()
    }

    pub fn image(&self) -> String {
        format!("{}:{}", self.path, self.tag)
    }

    /// Manifest args, else the role default
    pub fn effective_args(&self) -> &[String] {
        if self.args.is_empty() {
            &self.default_args
        } else {
            &self.args
        }
    }

    /// Manifest command, else the role default
    pub fn effective_command(&self) -> &[String] {
        if self.command.is_empty() {
            &self.default_command
        } else {
            &self.command
        }
    }

    /// Role defaults, then manifest env, then deployment overrides
    pub fn merged_env(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.default_env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Requested cpu and memory for a pod hosting `interfaces` interfaces
    pub fn resource_requests(&self, interfaces: usize) -> BTreeMap<String, String> {
        let mut requests = BTreeMap::new();
        if !self.floor.cpu.is_empty() {
            requests.insert("cpu".to_string(), self.floor.cpu.clone());
            requests.insert("memory".to_string(), self.floor.memory_for(interfaces));
        }
        for (key, value) in &self.min_resource {
            requests.insert(key.clone(), value.clone());
        }
        requests
    }
}
