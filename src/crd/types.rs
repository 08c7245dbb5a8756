//! Shared types for the IxiaTG spec and status

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a node, used both as the requested state and the
/// observed one.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Topology planned and recorded, nothing deployed yet
    Initiated,
    /// Controller and engine pods running
    Deployed,
    /// Terminal until the spec changes; see `status.reason`
    Failed,
}

/// Ports of an API endpoint exposed by the controller
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ServicePort {
    #[serde(rename = "in")]
    pub in_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<i32>,
}

/// A requested test interface
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct InterfaceSpec {
    pub name: String,
    /// Interfaces sharing a group are hosted by a single engine pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct InitContainerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<u32>,
}

/// Where a requested interface ended up
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct InterfaceStatus {
    pub pod_name: String,
    /// Interface name as requested
    pub name: String,
    /// Interface name inside the engine pod
    pub interface: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ApiEndpointStatus {
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub service_names: Vec<String>,
}
