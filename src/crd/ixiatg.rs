//! IxiaTG Custom Resource Definition

use std::collections::BTreeMap;
use std::str::FromStr;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ApiEndpointStatus, InitContainerSpec, InterfaceSpec, InterfaceStatus, NodeState, ServicePort,
};

/// Finalizer holding the resource until its pods and services are gone
pub const FINALIZER: &str = "keysight.com/finalizer";

/// Specification for an IxiaTG node
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "network.keysight.com",
    version = "v1beta1",
    kind = "IxiaTG",
    plural = "ixiatgs",
    status = "IxiaTGStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Release","type":"string","jsonPath":".spec.release"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct IxiaTGSpec {
    /// Ixia-C release; empty means the latest published one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,

    /// Requested lifecycle state (`INITIATED` or `DEPLOYED`)
    #[serde(default)]
    pub desired_state: String,

    /// Controller API endpoints to expose, keyed by endpoint name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub api_endpoint_map: BTreeMap<String, ServicePort>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container: Option<InitContainerSpec>,
}

/// Observed state of an IxiaTG node
///
/// `state` and `reason` are always serialized so that a merge patch clears
/// a stale reason once the node leaves `FAILED`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct IxiaTGStatus {
    #[serde(default)]
    pub state: Option<NodeState>,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceStatus>,

    #[serde(default)]
    pub api_endpoint: ApiEndpointStatus,

    /// `metadata.generation` at the time of the last status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl IxiaTGStatus {
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.state = Some(NodeState::Failed);
        self.reason = Some(reason.into());
        self
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = Some(state);
        self.reason = None;
        self
    }
}

impl IxiaTG {
    /// Parsed `spec.desired_state`, or the raw string when it names no state
    pub fn desired_state(&self) -> Result<NodeState, String> {
        NodeState::from_str(self.spec.desired_state.trim())
            .map_err(|_| self.spec.desired_state.clone())
    }

    pub fn current_state(&self) -> Option<NodeState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    pub fn status_or_default(&self) -> IxiaTGStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Namespace of the resource; cluster-scoped lookups never reach here
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// True when the spec has been edited since status was last written
    pub fn spec_changed(&self) -> bool {
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        observed != self.metadata.generation
    }

    pub fn requested_release(&self) -> &str {
        self.spec.release.trim()
    }
}
