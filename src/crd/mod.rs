//! IxiaTG custom resource
//!
//! One `IxiaTG` describes a traffic-generator node: which Ixia-C release to
//! run, which interfaces it owns and how far it should be brought up.

mod ixiatg;
mod types;

pub use ixiatg::{IxiaTG, IxiaTGSpec, IxiaTGStatus, FINALIZER};
pub use types::{
    ApiEndpointStatus, InitContainerSpec, InterfaceSpec, InterfaceStatus, NodeState, ServicePort,
};
