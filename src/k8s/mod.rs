//! Kubernetes integration module for the IxiaTG operator
//!
//! This module handles all interactions with the cluster:
//! - Reading and patching IxiaTG resources
//! - Building controller and engine pods, services and config maps
//! - Replicating pull and license secrets into node namespaces

mod client;
pub mod containers;
pub mod resources;
pub mod secrets;

pub use client::{ClusterApi, K8sClient};
#[cfg(test)]
pub use client::MockClusterApi;
pub use containers::{controller_containers, engine_containers, init_containers, LicenseConfig};
pub use resources::{
    controller_pod, controller_services, engine_pod, engine_service, location_config_map,
    CONTROLLER_CONFIG_MAP,
};
pub use secrets::{reconcile_secrets, remove_replicas, SecretSync};
