//! Ixia-C release catalogue
//!
//! Published releases describe the container images of each Ixia-C
//! component. This module downloads those descriptions, caches them in a
//! [`VersionRegistry`] and exposes per-component records with their role
//! defaults applied.

pub mod component;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod version;

pub use component::{ComponentKind, ComponentRecord, Role};
pub use registry::{Provenance, RegistryEntry, RegistrySummary, VersionRegistry};
pub use resolver::{
    HttpManifestFetcher, LocalFallback, ManifestFetcher, ReleaseResolver, ResolvedRelease,
};
pub use version::{Capabilities, ControllerModel};

/// Release alias for the most recent published release
pub const LATEST: &str = "latest";
