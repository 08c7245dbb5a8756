//! Error types for the IxiaTG operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Remote release manifest could not be downloaded
    #[error("failed to fetch release manifest: {0}")]
    Fetch(String),

    /// Release manifest could not be parsed
    #[error("failed to parse release manifest: {0}")]
    Manifest(String),

    /// No registry entry could be produced for a release
    #[error("Dependency info for version {0} could not be located; ensure configmap with that version is loaded")]
    DependencyNotFound(String),

    /// A release lacks a component the topology needs
    #[error("{0}")]
    MissingComponent(String),

    /// The resource set in a namespace is not deployable
    #[error("{0}")]
    Validation(String),

    /// A managed pod or container entered a terminal failure
    #[error("{0}")]
    PodFailure(String),

    /// Object creation raced with an existing object
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn missing_component(msg: impl Into<String>) -> Self {
        Self::MissingComponent(msg.into())
    }

    pub fn pod_failure(msg: impl Into<String>) -> Self {
        Self::PodFailure(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Transient errors are retried by requeueing; everything else is
    /// surfaced on the resource status as `FAILED`.
    ///
    /// An API server rejection is only transient for conflicts, throttling
    /// and server-side failures. Transport errors never reached the server
    /// and are always retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => {
                matches!(response.code, 409 | 429) || response.code >= 500
            }
            Self::Kube(_) | Self::Fetch(_) | Self::AlreadyExists { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the operator's Error
pub type Result<T, E = Error> = std::result::Result<T, E>;
