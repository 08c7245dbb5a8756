//! Operator HTTP surface: health, metrics and release catalogue

pub mod health;
pub mod metrics;
pub mod releases;
pub mod response;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::release::ReleaseResolver;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub resolver: ReleaseResolver,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(resolver: ReleaseResolver) -> Self {
        Self {
            resolver,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
