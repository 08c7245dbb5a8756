//! IxiaTG operator library
//!
//! Reconciles `IxiaTG` resources into Ixia-C controller and engine pods,
//! backed by a cache of published Ixia-C releases.

pub mod api;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod k8s;
pub mod release;

pub use error::{Error, Result};

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::api::AppState;

/// Create the operator's HTTP router with the given state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/metrics", get(api::metrics::metrics_handler))
        .route(
            "/api/releases",
            get(api::releases::list).post(api::releases::load),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
