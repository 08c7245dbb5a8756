//! Release catalogue endpoints

use axum::{extract::State, response::IntoResponse};
use serde::Serialize;
use tracing::info;

use crate::api::response::{ApiResponse, IntoApiResponse, ResponseMeta};
use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct LoadedReleases {
    pub releases: Vec<String>,
    pub latest: Option<String>,
}

/// List registry contents and the latest pointer
pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.resolver.registry().summary().await;
    let total = summary.releases.len() as u64;
    ApiResponse::success_with_meta(summary, ResponseMeta { total: Some(total) })
}

/// Load a release wrapper document (YAML config map shape) into the registry
pub async fn load(State(state): State<AppState>, body: String) -> axum::response::Response {
    if body.trim().is_empty() {
        return ApiResponse::error("BAD_REQUEST", "request body is empty").into_response();
    }

    let loaded = match state.resolver.load_document(&body).await {
        Ok(releases) => {
            info!(count = releases.len(), "Release document loaded");
            Ok(LoadedReleases {
                releases,
                latest: state.resolver.registry().latest().await,
            })
        }
        Err(e) => Err(e),
    };
    loaded.into_api_response().into_response()
}
