use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ixiatg_operator::{
    api::AppState,
    config::Config,
    controller::{self, Context},
    create_router,
    k8s::{ClusterApi, K8sClient},
    release::{HttpManifestFetcher, ReleaseResolver, VersionRegistry},
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    tracing::info!("Starting IxiaTG operator");

    let config = Arc::new(Config::load()?);
    tracing::info!(namespace = %config.operator_namespace, "Configuration loaded");

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let k8s = K8sClient::new().await?;
    let client = k8s.inner().clone();
    let cluster: Arc<dyn ClusterApi> = Arc::new(k8s);

    let fetcher = Arc::new(HttpManifestFetcher::new(config.http_timeout())?);
    let resolver = ReleaseResolver::new(
        VersionRegistry::new(),
        fetcher,
        cluster.clone(),
        config.clone(),
    );

    let ctx = Arc::new(Context::new(cluster, resolver.clone(), config.clone()));
    let app = create_router(AppState::new(resolver).with_metrics(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        _ = controller::run(client, ctx) => {
            tracing::info!("Controller completed");
        }
        result = axum::serve(listener, app).into_future() => {
            result?;
            tracing::info!("HTTP server completed");
        }
    }

    Ok(())
}
