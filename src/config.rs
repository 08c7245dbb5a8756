use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Operator settings, read from the environment (and `.env`) at startup.
///
/// Everything that changes between Ixia-C releases lives here rather than
/// in code: threshold versions, ports and download locations.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_operator_namespace")]
    pub operator_namespace: String,

    #[serde(default = "default_release_config_map")]
    pub release_config_map: String,

    #[serde(default = "default_pull_secret_name")]
    pub pull_secret_name: String,

    #[serde(default = "default_license_secret_name")]
    pub license_secret_name: String,

    #[serde(default = "default_release_server_url")]
    pub release_server_url: String,

    #[serde(default = "default_release_latest_url")]
    pub release_latest_url: String,

    #[serde(default = "default_release_file")]
    pub release_file: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_requeue_secs")]
    pub requeue_secs: u64,

    #[serde(default = "default_termination_grace_secs")]
    pub termination_grace_secs: i64,

    #[serde(default = "default_controller_https_port")]
    pub controller_https_port: i32,

    #[serde(default = "default_otg_base_version")]
    pub otg_base_version: String,

    #[serde(default = "default_grpc_merged_version")]
    pub grpc_merged_version: String,

    #[serde(default = "default_gnmi_new_base_version")]
    pub gnmi_new_base_version: String,

    #[serde(default = "default_liveness_initial_delay")]
    pub liveness_initial_delay: i32,

    #[serde(default = "default_liveness_period")]
    pub liveness_period: i32,

    #[serde(default = "default_liveness_failure")]
    pub liveness_failure: i32,

    #[serde(default = "default_init_image")]
    pub default_init_image: String,
}

fn default_port() -> u16 {
    8080
}

fn default_operator_namespace() -> String {
    "ixiatg-op-system".to_string()
}

fn default_release_config_map() -> String {
    "ixiatg-release-config".to_string()
}

fn default_pull_secret_name() -> String {
    "ixia-pull-secret".to_string()
}

fn default_license_secret_name() -> String {
    "license-server".to_string()
}

fn default_release_server_url() -> String {
    "https://github.com/open-traffic-generator/ixia-c/releases/download/v".to_string()
}

fn default_release_latest_url() -> String {
    "https://github.com/open-traffic-generator/ixia-c/releases/latest/download".to_string()
}

fn default_release_file() -> String {
    "/ixia-configmap.yaml".to_string()
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_requeue_secs() -> u64 {
    1
}

fn default_termination_grace_secs() -> i64 {
    5
}

fn default_controller_https_port() -> i32 {
    8443
}

fn default_otg_base_version() -> String {
    "0.0.1-2727".to_string()
}

fn default_grpc_merged_version() -> String {
    "0.0.1-3114".to_string()
}

fn default_gnmi_new_base_version() -> String {
    "1.7.9".to_string()
}

fn default_liveness_initial_delay() -> i32 {
    1
}

fn default_liveness_period() -> i32 {
    10
}

fn default_liveness_failure() -> i32 {
    6
}

fn default_init_image() -> String {
    "networkop/init-wait:latest".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let settings: Config = config.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid operator configuration, using defaults");
            Config::default()
        });

        Ok(settings)
    }

    /// Download location of the manifest for a release; `latest` maps to
    /// the floating "latest release" location.
    pub fn release_url(&self, version: &str) -> String {
        if version == crate::release::LATEST {
            format!("{}{}", self.release_latest_url, self.release_file)
        } else {
            format!("{}{}{}", self.release_server_url, version, self.release_file)
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            operator_namespace: default_operator_namespace(),
            release_config_map: default_release_config_map(),
            pull_secret_name: default_pull_secret_name(),
            license_secret_name: default_license_secret_name(),
            release_server_url: default_release_server_url(),
            release_latest_url: default_release_latest_url(),
            release_file: default_release_file(),
            http_timeout_secs: default_http_timeout_secs(),
            requeue_secs: default_requeue_secs(),
            termination_grace_secs: default_termination_grace_secs(),
            controller_https_port: default_controller_https_port(),
            otg_base_version: default_otg_base_version(),
            grpc_merged_version: default_grpc_merged_version(),
            gnmi_new_base_version: default_gnmi_new_base_version(),
            liveness_initial_delay: default_liveness_initial_delay(),
            liveness_period: default_liveness_period(),
            liveness_failure: default_liveness_failure(),
            default_init_image: default_init_image(),
        }
    }
}
