//! Wire format of published release manifests
//!
//! A manifest is a ConfigMap-shaped YAML document whose `data.versions`
//! field holds a JSON payload describing one release or a list of them.

use std::collections::BTreeMap;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// ConfigMap-shaped wrapper around the JSON payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDocument {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: ReleaseDocumentData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseDocumentData {
    #[serde(default)]
    pub versions: String,
}

/// Either a single release descriptor or a list of them
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReleasePayload {
    Many { releases: Vec<PublishedRelease> },
    One(PublishedRelease),
}

impl ReleasePayload {
    pub fn into_releases(self) -> Vec<PublishedRelease> {
        match self {
            Self::Many { releases } => releases,
            Self::One(release) => vec![release],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PublishedRelease {
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

/// One component image of a release, with optional overrides of the
/// role defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageRecord {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub liveness_enable: Option<bool>,
    #[serde(default)]
    pub liveness_initial_delay: Option<i32>,
    #[serde(default)]
    pub liveness_period: Option<i32>,
    #[serde(default)]
    pub liveness_failure: Option<i32>,
    #[serde(default)]
    pub startup_enable: Option<bool>,
    #[serde(default)]
    pub min_resource: BTreeMap<String, String>,
}

/// Accept strings, numbers and booleans as env values; anything
/// structured is a malformed manifest.
fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            serde_json::Value::Number(n) => Ok((key, n.to_string())),
            serde_json::Value::Bool(b) => Ok((key, b.to_string())),
            other => Err(de::Error::custom(format!(
                "env {} must be a scalar, got {}",
                key, other
            ))),
        })
        .collect()
}

/// Extract the JSON payload from a wrapper document.
///
/// An empty payload is not an error here; callers treat it as "nothing
/// found at this source".
pub fn payload_from_document(yaml: &str) -> Result<String> {
    let doc: ReleaseDocument =
        serde_yaml::from_str(yaml).map_err(|e| Error::manifest(e.to_string()))?;
    Ok(doc.data.versions)
}

pub fn parse_payload(json: &str) -> Result<Vec<PublishedRelease>> {
    let payload: ReleasePayload =
        serde_json::from_str(json).map_err(|e| Error::manifest(e.to_string()))?;
    Ok(payload.into_releases())
}
