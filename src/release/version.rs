//! Release tag comparison and the capability flags derived from it

use semver::Version;
use tracing::warn;

/// Drop leading zeros from an all-digit identifier
fn strip_zeros(part: &str) -> &str {
    if part.len() > 1 && part.bytes().all(|b| b.is_ascii_digit()) {
        match part.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        }
    } else {
        part
    }
}

/// Parse an image tag as a semantic version.
///
/// Tags are published loosely (`v1.7`, `0.0.1-2727`, `1.00.0.252`), so a
/// leading `v` is dropped, numeric parts lose their leading zeros, a
/// missing minor or patch component is treated as zero and segments past
/// the patch are kept as build metadata.
pub fn parse_tag(tag: &str) -> Option<Version> {
    let tag = tag.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    let (tag, build) = match tag.split_once('+') {
        Some((tag, build)) => (tag, Some(build)),
        None => (tag, None),
    };
    let (core, pre) = match tag.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (tag, None),
    };
    if core.is_empty() {
        return None;
    }

    let mut parts: Vec<&str> = core.split('.').map(strip_zeros).collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    let extra = parts.split_off(3);

    let mut normalized = parts.join(".");
    if let Some(pre) = pre {
        let pre: Vec<&str> = pre.split('.').map(strip_zeros).collect();
        normalized.push('-');
        normalized.push_str(&pre.join("."));
    }
    let build: Vec<&str> = extra
        .into_iter()
        .chain(build.into_iter().flat_map(|b| b.split('.')))
        .collect();
    if !build.is_empty() {
        normalized.push('+');
        normalized.push_str(&build.join("."));
    }
    Version::parse(&normalized).ok()
}

/// `tag >= base`. An unparseable side never counts as later.
pub fn is_at_least(tag: &str, base: &str) -> bool {
    match (parse_tag(tag), parse_tag(base)) {
        (Some(tag_version), Some(base_version)) => tag_version >= base_version,
        _ => {
            warn!(tag, base, "Could not compare release tags, assuming older");
            false
        }
    }
}

/// Which controller generation a release ships
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerModel {
    /// Multiple interfaces and groups per node, one controller per node
    Otg,
    /// One interface per node, a single shared `ixia-c` controller
    Legacy,
}

/// Flags computed once per release from its component tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `None` when the release has no controller component
    pub model: Option<ControllerModel>,
    /// gRPC is served by the controller itself; no `grpc-server` sidecar
    pub grpc_merged: bool,
    /// gNMI server takes the `-http-server` argument shape
    pub gnmi_http_args: bool,
}
