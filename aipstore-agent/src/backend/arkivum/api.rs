//! Arkivum REST endpoints and the parts of their JSON payloads we read.

use std::path::Path;

use aipstore_common::documents::FixityFailure;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use serde::Deserialize;

/// URL builder for one appliance.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn delete(&self, path: &str) -> String {
        format!("{}/files/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Registration of a single compressed file, keyed by its path.
    pub fn file_release(&self, relative_path: &str) -> String {
        format!(
            "{}/api/2/files/release/{}",
            self.base_url,
            relative_path.trim_start_matches('/')
        )
    }

    /// Registration of an uncompressed bag.
    pub fn manifest_release(&self) -> String {
        format!("{}/api/3/ingest-manifest/release", self.base_url)
    }

    pub fn file_release_status(&self, request_id: &str) -> String {
        format!("{}/api/2/files/release/{}", self.base_url, request_id)
    }

    pub fn manifest_status(&self, request_id: &str) -> String {
        format!("{}/api/3/ingest-manifest/status/{}", self.base_url, request_id)
    }

    /// Per-file info; `path` must already be quoted.
    pub fn file_info(&self, path: &str) -> String {
        format!("{}/api/2/files/fileInfo/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// File info of the `bag-info.txt` tag file of a bag.
    pub fn bag_info(&self, location: &str, current_path: &str) -> String {
        self.file_info(&format!(
            "{}/{}/bag-info.txt",
            location.trim_matches('/'),
            current_path.trim_matches('/')
        ))
    }
}

// ── Payloads ──

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub replication_state: Option<String>,
    #[serde(default)]
    pub local: Option<bool>,
}

/// Status of a compressed package registration.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReleaseStatus {
    #[serde(default)]
    pub file_information: Option<FileInfo>,
}

/// Status of an ingest manifest (uncompressed bag).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub replication_state: Option<String>,
    #[serde(default)]
    pub local: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub failures: Option<Vec<FixityFailure>>,
    #[serde(default)]
    pub fixity_last_checked: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationState {
    Green,
    Amber,
    Red,
    Other(String),
}

impl ReplicationState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "green" => ReplicationState::Green,
            "amber" => ReplicationState::Amber,
            "red" => ReplicationState::Red,
            _ => ReplicationState::Other(raw.to_string()),
        }
    }
}

/// `replicationState` of a status payload, ignoring every other field.
/// A missing or non-string state counts as absent.
pub fn replication_state(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("replicationState")
        .and_then(|s| s.as_str())
        .map(str::to_string)
}

/// Render an identifier from a JSON payload; strings are used verbatim.
pub fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Percent-encode each segment of `path`, keeping `/` and writing spaces as `+`.
pub fn quote_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).replace("%20", "+"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Compression algorithm as the appliance expects it: the file extension,
/// dot included.
pub fn compression_algorithm(current_path: &str) -> String {
    Path::new(current_path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Re-emit an appliance timestamp as ISO-8601.
///
/// Timestamps with an offset keep it (`+00:00` for `Z`); naive timestamps
/// stay naive. Fractional seconds are printed only when non-zero.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}
