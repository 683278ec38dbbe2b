use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Key under which the appliance's request identifier is kept in
/// `Package::misc_attributes`.
pub const ARKIVUM_IDENTIFIER: &str = "arkivum_identifier";

// ── Package ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub uuid: String,
    /// Path of the package relative to its location.
    pub current_path: String,
    /// Path of the package's location relative to the space root.
    pub location: String,
    pub shape: PackageShape,
    pub status: PackageStatus,
    #[serde(default)]
    pub misc_attributes: serde_json::Map<String, serde_json::Value>,
}

/// Physical layout of a package. Each shape talks to its own family of
/// appliance endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PackageShape {
    /// Single compressed file, described by a PREMIS pointer file.
    Compressed { pointer_file: PathBuf },
    /// BagIt directory tree.
    Uncompressed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageStatus {
    Pending,
    Staging,
    Uploaded,
    Verified,
    DelReq,
    Deleted,
    RecoverReq,
    Moving,
    Fail,
    Finalized,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageStatus::Pending => "PENDING",
            PackageStatus::Staging => "STAGING",
            PackageStatus::Uploaded => "UPLOADED",
            PackageStatus::Verified => "VERIFIED",
            PackageStatus::DelReq => "DEL_REQ",
            PackageStatus::Deleted => "DELETED",
            PackageStatus::RecoverReq => "RECOVER_REQ",
            PackageStatus::Moving => "MOVING",
            PackageStatus::Fail => "FAIL",
            PackageStatus::Finalized => "FINALIZED",
        };
        f.write_str(s)
    }
}

impl Package {
    pub fn is_compressed(&self) -> bool {
        matches!(self.shape, PackageShape::Compressed { .. })
    }

    /// Absolute path of the package given the root of the space holding it.
    pub fn full_path(&self, space_root: &Path) -> PathBuf {
        space_root
            .join(self.location.trim_start_matches('/'))
            .join(self.current_path.trim_start_matches('/'))
    }

    pub fn arkivum_identifier(&self) -> Option<String> {
        match self.misc_attributes.get(ARKIVUM_IDENTIFIER)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn set_arkivum_identifier(&mut self, id: impl Into<String>) {
        self.misc_attributes.insert(
            ARKIVUM_IDENTIFIER.to_string(),
            serde_json::Value::String(id.into()),
        );
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.uuid, self.current_path)
    }
}

// ── Status and fixity results ──

/// Outcome of a replication status poll.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusUpdate {
    /// `None` when the appliance could not be queried.
    pub status: Option<PackageStatus>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixityFailure {
    pub reason: String,
    #[serde(default)]
    pub filepath: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FixityReport {
    /// `None` when no verdict is available yet (check scheduled or running).
    pub success: Option<bool>,
    pub errors: Vec<FixityFailure>,
    /// Empty for successful scans.
    pub message: String,
    /// ISO-8601 time of the last fixity check.
    pub timestamp: Option<String>,
}

impl FixityReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            errors: Vec::new(),
            message: message.into(),
            timestamp: None,
        }
    }
}

// ── Browse ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrowseListing {
    pub directories: Vec<String>,
    pub entries: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}
