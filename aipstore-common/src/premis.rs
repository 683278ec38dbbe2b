//! PREMIS pointer file reader.
//!
//! Compressed packages carry a pointer file whose PREMIS object records the
//! checksum of the stored file. Only the fixity record is read here; the
//! caller does the file I/O and reports failures as `PremisError::Io`.

use std::path::{Path, PathBuf};

pub const PREMIS_V3_NS: &str = "http://www.loc.gov/premis/v3";
pub const PREMIS_V2_NS: &str = "info:lc/xmlns/premis-v2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremisFixity {
    pub algorithm: Option<String>,
    pub checksum: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PremisError {
    #[error("Failed to read pointer file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse pointer file {}: {source}", path.display())]
    Xml {
        path: PathBuf,
        source: roxmltree::Error,
    },
    #[error("No premis:fixity element in pointer file {}", .0.display())]
    MissingFixity(PathBuf),
}

/// Extract the first `premis:fixity` record from `xml`.
///
/// `size` is looked up inside the fixity element first and then among its
/// siblings, where PREMIS `objectCharacteristics` actually keeps it.
pub fn parse_fixity(xml: &str, path: &Path) -> Result<PremisFixity, PremisError> {
    let doc = roxmltree::Document::parse(xml).map_err(|source| PremisError::Xml {
        path: path.to_path_buf(),
        source,
    })?;

    let fixity = doc
        .descendants()
        .find(|n| is_premis(n, "fixity"))
        .ok_or_else(|| PremisError::MissingFixity(path.to_path_buf()))?;

    let size = child_text(fixity, "size")
        .or_else(|| fixity.parent_element().and_then(|p| child_text(p, "size")));

    Ok(PremisFixity {
        algorithm: child_text(fixity, "messageDigestAlgorithm"),
        checksum: child_text(fixity, "messageDigest"),
        size,
    })
}

fn child_text(parent: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    parent
        .children()
        .find(|c| is_premis(c, name))
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
}

fn is_premis(node: &roxmltree::Node<'_, '_>, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && matches!(node.tag_name().namespace(), Some(PREMIS_V3_NS) | Some(PREMIS_V2_NS))
}
