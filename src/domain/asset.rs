use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Original,
    Thumbnail,
    Manifest,
    Segment,
}

/// A physical file written for a record. The path is relative to the
/// storage root and never points at content that changes after the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub kind: AssetKind,
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the content, when computed while writing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl StoredAsset {
    pub fn new(kind: AssetKind, path: PathBuf, size: u64) -> Self {
        Self {
            kind,
            path,
            size,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }
}
