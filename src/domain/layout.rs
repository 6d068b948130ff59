//! Canonical on-disk placement of record assets.
//!
//! ```text
//! <root>/<uploader_id>/<record_id>/original.<ext>
//! <root>/<uploader_id>/<record_id>/thumbnail.<ext>
//! <root>/<uploader_id>/<record_id>/segments/manifest.m3u8
//! <root>/<uploader_id>/<record_id>/segments/segment_000.ts ...
//! ```
//!
//! The layout never deletes or lists; it computes paths and creates the
//! directories that contain them.

use super::manifest::MANIFEST_FILE;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

pub const SEGMENTS_DIR: &str = "segments";

const DEFAULT_VIDEO_EXTENSION: &str = "mp4";
const DEFAULT_THUMBNAIL_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("invalid uploader id {0:?}")]
    InvalidUploaderId(String),
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which asset slot of a record to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    Original { extension: String },
    Thumbnail { extension: String },
    SegmentSet,
}

impl LayoutKind {
    /// Original upload, keeping the extension of `file_name` when it is sane.
    pub fn original(file_name: Option<&str>) -> Self {
        LayoutKind::Original {
            extension: extension_of(file_name).unwrap_or_else(|| DEFAULT_VIDEO_EXTENSION.into()),
        }
    }

    pub fn thumbnail(file_name: Option<&str>) -> Self {
        LayoutKind::Thumbnail {
            extension: extension_of(file_name)
                .unwrap_or_else(|| DEFAULT_THUMBNAIL_EXTENSION.into()),
        }
    }
}

fn uploader_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid uploader regex"))
}

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]{1,8}$").expect("valid extension regex"))
}

fn extension_of(file_name: Option<&str>) -> Option<String> {
    let ext = Path::new(file_name?).extension()?.to_str()?.to_ascii_lowercase();
    extension_pattern().is_match(&ext).then_some(ext)
}

/// A segment file name is a single plain component.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validate_uploader(&self, uploader_id: &str) -> Result<(), LayoutError> {
        if uploader_pattern().is_match(uploader_id) {
            Ok(())
        } else {
            Err(LayoutError::InvalidUploaderId(uploader_id.to_string()))
        }
    }

    /// Path of the asset relative to the storage root.
    pub fn relative(
        &self,
        uploader_id: &str,
        record_id: Uuid,
        kind: &LayoutKind,
    ) -> Result<PathBuf, LayoutError> {
        self.validate_uploader(uploader_id)?;
        let dir = PathBuf::from(uploader_id).join(record_id.to_string());
        Ok(match kind {
            LayoutKind::Original { extension } => dir.join(format!("original.{extension}")),
            LayoutKind::Thumbnail { extension } => dir.join(format!("thumbnail.{extension}")),
            LayoutKind::SegmentSet => dir.join(SEGMENTS_DIR),
        })
    }

    /// Absolute path of the asset. Pure: touches nothing on disk.
    pub fn resolve(
        &self,
        uploader_id: &str,
        record_id: Uuid,
        kind: &LayoutKind,
    ) -> Result<PathBuf, LayoutError> {
        Ok(self.root.join(self.relative(uploader_id, record_id, kind)?))
    }

    /// Resolve the asset and make sure its containing directory exists.
    ///
    /// For [`LayoutKind::SegmentSet`] the container is the record directory;
    /// the `segments` directory itself only appears when a segment set is
    /// published. Safe to call concurrently for the same path.
    pub async fn prepare(
        &self,
        uploader_id: &str,
        record_id: Uuid,
        kind: &LayoutKind,
    ) -> Result<PathBuf, LayoutError> {
        let path = self.resolve(uploader_id, record_id, kind)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LayoutError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        Ok(path)
    }

    pub fn manifest(&self, uploader_id: &str, record_id: Uuid) -> Result<PathBuf, LayoutError> {
        self.segment_file(uploader_id, record_id, MANIFEST_FILE)
    }

    /// A file inside a record's published segment set, for read-only serving.
    pub fn segment_file(
        &self,
        uploader_id: &str,
        record_id: Uuid,
        file_name: &str,
    ) -> Result<PathBuf, LayoutError> {
        if !is_plain_file_name(file_name) {
            return Err(LayoutError::InvalidFileName(file_name.to_string()));
        }
        Ok(self
            .resolve(uploader_id, record_id, &LayoutKind::SegmentSet)?
            .join(file_name))
    }

    /// Strip the storage root from an absolute path under it.
    pub fn to_relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
