//! Atomic blob writes on the local filesystem.

use crate::domain::upload::BoxError;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

#[derive(Debug, Error)]
pub enum BlobWriteError {
    #[error("destination {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("destination {0} has no parent directory")]
    NoParent(PathBuf),
    #[error("upload stream failed: {0}")]
    Stream(#[source] io::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BlobWriteError {
    let path = path.to_path_buf();
    move |source| BlobWriteError::Io { path, source }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlob {
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the written content.
    pub sha256: String,
}

/// Streams content into a temp file next to the destination and renames it
/// into place once complete, so readers see either nothing or the whole blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobWriter;

impl BlobWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write `stream` to `dest`. The destination directory must exist and
    /// `dest` itself must not.
    ///
    /// On error, or if the returned future is dropped before completion, the
    /// temp file is removed and `dest` stays absent.
    pub async fn write<S, E>(&self, stream: S, dest: &Path) -> Result<WrittenBlob, BlobWriteError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let parent = dest
            .parent()
            .ok_or_else(|| BlobWriteError::NoParent(dest.to_path_buf()))?;
        if tokio::fs::try_exists(dest).await.map_err(io_error(dest))? {
            return Err(BlobWriteError::AlreadyExists(dest.to_path_buf()));
        }

        // The temp path removes the file when dropped, which also covers a
        // cancelled write.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".blob-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(io_error(parent))?
            .into_parts();

        let stream = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        futures::pin_mut!(stream);

        let mut writer = BufWriter::new(File::from_std(file));
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        while let Some(chunk) = stream.try_next().await.map_err(BlobWriteError::Stream)? {
            hasher.update(&chunk);
            size += chunk.len() as u64;
            writer.write_all(&chunk).await.map_err(io_error(&temp_path))?;
        }

        writer.flush().await.map_err(io_error(&temp_path))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(io_error(&temp_path))?;

        let target = dest.to_path_buf();
        tokio::task::spawn_blocking(move || temp_path.persist_noclobber(&target))
            .await
            .map_err(|join| io_error(dest)(io::Error::new(io::ErrorKind::Other, join)))?
            .map_err(|persist| match persist.error.kind() {
                io::ErrorKind::AlreadyExists => BlobWriteError::AlreadyExists(dest.to_path_buf()),
                _ => io_error(dest)(persist.error),
            })?;

        debug!(path = %dest.display(), size, "blob written");

        Ok(WrittenBlob {
            path: dest.to_path_buf(),
            size,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}
