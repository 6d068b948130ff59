use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::io;
use std::pin::Pin;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Inbound file content, consumed chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One uploaded file: its client-side name and its content.
pub struct UploadPart {
    pub file_name: Option<String>,
    pub body: ByteStream,
}

impl UploadPart {
    pub fn new<S, E>(file_name: Option<String>, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let body = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        Self {
            file_name,
            body: body.boxed(),
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let chunk: io::Result<Bytes> = Ok(data.into());
        Self {
            file_name: Some(file_name.into()),
            body: futures::stream::iter([chunk]).boxed(),
        }
    }
}

impl std::fmt::Debug for UploadPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPart")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}
