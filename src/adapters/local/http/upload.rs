use super::{ingestion_error, ApiError, AppState};
use crate::application::orchestrator::IngestRequest;
use crate::domain::record::VideoRecord;
use crate::domain::upload::{BoxError, UploadPart};
use crate::ports::repository::RecordStore;
use crate::ports::transform::Transform;
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use futures::{Stream, StreamExt, TryStreamExt};
use std::io;
use std::path::Path;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Multipart upload: `uploaderId`, `title`, `description`, `thumbnailFile`
/// and `videoFile`. Answers `202 Accepted` with the pending record.
pub async fn upload<S, T>(
    State(state): State<AppState<S, T>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<VideoRecord>), ApiError>
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "uploaderId" => form.uploader_id = Some(field.text().await.map_err(bad_request)?),
            "title" => form.title = Some(field.text().await.map_err(bad_request)?),
            "description" => form.description = Some(field.text().await.map_err(bad_request)?),
            "thumbnailFile" | "videoFile" => {
                let file_name = field.file_name().map(str::to_owned);
                let spooled = spool(&state.spool_dir, field).await?;
                debug!(field = %name, path = %spooled.display(), "spooled upload field");
                let part = spooled_part(spooled, file_name)
                    .await
                    .map_err(internal_error)?;
                if name == "thumbnailFile" {
                    form.thumbnail = Some(part);
                } else {
                    form.video = Some(part);
                }
            }
            _ => debug!(field = %name, "ignoring unknown form field"),
        }
    }

    let request = form.into_request()?;
    let record = state.pool.submit(request).await.map_err(ingestion_error)?;
    info!(record_id = %record.id, "upload queued");
    Ok((StatusCode::ACCEPTED, Json(record)))
}

#[derive(Debug, Default)]
struct UploadForm {
    uploader_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    thumbnail: Option<UploadPart>,
    video: Option<UploadPart>,
}

impl UploadForm {
    fn into_request(self) -> Result<IngestRequest, ApiError> {
        fn required<V>(value: Option<V>, field: &str) -> Result<V, ApiError> {
            value.ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing form field {field}")))
        }

        Ok(IngestRequest {
            uploader_id: required(self.uploader_id, "uploaderId")?,
            title: required(self.title, "title")?,
            description: self.description,
            thumbnail: required(self.thumbnail, "thumbnailFile")?,
            video: required(self.video, "videoFile")?,
        })
    }
}

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Buffer one file field into a temp file under `dir`. The file is removed
/// when the returned path is dropped.
async fn spool<S, E>(dir: &Path, stream: S) -> Result<TempPath, ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let path = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)
        .map_err(internal_error)?
        .into_temp_path();
    stream_to_file(&path, stream).await?;
    Ok(path)
}

// Save a `Stream` to a file. A broken request body is the client's fault;
// failing to write the spool file is ours.
async fn stream_to_file<S, E>(path: &Path, stream: S) -> Result<(), ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    futures::pin_mut!(stream);
    let mut file = BufWriter::new(File::create(path).await.map_err(internal_error)?);

    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|err| bad_request(Into::<BoxError>::into(err)))?
    {
        file.write_all(&chunk).await.map_err(internal_error)?;
    }
    file.flush().await.map_err(internal_error)?;
    Ok(())
}

/// Re-read a spooled file as an upload stream. The spool file lives as long
/// as the stream does.
async fn spooled_part(path: TempPath, file_name: Option<String>) -> io::Result<UploadPart> {
    let file = File::open(&path).await?;
    let body = ReaderStream::new(file).map(move |chunk| {
        let _spool = &path;
        chunk
    });
    Ok(UploadPart::new(file_name, body))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{multipart_body, upload_request, TestApp};
    use super::*;
    use crate::domain::record::Lifecycle;
    use crate::testing::{FakeOutcome, FakeTransform};
    use futures::stream;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    type E = std::io::Error;

    #[tokio::test]
    async fn test_stream_to_file() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test_file.txt");

        let test_data = "Hello, world!";
        let mock_stream = stream::iter(vec![Ok::<bytes::Bytes, E>(Bytes::from(test_data))]);

        let result = stream_to_file(&file_path, mock_stream).await;

        assert!(result.is_ok());
        assert_eq!(fs::read_to_string(file_path).unwrap(), test_data);
    }

    #[tokio::test]
    async fn test_stream_to_file_error() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test_file.txt");

        let mock_stream = stream::iter(vec![Err("Test error")]);

        let result = stream_to_file(&file_path, mock_stream).await;

        assert_eq!(
            result.unwrap_err(),
            (StatusCode::BAD_REQUEST, "Test error".to_string())
        );
    }

    #[tokio::test]
    async fn test_stream_to_file_local_failure_is_server_error() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("missing").join("test_file.txt");

        let mock_stream = stream::iter(vec![Ok::<Bytes, E>(Bytes::from_static(b"data"))]);

        let (status, _) = stream_to_file(&file_path, mock_stream).await.unwrap_err();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_spool_file_lives_as_long_as_the_stream() {
        let temp_dir = tempdir().unwrap();
        let data = vec![Ok::<Bytes, E>(Bytes::from_static(b"spooled"))];
        let path = spool(temp_dir.path(), stream::iter(data)).await.unwrap();
        let on_disk = path.to_path_buf();

        let part = spooled_part(path, Some("clip.mp4".into())).await.unwrap();
        assert!(on_disk.exists());

        let chunks: Vec<Bytes> = part.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"spooled");
        assert!(!on_disk.exists());
    }

    #[tokio::test]
    async fn test_upload_is_accepted_and_processed() {
        let app = TestApp::new(FakeTransform::new(FakeOutcome::Segments(2)));
        let body = multipart_body(
            &[("uploaderId", "u1"), ("title", "Holiday"), ("description", "beach")],
            &[
                ("thumbnailFile", "cover.jpg", "jpeg"),
                ("videoFile", "holiday.mp4", "video bytes"),
            ],
        );

        let (status, json) = app.send_json(upload_request(body)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["lifecycle"]["state"], "pending");
        assert_eq!(json["title"], "Holiday");
        let id: uuid::Uuid = json["id"].as_str().unwrap().parse().unwrap();

        let store = app.state.pool.orchestrator().store();
        let record = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let record = store.get(id).await.unwrap().unwrap();
                if record.lifecycle.is_terminal() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(record.lifecycle, Lifecycle::Ready);
        assert_eq!(record.description.as_deref(), Some("beach"));

        // Spool files are gone once the pipeline consumed them.
        app.state.pool.shutdown().await;
        let spool = app.root.path().join("spool");
        assert_eq!(fs::read_dir(spool).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_missing_video_is_bad_request() {
        let app = TestApp::new(FakeTransform::new(FakeOutcome::Segments(1)));
        let body = multipart_body(
            &[("uploaderId", "u1"), ("title", "Holiday")],
            &[("thumbnailFile", "cover.jpg", "jpeg")],
        );

        let (status, body) = app.send(upload_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("videoFile"));
        assert_eq!(app.state.pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_upload_invalid_uploader_is_bad_request() {
        let app = TestApp::new(FakeTransform::new(FakeOutcome::Segments(1)));
        let body = multipart_body(
            &[("uploaderId", "../../etc"), ("title", "Holiday")],
            &[
                ("thumbnailFile", "cover.jpg", "jpeg"),
                ("videoFile", "holiday.mp4", "video"),
            ],
        );

        let (status, _) = app.send(upload_request(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
