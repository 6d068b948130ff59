//! Transform backed by the ffmpeg and ffprobe command-line tools.

use crate::domain::manifest::{SegmentManifest, MANIFEST_FILE};
use crate::ports::transform::{MediaProbe, Transform, TransformError};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Longest stderr excerpt kept in an error.
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Target HLS segment length in seconds.
    pub segment_seconds: u32,
    /// Upper bound on a single tool invocation.
    pub timeout: Duration,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            segment_seconds: 4,
            timeout: Duration::from_secs(3600),
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegTransform {
    settings: FfmpegSettings,
}

impl FfmpegTransform {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FfmpegSettings {
        &self.settings
    }

    fn segment_args(&self, source: &Path, staging: &Path) -> Vec<OsString> {
        let seconds = self.settings.segment_seconds.max(1).to_string();
        let key_frames = format!("expr:gte(t,n_forced*{seconds})");

        let mut args: Vec<OsString> = ["-nostdin", "-y", "-v", "error", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(source.into());
        let encode: [&str; 17] = [
            "-map",
            "0:v:0",
            "-map",
            "0:a?",
            "-c:v",
            self.settings.video_codec.as_str(),
            "-preset",
            "veryfast",
            "-c:a",
            self.settings.audio_codec.as_str(),
            "-force_key_frames",
            key_frames.as_str(),
            "-f",
            "hls",
            "-hls_time",
            seconds.as_str(),
            "-hls_playlist_type",
        ];
        args.extend(encode.iter().map(OsString::from));
        args.push("vod".into());
        args.push("-hls_segment_filename".into());
        args.push(staging.join("segment_%03d.ts").into());
        args.push(staging.join(MANIFEST_FILE).into());
        args
    }
}

#[async_trait]
impl Transform for FfmpegTransform {
    async fn probe(&self, source: &Path) -> Result<MediaProbe, TransformError> {
        let mut args: Vec<OsString> = [
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(source.into());

        // Probing is not tied to a job's cancel token; callers race it instead.
        let output = run_tool(
            &self.settings.ffprobe_path,
            &args,
            self.settings.timeout,
            &CancellationToken::new(),
        )
        .await
        .map_err(|err| match err {
            TransformError::Exited { stderr, .. } => TransformError::Unsupported(stderr),
            other => other,
        })?;

        let probe = parse_probe(&output.stdout)?;
        debug!(
            source = %source.display(),
            format = %probe.format_name,
            duration = ?probe.duration_secs,
            "probed input"
        );
        Ok(probe)
    }

    async fn segment(
        &self,
        source: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<SegmentManifest, TransformError> {
        let args = self.segment_args(source, staging);
        info!(source = %source.display(), staging = %staging.display(), "segmenting");

        run_tool(&self.settings.ffmpeg_path, &args, self.settings.timeout, cancel).await?;

        let playlist = tokio::fs::read_to_string(staging.join(MANIFEST_FILE)).await?;
        SegmentManifest::parse(&playlist)
            .map_err(|err| TransformError::InvalidOutput(err.to_string()))
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Run `program` to completion, killing it if `timeout` elapses or `cancel`
/// fires first. A non-zero exit is an error carrying the stderr tail.
pub(crate) async fn run_tool(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Output, TransformError> {
    let tool = tool_name(program);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TransformError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output?,
            Err(_) => return Err(TransformError::TimedOut { tool, after: timeout }),
        },
        _ = cancel.cancelled() => return Err(TransformError::Cancelled),
    };

    if !output.status.success() {
        return Err(TransformError::Exited {
            tool,
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(output)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    #[serde(default)]
    disposition: ProbeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    /// ffprobe prints durations as decimal strings.
    duration: Option<String>,
}

fn parse_probe(stdout: &[u8]) -> Result<MediaProbe, TransformError> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|err| TransformError::Unsupported(format!("unreadable probe output: {err}")))?;

    let format = parsed
        .format
        .ok_or_else(|| TransformError::Unsupported("no container format detected".into()))?;
    let format_name = format.format_name.unwrap_or_default();

    // Still images decode as a single video frame; they are not videos.
    let still_image = format_name == "image2" || format_name.ends_with("_pipe");

    let has_video = !still_image
        && parsed.streams.iter().any(|s| {
            s.codec_type.as_deref() == Some("video") && s.disposition.attached_pic == 0
        });
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    let duration_secs = format
        .duration
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(MediaProbe {
        format_name,
        duration_secs,
        has_video,
        has_audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const MP4_PROBE: &str = r#"{
        "streams": [
            { "index": 0, "codec_name": "h264", "codec_type": "video", "disposition": { "default": 1, "attached_pic": 0 } },
            { "index": 1, "codec_name": "aac", "codec_type": "audio", "disposition": { "default": 1, "attached_pic": 0 } }
        ],
        "format": { "filename": "original.mp4", "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.010000", "size": "512000" }
    }"#;

    #[test]
    fn test_parse_probe() {
        let probe = parse_probe(MP4_PROBE.as_bytes()).unwrap();
        assert_eq!(
            probe,
            MediaProbe {
                format_name: "mov,mp4,m4a,3gp,3g2,mj2".into(),
                duration_secs: Some(10.01),
                has_video: true,
                has_audio: true,
            }
        );
    }

    #[test]
    fn test_parse_probe_audio_with_cover_art() {
        let json = r#"{
            "streams": [
                { "codec_type": "audio" },
                { "codec_type": "video", "disposition": { "attached_pic": 1 } }
            ],
            "format": { "format_name": "mp3", "duration": "180.5" }
        }"#;
        let probe = parse_probe(json.as_bytes()).unwrap();
        assert!(!probe.has_video);
        assert!(probe.has_audio);
    }

    #[test]
    fn test_parse_probe_still_image() {
        let json = r#"{
            "streams": [{ "codec_type": "video" }],
            "format": { "format_name": "png_pipe" }
        }"#;
        let probe = parse_probe(json.as_bytes()).unwrap();
        assert!(!probe.has_video);
        assert_eq!(probe.duration_secs, None);
    }

    #[test]
    fn test_parse_probe_garbage() {
        assert!(matches!(
            parse_probe(b"not json"),
            Err(TransformError::Unsupported(_))
        ));
        assert!(matches!(
            parse_probe(b"{}"),
            Err(TransformError::Unsupported(_))
        ));
    }

    #[test]
    fn test_segment_args() {
        let transform = FfmpegTransform::new(FfmpegSettings {
            segment_seconds: 6,
            ..FfmpegSettings::default()
        });
        let args: Vec<String> = transform
            .segment_args(Path::new("/in/original.mp4"), Path::new("/out/.staging-x"))
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        let after = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(after("-i"), "/in/original.mp4");
        assert_eq!(after("-hls_time"), "6");
        assert_eq!(after("-hls_playlist_type"), "vod");
        assert_eq!(after("-force_key_frames"), "expr:gte(t,n_forced*6)");
        assert_eq!(after("-hls_segment_filename"), "/out/.staging-x/segment_%03d.ts");
        assert_eq!(args.last().unwrap(), "/out/.staging-x/manifest.m3u8");
    }

    #[test]
    fn test_stderr_tail_keeps_the_end() {
        let long = format!("{}{}", "x".repeat(STDERR_TAIL * 2), "the actual error");
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL);
        assert!(tail.ends_with("the actual error"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_spawn_error() {
        let result = run_tool(
            Path::new("nonexistent_tool_xyz_12345"),
            &[],
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(TransformError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr() {
        let args: Vec<OsString> = ["-c", "echo broken pipeline >&2; exit 3"]
            .iter()
            .map(OsString::from)
            .collect();
        let result = run_tool(
            Path::new("sh"),
            &args,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        match result {
            Err(TransformError::Exited { tool, stderr, .. }) => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken pipeline");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_fires() {
        let started = Instant::now();
        let result = run_tool(
            Path::new("sleep"),
            &[OsString::from("10")],
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(TransformError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_stops_the_tool() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = run_tool(
            Path::new("sleep"),
            &[OsString::from("10")],
            Duration::from_secs(30),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(TransformError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
