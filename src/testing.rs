//! Test doubles shared across modules.

use crate::domain::manifest::{SegmentManifest, SegmentRef, MANIFEST_FILE};
use crate::ports::transform::{MediaProbe, Transform, TransformError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const FAKE_SEGMENT_SECONDS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FakeOutcome {
    /// Write this many segments and a manifest.
    Segments(usize),
    /// Probe rejects the input.
    Unsupported,
    /// Probe finds no video stream.
    AudioOnly,
    /// The tool exits non-zero after writing a partial segment.
    Fail,
    /// Block until cancelled.
    WaitForCancel,
    /// The manifest references a zero-byte segment.
    EmptySegment,
}

/// Deterministic in-process transform.
#[derive(Debug, Clone)]
pub(crate) struct FakeTransform {
    outcome: FakeOutcome,
    probe_duration: Option<f64>,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransform {
    pub(crate) fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            probe_duration: Some(10.0),
            delay: Duration::ZERO,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_probe_duration(mut self, duration: Option<f64>) -> Self {
        self.probe_duration = duration;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of `segment` calls observed running at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for FakeTransform {
    async fn probe(&self, _source: &Path) -> Result<MediaProbe, TransformError> {
        match self.outcome {
            FakeOutcome::Unsupported => Err(TransformError::Unsupported(
                "Invalid data found when processing input".into(),
            )),
            FakeOutcome::AudioOnly => Ok(MediaProbe {
                format_name: "mp3".into(),
                duration_secs: self.probe_duration,
                has_video: false,
                has_audio: true,
            }),
            _ => Ok(MediaProbe {
                format_name: "mov,mp4,m4a,3gp,3g2,mj2".into(),
                duration_secs: self.probe_duration,
                has_video: true,
                has_audio: true,
            }),
        }
    }

    async fn segment(
        &self,
        _source: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<SegmentManifest, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(self.running.clone());

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(TransformError::Cancelled),
        }

        let count = match self.outcome {
            FakeOutcome::Segments(count) => count,
            FakeOutcome::WaitForCancel => {
                tokio::fs::write(staging.join("segment_000.ts"), b"partial").await?;
                cancel.cancelled().await;
                return Err(TransformError::Cancelled);
            }
            FakeOutcome::Fail => {
                tokio::fs::write(staging.join("segment_000.ts"), b"partial").await?;
                return Err(TransformError::Exited {
                    tool: "ffmpeg".into(),
                    status: "exit status: 1".into(),
                    stderr: "Conversion failed!".into(),
                });
            }
            FakeOutcome::EmptySegment => 1,
            FakeOutcome::Unsupported | FakeOutcome::AudioOnly => 0,
        };

        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let uri = format!("segment_{i:03}.ts");
            let body: &[u8] = if self.outcome == FakeOutcome::EmptySegment {
                b""
            } else {
                b"\x47fake transport stream"
            };
            tokio::fs::write(staging.join(&uri), body).await?;
            segments.push(SegmentRef {
                uri,
                duration: FAKE_SEGMENT_SECONDS,
            });
        }

        let manifest = SegmentManifest::vod(segments);
        manifest.write_to(&staging.join(MANIFEST_FILE)).await?;
        Ok(manifest)
    }
}
