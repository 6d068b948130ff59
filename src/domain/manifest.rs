//! HLS media playlist used as the segment manifest.

use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// File name of the manifest inside a segment set.
pub const MANIFEST_FILE: &str = "manifest.m3u8";

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Path relative to the manifest.
    pub uri: String,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentManifest {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<SegmentRef>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
    pub independent_segments: bool,
    /// Initialization segment for fMP4 (EXT-X-MAP)
    pub init_segment: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("manifest does not start with #EXTM3U")]
    MissingHeader,
    #[error("line {line}: invalid value in {tag}")]
    InvalidValue { line: usize, tag: &'static str },
    #[error("line {line}: #EXTINF without a segment uri")]
    DanglingSegment { line: usize },
}

impl SegmentManifest {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3,
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: None,
            independent_segments: false,
            init_segment: None,
        }
    }

    /// A complete VOD playlist over `segments`, with the target duration
    /// derived from the longest segment.
    pub fn vod(segments: Vec<SegmentRef>) -> Self {
        let mut manifest = Self::new(0);
        manifest.playlist_type = Some("VOD".to_string());
        manifest.segments = segments;
        manifest.target_duration = manifest.max_segment_duration().ceil() as u64;
        manifest
    }

    /// Re-render as a complete VOD playlist, keeping the segments, the init
    /// segment and the independent-segments flag. The version never drops
    /// below the one the producer declared.
    pub fn into_vod(self) -> Self {
        let mut manifest = Self::vod(self.segments);
        manifest.version = manifest.version.max(self.version);
        manifest.media_sequence = self.media_sequence;
        manifest.independent_segments = self.independent_segments;
        manifest.init_segment = self.init_segment;
        manifest
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(SegmentRef { duration, uri });
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    fn max_segment_duration(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.duration)
            .fold(0.0, f64::max)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        // Writing into a String cannot fail.
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);

        if let Some(pt) = &self.playlist_type {
            let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:{}", pt);
        }

        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }

        if let Some(init) = &self.init_segment {
            let _ = writeln!(out, "#EXT-X-MAP:URI=\"{}\"", init);
        }

        for segment in &self.segments {
            // Using {:.6} for reasonable precision on float duration
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            out.push_str(&segment.uri);
            out.push('\n');
        }

        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }

        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Parse a media playlist. Unknown tags are ignored.
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let mut lines = input.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

        match lines.find(|(_, l)| !l.is_empty()) {
            Some((_, "#EXTM3U")) => {}
            _ => return Err(ManifestError::MissingHeader),
        }

        let mut manifest = Self::new(0);
        manifest.end_list = false;
        let mut pending: Option<(usize, f64)> = None;

        for (line_no, line) in lines {
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("#EXTINF:") {
                if let Some((line, _)) = pending {
                    return Err(ManifestError::DanglingSegment { line });
                }
                let duration = value
                    .split(',')
                    .next()
                    .and_then(|d| d.trim().parse::<f64>().ok())
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .ok_or(ManifestError::InvalidValue {
                        line: line_no,
                        tag: "EXTINF",
                    })?;
                pending = Some((line_no, duration));
            } else if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                manifest.version = parse_number(value, line_no, "EXT-X-VERSION")?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                manifest.target_duration = parse_number(value, line_no, "EXT-X-TARGETDURATION")?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                manifest.media_sequence = parse_number(value, line_no, "EXT-X-MEDIA-SEQUENCE")?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                manifest.playlist_type = Some(value.to_string());
            } else if line == "#EXT-X-INDEPENDENT-SEGMENTS" {
                manifest.independent_segments = true;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MAP:URI=") {
                manifest.init_segment = Some(value.trim_matches('"').to_string());
            } else if line == "#EXT-X-ENDLIST" {
                manifest.end_list = true;
            } else if line.starts_with('#') {
                continue;
            } else {
                let (_, duration) = pending.take().ok_or(ManifestError::InvalidValue {
                    line: line_no,
                    tag: "segment uri",
                })?;
                manifest.add_segment(duration, line.to_string());
            }
        }

        if let Some((line, _)) = pending {
            return Err(ManifestError::DanglingSegment { line });
        }

        Ok(manifest)
    }
}

fn parse_number<N: std::str::FromStr>(
    value: &str,
    line: usize,
    tag: &'static str,
) -> Result<N, ManifestError> {
    value
        .trim()
        .parse()
        .map_err(|_| ManifestError::InvalidValue { line, tag })
}
