//! Configuration for the monolith deployment.

use crate::adapters::local::ffmpeg::FfmpegSettings;
use crate::domain::layout::StorageLayout;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: u16,
    /// Root of the record storage tree
    pub storage_root: PathBuf,
    /// Directory for buffering multipart uploads
    pub spool_dir: PathBuf,
    /// Ingestions allowed to run at once; the rest wait in `pending`
    pub max_concurrent_ingestions: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Target HLS segment length in seconds
    pub hls_segment_seconds: u32,
    /// Upper bound on one ffmpeg or ffprobe run
    pub transform_timeout: Duration,
}

impl LocalConfig {
    /// Load configuration from `.env` and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup, applying defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            addr: string("ADDR", "127.0.0.1"),
            port: parse(&lookup, "PORT", 3000)?,
            storage_root: PathBuf::from(string("STORAGE_ROOT", "./storage")),
            spool_dir: PathBuf::from(string("SPOOL_DIR", "./spool")),
            max_concurrent_ingestions: positive(&lookup, "MAX_CONCURRENT_INGESTIONS", 4)?,
            ffmpeg_path: PathBuf::from(string("FFMPEG_PATH", "ffmpeg")),
            ffprobe_path: PathBuf::from(string("FFPROBE_PATH", "ffprobe")),
            hls_segment_seconds: positive(&lookup, "HLS_SEGMENT_SECONDS", 4)?,
            transform_timeout: Duration::from_secs(positive(
                &lookup,
                "TRANSFORM_TIMEOUT_SECS",
                3600,
            )?),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage_root)
    }

    pub fn ffmpeg(&self) -> FfmpegSettings {
        FfmpegSettings {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            segment_seconds: self.hls_segment_seconds,
            timeout: self.transform_timeout,
            ..FfmpegSettings::default()
        }
    }
}

fn parse<F, V>(lookup: &F, key: &'static str, default: V) -> Result<V, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr,
    V::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: V::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        }),
    }
}

fn positive<F, V>(lookup: &F, key: &'static str, default: V) -> Result<V, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr + PartialOrd + Default + std::fmt::Display,
    V::Err: std::fmt::Display,
{
    let value = parse(lookup, key, default)?;
    if value <= V::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LocalConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.storage_root, PathBuf::from("./storage"));
        assert_eq!(config.spool_dir, PathBuf::from("./spool"));
        assert_eq!(config.max_concurrent_ingestions, 4);
        assert_eq!(config.hls_segment_seconds, 4);
        assert_eq!(config.transform_timeout, Duration::from_secs(3600));

        let ffmpeg = config.ffmpeg();
        assert_eq!(ffmpeg.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(ffmpeg.video_codec, "libx264");
    }

    #[test]
    fn test_overrides() {
        let config = LocalConfig::from_lookup(lookup(&[
            ("ADDR", "0.0.0.0"),
            ("PORT", "8080"),
            ("STORAGE_ROOT", "/srv/videos"),
            ("MAX_CONCURRENT_INGESTIONS", " 2 "),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("HLS_SEGMENT_SECONDS", "6"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.layout().root(), std::path::Path::new("/srv/videos"));
        assert_eq!(config.max_concurrent_ingestions, 2);
        assert_eq!(config.ffmpeg().segment_seconds, 6);
        assert_eq!(
            config.ffmpeg().ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = LocalConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_zero_concurrency_is_an_error() {
        let err =
            LocalConfig::from_lookup(lookup(&[("MAX_CONCURRENT_INGESTIONS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "MAX_CONCURRENT_INGESTIONS",
                ..
            }
        ));
    }
}
