//! Local adapters for monolith deployment.

pub mod ffmpeg;
pub mod fs;
pub mod http;
pub mod memory;

pub use ffmpeg::{FfmpegSettings, FfmpegTransform};
pub use fs::BlobWriter;
pub use memory::InMemoryRecordStore;
