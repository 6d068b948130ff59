//! Tapedeck - Video ingestion and HLS packaging
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (records, layout, manifests, uploads)
//! - ports/: Trait definitions (record store, transform)
//! - adapters/: Concrete implementations (blob writer, ffmpeg, memory store, HTTP)
//! - application/: Generic services (segmenter, orchestrator, ingestion pool)
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use application::orchestrator::{IngestRequest, IngestionError, Orchestrator};
pub use application::segmenter::Segmenter;
pub use application::worker::IngestionPool;
pub use config::LocalConfig;
