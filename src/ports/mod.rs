//! Ports - Trait definitions for the pipeline's collaborators.

pub mod repository;
pub mod transform;
