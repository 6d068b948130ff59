//! Domain layer - Pure business logic.

pub mod asset;
pub mod layout;
pub mod manifest;
pub mod record;
pub mod upload;
