//! Configuration
//!
//! Layered configuration with figment: defaults, global and project TOML
//! files, and `PAPERWEAVE_`-prefixed environment variables.

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{CitationSettings, CollectorSettings, Config, RetrievalSettings};
