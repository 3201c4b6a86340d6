//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/paperweave/config.toml)
//! 3. Project config (.paperweave/config.toml)
//! 4. Environment variables (PAPERWEAVE_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;

use super::types::Config;
use crate::types::{DraftError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. PAPERWEAVE_RETRIEVAL_LIMIT -> retrieval.limit
        figment = figment.merge(Env::prefixed("PAPERWEAVE_").split('_').lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| DraftError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| DraftError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Path to the global config file (~/.config/paperweave/config.toml)
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "paperweave")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Path to the project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".paperweave/config.toml")
    }
}
