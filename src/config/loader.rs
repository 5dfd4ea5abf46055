// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `tracehound.toml` and deserializes it into `MasterConfig`.
//! Collector entries are left raw here; `validate` turns them into
//! `CollectorConfig`s.

use crate::hound_log;
use crate::config::model::{ConfigError, MasterConfig, SourceConfig};
use log::Level;
use std::{fs, path::{Path, PathBuf}};

/// Default file name, looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "tracehound.toml";

/// Load and parse the master configuration from `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load_master_config(path: &Path) -> Result<MasterConfig, ConfigError> {
    hound_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse_master_config(&txt)?;
    hound_log!(
        Level::Info,
        "config",
        "Loaded config from {:?} ({} collector entries)",
        path,
        cfg.collectors.len()
    );
    Ok(cfg)
}

/// Parse configuration text without touching the filesystem.
pub fn parse_master_config(txt: &str) -> Result<MasterConfig, ConfigError> {
    Ok(toml::from_str(txt)?)
}

impl SourceConfig {
    /// Directory of per-collector recordings, resolved against `base` when relative.
    pub fn replay_dir(&self, base: &Path) -> Result<PathBuf, ConfigError> {
        let dir = self
            .replay_dir
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(ConfigError::MissingReplayDir)?;
        Ok(base.join(dir))
    }
}
