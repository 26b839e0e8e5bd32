// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scoring::DEFAULT_SAMPLING_RATE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine settings; every field has a sensible default so a missing or
/// partial config file still yields a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory recordings are persisted to.
    pub output_dir: PathBuf,
    /// Ticks between scored frames during analysis.
    pub sampling_rate: u32,
    /// Output dimensions overlay geometry is scaled to.
    pub frame_width: f32,
    pub frame_height: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("JointData")))
                .unwrap_or_else(|| PathBuf::from("./joint_data")),
            sampling_rate: DEFAULT_SAMPLING_RATE,
            frame_width: 640.0,
            frame_height: 480.0,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
