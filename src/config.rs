//! Run parameters — `narrate.json` schema.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! {
//!   "voice": "Ryan",
//!   "batch": { "batch_size": 4, "max_batch_chars": 0 },
//!   "range": { "start": 10, "max_chunks": 20 },
//!   "sampling": { "temperature": 0.6, "seed": 42 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    gateway::SamplingConfig,
    scheduler::BatchLimits,
    segment::{ChunkRange, DEFAULT_MAX_CHUNK_CHARS},
};

pub const DEFAULT_VOICE: &str = "Serena";
pub const DEFAULT_OUTPUT_DIR: &str = "output_audio";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Segmentation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub max_chunk_chars: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS }
    }
}

/// Everything one run needs besides the input text and the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub segment: SegmentConfig,
    pub batch: BatchLimits,
    pub range: ChunkRange,
    pub sampling: SamplingConfig,
    /// Requested speaker; matched case-insensitively against the backend's list.
    pub voice: String,
    pub output_dir: PathBuf,
    /// Assemble whatever exists when some windows failed.
    pub assemble_partial: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            batch: BatchLimits::default(),
            range: ChunkRange::default(),
            sampling: SamplingConfig::default(),
            voice: DEFAULT_VOICE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            assemble_partial: true,
        }
    }
}

impl RunConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.segment.max_chunk_chars == 0 {
            return invalid("segment.max_chunk_chars must be positive");
        }
        if self.batch.batch_size == 0 {
            return invalid("batch.batch_size must be positive");
        }
        if self.sampling.streaming {
            return invalid("sampling.streaming is not supported for bulk narration");
        }
        let top_p = self.sampling.top_p;
        if top_p.is_nan() || top_p <= 0.0 || top_p > 1.0 {
            return invalid("sampling.top_p must be in (0, 1]");
        }
        let temperature = self.sampling.temperature;
        if temperature.is_nan() || temperature <= 0.0 {
            return invalid("sampling.temperature must be positive");
        }
        if self.voice.trim().is_empty() {
            return invalid("voice must not be empty");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
