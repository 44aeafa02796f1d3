use std::fs;
use std::path::{Path, PathBuf};

use cadence_io::{DeviceId, StreamConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timestamp::Bpm;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed engine config")]
    Json(#[from] serde_json::Error),
    #[error("invalid engine config: {0}")]
    Invalid(String),
}

/// Meter ballistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Fraction of the distance to the newest RMS value covered on each
    /// `read_meter` call. `1.0` disables smoothing.
    #[serde(default = "default_rms_smoothing")]
    pub rms_smoothing: f32,
    /// How fast the long-term peak falls back once the signal drops.
    #[serde(default = "default_long_peak_decay")]
    pub long_peak_decay_db_per_second: f32,
}

fn default_rms_smoothing() -> f32 {
    0.2
}

fn default_long_peak_decay() -> f32 {
    12.0
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            rms_smoothing: default_rms_smoothing(),
            long_peak_decay_db_per_second: default_long_peak_decay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub output: StreamConfig,
    /// Output device; `None` picks the backend default.
    #[serde(default)]
    pub device: Option<DeviceId>,
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    #[serde(default = "default_initial_track_capacity")]
    pub initial_track_capacity: usize,
    /// Largest block rendered in one pass. Bigger callbacks are split.
    #[serde(default = "default_max_block_frames")]
    pub max_block_frames: usize,
    #[serde(default)]
    pub meter: MeterConfig,
}

fn default_command_queue_capacity() -> usize {
    1024
}

fn default_bpm() -> f64 {
    120.0
}

fn default_initial_track_capacity() -> usize {
    64
}

fn default_max_block_frames() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: StreamConfig::default(),
            device: None,
            command_queue_capacity: default_command_queue_capacity(),
            bpm: default_bpm(),
            initial_track_capacity: default_initial_track_capacity(),
            max_block_frames: default_max_block_frames(),
            meter: MeterConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_output(mut self, output: StreamConfig) -> Self {
        self.output = output;
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    pub fn with_initial_track_capacity(mut self, capacity: usize) -> Self {
        self.initial_track_capacity = capacity;
        self
    }

    pub fn with_max_block_frames(mut self, frames: usize) -> Self {
        self.max_block_frames = frames;
        self
    }

    pub fn with_meter(mut self, meter: MeterConfig) -> Self {
        self.meter = meter;
        self
    }

    pub fn tempo(&self) -> Result<Bpm, ConfigError> {
        Bpm::new(self.bpm).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.output.sample_rate == 0 {
            return invalid("output sample rate must be non-zero");
        }
        if self.output.channels == 0 {
            return invalid("output must have at least one channel");
        }
        if self.output.buffer_size == Some(0) {
            return invalid("output buffer size must be non-zero");
        }
        if self.command_queue_capacity == 0 {
            return invalid("command queue capacity must be non-zero");
        }
        if self.max_block_frames == 0 {
            return invalid("max block frames must be non-zero");
        }
        if !(self.meter.rms_smoothing > 0.0 && self.meter.rms_smoothing <= 1.0) {
            return invalid("rms smoothing must be in (0, 1]");
        }
        if !(self.meter.long_peak_decay_db_per_second >= 0.0) {
            return invalid("long peak decay must not be negative");
        }
        self.tempo()?;
        Ok(())
    }
}
