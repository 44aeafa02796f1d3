//! IO backends provide access to audio output hardware.
//!
//! A backend enumerates devices, reports the configuration ranges each
//! device accepts and opens an output stream that periodically drives a
//! [`CallbackHandle`].

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use cadence_rt::{CallbackHandle, InterleavedAudioBuffer, RealtimeScope};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod null;

#[cfg(not(feature = "cpal"))]
pub mod cpal_backend {
    use super::*;

    #[derive(Default, Clone)]
    pub struct CpalBackend;

    impl CpalBackend {
        pub fn new() -> Self {
            Self
        }
    }

    fn unavailable() -> BackendError {
        BackendError::Backend("cpal backend not available in this build".into())
    }

    impl AudioBackend for CpalBackend {
        fn name(&self) -> &'static str {
            "cpal (stub)"
        }

        fn devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(Vec::new())
        }

        fn default_output(&self) -> Result<DeviceId> {
            Err(unavailable())
        }

        fn output_config_ranges(&self, _device: &DeviceId) -> Result<Vec<OutputConfigRange>> {
            Err(unavailable())
        }

        fn open_output_stream(
            &self,
            _device: &DeviceId,
            _config: &StreamConfig,
            _callback: CallbackHandle,
        ) -> Result<Box<dyn AudioStream>> {
            Err(unavailable())
        }
    }
}

pub use cpal_backend::CpalBackend;
pub use null::{ManualBackend, ManualDriver, NullBackend};

pub type Result<T> = std::result::Result<T, BackendError>;

/// Sample encodings an output stream can be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 10] = [
        SampleFormat::I8,
        SampleFormat::I16,
        SampleFormat::I32,
        SampleFormat::I64,
        SampleFormat::U8,
        SampleFormat::U16,
        SampleFormat::U32,
        SampleFormat::U64,
        SampleFormat::F32,
        SampleFormat::F64,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::I8 => "i8",
            SampleFormat::I16 => "i16",
            SampleFormat::I32 => "i32",
            SampleFormat::I64 => "i64",
            SampleFormat::U8 => "u8",
            SampleFormat::U16 => "u16",
            SampleFormat::U32 => "u32",
            SampleFormat::U64 => "u64",
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I8 | SampleFormat::U8 => 1,
            SampleFormat::I16 | SampleFormat::U16 => 2,
            SampleFormat::I32 | SampleFormat::U32 | SampleFormat::F32 => 4,
            SampleFormat::I64 | SampleFormat::U64 | SampleFormat::F64 => 8,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        SampleFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == lowered)
            .ok_or_else(|| BackendError::Backend(format!("unknown sample format '{s}'")))
    }
}

/// Requested output stream shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    /// Frames per callback, `None` lets the device pick its default.
    #[serde(default)]
    pub buffer_size: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_format: SampleFormat::F32,
            sample_rate: 48_000,
            buffer_size: None,
        }
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch {} @ {} Hz",
            self.channels, self.sample_format, self.sample_rate
        )?;
        match self.buffer_size {
            Some(frames) => write!(f, ", {frames} frames"),
            None => f.write_str(", default buffer"),
        }
    }
}

/// A set of stream configurations a device reports as valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfigRange {
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub sample_rate: RangeInclusive<u32>,
    /// `None` when the device does not report buffer size limits.
    pub buffer_size: Option<RangeInclusive<u32>>,
}

impl OutputConfigRange {
    const PREFERRED_RATES: [u32; 2] = [48_000, 44_100];

    /// A config inside this range, preferring common sample rates.
    pub fn default_config(&self) -> StreamConfig {
        let sample_rate = Self::PREFERRED_RATES
            .into_iter()
            .find(|rate| self.sample_rate.contains(rate))
            .unwrap_or(*self.sample_rate.end());
        StreamConfig {
            channels: self.channels,
            sample_format: self.sample_format,
            sample_rate,
            buffer_size: None,
        }
    }

    pub fn with_sample_rate(&self, sample_rate: u32) -> Option<StreamConfig> {
        self.sample_rate.contains(&sample_rate).then(|| StreamConfig {
            sample_rate,
            ..self.default_config()
        })
    }

    pub fn supports(&self, config: &StreamConfig) -> bool {
        let buffer_ok = match (&self.buffer_size, config.buffer_size) {
            (Some(range), Some(frames)) => range.contains(&frames),
            _ => true,
        };
        self.channels == config.channels
            && self.sample_format == config.sample_format
            && self.sample_rate.contains(&config.sample_rate)
            && buffer_ok
    }
}

/// Opaque device identifier. The empty id names the default output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn default_output() -> Self {
        Self(String::new())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<default>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub is_default_output: bool,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream configuration unsupported: {0}")]
    UnsupportedConfiguration(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A running (or paused) output stream. Dropping it closes the stream.
pub trait AudioStream: Send {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn devices(&self) -> Result<Vec<DeviceInfo>>;
    fn default_output(&self) -> Result<DeviceId>;
    fn output_config_ranges(&self, device: &DeviceId) -> Result<Vec<OutputConfigRange>>;
    fn open_output_stream(
        &self,
        device: &DeviceId,
        config: &StreamConfig,
        callback: CallbackHandle,
    ) -> Result<Box<dyn AudioStream>>;

    /// Fails unless one of the device's reported ranges accepts `config`.
    fn check_config(&self, device: &DeviceId, config: &StreamConfig) -> Result<()> {
        let ranges = self.output_config_ranges(device)?;
        if ranges.iter().any(|range| range.supports(config)) {
            Ok(())
        } else {
            Err(BackendError::UnsupportedConfiguration(config.to_string()))
        }
    }
}

/// Runs one realtime render pass over an interleaved `f32` block. The
/// calling thread counts as realtime only for the duration of the pass.
pub fn render_interleaved(
    callback: &CallbackHandle,
    data: &mut [f32],
    channels: usize,
    sample_rate: u32,
) {
    let _realtime = RealtimeScope::enter();
    let mut buffer = InterleavedAudioBuffer::new(data, channels, sample_rate);
    callback.process(&mut buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_range() -> OutputConfigRange {
        OutputConfigRange {
            channels: 2,
            sample_format: SampleFormat::F32,
            sample_rate: 8_000..=96_000,
            buffer_size: Some(32..=4096),
        }
    }

    #[test]
    fn default_config_prefers_48k() {
        let config = stereo_range().default_config();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.buffer_size, None);

        let narrow = OutputConfigRange {
            sample_rate: 22_050..=32_000,
            ..stereo_range()
        };
        assert_eq!(narrow.default_config().sample_rate, 32_000);
    }

    #[test]
    fn supports_checks_every_field() {
        let range = stereo_range();
        let mut config = range.default_config();
        assert!(range.supports(&config));

        config.buffer_size = Some(8192);
        assert!(!range.supports(&config));
        config.buffer_size = Some(256);
        assert!(range.supports(&config));

        config.sample_format = SampleFormat::I16;
        assert!(!range.supports(&config));
        assert!(range.with_sample_rate(192_000).is_none());
    }

    #[test]
    fn sample_format_parses_short_names() {
        for format in SampleFormat::ALL {
            assert_eq!(format.as_str().parse::<SampleFormat>().unwrap(), format);
        }
        assert!("f16".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn stream_config_round_trips_json() {
        let json = r#"{"channels":1,"sample_format":"i16","sample_rate":44100}"#;
        let config: StreamConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_format, SampleFormat::I16);
        assert_eq!(config.buffer_size, None);
    }
}
