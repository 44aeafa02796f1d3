//! Realtime multitrack audio engine.
//!
//! An [`Engine`] owns a master track, any number of audio tracks and the
//! clips placed on their timelines. The caller edits that state from the
//! control thread; a render callback on the audio thread plays it back.
//! The two never share locks: edits travel as commands over a bounded
//! queue, and levels and the playhead come back through lock-free
//! snapshots.
//!
//! ```no_run
//! use cadence_engine::{Engine, EngineConfig, Timestamp};
//!
//! # fn main() -> Result<(), cadence_engine::EngineError> {
//! let mut engine = Engine::dummy_with(EngineConfig::default())?;
//! let track = engine.add_audio_track()?;
//! let drums = engine.import_audio_clip("drums.wav")?;
//! engine.add_clip(track, drums, Timestamp::from_beats(4)?, None)?;
//! engine.set_volume(track, 0.8)?;
//! engine.play()?;
//! # engine.close()
//! # }
//! ```

mod bridge;
pub mod config;
mod engine;
pub mod error;
pub mod fault;
mod handle;
pub mod media;
pub mod mixer;
mod render;
mod table;
pub mod timeline;
pub mod timestamp;

pub use cadence_io::{
    AudioBackend, BackendError, DeviceId, DeviceInfo, ManualDriver, OutputConfigRange,
    SampleFormat, StreamConfig,
};
pub use config::{ConfigError, EngineConfig, MeterConfig};
pub use engine::{Engine, StoredClipInfo};
pub use error::{EngineError, EntityKind, ErrorCategory, ReconstructError, Result};
pub use fault::{
    listen_for_crash, process_poisoned, stop_listening_for_crash, CrashListener, CrashReport,
    FaultScope,
};
pub use handle::{AudioClip, AudioTrack, EngineId, StoredClip, TrackId};
pub use media::{DecodeError, Decoder, StoredAudio, SymphoniaDecoder};
pub use mixer::{inverse_meter_scale, meter_scale, AudioTrackState, MeterReading};
pub use timeline::{AudioClipState, ClipLength};
pub use timestamp::{Bpm, Timestamp, TimestampError, BEAT_UNITS_PER_BEAT};
