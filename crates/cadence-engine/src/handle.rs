//! Caller-facing handles.
//!
//! Handles are plain `Copy` keys tagged with the engine that issued them. They
//! carry no data; every call goes back through the engine, which checks the
//! key is still live.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EngineError, EntityKind};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(u64);

impl EngineId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            engine: EngineId,
            key: u32,
        }

        impl $name {
            pub(crate) fn new(engine: EngineId, key: u32) -> Self {
                Self { engine, key }
            }

            /// Unique identifier within the issuing engine.
            pub fn key(self) -> u32 {
                self.key
            }

            pub fn engine(self) -> EngineId {
                self.engine
            }

            pub(crate) fn key_for(self, engine: EngineId) -> Result<u32, EngineError> {
                if self.engine == engine {
                    Ok(self.key)
                } else {
                    Err(EngineError::ForeignHandle { kind: $kind })
                }
            }
        }
    };
}

handle!(
    /// An audio track on the mixer.
    AudioTrack,
    EntityKind::AudioTrack
);
handle!(
    /// A placement of a stored clip on a track's timeline.
    AudioClip,
    EntityKind::AudioClip
);
handle!(
    /// Decoded audio imported into the engine.
    StoredClip,
    EntityKind::StoredClip
);

/// Either the master track or an audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackId {
    Master,
    Audio(AudioTrack),
}

impl From<AudioTrack> for TrackId {
    fn from(track: AudioTrack) -> Self {
        TrackId::Audio(track)
    }
}
