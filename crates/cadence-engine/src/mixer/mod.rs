//! Control-side mixer model: the master strip plus the audio track arena.

use std::sync::Arc;

pub mod meter;
pub(crate) mod pan;

pub use meter::{inverse_meter_scale, meter_scale, MeterReading};

use crate::handle::EngineId;
use crate::table::ObjectTable;
use crate::timeline::ClipData;
use meter::{MeterSlot, MeterSmoother};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TrackParams {
    pub volume: f32,
    pub panning: f32,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            panning: 0.0,
        }
    }
}

/// Parameters and meter plumbing shared by master and audio tracks.
#[derive(Debug)]
pub(crate) struct Strip {
    pub params: TrackParams,
    pub meter: Arc<MeterSlot>,
    pub smoother: MeterSmoother,
}

impl Strip {
    pub fn new(params: TrackParams) -> Self {
        Self {
            params,
            meter: Arc::new(MeterSlot::new()),
            smoother: MeterSmoother::default(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct AudioTrackData {
    pub strip: Strip,
    /// Live clip keys ordered by start position.
    pub clips: Vec<u32>,
}

#[derive(Debug)]
pub(crate) struct Mixer {
    pub master: Strip,
    pub tracks: ObjectTable<AudioTrackData>,
}

impl Mixer {
    pub fn new(track_capacity: usize) -> Self {
        Self {
            master: Strip::new(TrackParams::default()),
            tracks: ObjectTable::with_capacity(track_capacity),
        }
    }
}

/// Everything needed to bring a deleted audio track back, clips included.
///
/// Consumed by reconstruction; it cannot be cloned.
#[derive(Debug)]
pub struct AudioTrackState {
    pub(crate) engine: EngineId,
    pub(crate) key: u32,
    pub(crate) params: TrackParams,
    pub(crate) clips: Vec<(u32, ClipData)>,
}

impl AudioTrackState {
    /// Key the track will have again once reconstructed.
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn volume(&self) -> f32 {
        self.params.volume
    }

    pub fn panning(&self) -> f32 {
        self.params.panning
    }

    /// Keys of the clips that were on the track when it was deleted.
    pub fn clip_keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.clips.iter().map(|(key, _)| *key)
    }
}
