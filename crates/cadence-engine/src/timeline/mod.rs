//! Clip placement on track timelines.
//!
//! Everything here is pure bookkeeping in beat units. Spans are half-open
//! `[start, end)` intervals and no two spans on one track may overlap.

use serde::{Deserialize, Serialize};

use crate::handle::EngineId;
use crate::media::StoredAudio;
use crate::timestamp::{Bpm, Timestamp, TimestampError};

/// Length of a clip on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClipLength {
    Fixed(Timestamp),
    /// The full remaining length of the stored audio, following tempo changes.
    TracksSource,
}

impl From<Option<Timestamp>> for ClipLength {
    fn from(length: Option<Timestamp>) -> Self {
        match length {
            Some(length) => ClipLength::Fixed(length),
            None => ClipLength::TracksSource,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClipData {
    pub start: Timestamp,
    pub length: ClipLength,
    /// Position in the stored audio that plays at `start`.
    pub offset: Timestamp,
    pub stored: u32,
    pub track: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Duration of the whole stored clip at `bpm`.
pub(crate) fn source_length(audio: &StoredAudio, bpm: Bpm) -> Result<Timestamp, TimestampError> {
    Timestamp::from_samples(audio.frames() as u64, audio.sample_rate(), bpm)
}

impl ClipData {
    pub fn length_in(&self, source: Timestamp) -> Timestamp {
        match self.length {
            ClipLength::Fixed(length) => length,
            ClipLength::TracksSource => source.saturating_sub(self.offset),
        }
    }

    pub fn span(&self, source: Timestamp) -> Result<Span, TimestampError> {
        Ok(Span {
            start: self.start,
            end: self.start.add(self.length_in(source))?,
        })
    }

    /// Keeps the end fixed and moves the start so the clip is `new_length`
    /// long. The start never moves before zero or before the beginning of
    /// the stored audio; in that case the clip comes out shorter.
    pub fn cropped_start(
        &self,
        new_length: Timestamp,
        source: Timestamp,
    ) -> Result<ClipData, TimestampError> {
        let span = self.span(source)?;
        let end = span.end.beat_units() as i64;
        let start = self.start.beat_units() as i64;
        let offset = self.offset.beat_units() as i64;

        let earliest = (start - offset).max(0);
        let new_start = (end - new_length.beat_units() as i64).max(earliest);
        let new_offset = offset + (new_start - start);

        Ok(ClipData {
            start: Timestamp::from_beat_units(new_start as u32),
            length: ClipLength::Fixed(Timestamp::from_beat_units((end - new_start) as u32)),
            offset: Timestamp::from_beat_units(new_offset as u32),
            ..self.clone()
        })
    }

    /// Keeps the start fixed. Lengths beyond the stored audio render as
    /// silence.
    pub fn cropped_end(&self, new_length: Timestamp) -> ClipData {
        ClipData {
            length: ClipLength::Fixed(new_length),
            ..self.clone()
        }
    }
}

/// First pair of keys whose spans overlap, if any.
pub(crate) fn find_overlap(spans: &mut [(u32, Span)]) -> Option<(u32, u32)> {
    spans.sort_by_key(|(_, span)| (span.start, span.end));
    for (i, (key, span)) in spans.iter().enumerate() {
        for (other_key, other) in &spans[i + 1..] {
            if other.start >= span.end && other.start > span.start {
                break;
            }
            if span.overlaps(other) {
                return Some((*key, *other_key));
            }
        }
    }
    None
}

/// A deleted clip, ready to be reconstructed onto a track.
///
/// Consumed by reconstruction; it cannot be cloned.
#[derive(Debug)]
pub struct AudioClipState {
    pub(crate) engine: EngineId,
    pub(crate) key: u32,
    pub(crate) data: ClipData,
}

impl AudioClipState {
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn start(&self) -> Timestamp {
        self.data.start
    }

    /// `None` when the clip follows its stored audio's length.
    pub fn length(&self) -> Option<Timestamp> {
        match self.data.length {
            ClipLength::Fixed(length) => Some(length),
            ClipLength::TracksSource => None,
        }
    }

    /// Key of the track the clip was on when deleted.
    pub fn track_key(&self) -> u32 {
        self.data.track
    }
}
