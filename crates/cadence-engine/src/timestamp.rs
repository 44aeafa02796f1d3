//! Unit-safe musical time.
//!
//! A [`Timestamp`] counts *beat units*, 1024 to the beat, in a `u32`. It is
//! used both as an absolute timeline position and as a duration. Conversions
//! to and from samples need a sample rate and a [`Bpm`]; both directions
//! truncate, so only values on the beat-unit grid survive a round trip.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BEAT_UNITS_PER_BEAT: u32 = 1024;

const SECONDS_PER_MINUTE: u128 = 60;
const CENTS_PER_BEAT: u128 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TimestampError {
    #[error("timestamp arithmetic overflowed")]
    Overflow,
    #[error("timestamp subtraction would be negative")]
    Underflow,
    #[error("timestamp scale factor must not be negative, got {0}")]
    NegativeInput(f64),
    #[error("value {0} does not fit in a timestamp")]
    OutOfRange(f64),
    #[error("tempo must be above 0 and at most 655.35 bpm, got {0}")]
    InvalidTempo(f64),
    #[error("sample rate must be non-zero")]
    InvalidSampleRate,
}

/// Tempo in hundredths of a beat per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Bpm(u16);

impl Bpm {
    /// Truncates to hundredths. Fails for non-finite, zero or negative
    /// tempos and for anything above 655.35 bpm.
    pub fn new(bpm: f64) -> Result<Self, TimestampError> {
        let cents = bpm * CENTS_PER_BEAT as f64;
        if !cents.is_finite() || cents < 1.0 || cents > u16::MAX as f64 {
            return Err(TimestampError::InvalidTempo(bpm));
        }
        Ok(Self(cents as u16))
    }

    pub fn from_cents(cents: u16) -> Result<Self, TimestampError> {
        if cents == 0 {
            return Err(TimestampError::InvalidTempo(0.0));
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> u16 {
        self.0
    }

    pub fn get(self) -> f64 {
        self.0 as f64 / CENTS_PER_BEAT as f64
    }
}

impl Default for Bpm {
    fn default() -> Self {
        Self(120 * CENTS_PER_BEAT as u16)
    }
}

impl TryFrom<f64> for Bpm {
    type Error = TimestampError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Bpm> for f64 {
    fn from(bpm: Bpm) -> Self {
        bpm.get()
    }
}

impl fmt::Display for Bpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} bpm", self.get())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp {
    beat_units: u32,
}

impl Timestamp {
    pub const fn zero() -> Self {
        Self { beat_units: 0 }
    }

    /// The largest representable position. Meant for comparisons; arithmetic
    /// and sample conversion on it are expected to overflow.
    pub const fn infinity() -> Self {
        Self {
            beat_units: u32::MAX,
        }
    }

    pub const fn from_beat_units(beat_units: u32) -> Self {
        Self { beat_units }
    }

    pub fn from_beats(beats: u32) -> Result<Self, TimestampError> {
        beats
            .checked_mul(BEAT_UNITS_PER_BEAT)
            .map(Self::from_beat_units)
            .ok_or(TimestampError::OutOfRange(beats as f64))
    }

    /// `beat_units = samples * bpm * 1024 / (sample_rate * 60)`, truncated.
    pub fn from_samples(samples: u64, sample_rate: u32, bpm: Bpm) -> Result<Self, TimestampError> {
        if sample_rate == 0 {
            return Err(TimestampError::InvalidSampleRate);
        }
        let numerator = samples as u128 * bpm.cents() as u128 * BEAT_UNITS_PER_BEAT as u128;
        let denominator = sample_rate as u128 * SECONDS_PER_MINUTE * CENTS_PER_BEAT;
        let beat_units = numerator / denominator;
        u32::try_from(beat_units)
            .map(Self::from_beat_units)
            .map_err(|_| TimestampError::OutOfRange(samples as f64))
    }

    pub const fn beat_units(self) -> u32 {
        self.beat_units
    }

    /// Whole beats, truncated.
    pub const fn beats(self) -> u32 {
        self.beat_units / BEAT_UNITS_PER_BEAT
    }

    pub fn beats_f64(self) -> f64 {
        self.beat_units as f64 / BEAT_UNITS_PER_BEAT as f64
    }

    /// `samples = beat_units * sample_rate * 60 / (bpm * 1024)`, truncated.
    pub fn samples(self, sample_rate: u32, bpm: Bpm) -> Result<u64, TimestampError> {
        let numerator = self.beat_units as u128 * sample_rate as u128 * SECONDS_PER_MINUTE
            * CENTS_PER_BEAT;
        let denominator = bpm.cents() as u128 * BEAT_UNITS_PER_BEAT as u128;
        u64::try_from(numerator / denominator).map_err(|_| TimestampError::Overflow)
    }

    pub fn add(self, other: Self) -> Result<Self, TimestampError> {
        self.beat_units
            .checked_add(other.beat_units)
            .map(Self::from_beat_units)
            .ok_or(TimestampError::Overflow)
    }

    /// Fails instead of clamping when `other > self`.
    pub fn sub(self, other: Self) -> Result<Self, TimestampError> {
        self.beat_units
            .checked_sub(other.beat_units)
            .map(Self::from_beat_units)
            .ok_or(TimestampError::Underflow)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self::from_beat_units(self.beat_units.saturating_sub(other.beat_units))
    }

    /// Multiplies by `scalar` truncated to an integer. Negative and NaN
    /// scalars are rejected, as are scalars beyond `u32::MAX`.
    pub fn mul(self, scalar: f64) -> Result<Self, TimestampError> {
        if scalar.is_nan() || scalar < 0.0 {
            return Err(TimestampError::NegativeInput(scalar));
        }
        if scalar > u32::MAX as f64 {
            return Err(TimestampError::OutOfRange(scalar));
        }
        self.beat_units
            .checked_mul(scalar as u32)
            .map(Self::from_beat_units)
            .ok_or(TimestampError::Overflow)
    }

    pub fn is_infinity(self) -> bool {
        self.beat_units == u32::MAX
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            return f.write_str("inf");
        }
        let frac = self.beat_units % BEAT_UNITS_PER_BEAT;
        if frac == 0 {
            write!(f, "{} beats", self.beats())
        } else {
            write!(f, "{} {}/{} beats", self.beats(), frac, BEAT_UNITS_PER_BEAT)
        }
    }
}
