//! Track metering.
//!
//! The render thread measures each callback into a [`MeterAccumulator`] and
//! publishes raw linear levels through a [`MeterSlot`]. The control thread
//! smooths RMS and applies [`meter_scale`] when the caller reads the meter.

use cadence_rt::SnapshotCell;

/// Range covered by [`meter_scale`]; quieter signals read as zero.
const METER_RANGE_DB: f32 = 60.0;

/// Perceptual scaling for meter display: linear gain to `0..=1` over the
/// top `METER_RANGE_DB` decibels. Values above unity gain scale above one.
pub fn meter_scale(value: f32) -> f32 {
    if !(value > 0.0) {
        return 0.0;
    }
    (1.0 + 20.0 * value.log10() / METER_RANGE_DB).max(0.0)
}

/// Inverse of [`meter_scale`] for positive inputs.
pub fn inverse_meter_scale(value: f32) -> f32 {
    if !(value > 0.0) {
        return 0.0;
    }
    10.0f32.powf((value - 1.0) * METER_RANGE_DB / 20.0)
}

/// Scaled meter levels for the left and right channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterReading {
    pub peak: [f32; 2],
    pub long_peak: [f32; 2],
    pub rms: [f32; 2],
}

const PEAK: usize = 0;
const LONG_PEAK: usize = 2;
const RMS: usize = 4;

/// Raw levels published by the render thread.
pub(crate) type MeterSlot = SnapshotCell<6>;

/// Render-side measurement state for one track.
#[derive(Debug, Default)]
pub(crate) struct MeterAccumulator {
    peak: [f32; 2],
    sum_squares: [f64; 2],
    frames: usize,
    long_peak: [f32; 2],
}

impl MeterAccumulator {
    pub fn begin(&mut self) {
        self.peak = [0.0; 2];
        self.sum_squares = [0.0; 2];
        self.frames = 0;
    }

    /// Measures an interleaved stereo block.
    pub fn measure(&mut self, block: &[f32]) {
        for frame in block.chunks_exact(2) {
            for (channel, &sample) in frame.iter().enumerate() {
                let magnitude = sample.abs();
                if magnitude > self.peak[channel] {
                    self.peak[channel] = magnitude;
                }
                self.sum_squares[channel] += (sample as f64) * (sample as f64);
            }
        }
        self.frames += block.len() / 2;
    }

    /// `decay` is the long-peak multiplier for the frames measured since
    /// [`begin`](Self::begin).
    pub fn publish(&mut self, slot: &MeterSlot, decay: f32) {
        let mut values = [0.0f32; 6];
        for channel in 0..2 {
            let rms = if self.frames == 0 {
                0.0
            } else {
                (self.sum_squares[channel] / self.frames as f64).sqrt() as f32
            };
            let long = (self.long_peak[channel] * decay).max(self.peak[channel]);
            self.long_peak[channel] = long;
            values[PEAK + channel] = self.peak[channel];
            values[LONG_PEAK + channel] = long;
            values[RMS + channel] = rms;
        }
        slot.publish(&values);
    }
}

/// Per-sample multiplier for a decay of `db_per_second`.
pub(crate) fn decay_per_sample(db_per_second: f32, sample_rate: u32) -> f32 {
    10.0f32.powf(-db_per_second / 20.0 / sample_rate.max(1) as f32)
}

/// Control-side RMS smoothing.
#[derive(Debug, Default, Clone)]
pub(crate) struct MeterSmoother {
    rms: [f32; 2],
}

impl MeterSmoother {
    pub fn read(&mut self, slot: &MeterSlot, smoothing: f32) -> MeterReading {
        let raw = slot.read();
        for channel in 0..2 {
            let target = raw[RMS + channel];
            self.rms[channel] += (target - self.rms[channel]) * smoothing;
        }
        MeterReading {
            peak: [meter_scale(raw[PEAK]), meter_scale(raw[PEAK + 1])],
            long_peak: [meter_scale(raw[LONG_PEAK]), meter_scale(raw[LONG_PEAK + 1])],
            rms: [meter_scale(self.rms[0]), meter_scale(self.rms[1])],
        }
    }

    pub fn snap(&mut self, slot: &MeterSlot) {
        let raw = slot.read();
        self.rms = [raw[RMS], raw[RMS + 1]];
    }
}
