//! The realtime renderer.
//!
//! Runs inside the audio callback. It never allocates, frees, locks or logs:
//! commands are applied between blocks and returned through the garbage
//! queue, and results leave through atomics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cadence_rt::{
    AudioProcessor, EventReceiver, EventSender, InterleavedAudioBuffer, TransportState,
};

use crate::bridge::{RtClip, RtCommand, RtTrack, TrackTarget};
use crate::mixer::meter::{decay_per_sample, MeterAccumulator, MeterSlot};
use crate::mixer::pan::apply_gain;
use crate::timestamp::{Bpm, Timestamp};

pub(crate) struct RenderSettings {
    pub sample_rate: u32,
    pub bpm: Bpm,
    pub max_block_frames: usize,
    pub track_capacity: usize,
    pub long_peak_decay_db_per_second: f32,
}

pub(crate) struct MasterBus {
    pub volume: f32,
    pub panning: f32,
    pub meter_slot: Arc<MeterSlot>,
    meter: MeterAccumulator,
}

impl MasterBus {
    pub fn new(volume: f32, panning: f32, meter_slot: Arc<MeterSlot>) -> Self {
        Self {
            volume,
            panning,
            meter_slot,
            meter: MeterAccumulator::default(),
        }
    }
}

pub(crate) struct Renderer {
    commands: EventReceiver<RtCommand>,
    garbage: EventSender<RtCommand>,
    transport: TransportState,
    sample_rate: u32,
    bpm: Bpm,
    tracks: Vec<RtTrack>,
    master: MasterBus,
    /// Interleaved stereo scratch for one track.
    track_buf: Vec<f32>,
    /// Interleaved stereo mix bus.
    mix_buf: Vec<f32>,
    max_block_frames: usize,
    peak_decay_per_sample: f32,
    playhead: Arc<AtomicU32>,
    /// Sample and beat position of the last jump. Published as is until the
    /// transport moves off that sample.
    anchor: Option<(u64, Timestamp)>,
}

impl Renderer {
    pub fn new(
        settings: RenderSettings,
        commands: EventReceiver<RtCommand>,
        garbage: EventSender<RtCommand>,
        master: MasterBus,
        playhead: Arc<AtomicU32>,
    ) -> Self {
        let max_block_frames = settings.max_block_frames.max(1);
        Self {
            commands,
            garbage,
            transport: TransportState::new(),
            sample_rate: settings.sample_rate,
            bpm: settings.bpm,
            tracks: Vec::with_capacity(settings.track_capacity),
            master,
            track_buf: vec![0.0; max_block_frames * 2],
            mix_buf: vec![0.0; max_block_frames * 2],
            max_block_frames,
            peak_decay_per_sample: decay_per_sample(
                settings.long_peak_decay_db_per_second,
                settings.sample_rate,
            ),
            playhead,
            anchor: None,
        }
    }

    /// Applies queued commands. Bounded by the queue capacity, and stops
    /// early when the garbage queue has no room for the spent command.
    fn drain_commands(&mut self) {
        for _ in 0..self.commands.capacity() {
            if self.garbage.free_slots() == 0 {
                break;
            }
            let Some(mut command) = self.commands.try_pop() else {
                break;
            };
            self.apply(&mut command);
            // Cannot fail: a free slot was checked above and this is the only producer.
            let _ = self.garbage.try_push(command);
        }
    }

    fn track_index(&self, key: u32) -> Option<usize> {
        self.tracks.binary_search_by_key(&key, |track| track.key).ok()
    }

    fn apply(&mut self, command: &mut RtCommand) {
        match command {
            RtCommand::Transport(transport) => self.transport.apply(*transport),
            RtCommand::JumpTo { samples, position } => self.jump(*samples, *position),
            RtCommand::SetVolume { target, value } => match *target {
                TrackTarget::Master => self.master.volume = *value,
                TrackTarget::Audio(key) => {
                    if let Some(index) = self.track_index(key) {
                        self.tracks[index].volume = *value;
                    }
                }
            },
            RtCommand::SetPanning { target, value } => match *target {
                TrackTarget::Master => self.master.panning = *value,
                TrackTarget::Audio(key) => {
                    if let Some(index) = self.track_index(key) {
                        self.tracks[index].panning = *value;
                    }
                }
            },
            RtCommand::ReserveTracks { storage } => {
                storage.clear();
                storage.extend(self.tracks.drain(..));
                std::mem::swap(&mut self.tracks, storage);
            }
            RtCommand::InsertTracks(incoming) => {
                for track in incoming.drain(..) {
                    let index = self.tracks.partition_point(|t| t.key < track.key);
                    self.tracks.insert(index, track);
                }
            }
            RtCommand::RemoveTracks { keys, graveyard } => {
                for key in keys.iter() {
                    if let Some(index) = self.track_index(*key) {
                        graveyard.push(self.tracks.remove(index));
                    }
                }
            }
            RtCommand::ReplaceClips { track, clips } => {
                if let Some(index) = self.track_index(*track) {
                    std::mem::swap(&mut self.tracks[index].clips, clips);
                }
            }
            RtCommand::ReplaceClipsMany(lists) => self.swap_clip_lists(lists),
            RtCommand::Retime { bpm, clips } => {
                let position = self.position();
                let remapped = position
                    .samples(self.sample_rate, *bpm)
                    .unwrap_or_else(|_| self.transport.position_samples());
                self.jump(remapped, position);
                self.bpm = *bpm;
                self.swap_clip_lists(clips);
            }
            RtCommand::InjectFault => panic!("injected realtime fault"),
        }
    }

    fn swap_clip_lists(&mut self, lists: &mut [(u32, Box<[RtClip]>)]) {
        for (key, clips) in lists.iter_mut() {
            if let Some(index) = self.track_index(*key) {
                std::mem::swap(&mut self.tracks[index].clips, clips);
            }
        }
    }

    fn render_block(&mut self, out: &mut [f32], channels: usize) {
        let frames = out.len() / channels;
        let stereo = frames * 2;
        let playing = self.transport.is_playing();
        let block_start = self.transport.position_samples();
        let mix = &mut self.mix_buf[..stereo];
        mix.fill(0.0);

        for track in self.tracks.iter_mut() {
            let scratch = &mut self.track_buf[..stereo];
            scratch.fill(0.0);
            if playing {
                render_clips(&track.clips, block_start, self.sample_rate, scratch);
            }
            apply_gain(scratch, track.volume, track.panning);
            track.meter.measure(scratch);
            for (bus, sample) in mix.iter_mut().zip(scratch.iter()) {
                *bus += *sample;
            }
        }

        apply_gain(mix, self.master.volume, self.master.panning);
        self.master.meter.measure(mix);
        write_output(mix, out, channels);
        self.transport.advance(frames as u64);
    }

    fn jump(&mut self, samples: u64, position: Timestamp) {
        self.transport
            .apply(cadence_rt::TransportCommand::JumpTo { samples });
        self.anchor = Some((samples, position));
    }

    /// Beat position of the playhead at the current tempo, truncated unless
    /// it still rests where the last jump put it.
    fn position(&self) -> Timestamp {
        let samples = self.transport.position_samples();
        match self.anchor {
            Some((anchored, position)) if anchored == samples => position,
            _ => Timestamp::from_samples(samples, self.sample_rate, self.bpm)
                .unwrap_or(Timestamp::infinity()),
        }
    }

    fn publish_playhead(&mut self) {
        let position = self.position();
        if self
            .anchor
            .is_some_and(|(samples, _)| samples != self.transport.position_samples())
        {
            self.anchor = None;
        }
        self.playhead.store(position.beat_units(), Ordering::Release);
    }
}

impl AudioProcessor for Renderer {
    fn process(&mut self, buffer: &mut InterleavedAudioBuffer<'_>) {
        self.drain_commands();

        for track in self.tracks.iter_mut() {
            track.meter.begin();
        }
        self.master.meter.begin();

        let channels = buffer.channels.max(1);
        let chunk = self.max_block_frames * channels;
        let frames = buffer.frames;
        let usable = frames * channels;
        for block in buffer.outputs[..usable].chunks_mut(chunk) {
            self.render_block(block, channels);
        }
        buffer.outputs[usable..].fill(0.0);

        let decay = self.peak_decay_per_sample.powi(frames.min(i32::MAX as usize) as i32);
        for track in self.tracks.iter_mut() {
            track.meter.publish(&track.meter_slot, decay);
        }
        self.master.meter.publish(&self.master.meter_slot, decay);
        self.publish_playhead();
    }
}

/// Adds every clip sounding in `[block_start, block_start + frames)` to the
/// interleaved stereo `out`.
fn render_clips(clips: &[RtClip], block_start: u64, sample_rate: u32, out: &mut [f32]) {
    let frames = (out.len() / 2) as u64;
    let block_end = block_start + frames;
    for clip in clips {
        if clip.start >= block_end {
            break;
        }
        if clip.end <= block_start {
            continue;
        }
        let from = clip.start.max(block_start);
        let to = clip.end.min(block_end);
        let (left, right) = clip.audio.stereo();
        let source_rate = clip.audio.sample_rate();

        if source_rate == sample_rate {
            for position in from..to {
                let source = (clip.offset + (position - clip.start)) as usize;
                let frame = (position - block_start) as usize * 2;
                if source < left.len() {
                    out[frame] += left[source];
                    out[frame + 1] += right[source];
                }
            }
        } else {
            let step = source_rate as f64 / sample_rate as f64;
            for position in from..to {
                let source = clip.offset as f64 + (position - clip.start) as f64 * step;
                let frame = (position - block_start) as usize * 2;
                out[frame] += interpolate(left, source);
                out[frame + 1] += interpolate(right, source);
            }
        }
    }
}

/// Linear interpolation; reads past the end are silence.
#[inline]
fn interpolate(samples: &[f32], position: f64) -> f32 {
    let index = position as usize;
    let frac = (position - index as f64) as f32;
    let a = samples.get(index).copied().unwrap_or(0.0);
    let b = samples.get(index + 1).copied().unwrap_or(0.0);
    a + (b - a) * frac
}

/// Maps the stereo mix onto the device channel layout.
fn write_output(mix: &[f32], out: &mut [f32], channels: usize) {
    for (frame, pair) in out.chunks_exact_mut(channels).zip(mix.chunks_exact(2)) {
        match channels {
            1 => frame[0] = (pair[0] + pair[1]) * 0.5,
            _ => {
                frame[0] = pair[0];
                frame[1] = pair[1];
                frame[2..].fill(0.0);
            }
        }
    }
}
