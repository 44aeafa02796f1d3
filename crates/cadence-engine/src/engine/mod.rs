//! The control-thread facade.
//!
//! [`Engine`] owns every entity table and is the only way to reach them.
//! Mutations are planned against the current state, shipped to the render
//! thread, and committed locally only once the command was accepted, so a
//! failing call never leaves anything half changed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cadence_io::{
    AudioBackend, AudioStream, CpalBackend, DeviceId, ManualBackend, ManualDriver, NullBackend,
    StreamConfig,
};
use cadence_rt::{CallbackHandle, EventQueue, TransportCommand};
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, RtCommand};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fault::{install_panic_hook, process_poisoned, FaultGuard};
use crate::handle::EngineId;
use crate::media::{Decoder, StoredAudio, SymphoniaDecoder};
use crate::mixer::Mixer;
use crate::render::{MasterBus, RenderSettings, Renderer};
use crate::table::ObjectTable;
use crate::timeline::ClipData;
use crate::timestamp::{Bpm, Timestamp};

mod clips;
mod tracks;

pub use clips::StoredClipInfo;

pub(crate) struct StoredEntry {
    pub audio: Arc<StoredAudio>,
    pub path: Option<PathBuf>,
}

pub(crate) struct EngineInner {
    pub id: EngineId,
    pub config: EngineConfig,
    pub stream_config: StreamConfig,
    pub device: DeviceId,
    pub bpm: Bpm,
    pub playing: bool,
    stream: Box<dyn AudioStream>,
    callback: CallbackHandle,
    pub bridge: Bridge,
    playhead: Arc<AtomicU32>,
    pub mixer: Mixer,
    pub clips: ObjectTable<ClipData>,
    pub stored: ObjectTable<StoredEntry>,
    pub decoder: Box<dyn Decoder>,
}

impl EngineInner {
    /// Stops the stream and waits out the last callback before any state
    /// the renderer reads is released.
    fn shutdown(self) {
        if let Err(err) = self.stream.stop() {
            warn!(engine = %self.id, %err, "failed to stop output stream");
        }
        drop(self.stream);
        self.callback.retire();
        info!(engine = %self.id, "engine closed");
    }
}

/// A running audio engine bound to one output stream.
pub struct Engine {
    id: EngineId,
    poisoned: Arc<AtomicBool>,
    inner: Option<EngineInner>,
}

impl Engine {
    /// Opens an output stream on `backend` and starts rendering.
    pub fn new(config: EngineConfig, backend: &dyn AudioBackend) -> Result<Self> {
        config.validate()?;
        let bpm = config.tempo()?;
        let device = match &config.device {
            Some(device) if !device.is_default() => device.clone(),
            _ => backend.default_output()?,
        };
        backend.check_config(&device, &config.output)?;

        let id = EngineId::next();
        let poisoned = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = EventQueue::new::<RtCommand>(config.command_queue_capacity);
        let (garbage_tx, garbage) = EventQueue::new::<RtCommand>(config.command_queue_capacity);

        let mixer = Mixer::new(config.initial_track_capacity);
        let playhead = Arc::new(AtomicU32::new(0));
        let master = MasterBus::new(
            mixer.master.params.volume,
            mixer.master.params.panning,
            Arc::clone(&mixer.master.meter),
        );
        let renderer = Renderer::new(
            RenderSettings {
                sample_rate: config.output.sample_rate,
                bpm,
                max_block_frames: config.max_block_frames,
                track_capacity: config.initial_track_capacity,
                long_peak_decay_db_per_second: config.meter.long_peak_decay_db_per_second,
            },
            command_rx,
            garbage_tx,
            master,
            Arc::clone(&playhead),
        );
        let callback = CallbackHandle::new(Box::new(FaultGuard::new(
            id,
            renderer,
            Arc::clone(&poisoned),
        )));

        install_panic_hook();
        let stream = backend.open_output_stream(&device, &config.output, callback.clone())?;
        if let Err(err) = stream.start() {
            callback.retire();
            return Err(err.into());
        }
        info!(
            engine = %id,
            backend = backend.name(),
            device = %device,
            output = %config.output,
            bpm = %bpm,
            "engine started"
        );

        let inner = EngineInner {
            id,
            stream_config: config.output.clone(),
            device,
            bpm,
            playing: false,
            stream,
            callback,
            bridge: Bridge::new(commands, garbage, config.initial_track_capacity),
            playhead,
            mixer,
            clips: ObjectTable::new(),
            stored: ObjectTable::new(),
            decoder: Box::new(SymphoniaDecoder::new()),
            config,
        };
        Ok(Self {
            id,
            poisoned,
            inner: Some(inner),
        })
    }

    /// Uses the host audio system. Without the `cpal` feature this fails
    /// with a backend error.
    pub fn with_default_backend(config: EngineConfig) -> Result<Self> {
        Self::new(config, &CpalBackend::new())
    }

    /// An engine on a paced null device, for running without hardware.
    pub fn dummy() -> Result<Self> {
        Self::dummy_with(EngineConfig::default())
    }

    pub fn dummy_with(config: EngineConfig) -> Result<Self> {
        Self::new(config, &NullBackend::new())
    }

    /// An engine whose render callbacks run only when the returned driver
    /// asks for audio.
    pub fn manual(config: EngineConfig) -> Result<(Self, ManualDriver)> {
        let (backend, driver) = ManualBackend::new();
        let engine = Self::new(config, &backend)?;
        Ok((engine, driver))
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Stops rendering and releases all engine state. Every later call on
    /// the engine or its handles fails.
    pub fn close(&mut self) -> Result<()> {
        let inner = self.inner.take().ok_or(EngineError::EngineClosed)?;
        inner.shutdown();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// `true` once the render thread crashed, for this engine alone or for
    /// the whole process.
    pub fn poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire) || process_poisoned()
    }

    fn state(&self) -> Result<&EngineInner> {
        let inner = self.inner.as_ref().ok_or(EngineError::EngineClosed)?;
        if self.poisoned() {
            return Err(EngineError::Poisoned);
        }
        Ok(inner)
    }

    fn state_mut(&mut self) -> Result<&mut EngineInner> {
        if self.inner.is_none() {
            return Err(EngineError::EngineClosed);
        }
        if self.poisoned() {
            return Err(EngineError::Poisoned);
        }
        let inner = self.inner.as_mut().ok_or(EngineError::EngineClosed)?;
        inner.bridge.collect_garbage();
        Ok(inner)
    }

    pub fn config(&self) -> Result<&EngineConfig> {
        Ok(&self.state()?.config)
    }

    /// The configuration the output stream was opened with.
    pub fn stream_config(&self) -> Result<&StreamConfig> {
        Ok(&self.state()?.stream_config)
    }

    pub fn device(&self) -> Result<&DeviceId> {
        Ok(&self.state()?.device)
    }

    /// Replaces the collaborator used by [`Engine::import_audio_clip`].
    pub fn set_decoder(&mut self, decoder: impl Decoder + 'static) -> Result<()> {
        self.state_mut()?.decoder = Box::new(decoder);
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        let inner = self.state_mut()?;
        inner
            .bridge
            .send(RtCommand::Transport(TransportCommand::Play))?;
        inner.playing = true;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let inner = self.state_mut()?;
        inner
            .bridge
            .send(RtCommand::Transport(TransportCommand::Pause))?;
        inner.playing = false;
        Ok(())
    }

    pub fn is_playing(&self) -> Result<bool> {
        Ok(self.state()?.playing)
    }

    /// Moves the playhead. [`Engine::playhead`] reflects the jump once the
    /// next buffer has been rendered.
    pub fn jump_to(&mut self, position: Timestamp) -> Result<()> {
        let inner = self.state_mut()?;
        let samples = position.samples(inner.stream_config.sample_rate, inner.bpm)?;
        inner
            .bridge
            .send(RtCommand::JumpTo { samples, position })?;
        debug!(engine = %inner.id, %position, samples, "jump");
        Ok(())
    }

    /// The last position published by the render thread.
    pub fn playhead(&self) -> Result<Timestamp> {
        let inner = self.state()?;
        Ok(Timestamp::from_beat_units(
            inner.playhead.load(Ordering::Acquire),
        ))
    }

    pub fn bpm(&self) -> Result<Bpm> {
        Ok(self.state()?.bpm)
    }

    /// Changes the tempo. Clips that follow their source length change
    /// their beat length with it; the call fails if that would make any of
    /// them overlap.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        let bpm = Bpm::new(bpm)?;
        let inner = self.state_mut()?;
        let mut lists = Vec::with_capacity(inner.mixer.tracks.len());
        for (track, data) in inner.mixer.tracks.iter() {
            let entries = inner.track_entries(track, &data.clips, &[])?;
            let plan = inner.plan_clips(track, entries, bpm, &[])?;
            lists.push((track, plan.clips));
        }
        inner.bridge.send(RtCommand::Retime { bpm, clips: lists })?;
        info!(engine = %inner.id, from = %inner.bpm, to = %bpm, "tempo changed");
        inner.bpm = bpm;
        Ok(())
    }

    /// Makes the render callback panic. The panic is caught at the
    /// callback boundary and reported like any other realtime fault.
    #[doc(hidden)]
    pub fn simulate_realtime_fault(&mut self) -> Result<()> {
        self.state_mut()?.bridge.send(RtCommand::InjectFault)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> (Engine, ManualDriver) {
        Engine::manual(EngineConfig::default()).unwrap()
    }

    #[test]
    fn close_is_not_repeatable() {
        let (mut engine, driver) = manual();
        assert!(driver.is_running());
        engine.close().unwrap();
        assert!(engine.is_closed());
        assert!(!driver.is_running());
        assert!(matches!(engine.close(), Err(EngineError::EngineClosed)));
        assert!(matches!(engine.play(), Err(EngineError::EngineClosed)));
    }

    #[test]
    fn unsupported_output_is_rejected() {
        let mut config = EngineConfig::default();
        config.output.sample_format = cadence_io::SampleFormat::I16;
        let err = Engine::manual(config).err().unwrap();
        assert!(matches!(
            err,
            EngineError::Backend(cadence_io::BackendError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn playhead_follows_jumps_after_a_buffer() {
        let (mut engine, mut driver) = manual();
        let target = Timestamp::from_beats(4).unwrap();
        engine.jump_to(target).unwrap();
        assert_eq!(engine.playhead().unwrap(), Timestamp::zero());
        driver.render(64);
        assert_eq!(engine.playhead().unwrap(), target);
    }

    #[test]
    fn playing_advances_the_playhead() {
        let (mut engine, mut driver) = manual();
        engine.play().unwrap();
        assert!(engine.is_playing().unwrap());
        // One beat at 120 bpm and 48 kHz.
        driver.render(24_000);
        assert_eq!(engine.playhead().unwrap(), Timestamp::from_beats(1).unwrap());

        engine.pause().unwrap();
        driver.render(24_000);
        assert_eq!(engine.playhead().unwrap(), Timestamp::from_beats(1).unwrap());
    }

    #[test]
    fn tempo_change_keeps_musical_position() {
        let (mut engine, mut driver) = manual();
        engine.jump_to(Timestamp::from_beats(2).unwrap()).unwrap();
        engine.set_bpm(60.0).unwrap();
        driver.render(16);
        assert_eq!(engine.bpm().unwrap(), Bpm::new(60.0).unwrap());
        assert_eq!(engine.playhead().unwrap(), Timestamp::from_beats(2).unwrap());
        assert!(engine.set_bpm(-1.0).is_err());
    }
}
