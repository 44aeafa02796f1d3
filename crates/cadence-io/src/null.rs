//! Backends that need no sound card.
//!
//! [`NullBackend`] paces render callbacks in real time on its own thread and
//! discards the output. [`ManualBackend`] hands the callback to a
//! [`ManualDriver`] so tests and offline rendering pull blocks on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cadence_rt::{mark_realtime_thread, CallbackHandle};
use parking_lot::Mutex;

use super::{
    render_interleaved, AudioBackend, AudioStream, BackendError, DeviceId, DeviceInfo,
    OutputConfigRange, Result, SampleFormat, StreamConfig,
};

const NULL_DEVICE: &str = "null";
const MANUAL_DEVICE: &str = "manual";
const DEFAULT_BLOCK_FRAMES: u32 = 512;
const MAX_CHANNELS: u16 = 8;

fn f32_ranges() -> Vec<OutputConfigRange> {
    (1..=MAX_CHANNELS)
        .map(|channels| OutputConfigRange {
            channels,
            sample_format: SampleFormat::F32,
            sample_rate: 8_000..=192_000,
            buffer_size: Some(16..=8192),
        })
        .collect()
}

fn check_device(device: &DeviceId, expected: &str) -> Result<()> {
    if device.is_default() || device.0 == expected {
        Ok(())
    } else {
        Err(BackendError::DeviceNotFound(device.0.clone()))
    }
}

/// A device that consumes audio at wall-clock pace and throws it away.
#[derive(Debug, Default, Clone)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            id: DeviceId(NULL_DEVICE.into()),
            name: "Null output".into(),
            is_default_output: true,
        }])
    }

    fn default_output(&self) -> Result<DeviceId> {
        Ok(DeviceId(NULL_DEVICE.into()))
    }

    fn output_config_ranges(&self, device: &DeviceId) -> Result<Vec<OutputConfigRange>> {
        check_device(device, NULL_DEVICE)?;
        Ok(f32_ranges())
    }

    fn open_output_stream(
        &self,
        device: &DeviceId,
        config: &StreamConfig,
        callback: CallbackHandle,
    ) -> Result<Box<dyn AudioStream>> {
        self.check_config(device, config)?;
        Ok(Box::new(NullStream {
            config: config.clone(),
            callback,
            worker: Mutex::new(None),
        }))
    }
}

struct NullWorker {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct NullStream {
    config: StreamConfig,
    callback: CallbackHandle,
    worker: Mutex<Option<NullWorker>>,
}

impl NullStream {
    fn spawn(&self) -> Result<NullWorker> {
        let running = Arc::new(AtomicBool::new(true));
        let channels = self.config.channels as usize;
        let sample_rate = self.config.sample_rate;
        let frames = self.config.buffer_size.unwrap_or(DEFAULT_BLOCK_FRAMES) as usize;
        let period = Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64);
        let callback = self.callback.clone();
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("cadence-null-output".into())
            .spawn(move || {
                mark_realtime_thread();
                let mut buffer = vec![0.0f32; frames * channels];
                let mut deadline = Instant::now();
                while flag.load(Ordering::Acquire) {
                    render_interleaved(&callback, &mut buffer, channels, sample_rate);
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
            })
            .map_err(|err| BackendError::Backend(err.to_string()))?;
        Ok(NullWorker { running, thread })
    }

    fn halt(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.running.store(false, Ordering::Release);
            if worker.thread.join().is_err() {
                tracing::error!("null output thread panicked");
            }
        }
    }
}

impl AudioStream for NullStream {
    fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(self.spawn()?);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.halt();
        Ok(())
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.halt();
    }
}

#[derive(Default)]
struct ManualShared {
    stream: Mutex<Option<ManualStreamState>>,
}

struct ManualStreamState {
    config: StreamConfig,
    callback: CallbackHandle,
    running: bool,
}

/// A backend whose single stream is driven by a [`ManualDriver`].
#[derive(Default, Clone)]
pub struct ManualBackend {
    shared: Arc<ManualShared>,
}

impl ManualBackend {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, ManualDriver) {
        let backend = Self::default();
        let driver = ManualDriver {
            shared: Arc::clone(&backend.shared),
            scratch: Vec::new(),
        };
        (backend, driver)
    }
}

impl AudioBackend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            id: DeviceId(MANUAL_DEVICE.into()),
            name: "Manual output".into(),
            is_default_output: true,
        }])
    }

    fn default_output(&self) -> Result<DeviceId> {
        Ok(DeviceId(MANUAL_DEVICE.into()))
    }

    fn output_config_ranges(&self, device: &DeviceId) -> Result<Vec<OutputConfigRange>> {
        check_device(device, MANUAL_DEVICE)?;
        Ok(f32_ranges())
    }

    fn open_output_stream(
        &self,
        device: &DeviceId,
        config: &StreamConfig,
        callback: CallbackHandle,
    ) -> Result<Box<dyn AudioStream>> {
        self.check_config(device, config)?;
        let mut slot = self.shared.stream.lock();
        if slot.is_some() {
            return Err(BackendError::Backend(
                "manual backend supports a single open stream".into(),
            ));
        }
        *slot = Some(ManualStreamState {
            config: config.clone(),
            callback,
            running: false,
        });
        Ok(Box::new(ManualStream {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ManualStream {
    shared: Arc<ManualShared>,
}

impl ManualStream {
    fn set_running(&self, running: bool) {
        if let Some(state) = self.shared.stream.lock().as_mut() {
            state.running = running;
        }
    }
}

impl AudioStream for ManualStream {
    fn start(&self) -> Result<()> {
        self.set_running(true);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.set_running(false);
        Ok(())
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        self.shared.stream.lock().take();
    }
}

/// Pulls render callbacks from a [`ManualBackend`] stream on the calling
/// thread. Returns silence when no stream is open or running.
pub struct ManualDriver {
    shared: Arc<ManualShared>,
    scratch: Vec<f32>,
}

impl ManualDriver {
    /// Channel count and sample rate of the open stream.
    pub fn stream_config(&self) -> Option<StreamConfig> {
        self.shared
            .stream
            .lock()
            .as_ref()
            .map(|state| state.config.clone())
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .stream
            .lock()
            .as_ref()
            .is_some_and(|state| state.running)
    }

    /// Renders into `out`, which must hold whole interleaved frames.
    /// Returns the number of frames rendered.
    pub fn render_into(&mut self, out: &mut [f32]) -> usize {
        let (callback, channels, sample_rate) = {
            let guard = self.shared.stream.lock();
            match guard.as_ref() {
                Some(state) if state.running => (
                    state.callback.clone(),
                    state.config.channels as usize,
                    state.config.sample_rate,
                ),
                _ => {
                    out.fill(0.0);
                    return 0;
                }
            }
        };
        render_interleaved(&callback, out, channels, sample_rate);
        out.len() / channels.max(1)
    }

    /// Renders `frames` frames and returns the interleaved block.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let channels = self
            .stream_config()
            .map(|config| config.channels as usize)
            .unwrap_or(1);
        let mut out = vec![0.0; frames * channels];
        self.render_into(&mut out);
        out
    }

    /// Renders `frames` frames in blocks of `block` and discards them.
    pub fn advance(&mut self, frames: usize, block: usize) {
        let channels = self
            .stream_config()
            .map(|config| config.channels as usize)
            .unwrap_or(1);
        let block = block.max(1);
        let mut remaining = frames;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(block * channels, 0.0);
        while remaining > 0 {
            let now = remaining.min(block);
            self.render_into(&mut scratch[..now * channels]);
            remaining -= now;
        }
        self.scratch = scratch;
    }
}
