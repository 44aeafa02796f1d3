//! The render callback contract between the engine and the output backends.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One device period of interleaved output.
pub struct InterleavedAudioBuffer<'a> {
    pub outputs: &'a mut [f32],
    pub channels: usize,
    /// Whole frames in `outputs`. A trailing partial frame is left alone.
    pub frames: usize,
    pub sample_rate: u32,
}

impl<'a> InterleavedAudioBuffer<'a> {
    pub fn new(outputs: &'a mut [f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = outputs.len() / channels;
        Self {
            outputs,
            channels,
            frames,
            sample_rate,
        }
    }

    pub fn silence(&mut self) {
        self.outputs.fill(0.0);
    }
}

/// Whatever fills output buffers on the audio thread.
pub trait AudioProcessor: Send {
    fn process(&mut self, buffer: &mut InterleavedAudioBuffer<'_>);
}

struct CallbackCell {
    processor: UnsafeCell<Box<dyn AudioProcessor>>,
    busy: AtomicBool,
    retired: AtomicBool,
}

unsafe impl Send for CallbackCell {}
unsafe impl Sync for CallbackCell {}

/// Shared between the engine and a backend stream; the backend calls
/// [`CallbackHandle::process`] once per device period.
///
/// Once [`CallbackHandle::retire`] returns, the processor is never entered
/// again and every later `process` call only writes silence.
#[derive(Clone)]
pub struct CallbackHandle {
    inner: Arc<CallbackCell>,
}

impl CallbackHandle {
    pub fn new(processor: Box<dyn AudioProcessor>) -> Self {
        Self {
            inner: Arc::new(CallbackCell {
                processor: UnsafeCell::new(processor),
                busy: AtomicBool::new(false),
                retired: AtomicBool::new(false),
            }),
        }
    }

    pub fn process(&self, buffer: &mut InterleavedAudioBuffer<'_>) {
        self.inner.busy.store(true, Ordering::SeqCst);
        if self.inner.retired.load(Ordering::SeqCst) {
            self.inner.busy.store(false, Ordering::SeqCst);
            buffer.silence();
            return;
        }
        // Safety: audio backends call this from the single thread associated
        // with the stream, and `retire` waits for `busy` before returning.
        unsafe {
            let processor = &mut *self.inner.processor.get();
            processor.process(buffer);
        }
        self.inner.busy.store(false, Ordering::SeqCst);
    }

    /// Stops the processor from being entered again and waits for an
    /// in-flight callback to leave. Called from the control thread only.
    pub fn retire(&self) {
        self.inner.retired.store(true, Ordering::SeqCst);
        while self.inner.busy.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
    }

    pub fn is_retired(&self) -> bool {
        self.inner.retired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(Arc<std::sync::atomic::AtomicUsize>);

    impl AudioProcessor for Counter {
        fn process(&mut self, buffer: &mut InterleavedAudioBuffer<'_>) {
            self.0.fetch_add(1, Ordering::Relaxed);
            buffer.outputs.fill(1.0);
        }
    }

    #[test]
    fn retired_handle_writes_silence() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handle = CallbackHandle::new(Box::new(Counter(Arc::clone(&calls))));
        let mut data = vec![0.5f32; 8];

        handle.process(&mut InterleavedAudioBuffer::new(&mut data, 2, 48_000));
        assert!(data.iter().all(|&s| s == 1.0));

        handle.retire();
        handle.process(&mut InterleavedAudioBuffer::new(&mut data, 2, 48_000));
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(handle.is_retired());
    }
}
