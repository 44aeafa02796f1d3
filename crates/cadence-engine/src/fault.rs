//! Realtime fault monitoring.
//!
//! A panic on the audio thread has no caller to return to. [`FaultGuard`]
//! catches it at the callback boundary, silences the output, poisons the
//! engine and broadcasts a [`CrashReport`] to whoever is waiting in
//! [`listen_for_crash`]. Panics on realtime threads that escape every guard
//! are reported by a process-wide hook and poison every engine.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use cadence_rt::{is_realtime_thread, AudioProcessor, InterleavedAudioBuffer};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::handle::EngineId;

/// Where a realtime fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultScope {
    /// Inside one engine's render callback. Only that engine is poisoned.
    Engine(EngineId),
    /// In shared realtime infrastructure. Every engine is poisoned.
    Process,
}

#[derive(Debug, Clone)]
pub struct CrashReport {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: String,
    pub scope: FaultScope,
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            FaultScope::Engine(id) => write!(f, "realtime fault in {id}: ")?,
            FaultScope::Process => f.write_str("realtime fault outside any engine: ")?,
        }
        f.write_str(&self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CrashReport {}

static PROCESS_POISONED: AtomicBool = AtomicBool::new(false);

/// `true` once a fault outside any engine has been reported.
pub fn process_poisoned() -> bool {
    PROCESS_POISONED.load(Ordering::Acquire)
}

type CrashOutcome = Result<(), CrashReport>;

#[derive(Default)]
struct CrashBus {
    listeners: Vec<Sender<CrashOutcome>>,
    /// A report nobody was listening for yet.
    pending: Option<CrashReport>,
}

static CRASH_BUS: Lazy<Mutex<CrashBus>> = Lazy::new(|| Mutex::new(CrashBus::default()));

fn broadcast(report: CrashReport) {
    tracing::error!(%report, backtrace = %report.backtrace, "realtime thread crashed");
    let mut bus = CRASH_BUS.lock();
    if bus.listeners.is_empty() {
        bus.pending.get_or_insert(report);
        return;
    }
    for listener in bus.listeners.drain(..) {
        let _ = listener.send(Err(report.clone()));
    }
}

/// Resolves with `Err` when a realtime fault is reported, or with `Ok` once
/// [`stop_listening_for_crash`] is called.
pub struct CrashListener {
    outcome: Receiver<CrashOutcome>,
}

impl CrashListener {
    /// Blocks until a crash or [`stop_listening_for_crash`].
    pub fn wait(self) -> CrashOutcome {
        self.outcome.recv().unwrap_or(Ok(()))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<CrashOutcome> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Ok(())),
        }
    }

    pub fn try_recv(&self) -> Option<CrashOutcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Ok(())),
        }
    }
}

pub fn listen_for_crash() -> CrashListener {
    install_panic_hook();
    let (tx, rx) = bounded(1);
    let mut bus = CRASH_BUS.lock();
    match bus.pending.take() {
        Some(report) => {
            let _ = tx.send(Err(report));
        }
        None => bus.listeners.push(tx),
    }
    CrashListener { outcome: rx }
}

/// Releases every pending [`CrashListener`] with `Ok(())`.
pub fn stop_listening_for_crash() {
    let mut bus = CRASH_BUS.lock();
    for listener in bus.listeners.drain(..) {
        let _ = listener.send(Ok(()));
    }
}

struct CapturedPanic {
    message: String,
    location: Option<String>,
    backtrace: String,
}

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<CapturedPanic>> = const { RefCell::new(None) };
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Installs the process-wide hook once. The previously installed hook keeps
/// running for every panic.
pub(crate) fn install_panic_hook() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            previous(info);
            if !is_realtime_thread() {
                return;
            }
            let captured = CapturedPanic {
                message: panic_message(info),
                location: info.location().map(|l| format!("{}:{}", l.file(), l.line())),
                backtrace: Backtrace::force_capture().to_string(),
            };
            if GUARD_DEPTH.with(Cell::get) > 0 {
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(captured));
            } else {
                PROCESS_POISONED.store(true, Ordering::Release);
                broadcast(CrashReport {
                    message: captured.message,
                    location: captured.location,
                    backtrace: captured.backtrace,
                    scope: FaultScope::Process,
                });
            }
        }));
    });
}

/// Wraps the renderer so a panic never unwinds into the audio backend.
pub(crate) struct FaultGuard<P> {
    engine: EngineId,
    inner: P,
    poisoned: Arc<AtomicBool>,
}

impl<P: AudioProcessor> FaultGuard<P> {
    pub fn new(engine: EngineId, inner: P, poisoned: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            inner,
            poisoned,
        }
    }
}

impl<P: AudioProcessor> AudioProcessor for FaultGuard<P> {
    fn process(&mut self, buffer: &mut InterleavedAudioBuffer<'_>) {
        if self.poisoned.load(Ordering::Relaxed) || process_poisoned() {
            buffer.silence();
            return;
        }
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.inner.process(buffer)));
        GUARD_DEPTH.with(|depth| depth.set(depth.get() - 1));

        if let Err(payload) = result {
            buffer.silence();
            self.poisoned.store(true, Ordering::Release);
            let captured = CAPTURED.with(|slot| slot.borrow_mut().take());
            let report = match captured {
                Some(captured) => CrashReport {
                    message: captured.message,
                    location: captured.location,
                    backtrace: captured.backtrace,
                    scope: FaultScope::Engine(self.engine),
                },
                None => CrashReport {
                    message: payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string()),
                    location: None,
                    backtrace: String::new(),
                    scope: FaultScope::Engine(self.engine),
                },
            };
            broadcast(report);
        }
    }
}
