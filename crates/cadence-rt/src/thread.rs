//! Marking of realtime audio threads.
//!
//! Threads a backend owns for audio are marked for good with
//! [`mark_realtime_thread`]. Render passes that borrow someone else's thread
//! (offline bounce, tests) hold a [`RealtimeScope`] instead, so the mark and
//! the float mode only last for the callback. The engine's panic hook uses
//! the mark to tell a realtime fault from an ordinary control-thread panic.

use std::cell::Cell;

thread_local! {
    static REALTIME: Cell<bool> = const { Cell::new(false) };
}

/// Flags the current thread as a realtime audio thread and enables
/// flush-to-zero handling of denormals where the CPU supports it.
///
/// Cheap after the first call on a given thread.
pub fn mark_realtime_thread() {
    REALTIME.with(|flag| {
        if !flag.get() {
            flag.set(true);
            flush_denormals();
        }
    });
}

pub fn is_realtime_thread() -> bool {
    REALTIME.with(|flag| flag.get())
}

/// Marks the current thread realtime until dropped, then restores the
/// previous mark and float control state.
#[must_use = "the mark is cleared when the scope is dropped"]
pub struct RealtimeScope {
    was_realtime: bool,
    float_mode: FloatMode,
}

impl RealtimeScope {
    pub fn enter() -> Self {
        let was_realtime = REALTIME.with(|flag| flag.replace(true));
        let float_mode = FloatMode::save();
        flush_denormals();
        Self {
            was_realtime,
            float_mode,
        }
    }
}

impl Drop for RealtimeScope {
    fn drop(&mut self) {
        self.float_mode.restore();
        REALTIME.with(|flag| flag.set(self.was_realtime));
    }
}

// FTZ | DAZ
#[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
const DENORMAL_BITS: u32 = 0x8040;

#[derive(Clone, Copy)]
struct FloatMode {
    #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
    csr: u32,
}

impl FloatMode {
    #[allow(deprecated)]
    fn save() -> Self {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
        {
            // SAFETY: reading MXCSR has no side effects.
            let csr = unsafe { core::arch::x86_64::_mm_getcsr() };
            Self { csr }
        }
        #[cfg(not(all(target_arch = "x86_64", target_feature = "sse")))]
        {
            Self {}
        }
    }

    #[allow(deprecated)]
    fn restore(self) {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
        // SAFETY: writes back a value read from MXCSR on this thread.
        unsafe {
            core::arch::x86_64::_mm_setcsr(self.csr);
        }
    }

    #[cfg(test)]
    fn denormals_flushed() -> bool {
        #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
        {
            Self::save().csr & DENORMAL_BITS == DENORMAL_BITS
        }
        #[cfg(not(all(target_arch = "x86_64", target_feature = "sse")))]
        {
            false
        }
    }
}

#[allow(deprecated)]
fn flush_denormals() {
    #[cfg(all(target_arch = "x86_64", target_feature = "sse"))]
    // SAFETY: only sets the FTZ and DAZ bits of this thread's MXCSR.
    unsafe {
        use core::arch::x86_64::{_mm_getcsr, _mm_setcsr};
        _mm_setcsr(_mm_getcsr() | DENORMAL_BITS);
    }
}
