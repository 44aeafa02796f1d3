//! Single-slot, last-writer-wins publication from the realtime thread.

use std::sync::atomic::{fence, AtomicU32, Ordering};

/// A fixed-size block of `f32` values guarded by a sequence lock.
///
/// Exactly one thread may call [`SnapshotCell::publish`]. It never blocks and
/// never allocates. Readers retry until they observe a consistent copy, so a
/// reader can see a stale snapshot but never a torn one.
#[derive(Debug)]
pub struct SnapshotCell<const N: usize> {
    seq: AtomicU32,
    values: [AtomicU32; N],
}

impl<const N: usize> Default for SnapshotCell<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SnapshotCell<N> {
    pub fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            values: std::array::from_fn(|_| AtomicU32::new(0.0f32.to_bits())),
        }
    }

    /// Writer side. Realtime safe.
    pub fn publish(&self, values: &[f32; N]) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        for (slot, value) in self.values.iter().zip(values) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Reader side. Spins only while a write is in progress.
    pub fn read(&self) -> [f32; N] {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let out: [f32; N] =
                std::array::from_fn(|i| f32::from_bits(self.values[i].load(Ordering::Relaxed)));
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return out;
            }
        }
    }

    /// Number of completed publications, wrapping.
    pub fn version(&self) -> u32 {
        self.seq.load(Ordering::Acquire) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reads_last_published_values() {
        let cell = SnapshotCell::<3>::new();
        assert_eq!(cell.read(), [0.0; 3]);
        cell.publish(&[1.0, 2.0, 3.0]);
        cell.publish(&[4.0, 5.0, 6.0]);
        assert_eq!(cell.read(), [4.0, 5.0, 6.0]);
        assert_eq!(cell.version(), 2);
    }

    #[test]
    fn concurrent_reader_never_sees_torn_values() {
        let cell = Arc::new(SnapshotCell::<4>::new());
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 0..20_000u32 {
                    let v = i as f32;
                    cell.publish(&[v, v, v, v]);
                }
            })
        };
        for _ in 0..20_000 {
            let snapshot = cell.read();
            assert!(snapshot.iter().all(|&v| v == snapshot[0]));
        }
        writer.join().unwrap();
    }
}
