//! Real-time primitives shared across the Cadence audio engine.
//!
//! Nothing in this crate knows about tracks or clips. It provides the pieces
//! the engine and the IO backends meet on: the render callback contract, the
//! bounded queues that cross the control/realtime boundary and the snapshot
//! cell the realtime thread publishes into.

pub mod callback;
pub mod queue;
pub mod snapshot;
pub mod thread;
pub mod transport;

pub use callback::{AudioProcessor, CallbackHandle, InterleavedAudioBuffer};
pub use queue::{EventQueue, EventReceiver, EventSender, QueueError};
pub use snapshot::SnapshotCell;
pub use thread::{is_realtime_thread, mark_realtime_thread, RealtimeScope};
pub use transport::{TransportCommand, TransportState};
