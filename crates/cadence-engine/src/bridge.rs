//! Messages crossing the control/realtime boundary.
//!
//! Every heap object the render thread touches is built on the control
//! thread and shipped in an [`RtCommand`]. After applying a command the
//! render thread sends it back on the garbage queue carrying whatever it
//! displaced, so memory is only ever freed on the control thread.

use std::sync::Arc;

use cadence_rt::{EventReceiver, EventSender, QueueError, TransportCommand};

use crate::error::EngineError;
use crate::media::StoredAudio;
use crate::mixer::meter::{MeterAccumulator, MeterSlot};
use crate::timestamp::{Bpm, Timestamp};

/// A clip resolved to stream sample positions.
#[derive(Debug, Clone)]
pub(crate) struct RtClip {
    pub key: u32,
    /// First output sample of the clip.
    pub start: u64,
    /// One past the last output sample.
    pub end: u64,
    /// Source frame (at the stored rate) that plays at `start`.
    pub offset: u64,
    pub audio: Arc<StoredAudio>,
}

#[derive(Debug)]
pub(crate) struct RtTrack {
    pub key: u32,
    pub volume: f32,
    pub panning: f32,
    /// Ordered by `start`.
    pub clips: Box<[RtClip]>,
    pub meter_slot: Arc<MeterSlot>,
    pub meter: MeterAccumulator,
}

impl RtTrack {
    pub fn new(
        key: u32,
        volume: f32,
        panning: f32,
        clips: Box<[RtClip]>,
        meter_slot: Arc<MeterSlot>,
    ) -> Self {
        Self {
            key,
            volume,
            panning,
            clips,
            meter_slot,
            meter: MeterAccumulator::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackTarget {
    Master,
    Audio(u32),
}

#[derive(Debug)]
pub(crate) enum RtCommand {
    Transport(TransportCommand),
    /// Moves the playhead to `samples`, remembering the beat position it
    /// was asked for so truncation never shows in the published playhead.
    JumpTo {
        samples: u64,
        position: Timestamp,
    },
    SetVolume {
        target: TrackTarget,
        value: f32,
    },
    SetPanning {
        target: TrackTarget,
        value: f32,
    },
    /// Replaces the track vector with `storage`, which has room for at
    /// least the current tracks plus any pending insertions.
    ReserveTracks {
        storage: Vec<RtTrack>,
    },
    InsertTracks(Vec<RtTrack>),
    /// Removed tracks are moved into `graveyard`, preallocated for `keys`.
    RemoveTracks {
        keys: Box<[u32]>,
        graveyard: Vec<RtTrack>,
    },
    ReplaceClips {
        track: u32,
        clips: Box<[RtClip]>,
    },
    ReplaceClipsMany(Vec<(u32, Box<[RtClip]>)>),
    /// Switches tempo, remapping the playhead, together with every clip list
    /// resolved at the new tempo.
    Retime {
        bpm: Bpm,
        clips: Vec<(u32, Box<[RtClip]>)>,
    },
    /// Panics inside the render callback. Exercises the fault monitor.
    InjectFault,
}

/// Control-side ends of the bridge.
pub(crate) struct Bridge {
    commands: EventSender<RtCommand>,
    garbage: EventReceiver<RtCommand>,
    track_capacity: usize,
    track_count: usize,
}

impl Bridge {
    pub fn new(
        commands: EventSender<RtCommand>,
        garbage: EventReceiver<RtCommand>,
        track_capacity: usize,
    ) -> Self {
        Self {
            commands,
            garbage,
            track_capacity,
            track_count: 0,
        }
    }

    /// Drops whatever the render thread has handed back.
    pub fn collect_garbage(&mut self) -> usize {
        let mut collected = 0;
        while let Some(command) = self.garbage.try_pop() {
            drop(command);
            collected += 1;
        }
        collected
    }

    pub fn send(&mut self, command: RtCommand) -> Result<(), EngineError> {
        self.submit(vec![command])
    }

    /// Pushes all commands or none of them, then updates the mirrored track
    /// bookkeeping.
    pub fn submit(&mut self, commands: Vec<RtCommand>) -> Result<(), EngineError> {
        self.collect_garbage();
        let free = self.commands.free_slots();
        if free < commands.len() {
            tracing::warn!(needed = commands.len(), free, "realtime command queue is full");
            return Err(EngineError::QueueFull);
        }
        for command in &commands {
            match *command {
                RtCommand::ReserveTracks { ref storage } => {
                    self.track_capacity = storage.capacity()
                }
                RtCommand::InsertTracks(ref tracks) => self.track_count += tracks.len(),
                RtCommand::RemoveTracks { ref keys, .. } => self.track_count -= keys.len(),
                _ => {}
            }
        }
        for command in commands {
            // Single producer: the free-slot check above cannot go stale.
            if let Err(QueueError::Full(_)) = self.commands.try_push(command) {
                return Err(EngineError::QueueFull);
            }
        }
        Ok(())
    }

    /// Commands that insert `tracks`, preceded by a storage reservation when
    /// the render thread's track vector would otherwise have to grow.
    pub fn insert_tracks(&self, tracks: Vec<RtTrack>) -> Vec<RtCommand> {
        let needed = self.track_count + tracks.len();
        let mut commands = Vec::with_capacity(2);
        if needed > self.track_capacity {
            let capacity = needed.max(self.track_capacity * 2);
            commands.push(RtCommand::ReserveTracks {
                storage: Vec::with_capacity(capacity),
            });
        }
        commands.push(RtCommand::InsertTracks(tracks));
        commands
    }

    pub fn remove_tracks(keys: Vec<u32>) -> RtCommand {
        let graveyard = Vec::with_capacity(keys.len());
        RtCommand::RemoveTracks {
            keys: keys.into_boxed_slice(),
            graveyard,
        }
    }
}
