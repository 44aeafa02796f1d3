//! Realtime-side transport state.

/// Transport changes queued from the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Pause,
    JumpTo { samples: u64 },
}

/// Play state and playhead as seen by the render callback.
#[derive(Debug, Clone, Default)]
pub struct TransportState {
    playing: bool,
    position_samples: u64,
}

impl TransportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Play => self.playing = true,
            TransportCommand::Pause => self.playing = false,
            TransportCommand::JumpTo { samples } => self.position_samples = samples,
        }
    }

    /// Moves the playhead forward by `frames` when playing.
    pub fn advance(&mut self, frames: u64) {
        if self.playing {
            self.position_samples = self.position_samples.saturating_add(frames);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position_samples(&self) -> u64 {
        self.position_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_keeps_playhead() {
        let mut transport = TransportState::new();
        transport.advance(64);
        assert_eq!(transport.position_samples(), 0);

        transport.apply(TransportCommand::Play);
        transport.advance(64);
        transport.apply(TransportCommand::Pause);
        transport.advance(64);
        assert_eq!(transport.position_samples(), 64);

        transport.apply(TransportCommand::JumpTo { samples: 10 });
        assert_eq!(transport.position_samples(), 10);
        assert!(!transport.is_playing());
    }
}
