use std::fmt;
use std::path::PathBuf;

use cadence_io::BackendError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::media::DecodeError;
use crate::timestamp::TimestampError;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// The kinds of entity an engine hands out handles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    AudioTrack,
    AudioClip,
    StoredClip,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::AudioTrack => "audio track",
            EntityKind::AudioClip => "audio clip",
            EntityKind::StoredClip => "stored clip",
        })
    }
}

/// Broad classes of failure, see [`EngineError::category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The engine was closed, or the entity (or its owner) deleted.
    UseAfterInvalidation,
    /// The request conflicts with engine invariants. Nothing was changed.
    ConstraintViolation,
    /// An external collaborator (decoder, device) failed.
    ResourceFailure,
    /// The realtime thread faulted and the engine is unusable.
    RealtimeFault,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is closed")]
    EngineClosed,
    #[error("engine crashed on the realtime thread and must be closed")]
    Poisoned,
    #[error("{kind} {key} has been deleted")]
    Deleted { kind: EntityKind, key: u32 },
    #[error("{kind} {key} belongs to deleted audio track {track}")]
    OwnerDeleted {
        kind: EntityKind,
        key: u32,
        track: u32,
    },
    #[error("{kind} {key} does not exist")]
    NotFound { kind: EntityKind, key: u32 },
    #[error("{kind} handle belongs to a different engine")]
    ForeignHandle { kind: EntityKind },
    #[error("clip would overlap clip {other} on audio track {track}")]
    Overlap { track: u32, other: u32 },
    #[error("key {key} appears more than once in the batch")]
    DuplicateKey { key: u32 },
    #[error("key {key} is already in use")]
    KeyInUse { key: u32 },
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("failed to import {path}")]
    Import {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("realtime command queue is full")]
    QueueFull,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::EngineClosed
            | EngineError::Deleted { .. }
            | EngineError::OwnerDeleted { .. } => ErrorCategory::UseAfterInvalidation,
            EngineError::Poisoned => ErrorCategory::RealtimeFault,
            EngineError::NotFound { .. }
            | EngineError::ForeignHandle { .. }
            | EngineError::Overlap { .. }
            | EngineError::DuplicateKey { .. }
            | EngineError::KeyInUse { .. }
            | EngineError::Timestamp(_)
            | EngineError::QueueFull
            | EngineError::Config(_) => ErrorCategory::ConstraintViolation,
            EngineError::Import { .. } | EngineError::Backend(_) => ErrorCategory::ResourceFailure,
        }
    }
}

/// A failed reconstruction. The unconsumed state tokens travel back with the
/// error so they can be retried.
#[derive(Debug, Error)]
#[error("reconstruction failed: {error}")]
pub struct ReconstructError<S: fmt::Debug> {
    pub error: EngineError,
    pub states: S,
}

impl<S: fmt::Debug> ReconstructError<S> {
    pub(crate) fn new(error: EngineError, states: S) -> Self {
        Self { error, states }
    }

    pub fn into_states(self) -> S {
        self.states
    }
}

impl<S: fmt::Debug> From<ReconstructError<S>> for EngineError {
    fn from(err: ReconstructError<S>) -> Self {
        err.error
    }
}
