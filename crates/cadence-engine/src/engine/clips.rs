use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{Engine, EngineInner, StoredEntry};
use crate::bridge::{RtClip, RtCommand};
use crate::error::{EngineError, EntityKind, ReconstructError, Result};
use crate::handle::{AudioClip, AudioTrack, StoredClip};
use crate::media::StoredAudio;
use crate::timeline::{find_overlap, source_length, AudioClipState, ClipData, ClipLength, Span};
use crate::timestamp::{Bpm, Timestamp};

/// Facts about imported audio.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredClipInfo {
    pub key: u32,
    pub sample_rate: u32,
    /// Samples per channel.
    pub length: usize,
    pub channels: usize,
    pub path: Option<PathBuf>,
}

/// A track's clip layout after an edit, before it is committed.
pub(super) struct TrackPlan {
    /// Clip keys ordered by start.
    pub keys: Vec<u32>,
    pub clips: Box<[RtClip]>,
}

impl EngineInner {
    fn stored_entry(&self, key: u32) -> Result<&StoredEntry> {
        self.stored
            .get(key)
            .map_err(|err| err.for_entity(EntityKind::StoredClip, key))
    }

    fn stored_key(&self, stored: StoredClip) -> Result<u32> {
        let key = stored.key_for(self.id)?;
        self.stored_entry(key)?;
        Ok(key)
    }

    fn clip_data(&self, clip: AudioClip) -> Result<(u32, &ClipData)> {
        let key = clip.key_for(self.id)?;
        let data = self
            .clips
            .get(key)
            .map_err(|err| err.for_entity(EntityKind::AudioClip, key))?;
        Ok((key, data))
    }

    fn source_of(&self, data: &ClipData, bpm: Bpm) -> Result<Timestamp> {
        let entry = self.stored_entry(data.stored)?;
        Ok(source_length(&entry.audio, bpm)?)
    }

    /// Places a clip on the output sample grid.
    fn resolve(&self, key: u32, data: &ClipData, bpm: Bpm) -> Result<(Span, RtClip)> {
        let entry = self.stored_entry(data.stored)?;
        let span = data.span(source_length(&entry.audio, bpm)?)?;
        let sample_rate = self.stream_config.sample_rate;
        let clip = RtClip {
            key,
            start: span.start.samples(sample_rate, bpm)?,
            end: span.end.samples(sample_rate, bpm)?,
            offset: data.offset.samples(entry.audio.sample_rate(), bpm)?,
            audio: Arc::clone(&entry.audio),
        };
        Ok((span, clip))
    }

    /// Current clips of `track` except those in `skip`.
    pub(super) fn track_entries(
        &self,
        track: u32,
        keys: &[u32],
        skip: &[u32],
    ) -> Result<Vec<(u32, ClipData)>> {
        keys.iter()
            .filter(|key| !skip.contains(key))
            .map(|&key| {
                let data = self
                    .clips
                    .get(key)
                    .map_err(|err| err.for_entity(EntityKind::AudioClip, key))?;
                debug_assert_eq!(data.track, track);
                Ok((key, data.clone()))
            })
            .collect()
    }

    /// Orders `entries` and resolves them for the renderer. Fails if any two
    /// overlap; `candidates` are the clips being placed, so the reported
    /// conflict names the clip already there.
    pub(super) fn plan_clips(
        &self,
        track: u32,
        entries: Vec<(u32, ClipData)>,
        bpm: Bpm,
        candidates: &[u32],
    ) -> Result<TrackPlan> {
        let mut resolved = entries
            .iter()
            .map(|(key, data)| self.resolve(*key, data, bpm))
            .collect::<Result<Vec<_>>>()?;
        let mut spans: Vec<(u32, Span)> = resolved
            .iter()
            .map(|(span, clip)| (clip.key, *span))
            .collect();
        if let Some((a, b)) = find_overlap(&mut spans) {
            let other = if candidates.contains(&a) { b } else { a };
            return Err(EngineError::Overlap { track, other });
        }
        resolved.sort_by_key(|(span, _)| (span.start, span.end));
        let keys = resolved.iter().map(|(_, clip)| clip.key).collect();
        let clips = resolved.into_iter().map(|(_, clip)| clip).collect();
        Ok(TrackPlan { keys, clips })
    }

    /// Plans `track` with `placed` added (or replacing clips of the same key)
    /// and `removed` taken away.
    fn plan_edit(&self, track: u32, removed: &[u32], placed: &[(u32, ClipData)]) -> Result<TrackPlan> {
        let current = &self
            .mixer
            .tracks
            .get(track)
            .map_err(|err| err.for_entity(EntityKind::AudioTrack, track))?
            .clips;
        let mut skip: Vec<u32> = removed.to_vec();
        skip.extend(placed.iter().map(|(key, _)| *key));
        let mut entries = self.track_entries(track, current, &skip)?;
        entries.extend(placed.iter().cloned());
        let candidates: Vec<u32> = placed.iter().map(|(key, _)| *key).collect();
        self.plan_clips(track, entries, self.bpm, &candidates)
    }

    fn set_track_clips(&mut self, track: u32, keys: Vec<u32>) {
        if let Ok(data) = self.mixer.tracks.get_mut(track) {
            data.clips = keys;
        }
    }

    /// Replaces one clip's placement on its own track.
    fn edit_clip(&mut self, key: u32, data: ClipData) -> Result<()> {
        let track = data.track;
        let plan = self.plan_edit(track, &[], &[(key, data.clone())])?;
        self.bridge.send(RtCommand::ReplaceClips {
            track,
            clips: plan.clips,
        })?;
        if let Ok(slot) = self.clips.get_mut(key) {
            *slot = data;
        }
        self.set_track_clips(track, plan.keys);
        Ok(())
    }

    /// Validates clip states for reconstruction onto `track` and ships the
    /// new layout. Returns the committed key order.
    fn stage_clips(&mut self, track: u32, states: &[AudioClipState]) -> Result<Vec<u32>> {
        if states.iter().any(|state| state.engine != self.id) {
            return Err(EngineError::ForeignHandle {
                kind: EntityKind::AudioClip,
            });
        }
        self.clips
            .check_reconstruct_many(states.iter().map(|state| state.key))
            .map_err(|(key, err)| err.for_entity(EntityKind::AudioClip, key))?;
        let placed: Vec<(u32, ClipData)> = states
            .iter()
            .map(|state| {
                let mut data = state.data.clone();
                data.track = track;
                (state.key, data)
            })
            .collect();
        let plan = self.plan_edit(track, &[], &placed)?;
        self.bridge.send(RtCommand::ReplaceClips {
            track,
            clips: plan.clips,
        })?;
        Ok(plan.keys)
    }

    fn commit_clips(&mut self, track: u32, states: Vec<AudioClipState>, order: Vec<u32>) -> Vec<AudioClip> {
        let mut handles = Vec::with_capacity(states.len());
        for state in states {
            let mut data = state.data;
            data.track = track;
            // Vacancy was checked while staging.
            let _ = self.clips.reconstruct(state.key, data);
            handles.push(AudioClip::new(self.id, state.key));
        }
        self.set_track_clips(track, order);
        debug!(engine = %self.id, track, clips = handles.len(), "clips reconstructed");
        handles
    }
}

impl Engine {
    /// Decodes the file at `path` and keeps the samples in the engine.
    pub fn import_audio_clip(&mut self, path: impl AsRef<Path>) -> Result<StoredClip> {
        let path = path.as_ref();
        let inner = self.state_mut()?;
        let audio = inner.decoder.decode(path).map_err(|source| EngineError::Import {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            engine = %inner.id,
            path = %path.display(),
            frames = audio.frames(),
            sample_rate = audio.sample_rate(),
            "clip imported"
        );
        let key = inner.stored.allocate(StoredEntry {
            audio: Arc::new(audio),
            path: Some(path.to_path_buf()),
        });
        Ok(StoredClip::new(inner.id, key))
    }

    /// Stores already decoded audio.
    pub fn import_audio_data(&mut self, audio: StoredAudio) -> Result<StoredClip> {
        let inner = self.state_mut()?;
        let key = inner.stored.allocate(StoredEntry {
            audio: Arc::new(audio),
            path: None,
        });
        Ok(StoredClip::new(inner.id, key))
    }

    pub fn stored_clip_info(&self, stored: StoredClip) -> Result<StoredClipInfo> {
        let inner = self.state()?;
        let key = inner.stored_key(stored)?;
        let entry = inner.stored_entry(key)?;
        Ok(StoredClipInfo {
            key,
            sample_rate: entry.audio.sample_rate(),
            length: entry.audio.frames(),
            channels: entry.audio.channel_count(),
            path: entry.path.clone(),
        })
    }

    /// Places `stored` on `track`. Without a `length` the clip always spans
    /// the whole stored audio, whatever the tempo.
    pub fn add_clip(
        &mut self,
        track: AudioTrack,
        stored: StoredClip,
        start: Timestamp,
        length: Option<Timestamp>,
    ) -> Result<AudioClip> {
        let inner = self.state_mut()?;
        let track = inner.audio_key(track)?;
        let stored = inner.stored_key(stored)?;
        let key = inner.clips.next_key();
        let data = ClipData {
            start,
            length: ClipLength::from(length),
            offset: Timestamp::zero(),
            stored,
            track,
        };
        let plan = inner.plan_edit(track, &[], &[(key, data.clone())])?;
        inner.bridge.send(RtCommand::ReplaceClips {
            track,
            clips: plan.clips,
        })?;
        let key = inner.clips.allocate(data);
        inner.set_track_clips(track, plan.keys);
        debug!(engine = %inner.id, track, clip = key, %start, "clip added");
        Ok(AudioClip::new(inner.id, key))
    }

    /// Clips on `track` ordered by start.
    pub fn clips(&self, track: AudioTrack) -> Result<Vec<AudioClip>> {
        let inner = self.state()?;
        let key = inner.audio_key(track)?;
        let data = inner
            .mixer
            .tracks
            .get(key)
            .map_err(|err| err.for_entity(EntityKind::AudioTrack, key))?;
        Ok(data
            .clips
            .iter()
            .map(|&clip| AudioClip::new(inner.id, clip))
            .collect())
    }

    pub fn clip_start(&self, clip: AudioClip) -> Result<Timestamp> {
        let (_, data) = self.state()?.clip_data(clip)?;
        Ok(data.start)
    }

    /// `None` when the clip follows its stored audio's length.
    pub fn clip_length(&self, clip: AudioClip) -> Result<Option<Timestamp>> {
        let (_, data) = self.state()?.clip_data(clip)?;
        Ok(match data.length {
            ClipLength::Fixed(length) => Some(length),
            ClipLength::TracksSource => None,
        })
    }

    pub fn clip_end(&self, clip: AudioClip) -> Result<Timestamp> {
        let inner = self.state()?;
        let (_, data) = inner.clip_data(clip)?;
        let source = inner.source_of(data, inner.bpm)?;
        Ok(data.span(source)?.end)
    }

    pub fn clip_track(&self, clip: AudioClip) -> Result<AudioTrack> {
        let inner = self.state()?;
        let (_, data) = inner.clip_data(clip)?;
        Ok(AudioTrack::new(inner.id, data.track))
    }

    pub fn clip_stored_clip(&self, clip: AudioClip) -> Result<StoredClip> {
        let inner = self.state()?;
        let (_, data) = inner.clip_data(clip)?;
        Ok(StoredClip::new(inner.id, data.stored))
    }

    pub fn move_clip(&mut self, clip: AudioClip, start: Timestamp) -> Result<()> {
        let inner = self.state_mut()?;
        let (key, data) = inner.clip_data(clip)?;
        let moved = ClipData {
            start,
            ..data.clone()
        };
        inner.edit_clip(key, moved)
    }

    /// Moves the clip to `start` on `track`. On failure the clip stays
    /// where it was.
    pub fn move_clip_to_track(
        &mut self,
        clip: AudioClip,
        start: Timestamp,
        track: AudioTrack,
    ) -> Result<()> {
        let inner = self.state_mut()?;
        let target = inner.audio_key(track)?;
        let (key, data) = inner.clip_data(clip)?;
        let source = data.track;
        let moved = ClipData {
            start,
            track: target,
            ..data.clone()
        };
        if source == target {
            return inner.edit_clip(key, moved);
        }

        let source_plan = inner.plan_edit(source, &[key], &[])?;
        let target_plan = inner.plan_edit(target, &[], &[(key, moved.clone())])?;
        inner.bridge.send(RtCommand::ReplaceClipsMany(vec![
            (source, source_plan.clips),
            (target, target_plan.clips),
        ]))?;
        if let Ok(slot) = inner.clips.get_mut(key) {
            *slot = moved;
        }
        inner.set_track_clips(source, source_plan.keys);
        inner.set_track_clips(target, target_plan.keys);
        debug!(engine = %inner.id, clip = key, from = source, to = target, "clip moved between tracks");
        Ok(())
    }

    /// Keeps the end in place and moves the start so the clip becomes
    /// `length` long. The start never moves before zero or before the
    /// beginning of the stored audio.
    pub fn crop_clip_start(&mut self, clip: AudioClip, length: Timestamp) -> Result<()> {
        let inner = self.state_mut()?;
        let (key, data) = inner.clip_data(clip)?;
        let source = inner.source_of(data, inner.bpm)?;
        let cropped = data.cropped_start(length, source)?;
        inner.edit_clip(key, cropped)
    }

    /// Keeps the start in place. Lengths past the end of the stored audio
    /// play silence.
    pub fn crop_clip_end(&mut self, clip: AudioClip, length: Timestamp) -> Result<()> {
        let inner = self.state_mut()?;
        let (key, data) = inner.clip_data(clip)?;
        let cropped = data.cropped_end(length);
        inner.edit_clip(key, cropped)
    }

    pub fn delete_clip(&mut self, clip: AudioClip) -> Result<AudioClipState> {
        let mut states = self.delete_clips(&[clip])?;
        states.pop().ok_or(EngineError::NotFound {
            kind: EntityKind::AudioClip,
            key: clip.key(),
        })
    }

    /// Deletes all of `clips` or, on any error, none of them. The clips may
    /// live on different tracks.
    pub fn delete_clips(&mut self, clips: &[AudioClip]) -> Result<Vec<AudioClipState>> {
        let inner = self.state_mut()?;
        let keys = clips
            .iter()
            .map(|clip| clip.key_for(inner.id))
            .collect::<Result<Vec<_>>>()?;
        inner
            .clips
            .check_delete_many(&keys)
            .map_err(|(key, err)| err.for_entity(EntityKind::AudioClip, key))?;

        let mut tracks: Vec<u32> = Vec::new();
        for &key in &keys {
            let (_, data) = inner.clip_data(AudioClip::new(inner.id, key))?;
            if !tracks.contains(&data.track) {
                tracks.push(data.track);
            }
        }
        let mut plans = Vec::with_capacity(tracks.len());
        for &track in &tracks {
            plans.push((track, inner.plan_edit(track, &keys, &[])?));
        }
        let (orders, lists): (Vec<_>, Vec<_>) = plans
            .into_iter()
            .map(|(track, plan)| ((track, plan.keys), (track, plan.clips)))
            .unzip();
        inner.bridge.send(RtCommand::ReplaceClipsMany(lists))?;

        let removed = inner
            .clips
            .delete_many(&keys)
            .map_err(|(key, err)| err.for_entity(EntityKind::AudioClip, key))?;
        for (track, order) in orders {
            inner.set_track_clips(track, order);
        }
        debug!(engine = %inner.id, clips = keys.len(), "clips deleted");
        Ok(keys
            .into_iter()
            .zip(removed)
            .map(|(key, data)| AudioClipState {
                engine: inner.id,
                key,
                data,
            })
            .collect())
    }

    /// Brings a deleted clip back onto `track`, which may differ from the
    /// track it was deleted from.
    pub fn reconstruct_clip(
        &mut self,
        track: AudioTrack,
        state: AudioClipState,
    ) -> Result<AudioClip, ReconstructError<AudioClipState>> {
        let inner = match self.state_mut() {
            Ok(inner) => inner,
            Err(err) => return Err(ReconstructError::new(err, state)),
        };
        let staged = inner.audio_key(track).and_then(|track| {
            inner
                .stage_clips(track, std::slice::from_ref(&state))
                .map(|order| (track, order))
        });
        match staged {
            Ok((track, order)) => {
                let key = state.key;
                inner.commit_clips(track, vec![state], order);
                Ok(AudioClip::new(inner.id, key))
            }
            Err(err) => Err(ReconstructError::new(err, state)),
        }
    }

    /// Reconstructs all of `states` onto `track` or none of them.
    pub fn reconstruct_clips(
        &mut self,
        track: AudioTrack,
        states: Vec<AudioClipState>,
    ) -> Result<Vec<AudioClip>, ReconstructError<Vec<AudioClipState>>> {
        let inner = match self.state_mut() {
            Ok(inner) => inner,
            Err(err) => return Err(ReconstructError::new(err, states)),
        };
        let staged = inner
            .audio_key(track)
            .and_then(|track| inner.stage_clips(track, &states).map(|order| (track, order)));
        match staged {
            Ok((track, order)) => Ok(inner.commit_clips(track, states, order)),
            Err(err) => Err(ReconstructError::new(err, states)),
        }
    }
}
