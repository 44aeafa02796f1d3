use std::sync::Arc;

use tracing::debug;

use super::{Engine, EngineInner};
use crate::bridge::{Bridge, RtCommand, RtTrack, TrackTarget};
use crate::error::{EngineError, EntityKind, ReconstructError, Result};
use crate::handle::{AudioTrack, TrackId};
use crate::mixer::{AudioTrackData, AudioTrackState, MeterReading, Strip, TrackParams};
use crate::table::BatchError;
use crate::timeline::ClipData;

impl EngineInner {
    pub(super) fn audio_key(&self, track: AudioTrack) -> Result<u32> {
        let key = track.key_for(self.id)?;
        self.mixer
            .tracks
            .get(key)
            .map_err(|err| err.for_entity(EntityKind::AudioTrack, key))?;
        Ok(key)
    }

    fn target(&self, track: TrackId) -> Result<TrackTarget> {
        match track {
            TrackId::Master => Ok(TrackTarget::Master),
            TrackId::Audio(track) => self.audio_key(track).map(TrackTarget::Audio),
        }
    }

    fn strip(&self, target: TrackTarget) -> Result<&Strip> {
        match target {
            TrackTarget::Master => Ok(&self.mixer.master),
            TrackTarget::Audio(key) => self
                .mixer
                .tracks
                .get(key)
                .map(|data| &data.strip)
                .map_err(|err| err.for_entity(EntityKind::AudioTrack, key)),
        }
    }

    fn strip_mut(&mut self, target: TrackTarget) -> Result<&mut Strip> {
        match target {
            TrackTarget::Master => Ok(&mut self.mixer.master),
            TrackTarget::Audio(key) => self
                .mixer
                .tracks
                .get_mut(key)
                .map(|data| &mut data.strip)
                .map_err(|err| err.for_entity(EntityKind::AudioTrack, key)),
        }
    }

    /// Builds the render-side copy of a track about to be (re)inserted.
    fn rt_track(
        &self,
        key: u32,
        strip: &Strip,
        clips: Vec<(u32, ClipData)>,
        candidates: &[u32],
    ) -> Result<(RtTrack, Vec<u32>)> {
        let plan = self.plan_clips(key, clips, self.bpm, candidates)?;
        let track = RtTrack::new(
            key,
            strip.params.volume,
            strip.params.panning,
            plan.clips,
            Arc::clone(&strip.meter),
        );
        Ok((track, plan.keys))
    }

    fn remove_tracks(&mut self, keys: &[u32]) -> Result<Vec<AudioTrackState>> {
        let track_error = |(key, err): BatchError| err.for_entity(EntityKind::AudioTrack, key);
        self.mixer.tracks.check_delete_many(keys).map_err(track_error)?;
        self.bridge.send(Bridge::remove_tracks(keys.to_vec()))?;

        let removed = self.mixer.tracks.delete_many(keys).map_err(track_error)?;
        let mut states = Vec::with_capacity(keys.len());
        for (&key, data) in keys.iter().zip(removed) {
            let mut clips = Vec::with_capacity(data.clips.len());
            for clip in data.clips {
                let clip_data = self
                    .clips
                    .delete_owned(clip, key)
                    .map_err(|err| err.for_entity(EntityKind::AudioClip, clip))?;
                clips.push((clip, clip_data));
            }
            debug!(engine = %self.id, track = key, clips = clips.len(), "audio track deleted");
            states.push(AudioTrackState {
                engine: self.id,
                key,
                params: data.strip.params,
                clips,
            });
        }
        Ok(states)
    }

    /// Validates `states` and ships the restored tracks to the render
    /// thread. Nothing changes on failure.
    fn stage_tracks(&mut self, states: &[AudioTrackState]) -> Result<Vec<(Strip, Vec<u32>)>> {
        if states.iter().any(|state| state.engine != self.id) {
            return Err(EngineError::ForeignHandle {
                kind: EntityKind::AudioTrack,
            });
        }
        self.mixer
            .tracks
            .check_reconstruct_many(states.iter().map(|state| state.key))
            .map_err(|(key, err)| err.for_entity(EntityKind::AudioTrack, key))?;
        self.clips
            .check_reconstruct_many(states.iter().flat_map(|state| state.clip_keys()))
            .map_err(|(key, err)| err.for_entity(EntityKind::AudioClip, key))?;

        let mut staged = Vec::with_capacity(states.len());
        let mut rt_tracks = Vec::with_capacity(states.len());
        for state in states {
            let strip = Strip::new(state.params);
            let candidates: Vec<u32> = state.clip_keys().collect();
            let (rt, order) = self.rt_track(state.key, &strip, state.clips.clone(), &candidates)?;
            rt_tracks.push(rt);
            staged.push((strip, order));
        }
        let commands = self.bridge.insert_tracks(rt_tracks);
        self.bridge.submit(commands)?;
        Ok(staged)
    }

    fn commit_tracks(
        &mut self,
        states: Vec<AudioTrackState>,
        staged: Vec<(Strip, Vec<u32>)>,
    ) -> Vec<AudioTrack> {
        let mut handles = Vec::with_capacity(states.len());
        for (state, (strip, order)) in states.into_iter().zip(staged) {
            let key = state.key;
            let data = AudioTrackData {
                strip,
                clips: order,
            };
            // Slot vacancy was checked while staging.
            let _ = self.mixer.tracks.reconstruct(key, data);
            let _ = self.clips.reconstruct_many(state.clips);
            debug!(engine = %self.id, track = key, "audio track reconstructed");
            handles.push(AudioTrack::new(self.id, key));
        }
        handles
    }
}

impl Engine {
    pub fn master(&self) -> Result<TrackId> {
        self.state()?;
        Ok(TrackId::Master)
    }

    /// Live audio tracks in creation order.
    pub fn audio_tracks(&self) -> Result<Vec<AudioTrack>> {
        let inner = self.state()?;
        Ok(inner
            .mixer
            .tracks
            .iter()
            .map(|(key, _)| AudioTrack::new(inner.id, key))
            .collect())
    }

    pub fn audio_track(&self, key: u32) -> Result<AudioTrack> {
        let inner = self.state()?;
        let track = AudioTrack::new(inner.id, key);
        inner.audio_key(track)?;
        Ok(track)
    }

    pub fn add_audio_track(&mut self) -> Result<AudioTrack> {
        let mut tracks = self.add_audio_tracks(1)?;
        tracks.pop().ok_or(EngineError::NotFound {
            kind: EntityKind::AudioTrack,
            key: 0,
        })
    }

    pub fn add_audio_tracks(&mut self, count: usize) -> Result<Vec<AudioTrack>> {
        let inner = self.state_mut()?;
        let first = inner.mixer.tracks.next_key();
        let mut strips = Vec::with_capacity(count);
        let mut rt_tracks = Vec::with_capacity(count);
        for offset in 0..count as u32 {
            let strip = Strip::new(TrackParams::default());
            let (rt, _) = inner.rt_track(first + offset, &strip, Vec::new(), &[])?;
            rt_tracks.push(rt);
            strips.push(strip);
        }
        let commands = inner.bridge.insert_tracks(rt_tracks);
        inner.bridge.submit(commands)?;

        let handles = strips
            .into_iter()
            .map(|strip| {
                let key = inner.mixer.tracks.allocate(AudioTrackData {
                    strip,
                    clips: Vec::new(),
                });
                AudioTrack::new(inner.id, key)
            })
            .collect();
        debug!(engine = %inner.id, first, count, "audio tracks added");
        Ok(handles)
    }

    /// Deletes the track together with its clips. The returned state brings
    /// both back.
    pub fn delete_audio_track(&mut self, track: AudioTrack) -> Result<AudioTrackState> {
        let mut states = self.delete_audio_tracks(&[track])?;
        states.pop().ok_or(EngineError::NotFound {
            kind: EntityKind::AudioTrack,
            key: track.key(),
        })
    }

    /// Deletes all of `tracks` or, on any error, none of them.
    pub fn delete_audio_tracks(&mut self, tracks: &[AudioTrack]) -> Result<Vec<AudioTrackState>> {
        let inner = self.state_mut()?;
        let keys = tracks
            .iter()
            .map(|track| track.key_for(inner.id))
            .collect::<Result<Vec<_>>>()?;
        inner.remove_tracks(&keys)
    }

    pub fn reconstruct_audio_track(
        &mut self,
        state: AudioTrackState,
    ) -> Result<AudioTrack, ReconstructError<AudioTrackState>> {
        let inner = match self.state_mut() {
            Ok(inner) => inner,
            Err(err) => return Err(ReconstructError::new(err, state)),
        };
        match inner.stage_tracks(std::slice::from_ref(&state)) {
            Ok(staged) => {
                let key = state.key;
                inner.commit_tracks(vec![state], staged);
                Ok(AudioTrack::new(inner.id, key))
            }
            Err(err) => Err(ReconstructError::new(err, state)),
        }
    }

    /// Reconstructs all of `states` or none. On failure the states are
    /// handed back inside the error.
    pub fn reconstruct_audio_tracks(
        &mut self,
        states: Vec<AudioTrackState>,
    ) -> Result<Vec<AudioTrack>, ReconstructError<Vec<AudioTrackState>>> {
        let inner = match self.state_mut() {
            Ok(inner) => inner,
            Err(err) => return Err(ReconstructError::new(err, states)),
        };
        match inner.stage_tracks(&states) {
            Ok(staged) => Ok(inner.commit_tracks(states, staged)),
            Err(err) => Err(ReconstructError::new(err, states)),
        }
    }

    pub fn volume(&self, track: impl Into<TrackId>) -> Result<f32> {
        let inner = self.state()?;
        let target = inner.target(track.into())?;
        Ok(inner.strip(target)?.params.volume)
    }

    /// Linear gain. Values outside the usable range are accepted here and
    /// clamped while rendering.
    pub fn set_volume(&mut self, track: impl Into<TrackId>, volume: f32) -> Result<()> {
        let inner = self.state_mut()?;
        let target = inner.target(track.into())?;
        inner.bridge.send(RtCommand::SetVolume {
            target,
            value: volume,
        })?;
        inner.strip_mut(target)?.params.volume = volume;
        Ok(())
    }

    pub fn panning(&self, track: impl Into<TrackId>) -> Result<f32> {
        let inner = self.state()?;
        let target = inner.target(track.into())?;
        Ok(inner.strip(target)?.params.panning)
    }

    /// `-1.0` is hard left, `1.0` hard right. Clamped while rendering.
    pub fn set_panning(&mut self, track: impl Into<TrackId>, panning: f32) -> Result<()> {
        let inner = self.state_mut()?;
        let target = inner.target(track.into())?;
        inner.bridge.send(RtCommand::SetPanning {
            target,
            value: panning,
        })?;
        inner.strip_mut(target)?.params.panning = panning;
        Ok(())
    }

    /// Latest levels, passed through [`meter_scale`](crate::meter_scale).
    /// RMS values are smoothed across calls.
    pub fn read_meter(&mut self, track: impl Into<TrackId>) -> Result<MeterReading> {
        let inner = self.state_mut()?;
        let target = inner.target(track.into())?;
        let smoothing = inner.config.meter.rms_smoothing;
        let strip = inner.strip_mut(target)?;
        Ok(strip.smoother.read(&strip.meter, smoothing))
    }

    /// Resets RMS smoothing to the current raw level.
    pub fn snap_meter(&mut self, track: impl Into<TrackId>) -> Result<()> {
        let inner = self.state_mut()?;
        let target = inner.target(track.into())?;
        let strip = inner.strip_mut(target)?;
        strip.smoother.snap(&strip.meter);
        Ok(())
    }
}
