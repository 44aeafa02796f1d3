//! The JSON arrangement format read by `cadence bounce`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cadence_engine::{
    Engine, EngineConfig, StoredClip, StreamConfig, Timestamp, BEAT_UNITS_PER_BEAT,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Arrangement {
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_gain")]
    pub master_volume: f32,
    #[serde(default)]
    pub master_panning: f32,
    #[serde(default)]
    pub tracks: Vec<TrackSpec>,
}

#[derive(Debug, Deserialize)]
pub struct TrackSpec {
    #[serde(default = "default_gain")]
    pub volume: f32,
    #[serde(default)]
    pub panning: f32,
    #[serde(default)]
    pub clips: Vec<ClipSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ClipSpec {
    /// Relative paths resolve against the arrangement file.
    pub path: PathBuf,
    /// In beats.
    #[serde(default)]
    pub start: f64,
    /// In beats. Omitted means the whole file.
    #[serde(default)]
    pub length: Option<f64>,
}

fn default_bpm() -> f64 {
    120.0
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_gain() -> f32 {
    1.0
}

impl Arrangement {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read arrangement {}", path.display()))?;
        let mut arrangement: Arrangement = serde_json::from_str(&data)
            .with_context(|| format!("{} is not a valid arrangement", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        for clip in arrangement.tracks.iter_mut().flat_map(|track| track.clips.iter_mut()) {
            if clip.path.is_relative() {
                clip.path = base.join(&clip.path);
            }
        }
        Ok(arrangement)
    }

    /// Engine settings that fit the arrangement. Nothing renders while
    /// [`Arrangement::install`] runs, so the command queue has to hold every
    /// edit it makes plus the `play` that follows.
    pub fn engine_config(&self, block_frames: usize) -> EngineConfig {
        let defaults = EngineConfig::default();
        let output = StreamConfig {
            channels: 2,
            sample_rate: self.sample_rate,
            ..StreamConfig::default()
        };
        defaults
            .clone()
            .with_output(output)
            .with_max_block_frames(block_frames)
            .with_bpm(self.bpm)
            .with_initial_track_capacity(defaults.initial_track_capacity.max(self.tracks.len()))
            .with_command_queue_capacity(
                defaults.command_queue_capacity.max(self.commands_needed()),
            )
    }

    /// Tempo, two master parameters and `play`, then one insertion and two
    /// parameters per track and one command per clip.
    fn commands_needed(&self) -> usize {
        4 + self
            .tracks
            .iter()
            .map(|track| 3 + track.clips.len())
            .sum::<usize>()
    }

    /// Builds the arrangement inside `engine` and returns where its last
    /// clip ends. Each file is decoded once however many clips use it.
    pub fn install(&self, engine: &mut Engine) -> Result<Timestamp> {
        engine.set_bpm(self.bpm)?;
        let master = engine.master()?;
        engine.set_volume(master, self.master_volume)?;
        engine.set_panning(master, self.master_panning)?;

        let mut imported: HashMap<&Path, StoredClip> = HashMap::new();
        let mut end = Timestamp::zero();
        for (index, spec) in self.tracks.iter().enumerate() {
            let track = engine.add_audio_track()?;
            engine.set_volume(track, spec.volume)?;
            engine.set_panning(track, spec.panning)?;
            for clip in &spec.clips {
                let stored = match imported.get(clip.path.as_path()) {
                    Some(&stored) => stored,
                    None => {
                        let stored = engine.import_audio_clip(&clip.path)?;
                        imported.insert(&clip.path, stored);
                        stored
                    }
                };
                let length = clip.length.map(beats).transpose()?;
                let placed = engine
                    .add_clip(track, stored, beats(clip.start)?, length)
                    .with_context(|| {
                        format!("cannot place {} on track {index}", clip.path.display())
                    })?;
                end = end.max(engine.clip_end(placed)?);
            }
        }
        Ok(end)
    }
}

/// Rounds to the nearest beat unit.
pub fn beats(value: f64) -> Result<Timestamp> {
    let units = (value * BEAT_UNITS_PER_BEAT as f64).round();
    if !units.is_finite() || units < 0.0 || units >= u32::MAX as f64 {
        bail!("{value} is not a usable position in beats");
    }
    Ok(Timestamp::from_beat_units(units as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_round_to_the_grid() {
        assert_eq!(beats(1.5).unwrap().beat_units(), 1536);
        assert_eq!(beats(0.0).unwrap(), Timestamp::zero());
        assert!(beats(-1.0).is_err());
        assert!(beats(f64::NAN).is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let arrangement: Arrangement =
            serde_json::from_str(r#"{ "tracks": [ { "clips": [ { "path": "a.wav" } ] } ] }"#)
                .unwrap();
        assert_eq!(arrangement.bpm, 120.0);
        assert_eq!(arrangement.sample_rate, 48_000);
        assert_eq!(arrangement.tracks[0].volume, 1.0);
        assert_eq!(arrangement.tracks[0].clips[0].length, None);
    }

    #[test]
    fn relative_paths_follow_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        fs::write(
            &path,
            r#"{ "tracks": [ { "clips": [ { "path": "drums.wav", "start": 2 } ] } ] }"#,
        )
        .unwrap();
        let arrangement = Arrangement::load(&path).unwrap();
        assert_eq!(arrangement.tracks[0].clips[0].path, dir.path().join("drums.wav"));
    }

    #[test]
    fn install_places_every_clip() {
        let dir = tempfile::tempdir().unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.path().join("hit.wav"), spec).unwrap();
        for _ in 0..24_000 {
            writer.write_sample(1_000i16).unwrap();
        }
        writer.finalize().unwrap();

        let path = dir.path().join("song.json");
        fs::write(
            &path,
            r#"{
                "bpm": 120,
                "tracks": [
                    { "clips": [ { "path": "hit.wav" }, { "path": "hit.wav", "start": 2 } ] },
                    { "volume": 0.5, "clips": [ { "path": "hit.wav", "start": 1, "length": 4 } ] }
                ]
            }"#,
        )
        .unwrap();

        let arrangement = Arrangement::load(&path).unwrap();
        let (mut engine, _driver) = Engine::manual(EngineConfig::default()).unwrap();
        let end = arrangement.install(&mut engine).unwrap();
        assert_eq!(end, Timestamp::from_beats(5).unwrap());
        let tracks = engine.audio_tracks().unwrap();
        assert_eq!(tracks.len(), 2);
        let clips = engine.clips(tracks[0]).unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(engine.volume(tracks[1]).unwrap(), 0.5);

        let first = engine.clip_stored_clip(clips[0]).unwrap();
        assert_eq!(engine.clip_stored_clip(clips[1]).unwrap(), first);
        let other = engine.clips(tracks[1]).unwrap()[0];
        assert_eq!(engine.clip_stored_clip(other).unwrap(), first);
    }

    #[test]
    fn large_arrangements_fit_the_queue() {
        let arrangement = Arrangement {
            bpm: 100.0,
            sample_rate: 44_100,
            master_volume: 0.8,
            master_panning: 0.0,
            tracks: (0..600)
                .map(|i| TrackSpec {
                    volume: 0.5,
                    panning: if i % 2 == 0 { -0.5 } else { 0.5 },
                    clips: Vec::new(),
                })
                .collect(),
        };
        let config = arrangement.engine_config(256);
        assert!(config.command_queue_capacity >= arrangement.commands_needed());
        assert_eq!(config.output.sample_rate, 44_100);

        let (mut engine, mut driver) = Engine::manual(config).unwrap();
        arrangement.install(&mut engine).unwrap();
        engine.play().unwrap();
        assert_eq!(engine.audio_tracks().unwrap().len(), 600);
        driver.render(256);
    }

    #[test]
    fn missing_files_fail_the_install() {
        let dir = tempfile::tempdir().unwrap();
        let arrangement = Arrangement {
            bpm: 120.0,
            sample_rate: 48_000,
            master_volume: 1.0,
            master_panning: 0.0,
            tracks: vec![TrackSpec {
                volume: 1.0,
                panning: 0.0,
                clips: vec![ClipSpec {
                    path: dir.path().join("missing.wav"),
                    start: 0.0,
                    length: None,
                }],
            }],
        };
        let (mut engine, _driver) = Engine::manual(EngineConfig::default()).unwrap();
        assert!(arrangement.install(&mut engine).is_err());
    }
}
