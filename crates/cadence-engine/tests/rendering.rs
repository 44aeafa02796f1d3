use cadence_engine::{
    meter_scale, Engine, EngineConfig, ManualDriver, StoredAudio, StreamConfig, Timestamp,
    TrackId,
};

const BEAT: usize = 24_000;

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

fn constant(value: f32, frames: usize) -> StoredAudio {
    StoredAudio::new(48_000, vec![vec![value; frames]]).unwrap()
}

fn engine_with(config: EngineConfig) -> (Engine, ManualDriver) {
    Engine::manual(config).unwrap()
}

/// Frame `index` of an interleaved stereo block.
fn frame(block: &[f32], index: usize) -> (f32, f32) {
    (block[index * 2], block[index * 2 + 1])
}

#[test]
fn clips_sound_at_their_position() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let track = engine.add_audio_track().unwrap();
    let stored = engine.import_audio_data(constant(0.5, BEAT)).unwrap();
    engine
        .add_clip(track, stored, Timestamp::from_beats(1).unwrap(), None)
        .unwrap();
    engine.play().unwrap();

    let block = driver.render(3 * BEAT);
    let (l, r) = frame(&block, BEAT - 1);
    assert_eq!((l, r), (0.0, 0.0));
    let (l, r) = frame(&block, BEAT);
    assert!(close(l, 0.5) && close(r, 0.5), "{l} {r}");
    let (l, r) = frame(&block, 2 * BEAT - 1);
    assert!(close(l, 0.5) && close(r, 0.5));
    assert_eq!(frame(&block, 2 * BEAT), (0.0, 0.0));
}

#[test]
fn paused_engines_render_silence() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let track = engine.add_audio_track().unwrap();
    let stored = engine.import_audio_data(constant(0.5, BEAT)).unwrap();
    engine.add_clip(track, stored, Timestamp::zero(), None).unwrap();
    assert!(driver.render(256).iter().all(|sample| *sample == 0.0));
}

#[test]
fn volume_and_panning_shape_the_mix() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let track = engine.add_audio_track().unwrap();
    let stored = engine.import_audio_data(constant(0.5, BEAT)).unwrap();
    engine.add_clip(track, stored, Timestamp::zero(), None).unwrap();
    engine.set_volume(track, 0.5).unwrap();
    engine.set_panning(track, -1.0).unwrap();
    engine.play().unwrap();

    let block = driver.render(16);
    let (l, r) = frame(&block, 8);
    assert!(close(l, 0.25), "{l}");
    assert!(close(r, 0.0), "{r}");

    // Out-of-range values are clamped, not rejected.
    engine.set_panning(track, 7.0).unwrap();
    engine.set_volume(TrackId::Master, -1.0).unwrap();
    let block = driver.render(16);
    assert!(block.iter().all(|sample| *sample == 0.0));

    engine.set_volume(TrackId::Master, 1.0).unwrap();
    let block = driver.render(16);
    let (l, r) = frame(&block, 8);
    assert!(close(l, 0.0) && close(r, 0.25), "{l} {r}");
}

#[test]
fn deleted_tracks_fall_silent() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let track = engine.add_audio_track().unwrap();
    let stored = engine.import_audio_data(constant(0.5, BEAT)).unwrap();
    engine.add_clip(track, stored, Timestamp::zero(), None).unwrap();
    engine.play().unwrap();
    assert!(driver.render(16).iter().any(|sample| *sample != 0.0));

    let state = engine.delete_audio_track(track).unwrap();
    assert!(driver.render(16).iter().all(|sample| *sample == 0.0));

    engine.reconstruct_audio_track(state).unwrap();
    assert!(driver.render(16).iter().any(|sample| *sample != 0.0));
}

#[test]
fn cropped_clips_play_the_right_part() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let track = engine.add_audio_track().unwrap();
    let ramp: Vec<f32> = (0..BEAT).map(|i| i as f32 / BEAT as f32).collect();
    let stored = engine
        .import_audio_data(StoredAudio::new(48_000, vec![ramp]).unwrap())
        .unwrap();
    let clip = engine
        .add_clip(track, stored, Timestamp::zero(), Some(Timestamp::from_beats(1).unwrap()))
        .unwrap();
    // Half a beat shorter at the front: starts at 512 units, i.e. sample 12 000.
    engine
        .crop_clip_start(clip, Timestamp::from_beat_units(512))
        .unwrap();
    engine.play().unwrap();

    let block = driver.render(BEAT);
    assert_eq!(frame(&block, 11_999), (0.0, 0.0));
    let (l, _) = frame(&block, 12_000);
    assert!(close(l, 0.5), "{l}");
}

#[test]
fn mono_outputs_get_the_average() {
    let output = StreamConfig {
        channels: 1,
        ..StreamConfig::default()
    };
    let (mut engine, mut driver) = engine_with(EngineConfig::default().with_output(output));
    let track = engine.add_audio_track().unwrap();
    let stored = engine.import_audio_data(constant(0.5, BEAT)).unwrap();
    engine.add_clip(track, stored, Timestamp::zero(), None).unwrap();
    engine.set_panning(track, -1.0).unwrap();
    engine.play().unwrap();

    let block = driver.render(16);
    assert_eq!(block.len(), 16);
    // Hard left: 0.5 on the left, nothing on the right, averaged to mono.
    assert!(close(block[4], 0.25), "{}", block[4]);
}

#[test]
fn meters_follow_the_signal() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let track = engine.add_audio_track().unwrap();
    let stored = engine.import_audio_data(constant(0.5, 4 * BEAT)).unwrap();
    engine.add_clip(track, stored, Timestamp::zero(), None).unwrap();
    engine.play().unwrap();
    driver.render(1024);

    let first = engine.read_meter(track).unwrap();
    let expected = meter_scale(0.5);
    assert!(close(first.peak[0], expected));
    assert!(close(first.long_peak[1], expected));
    // Smoothing starts from silence.
    assert!(first.rms[0] < expected);

    engine.snap_meter(track).unwrap();
    let snapped = engine.read_meter(track).unwrap();
    assert!(close(snapped.rms[0], expected), "{}", snapped.rms[0]);

    let master = engine.read_meter(TrackId::Master).unwrap();
    assert!(close(master.peak[0], expected));
}

#[test]
fn paused_jumps_read_back_exactly() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    for units in (1..=64).chain([1023, 1025, 4097]) {
        let target = Timestamp::from_beat_units(units);
        engine.jump_to(target).unwrap();
        driver.render(64);
        assert_eq!(engine.playhead().unwrap(), target);
        driver.render(64);
        assert_eq!(engine.playhead().unwrap(), target);
    }
}

#[test]
fn tempo_changes_keep_a_paused_playhead() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let target = Timestamp::from_beat_units(3 * 1024 + 7);
    engine.jump_to(target).unwrap();
    driver.render(64);
    for bpm in [140.0, 97.5, 120.0, 61.0] {
        engine.set_bpm(bpm).unwrap();
        driver.render(64);
        assert_eq!(engine.playhead().unwrap(), target, "at {bpm} bpm");
    }
}

#[test]
fn playback_moves_on_from_a_jump() {
    let (mut engine, mut driver) = engine_with(EngineConfig::default());
    let target = Timestamp::from_beat_units(5);
    engine.jump_to(target).unwrap();
    engine.play().unwrap();
    // One beat at 120 bpm and 48 kHz.
    driver.render(BEAT);
    let playhead = engine.playhead().unwrap();
    assert!(playhead >= Timestamp::from_beat_units(1024), "{playhead}");
    assert!(playhead <= Timestamp::from_beat_units(1024 + 5), "{playhead}");
}
