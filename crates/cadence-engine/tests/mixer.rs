use cadence_engine::{
    inverse_meter_scale, meter_scale, AudioTrack, Engine, EngineConfig, EngineError, EntityKind,
    ErrorCategory, ManualDriver, TrackId,
};

fn engine() -> (Engine, ManualDriver) {
    Engine::manual(EngineConfig::default()).unwrap()
}

fn snapshot(engine: &Engine, tracks: &[AudioTrack]) -> Vec<(u32, f32, f32)> {
    tracks
        .iter()
        .map(|&track| {
            (
                track.key(),
                engine.volume(track).unwrap(),
                engine.panning(track).unwrap(),
            )
        })
        .collect()
}

#[test]
fn delete_and_reconstruct_restores_tracks() {
    for count in [1usize, 5, 24, 34] {
        let (mut engine, mut driver) = engine();
        let keep = engine.add_audio_track().unwrap();
        let tracks = engine.add_audio_tracks(count).unwrap();
        for (i, &track) in tracks.iter().enumerate() {
            engine.set_volume(track, i as f32 / count as f32).unwrap();
            engine.set_panning(track, 1.0 - 2.0 * i as f32 / count as f32).unwrap();
        }
        let before = snapshot(&engine, &tracks);
        driver.render(128);

        let states = engine.delete_audio_tracks(&tracks).unwrap();
        assert_eq!(states.len(), count);
        assert_eq!(engine.audio_tracks().unwrap(), vec![keep]);
        driver.render(128);

        let restored = engine.reconstruct_audio_tracks(states).unwrap();
        assert_eq!(restored, tracks);
        assert_eq!(snapshot(&engine, &restored), before);
        driver.render(128);
    }
}

#[test]
fn keys_are_not_reused_after_deletion() {
    let (mut engine, _driver) = engine();
    let a = engine.add_audio_track().unwrap();
    let _state = engine.delete_audio_track(a).unwrap();
    let b = engine.add_audio_track().unwrap();
    assert_ne!(a.key(), b.key());
    assert!(engine.audio_track(a.key()).is_err());
    assert_eq!(engine.audio_track(b.key()).unwrap(), b);
}

#[test]
fn deleted_tracks_reject_every_operation() {
    let (mut engine, _driver) = engine();
    let track = engine.add_audio_track().unwrap();
    let _state = engine.delete_audio_track(track).unwrap();

    let err = engine.set_volume(track, 0.5).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UseAfterInvalidation);
    assert!(matches!(
        err,
        EngineError::Deleted {
            kind: EntityKind::AudioTrack,
            ..
        }
    ));
    assert!(engine.panning(track).is_err());
    assert!(engine.read_meter(track).is_err());
    assert!(engine.clips(track).is_err());
    assert!(engine.delete_audio_track(track).is_err());
}

#[test]
fn failed_batch_delete_keeps_every_track() {
    let (mut engine, _driver) = engine();
    let tracks = engine.add_audio_tracks(3).unwrap();
    let _state = engine.delete_audio_track(tracks[2]).unwrap();

    let err = engine.delete_audio_tracks(&tracks).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UseAfterInvalidation);
    assert_eq!(engine.audio_tracks().unwrap(), &tracks[..2]);
}

#[test]
fn failed_batch_reconstruction_hands_states_back() {
    let (mut engine, _driver) = engine();
    let (mut other, _other_driver) = self::engine();
    let tracks = engine.add_audio_tracks(2).unwrap();
    let foreign_track = other.add_audio_track().unwrap();
    let foreign = other.delete_audio_track(foreign_track).unwrap();
    let mut states = engine.delete_audio_tracks(&tracks).unwrap();
    states.push(foreign);

    let err = engine.reconstruct_audio_tracks(states).unwrap_err();
    assert!(matches!(err.error, EngineError::ForeignHandle { .. }));
    assert!(engine.audio_tracks().unwrap().is_empty());

    let mut states = err.into_states();
    assert_eq!(states.len(), 3);
    let foreign = states.pop().unwrap();
    assert_eq!(engine.reconstruct_audio_tracks(states).unwrap(), tracks);
    other.reconstruct_audio_track(foreign).unwrap();
}

#[test]
fn foreign_state_is_returned_untouched() {
    let (mut engine, _driver) = engine();
    let track = engine.add_audio_track().unwrap();
    let state = engine.delete_audio_track(track).unwrap();

    let (mut other, _other_driver) = self::engine();
    let err = other.reconstruct_audio_track(state).unwrap_err();
    assert!(matches!(err.error, EngineError::ForeignHandle { .. }));

    let state = err.into_states();
    assert_eq!(state.key(), track.key());
    engine.reconstruct_audio_track(state).unwrap();
}

#[test]
fn handles_from_other_engines_are_rejected() {
    let (mut a, _da) = engine();
    let (mut b, _db) = engine();
    let track = a.add_audio_track().unwrap();
    b.add_audio_track().unwrap();
    assert!(matches!(
        b.set_volume(track, 0.1),
        Err(EngineError::ForeignHandle { .. })
    ));
    assert_eq!(b.volume(b.audio_tracks().unwrap()[0]).unwrap(), 1.0);
}

#[test]
fn master_parameters_are_plain_properties() {
    let (mut engine, _driver) = engine();
    let master = engine.master().unwrap();
    assert_eq!(master, TrackId::Master);
    assert_eq!(engine.volume(master).unwrap(), 1.0);
    assert_eq!(engine.panning(master).unwrap(), 0.0);

    // Out-of-range values are stored as given and only clamped while
    // rendering.
    engine.set_volume(master, -4.0).unwrap();
    engine.set_panning(master, 3.0).unwrap();
    assert_eq!(engine.volume(master).unwrap(), -4.0);
    assert_eq!(engine.panning(master).unwrap(), 3.0);
}

#[test]
fn meter_scale_is_invertible() {
    for x in [0.01f32, 0.1, 0.6, 0.9, 1.0] {
        let scaled = meter_scale(x);
        assert!((0.0..=1.0).contains(&scaled));
        assert!((inverse_meter_scale(scaled) - x).abs() < 1e-5, "x = {x}");
    }
    assert_eq!(meter_scale(0.0), 0.0);
    assert!(meter_scale(0.5) < meter_scale(0.6));
}

#[test]
fn silent_tracks_meter_zero() {
    let (mut engine, mut driver) = engine();
    let track = engine.add_audio_track().unwrap();
    driver.render(256);
    let reading = engine.read_meter(track).unwrap();
    assert_eq!(reading.peak, [0.0, 0.0]);
    assert_eq!(reading.rms, [0.0, 0.0]);
    engine.snap_meter(TrackId::Master).unwrap();
}
