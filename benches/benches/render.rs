use std::time::Duration;

use cadence_engine::{Engine, EngineConfig, ManualDriver, StoredAudio, StreamConfig, Timestamp};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BLOCK: usize = 64;

fn arrangement(tracks: usize, sample_rate: u32) -> (Engine, ManualDriver) {
    let output = StreamConfig {
        sample_rate: 96_000,
        ..StreamConfig::default()
    };
    let config = EngineConfig::default()
        .with_output(output)
        .with_max_block_frames(BLOCK);
    let (mut engine, driver) = Engine::manual(config).expect("engine");

    let frames = sample_rate as usize * 4;
    let mut rng = StdRng::seed_from_u64(7);
    let mut noise = || -> Vec<f32> { (0..frames).map(|_| rng.gen_range(-0.02..0.02)).collect() };
    let channels = vec![noise(), noise()];
    let stored = engine
        .import_audio_data(StoredAudio::new(sample_rate, channels).expect("audio"))
        .expect("import");

    for track in engine.add_audio_tracks(tracks).expect("tracks") {
        // Back-to-back clips, so each block searches a real clip list.
        for beat in 0..4 {
            let start = Timestamp::from_beats(beat * 8).expect("start");
            engine
                .add_clip(track, stored, start, Some(Timestamp::from_beats(8).expect("length")))
                .expect("clip");
        }
        engine.set_panning(track, 0.3).expect("pan");
    }
    engine.play().expect("play");
    (engine, driver)
}

fn render_tracks(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(30);

    for tracks in [8usize, 48] {
        // Native rate reads samples directly; a mismatched rate interpolates.
        for source_rate in [96_000u32, 44_100] {
            let id = BenchmarkId::new(format!("{tracks}_tracks_block{BLOCK}"), source_rate);
            group.bench_with_input(id, &source_rate, |b, &rate| {
                let (mut engine, mut driver) = arrangement(tracks, rate);
                let mut buffer = vec![0.0f32; BLOCK * 2];
                let mut blocks = 0u32;
                b.iter(|| {
                    // Rewind well before the 32 beats of clips run out.
                    blocks += 1;
                    if blocks % 4096 == 0 {
                        engine.jump_to(Timestamp::zero()).expect("rewind");
                    }
                    driver.render_into(&mut buffer)
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, render_tracks);
criterion_main!(benches);
