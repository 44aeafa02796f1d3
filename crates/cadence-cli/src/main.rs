use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use cadence_engine::{
    listen_for_crash, AudioBackend, Decoder, DeviceId, Engine, EngineConfig, MeterReading,
    SymphoniaDecoder, Timestamp,
};
use cadence_io::{CpalBackend, ManualBackend, NullBackend};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod arrangement;

use arrangement::Arrangement;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices(args) => list_devices(args),
        Commands::Info { file } => show_info(file),
        Commands::Play(args) => play(args),
        Commands::Bounce(args) => bounce(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Cadence realtime multitrack engine tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List output devices and the stream configurations they accept.
    Devices(DevicesArgs),
    /// Decode an audio file and print what the engine would store.
    Info { file: PathBuf },
    /// Play files side by side, one track each, with live meters.
    Play(PlayArgs),
    /// Render an arrangement offline to a WAV file.
    Bounce(BounceArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    /// The host audio system (needs the `cpal` feature).
    Cpal,
    /// A paced device that discards audio.
    Null,
}

impl BackendKind {
    fn backend(self) -> Box<dyn AudioBackend> {
        match self {
            BackendKind::Cpal => Box::new(CpalBackend::new()),
            BackendKind::Null => Box::new(NullBackend::new()),
        }
    }
}

#[derive(Args)]
struct DevicesArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::Cpal)]
    backend: BackendKind,
}

#[derive(Args)]
struct PlayArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = BackendKind::Cpal)]
    backend: BackendKind,
    /// Output device id, as printed by `cadence devices`.
    #[arg(long)]
    device: Option<String>,
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,
    /// Stop after this many seconds instead of at the end of the longest file.
    #[arg(long)]
    seconds: Option<f64>,
}

#[derive(Args)]
struct BounceArgs {
    /// Arrangement description (JSON).
    #[arg(long)]
    project: PathBuf,
    /// Output WAV path.
    #[arg(long)]
    out: PathBuf,
    /// Render length in seconds. Defaults to the end of the last clip.
    #[arg(long)]
    seconds: Option<f64>,
    /// Frames per render callback.
    #[arg(long, default_value_t = 512)]
    block: usize,
}

fn list_devices(args: DevicesArgs) -> Result<()> {
    let backend = args.backend.backend();
    let devices = backend
        .devices()
        .with_context(|| format!("{} cannot list devices", backend.name()))?;
    if devices.is_empty() {
        println!("No output devices reported by {}", backend.name());
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default_output { " (default)" } else { "" };
        println!("{}{} [{}]", device.name, marker, device.id);
        match backend.output_config_ranges(&device.id) {
            Ok(ranges) => {
                for range in ranges {
                    let buffer = match &range.buffer_size {
                        Some(sizes) => format!("{}..={} frames", sizes.start(), sizes.end()),
                        None => "unknown buffer sizes".to_owned(),
                    };
                    println!(
                        "    {} ch {} {}..={} Hz, {buffer}; default {}",
                        range.channels,
                        range.sample_format,
                        range.sample_rate.start(),
                        range.sample_rate.end(),
                        range.default_config(),
                    );
                }
            }
            Err(err) => println!("    configurations unavailable: {err}"),
        }
    }
    Ok(())
}

fn show_info(file: PathBuf) -> Result<()> {
    let audio = SymphoniaDecoder::new()
        .decode(&file)
        .with_context(|| format!("failed to decode {}", file.display()))?;
    let seconds = audio.frames() as f64 / audio.sample_rate() as f64;
    println!("{}", file.display());
    println!("  sample rate: {} Hz", audio.sample_rate());
    println!("  channels:    {}", audio.channel_count());
    println!("  length:      {} samples ({seconds:.3} s)", audio.frames());
    Ok(())
}

fn play(args: PlayArgs) -> Result<()> {
    let backend = args.backend.backend();
    let mut config = EngineConfig::default().with_bpm(args.bpm);
    if let Some(device) = args.device {
        config = config.with_device(DeviceId(device));
    }
    let device = match &config.device {
        Some(device) => device.clone(),
        None => backend.default_output()?,
    };
    // Prefer a stereo layout at the device's own default rate.
    let ranges = backend.output_config_ranges(&device)?;
    if let Some(range) = ranges
        .iter()
        .find(|range| range.channels == 2)
        .or(ranges.first())
    {
        config = config.with_output(range.default_config());
    }

    let crash = listen_for_crash();
    let mut engine = Engine::new(config, backend.as_ref())?;
    let mut end = Timestamp::zero();
    for file in &args.files {
        let stored = engine
            .import_audio_clip(file)
            .with_context(|| format!("failed to import {}", file.display()))?;
        let track = engine.add_audio_track()?;
        let clip = engine.add_clip(track, stored, Timestamp::zero(), None)?;
        end = end.max(engine.clip_end(clip)?);
    }
    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));

    info!(tracks = args.files.len(), "playing");
    let master = engine.master()?;
    engine.play()?;
    loop {
        if let Some(Err(report)) = crash.try_recv() {
            bail!(report);
        }
        let position = engine.playhead()?;
        let finished = match deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => position >= end,
        };
        if finished {
            break;
        }
        let levels = engine.read_meter(master)?;
        eprint!("\r{:>9.2} beats  {}", position.beats_f64(), meter_line(&levels));
        thread::sleep(Duration::from_millis(50));
    }
    eprintln!();
    engine.close()?;
    Ok(())
}

fn meter_line(reading: &MeterReading) -> String {
    const WIDTH: usize = 24;
    let bar = |level: f32| {
        let filled = (level.clamp(0.0, 1.0) * WIDTH as f32) as usize;
        format!("{}{}", "#".repeat(filled), ".".repeat(WIDTH - filled))
    };
    format!("L {} R {}", bar(reading.rms[0]), bar(reading.rms[1]))
}

fn bounce(args: BounceArgs) -> Result<()> {
    let arrangement = Arrangement::load(&args.project)?;
    let block = args.block.max(1);
    let config = arrangement.engine_config(block);
    let output = config.output.clone();

    let (backend, mut driver) = ManualBackend::new();
    let mut engine = Engine::new(config, &backend)?;
    let end = arrangement.install(&mut engine)?;

    let frames = match args.seconds {
        Some(seconds) => (seconds.max(0.0) * output.sample_rate as f64) as u64,
        None => end.samples(output.sample_rate, engine.bpm()?)?,
    };

    let spec = WavSpec {
        channels: output.channels,
        sample_rate: output.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&args.out, spec)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    engine.play()?;
    let mut buffer = vec![0.0f32; block * output.channels as usize];
    let mut remaining = frames;
    while remaining > 0 {
        let count = remaining.min(block as u64) as usize;
        let chunk = &mut buffer[..count * output.channels as usize];
        driver.render_into(chunk);
        if engine.poisoned() {
            bail!("render callback crashed during bounce");
        }
        for sample in chunk.iter() {
            writer.write_sample(*sample)?;
        }
        remaining -= count as u64;
    }
    writer.finalize()?;
    engine.close()?;

    info!(frames, path = %args.out.display(), "bounce complete");
    println!("Bounced {frames} frames to {}", args.out.display());
    Ok(())
}
