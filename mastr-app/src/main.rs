//! mastr - real-time mastering preview and loudness metering
//!
//! Command line front end for the preset catalog, the live preview graph
//! and the capture exporter.

mod config;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use mastr_analysis::{measure, BandSplitter, LoudnessMetrics, MeterReading};
use mastr_audio::{
    decode, AudioGraphManager, CaptureExporter, CaptureStage, CpalDeviceFactory,
    CpalMonitorFactory, DeviceFactory, MeterEvent, MeterLoop, PresetCatalog, SourceFile,
    FALLBACK_SAMPLE_RATE,
};
use tracing::{info, warn};

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "mastr")]
#[command(about = "Real-time mastering preview and loudness metering", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the genre presets
    Genres,
    /// Measure a file's loudness
    Analyze {
        file: PathBuf,
    },
    /// Play a file through a genre preset with live meters
    Preview {
        file: PathBuf,
        #[arg(short, long)]
        genre: Option<String>,
        /// Stop after this many seconds (default: whole file)
        #[arg(short, long)]
        seconds: Option<f64>,
    },
    /// Render a mastered WAV
    Export {
        file: PathBuf,
        #[arg(short, long)]
        genre: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
        /// Render this many times faster than real time
        #[arg(long, default_value_t = 1.0)]
        fast: f64,
        /// Bit depth: 16, 24 or 32 (float)
        #[arg(long)]
        bits: Option<u16>,
        /// Monitor volume while rendering; 0 mutes
        #[arg(long)]
        monitor_gain: Option<f32>,
    },
    /// Show the active configuration
    Config {
        /// Write the active configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so meter output on stdout stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path).unwrap_or_default();

    match cli.command {
        Commands::Genres => list_genres(),
        Commands::Analyze { file } => analyze(&file),
        Commands::Preview {
            file,
            genre,
            seconds,
        } => preview(&config, &file, genre.as_deref(), seconds),
        Commands::Export {
            file,
            genre,
            output,
            fast,
            bits,
            monitor_gain,
        } => {
            let mut config = config;
            if let Some(bits) = bits {
                config.export_bits = bits;
            }
            if let Some(gain) = monitor_gain {
                config.monitor_gain = gain;
            }
            export(&config, &file, genre.as_deref(), &output, fast)
        }
        Commands::Config { write } => show_config(&config, &config_path, write),
    }
}

fn read_source(path: &Path) -> anyhow::Result<SourceFile> {
    SourceFile::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn list_genres() -> anyhow::Result<()> {
    let catalog = PresetCatalog::builtin();
    println!(
        "{:<12} {:>8} {:>9} {:>6} {:>7} {:>7} {:>7} {:>7}",
        "genre", "gain dB", "thresh", "ratio", "low dB", "mid dB", "high dB", "ceiling"
    );
    for genre in catalog.genres() {
        let preset = catalog.resolve(genre)?;
        let [low, mid, high] = preset.eq.gains_db();
        println!(
            "{:<12} {:>8.2} {:>9.1} {:>6.1} {:>7.2} {:>7.2} {:>7.2} {:>7.1}",
            genre,
            preset.gain_db(),
            preset.compression.threshold_db,
            preset.compression.ratio,
            low,
            mid,
            high,
            preset.true_peak_db
        );
    }
    Ok(())
}

fn analyze(path: &Path) -> anyhow::Result<()> {
    let source = read_source(path)?;
    let audio = decode(&source, FALLBACK_SAMPLE_RATE)?;
    let (left, right) = audio.planar();

    let report = measure(&[left.as_slice(), right.as_slice()], audio.sample_rate)?;
    let metrics = LoudnessMetrics::from_interleaved(&audio.samples, 2, audio.sample_rate)?;
    let mono: Vec<f32> = left.iter().zip(&right).map(|(l, r)| (l + r) * 0.5).collect();
    let bands = BandSplitter::new().split(&mono);

    println!("{}", source.name);
    println!("  duration       {:.2} s", audio.duration_secs());
    println!("  integrated     {:.1} LUFS", report.integrated_lufs);
    println!("  peak           {:.1} dBFS", metrics.peak_db);
    println!("  rms            {:.1} dBFS", metrics.rms_db);
    println!(
        "  blocks         {} total, {} above -70, {} gated",
        report.blocks_total, report.blocks_above_absolute, report.blocks_gated
    );
    if let Some(threshold) = report.relative_threshold {
        println!("  relative gate  {:.1}", threshold);
    }
    println!(
        "  bands (tail)   bass {:.1}%  mid {:.1}%  high {:.1}%",
        bands.bass, bands.mid, bands.high
    );
    Ok(())
}

fn preview(
    config: &Config,
    path: &Path,
    genre: Option<&str>,
    seconds: Option<f64>,
) -> anyhow::Result<()> {
    let catalog = PresetCatalog::builtin();
    let preset = catalog.resolve_or_default(genre.unwrap_or(&config.default_genre));
    let source = read_source(path)?;

    let mut manager =
        AudioGraphManager::with_config(CpalDeviceFactory::new(), config.graph_config());
    let handle = manager.initialize(&source)?;
    manager.apply_preset(&handle, &preset)?;

    // A suspended device is retried once before giving up
    if let Err(e) = manager.play(&handle) {
        if !e.is_retryable() {
            return Err(e.into());
        }
        warn!(error = %e, "device not ready, retrying");
        std::thread::sleep(Duration::from_millis(500));
        manager.play(&handle)?;
    }

    let meter = MeterLoop::spawn(manager.tap(&handle)?, config.meter_config());
    let duration = manager.session().map(|s| s.duration_s).unwrap_or(0.0);
    let limit = Duration::from_secs_f64(seconds.unwrap_or(duration).clamp(0.0, duration));
    info!(preset = preset.name, seconds = limit.as_secs_f64(), "previewing");

    let started = Instant::now();
    while started.elapsed() < limit {
        match meter.events().recv_timeout(Duration::from_millis(250)) {
            Ok(MeterEvent::Reading { displayed, .. }) => print_meter(&displayed),
            Ok(MeterEvent::Stopped) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    println!();

    drop(meter);
    manager.dispose();
    Ok(())
}

fn print_meter(reading: &MeterReading) {
    use std::io::Write;

    let bands = &reading.frequency_bands;
    print!(
        "\rRMS {:>6.1}  PEAK {:>6.1}  LUFS~ {:>6.1}  CORR {:>5.2}  B/M/H {:>4.1}/{:>4.1}/{:>4.1}",
        reading.rms_db,
        reading.peak_db,
        reading.integrated_lufs,
        reading.stereo_correlation,
        bands.bass,
        bands.mid,
        bands.high
    );
    let _ = std::io::stdout().flush();
}

fn export(
    config: &Config,
    path: &Path,
    genre: Option<&str>,
    output: &Path,
    fast: f64,
) -> anyhow::Result<()> {
    if fast.is_nan() || fast <= 0.0 {
        bail!("--fast must be positive");
    }
    let catalog = PresetCatalog::builtin();
    let preset = catalog.resolve_or_default(genre.unwrap_or(&config.default_genre));
    let source = read_source(path)?;

    let sample_rate = CpalDeviceFactory::new().sample_rate();
    let mut capture = config.capture_config(sample_rate);
    capture.realtime_factor = fast;

    let mut exporter = CaptureExporter::new(capture);
    if config.monitor_gain > 0.0 {
        exporter = exporter.with_monitor(CpalMonitorFactory::default());
    }

    let job = exporter.spawn_export(source, preset.clone());
    for progress in job.progress().iter() {
        if progress.stage == CaptureStage::Recording {
            eprint!(
                "\r{} {:>5.1}%  {} chunks  {} bytes",
                progress.stage, progress.percent, progress.chunk_count, progress.total_bytes
            );
        }
    }
    eprintln!();

    let outcome = job.join()?;
    fs::write(output, &outcome.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let s = &outcome.summary;
    println!("{} -> {} ({:?})", path.display(), output.display(), outcome.status);
    println!("  preset         {}", preset.name);
    println!("  elapsed        {} ms", outcome.elapsed_ms);
    println!(
        "  loudness       {:.1} -> {:.1} LUFS",
        s.original_metrics.integrated_lufs, s.mastered_metrics.integrated_lufs
    );
    println!(
        "  peak           {:.1} -> {:.1} dBFS",
        s.original_metrics.peak_db, s.mastered_metrics.peak_db
    );
    println!(
        "  applied        {:+.2} dB gain, {:.1}:1 compression",
        s.gain_applied_db, s.compression_ratio_applied
    );
    if outcome.fell_back {
        warn!("nothing was captured; the original file was written unchanged");
    }
    Ok(())
}

fn show_config(config: &Config, path: &Path, write: bool) -> anyhow::Result<()> {
    println!("# {}", path.display());
    println!("{:#?}", config);
    if write {
        config
            .save_to(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "configuration written");
    }
    Ok(())
}
