use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use beatmatrix_core::{
    AppConfig, AudioBackend, BeatPipeline, PulseTrain, RawPcmBackend, SyntheticBackend,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beatmatrix_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Live {
            input,
            seconds,
            interval_ms,
        } => run_live(config, input.as_deref(), seconds, interval_ms),
        Commands::Synth {
            bpm,
            seconds,
            realtime,
        } => run_synth(config, bpm, seconds, realtime),
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> beatmatrix_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::from_json_file(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_live(
    config: AppConfig,
    input: Option<&Path>,
    seconds: Option<f64>,
    interval_ms: u64,
) -> beatmatrix_core::Result<()> {
    let backend: Box<dyn AudioBackend> = match input {
        Some(path) => {
            tracing::info!(?path, "reading raw PCM from file");
            Box::new(RawPcmBackend::new(File::open(path)?))
        }
        None => {
            tracing::info!("reading raw PCM from stdin");
            Box::new(RawPcmBackend::new(io::stdin()))
        }
    };

    let mut pipeline = BeatPipeline::new(config, backend)?;
    let handle = pipeline.handle();
    pipeline.start()?;

    let started = Instant::now();
    let deadline = seconds.map(Duration::from_secs_f64);
    let interval = Duration::from_millis(interval_ms.max(1));

    loop {
        thread::sleep(interval);
        let snapshot = handle.snapshot();
        println!("{}", serde_json::to_string(&snapshot)?);

        if snapshot.source.is_finished() {
            tracing::info!(source = ?snapshot.source, "input finished");
            break;
        }
        if deadline.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
    }

    pipeline.stop()
}

fn run_synth(
    config: AppConfig,
    bpm: f64,
    seconds: f64,
    realtime: bool,
) -> beatmatrix_core::Result<()> {
    tracing::info!(bpm, seconds, realtime, "running synthetic pulse train");

    let backend = SyntheticBackend::pulses(PulseTrain::new(bpm), seconds).realtime(realtime);
    let mut pipeline = BeatPipeline::new(config, Box::new(backend))?;
    let updates = pipeline.subscribe()?;
    let handle = pipeline.handle();

    pipeline.start()?;
    for update in updates.iter() {
        tracing::debug!(raw = update.raw_bpm, bpm = update.bpm, "tempo update");
    }
    pipeline.join()?;

    println!("{}", serde_json::to_string_pretty(&handle.snapshot())?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time tempo tracker", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Track the tempo of raw PCM read from stdin or a file.
    Live {
        /// Raw PCM file to read instead of stdin.
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Stop after this many seconds.
        #[arg(short, long)]
        seconds: Option<f64>,
        /// How often to print a snapshot.
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Run the pipeline over a generated pulse train.
    Synth {
        #[arg(short, long, default_value_t = 120.0)]
        bpm: f64,
        #[arg(short, long, default_value_t = 20.0)]
        seconds: f64,
        /// Deliver samples at the configured sample rate instead of all at once.
        #[arg(long)]
        realtime: bool,
    },
    /// Print the effective configuration.
    Config,
}
