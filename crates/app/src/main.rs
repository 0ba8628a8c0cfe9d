use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kbox_core::{
    catalog, AppConfig, Beat, Broadcaster, CatalogHandle, CatalogReloader, HeartbeatGenerator,
    IntervalTicker, KboxError, ShowState,
};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    tracing::info!("kbox v{}", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "kbox failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> kbox_core::Result<ExitCode> {
    let config = cli.options.load()?;

    match cli.command {
        Commands::Serve => serve(&config),
        Commands::List => list(&config),
        Commands::Song { key } => print_song(&config, &key),
    }
}

fn serve(config: &AppConfig) -> kbox_core::Result<ExitCode> {
    let state = ShowState::from_config(&config.show);
    tracing::info!(show = %state.to_json()?, "starting show");

    let songs = CatalogHandle::new();
    let reloader = CatalogReloader::new(config.show.songs_dir(), config.show.reload_interval(), songs)
        .with_policy(config.show.bad_record)
        .spawn()?;

    let beats: Broadcaster<Beat> = Broadcaster::new();
    let listener = beats.subscribe();
    let heartbeat =
        HeartbeatGenerator::new(IntervalTicker::new(config.heartbeat.interval()), beats).spawn()?;

    // Stands in for a connected display until one subscribes over the wire.
    for beat in listener {
        tracing::info!(beat = %beat.to_json()?, "heartbeat");
    }

    reloader.stop();
    if heartbeat.join().is_err() {
        return Err(KboxError::msg("heartbeat thread panicked"));
    }
    Ok(ExitCode::SUCCESS)
}

fn list(config: &AppConfig) -> kbox_core::Result<ExitCode> {
    let catalog = load_once(config)?;
    for key in catalog.keys() {
        println!("{key}");
    }
    Ok(ExitCode::SUCCESS)
}

fn print_song(config: &AppConfig, key: &str) -> kbox_core::Result<ExitCode> {
    let catalog = load_once(config)?;
    match catalog.lookup(key.strip_prefix('/').unwrap_or(key)) {
        Some(song) => {
            println!("{}", song.to_json()?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            tracing::warn!(key, "song not found");
            Ok(ExitCode::from(2))
        }
    }
}

fn load_once(config: &AppConfig) -> kbox_core::Result<catalog::Catalog> {
    catalog::rebuild(&config.show.songs_dir(), config.show.bad_record, 1)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Karaoke show server", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: Options,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct Options {
    /// JSON configuration file; flags below override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Path to the karaoke show.
    #[arg(long, global = true)]
    show: Option<PathBuf>,
    /// Song that is on stage when the show starts.
    #[arg(long, global = true)]
    song: Option<String>,
    /// Seconds between rescans of the songs directory.
    #[arg(long, global = true)]
    reload_secs: Option<u64>,
    /// Milliseconds between heartbeats.
    #[arg(long, global = true)]
    beat_ms: Option<u64>,
}

impl Options {
    fn load(&self) -> kbox_core::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_json_file(path)?,
            None => AppConfig::default(),
        };
        if let Some(show) = &self.show {
            config.show.show_path = show.clone();
        }
        if let Some(song) = &self.song {
            config.show.default_song = song.clone();
        }
        if let Some(secs) = self.reload_secs {
            config.show.reload_interval_secs = secs;
        }
        if let Some(ms) = self.beat_ms {
            config.heartbeat.interval_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reload songs in the background and run the heartbeat.
    Serve,
    /// Scan the songs directory once and print every song key.
    List,
    /// Scan the songs directory once and print one song as JSON.
    Song {
        /// Catalog key, e.g. `show/songs/oh_darling`.
        key: String,
    },
}
