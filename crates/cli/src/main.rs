use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hedge_bot_core::{
    get_or, keys, AppConfig, ConfigLoader, ConfigWatcher, CoordinationStore, DisplayState,
    FileStore, Instrument, InstrumentKey, MemoryStore, StoreBackend, WindowPosition,
};
use hedge_bot_orchestrator::{
    LaunchSequencer, PaperLauncher, PaperVenue, PaperVenueConfig, WorkerConfig, WorkerRegistry,
    WorkerState,
};
use std::sync::Arc;

const DEFAULT_CONFIG: &str = hedge_bot_core::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "hedge-bot")]
#[command(about = "Coordinates hedged martingale workers across FX venue windows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the venue windows and run one worker per window until Ctrl+C
    Run {
        /// Config file path
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
        /// Trade against simulated venues
        #[arg(long)]
        paper: bool,
        /// Launch windows even if a previous launch completed
        #[arg(long)]
        relaunch: bool,
        /// Set the run flag once every worker is up
        #[arg(long)]
        start: bool,
        /// Seed for the simulated venues (worker n uses seed + n)
        #[arg(long, env = "HEDGEBOT_PAPER_SEED")]
        seed: Option<u64>,
        /// Profile file layered over the config, e.g. `paper` for Config.paper.toml
        #[arg(long, env = "HEDGEBOT_PROFILE")]
        profile: Option<String>,
        /// Optional log file path (logs to file instead of stderr)
        #[arg(long)]
        log_file: Option<String>,
    },
    /// Allow new entries on every worker sharing the store
    Start {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Block new entries; open legs still settle and auto-close
    Stop {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Clear run flag, log, launch state and martingale state (settings are kept)
    Reset {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Show the run flag, last log line and each instrument's display state
    Status {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

struct RunOptions {
    paper: bool,
    relaunch: bool,
    start: bool,
    seed: Option<u64>,
    profile: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    match &cli.command {
        Commands::Run {
            log_file: Some(path),
            ..
        } => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
        }
    }

    match cli.command {
        Commands::Run {
            config,
            paper,
            relaunch,
            start,
            seed,
            profile,
            log_file: _,
        } => {
            let options = RunOptions {
                paper,
                relaunch,
                start,
                seed,
                profile,
            };
            run_bot(&config, options).await?;
        }
        Commands::Start { config } => {
            operator_registry(&config)?.set_running(true).await?;
            println!("Trading started");
        }
        Commands::Stop { config } => {
            operator_registry(&config)?.set_running(false).await?;
            println!("Trading stopped");
        }
        Commands::Reset { config } => {
            let removed = operator_registry(&config)?.reset_state().await?;
            println!("Cleared {removed} state keys");
        }
        Commands::Status { config, json } => {
            show_status(&config, json).await?;
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn CoordinationStore>> {
    let store: Arc<dyn CoordinationStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => {
            let path = &config.store.path;
            tracing::debug!("Opening file store at {}", path.display());
            Arc::new(
                FileStore::open(path)
                    .with_context(|| format!("Failed to open store at {}", path.display()))?,
            )
        }
    };
    Ok(store)
}

/// Store shared with a running bot; an in-memory store would only ever be
/// seen by this process.
fn open_shared_store(config_path: &str) -> Result<Arc<dyn CoordinationStore>> {
    let config = ConfigLoader::load_from(config_path)?;
    if config.store.backend == StoreBackend::Memory {
        bail!("Store backend is in-memory; operator commands need store.backend = \"file\"");
    }
    open_store(&config)
}

fn operator_registry(config_path: &str) -> Result<WorkerRegistry> {
    Ok(WorkerRegistry::new(open_shared_store(config_path)?))
}

async fn run_bot(config_path: &str, options: RunOptions) -> Result<()> {
    if !options.paper {
        bail!("No live venue adapter is bundled; pass --paper to trade simulated venues");
    }
    tracing::info!("Starting hedge bot with config: {}", config_path);

    let config = match &options.profile {
        Some(profile) => ConfigLoader::load_with_profile(config_path, profile)?,
        None => ConfigLoader::load_from(config_path)?,
    };
    let store = open_store(&config)?;
    let registry = Arc::new(WorkerRegistry::new(store.clone()));

    // Workers come up idle; trading starts only on an explicit start.
    registry.set_running(false).await?;
    registry.publish_settings(&config.settings).await?;

    let (watcher, mut config_rx) = ConfigWatcher::new(config.clone());
    let watcher = watcher.with_profile(options.profile.clone());
    let watch_path = config_path.to_string();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.watch(&watch_path).await {
            tracing::warn!("Config watcher stopped: {:#}", e);
        }
    });
    let publisher = registry.clone();
    let publisher_handle = tokio::spawn(async move {
        while config_rx.changed().await.is_ok() {
            let settings = config_rx.borrow_and_update().settings.clone();
            if let Err(e) = publisher.publish_settings(&settings).await {
                tracing::error!("Failed to republish settings: {:#}", e);
            }
        }
    });

    let windows = launch_windows(&config, store.clone(), options.relaunch).await?;

    for (ordinal, position) in windows.iter().enumerate() {
        let venue_config = PaperVenueConfig {
            seed: options.seed.map(|seed| seed.wrapping_add(ordinal as u64)),
            ..PaperVenueConfig::default()
        };
        let venue = Arc::new(PaperVenue::new(position.instrument, venue_config));
        let worker_config =
            WorkerConfig::new(format!("worker-{}", position.instrument.code().to_lowercase()))
                .with_timing(config.worker.clone())
                .with_launch(config.launch.clone());

        let handle = registry.spawn_worker(worker_config, venue).await?;
        // One claim at a time keeps the assignment cursor uncontended.
        handle
            .status_receiver()
            .wait_for(|s| s.state != WorkerState::Starting)
            .await
            .context("Worker exited before claiming an instrument")?;
    }
    tracing::info!("{} workers running", registry.list_workers().await.len());

    if options.start {
        registry.set_running(true).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down");

    for status in registry.statuses().await {
        tracing::info!(
            "{}: {:?} on {:?} after {} ticks",
            status.worker_id,
            status.state,
            status.instrument,
            status.ticks
        );
    }
    if let Err(e) = registry.shutdown_all().await {
        tracing::error!("Error during worker shutdown: {:#}", e);
    }
    watcher_handle.abort();
    publisher_handle.abort();

    tracing::info!("Hedge bot stopped");
    Ok(())
}

/// Opens the windows to run workers in: freshly launched ones, or the
/// slots of a launch that already completed against this store.
async fn launch_windows(
    config: &AppConfig,
    store: Arc<dyn CoordinationStore>,
    relaunch: bool,
) -> Result<Vec<WindowPosition>> {
    let instruments = config.settings.enabled_instruments.clone();
    let (launcher, mut opened_rx) = PaperLauncher::new();
    let sequencer = LaunchSequencer::new(store.clone(), Arc::new(launcher), config.launch.clone());

    if relaunch {
        sequencer.launch(&instruments).await?;
    } else if config.settings.auto_launch {
        sequencer.launch_once(&instruments).await?;
    } else {
        tracing::info!("Auto-launch disabled");
    }
    drop(sequencer);

    let mut windows = Vec::new();
    while let Some(position) = opened_rx.recv().await {
        windows.push(position);
    }
    if windows.is_empty() {
        windows = get_or(store.as_ref(), keys::WINDOW_POSITIONS, Vec::new()).await?;
    }
    if windows.is_empty() {
        bail!("No windows to run; enable auto_launch or pass --relaunch");
    }
    Ok(windows)
}

async fn show_status(config_path: &str, json: bool) -> Result<()> {
    let store = open_shared_store(config_path)?;
    let store = store.as_ref();

    let running: bool = get_or(store, keys::RUN_FLAG, false).await?;
    let launched: bool = get_or(store, keys::HAS_LAUNCHED, false).await?;
    let last_log: String = get_or(store, keys::LIVE_LOG, String::new()).await?;
    let mut displays = Vec::new();
    for instrument in Instrument::ALL {
        let display: Option<DisplayState> =
            get_or(store, &InstrumentKey::Display.for_instrument(instrument), None).await?;
        displays.extend(display);
    }

    if json {
        let report = serde_json::json!({
            "running": running,
            "launched": launched,
            "last_log": last_log,
            "instruments": displays,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Trading:  {}", if running { "running" } else { "stopped" });
    println!("Launched: {}", if launched { "yes" } else { "no" });
    if !last_log.is_empty() {
        println!("Last log: {last_log}");
    }
    if displays.is_empty() {
        println!("No instrument has reported yet");
        return Ok(());
    }

    println!();
    println!(
        "{:<7} {:<9} {:>17} {:>22} {:>22} {:>6}",
        "PAIR", "STATE", "SPREAD/MAX", "LONG qty step/win P/L", "SHORT qty step/win P/L", "AGE"
    );
    let now = chrono::Utc::now();
    for d in &displays {
        let state = if d.ordering {
            "Ordering".to_string()
        } else {
            format!("{:?}", d.status)
        };
        let spread = format!("{}/{}", d.spread, d.max_spread);
        let long = format!("{} {}/{} {}", d.long_qty, d.step_long, d.win_streak_long, d.pl_long);
        let short = format!(
            "{} {}/{} {}",
            d.short_qty, d.step_short, d.win_streak_short, d.pl_short
        );
        let age = format!("{}s", (now - d.updated_at).num_seconds().max(0));
        println!(
            "{:<7} {:<9} {:>17} {:>22} {:>22} {:>6}",
            d.instrument.code(),
            state,
            spread,
            long,
            short,
            age
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "hedge-bot", "run", "--paper", "--start", "--seed", "7", "--profile", "paper", "-c",
            "alt.toml",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                paper,
                relaunch,
                start,
                seed,
                profile,
                log_file,
            } => {
                assert_eq!(config, "alt.toml");
                assert!(paper && start && !relaunch);
                assert_eq!(seed, Some(7));
                assert_eq!(profile.as_deref(), Some("paper"));
                assert!(log_file.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_operator_commands_default_config_path() {
        let cli = Cli::try_parse_from(["hedge-bot", "status", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Status { ref config, json: true } if config == DEFAULT_CONFIG
        ));
        assert!(Cli::try_parse_from(["hedge-bot", "launch"]).is_err());
    }
}
