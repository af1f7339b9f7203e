//! plcdaq CLI
//!
//! - `plcdaq allocate`: compute DB offsets from exchange/recipe tables
//! - `plcdaq run`: run the acquisition engine until Ctrl-C
//! - `plcdaq export`: dump one variable of a daily store to CSV
//! - `plcdaq config`: print a default configuration file

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use plcdaq::acquisition::{AcquisitionEngine, EngineEvent, StatusKind, SystemClock};
use plcdaq::config::{generate_default_config, Config, LoggingConfig};
use plcdaq::layout::table::{self, DiscoveredTables};
use plcdaq::layout::{Allocator, LayoutArtifact};
use plcdaq::storage::DailyStore;
use plcdaq::transport::{IsoTcpTransport, PlcTransport, SimulatedPlc};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "plcdaq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Siemens S7 data block acquisition engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate byte offsets and write the layout artifact
    Allocate {
        /// Directory holding exchange_variables_DB*.csv / recipe_variables_DB*.csv
        dir: Option<PathBuf>,
        /// Exchange table (DB number taken from the file name)
        #[arg(long)]
        exchange: Vec<PathBuf>,
        /// Recipe table (DB number taken from the file name)
        #[arg(long)]
        recipe: Vec<PathBuf>,
        /// Artifact path (default: layout.artifact from the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the acquisition engine
    Run {
        /// Use the in-memory simulated PLC
        #[arg(long)]
        simulate: bool,
        /// Layout artifact (default: layout.artifact from the config)
        #[arg(short, long)]
        layout: Option<PathBuf>,
    },

    /// Export one variable of a daily store to CSV
    Export {
        /// Variable name
        variable: String,
        /// Store date (YYYY-MM-DD, default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// CSV path (default: {variable}_{date}.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a default config file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    config.validate()?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Allocate {
            dir,
            exchange,
            recipe,
            output,
        } => allocate(&config, dir, exchange, recipe, output),
        Commands::Run { simulate, layout } => run(config, simulate, layout).await,
        Commands::Export {
            variable,
            date,
            output,
        } => export(&config, &variable, date, output),
        Commands::Config => Ok(()),
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("plcdaq={}", config.level)));

    let json = config.format == "json";
    let json_layer = json.then(|| fmt::layer().json());
    let pretty_layer = (!json).then(fmt::layer);

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn allocate(
    config: &Config,
    dir: Option<PathBuf>,
    exchange: Vec<PathBuf>,
    recipe: Vec<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let tables = match dir {
        Some(dir) => table::discover(&dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?,
        None => DiscoveredTables {
            exchange: exchange
                .iter()
                .map(|p| table::table_with_db(p))
                .collect::<Result<_, _>>()?,
            recipe: recipe
                .iter()
                .map(|p| table::table_with_db(p))
                .collect::<Result<_, _>>()?,
        },
    };
    if tables.is_empty() {
        bail!("No exchange or recipe tables found");
    }

    let sizes = config.type_sizes();
    let (artifact, groups) = table::build_artifact(
        &tables,
        Allocator::new(sizes),
        config.layout.duplicate_policy,
    )?;

    println!("{}", artifact.summary_table(&sizes));
    for group in &groups {
        for skipped in &group.skipped {
            println!(
                "Skipped {} in {}: {}",
                skipped.name, group.label, skipped.reason
            );
        }
    }

    let output = output.unwrap_or_else(|| PathBuf::from(&config.layout.artifact));
    artifact.save(&output)?;
    println!("Layout written to {}", output.display());
    Ok(())
}

fn export(
    config: &Config,
    variable: &str,
    date: Option<NaiveDate>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let path = config.partition_config().path_for(date);
    if !path.exists() {
        bail!("No daily store at {}", path.display());
    }

    let store = DailyStore::open(&path, date, &config.storage.source_label)?;
    let output =
        output.unwrap_or_else(|| PathBuf::from(format!("{}_{}.csv", variable, date.format("%Y-%m-%d"))));
    let exported = store.export_csv(variable, &output)?;
    store.close()?;

    println!("Exported {} rows of {} to {}", exported, variable, output.display());
    Ok(())
}

async fn run(config: Config, simulate: bool, layout: Option<PathBuf>) -> anyhow::Result<()> {
    tracing::info!("plcdaq v{}", env!("CARGO_PKG_VERSION"));

    let engine_config = config.engine_config()?;
    let artifact_path = layout.unwrap_or_else(|| PathBuf::from(&config.layout.artifact));
    let layout = LayoutArtifact::load(&artifact_path)
        .with_context(|| format!("Failed to load layout {}", artifact_path.display()))?
        .merged();
    tracing::info!(
        "Loaded {} variables from {}",
        layout.len(),
        artifact_path.display()
    );

    let sizes = config.type_sizes();
    let transport: Box<dyn PlcTransport> = if simulate || config.plc.simulate {
        tracing::info!("Using simulated PLC");
        Box::new(SimulatedPlc::for_layout(&layout, &sizes).with_signal_generator(&layout, &sizes))
    } else {
        Box::new(IsoTcpTransport::new(config.plc_timeout()))
    };

    let engine = AcquisitionEngine::new(engine_config, layout, transport, Arc::new(SystemClock))?;
    let mut events = engine.events().subscribe();
    let handle = engine.spawn()?;

    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Status {
                    kind: StatusKind::Stats,
                    message,
                    ..
                }) => tracing::info!("{}", message),
                Ok(EngineEvent::Value { name, value }) => {
                    tracing::trace!("{} = {:?}", name, value)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::debug!("Event logger skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                tracing::info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                if handle.is_finished() {
                    break;
                }
            }
        }
    }

    let result = tokio::task::spawn_blocking(move || handle.stop()).await?;
    logger.abort();
    result?;

    tracing::info!("plcdaq shutdown complete");
    Ok(())
}
