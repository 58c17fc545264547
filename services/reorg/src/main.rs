//! Climate grid reorganisation CLI.
//!
//! Creates the per-metric target datasets, populates them from the ECLIPS
//! monthly inputs, and runs the livestock and fertiliser layer jobs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use grid_common::{Cadence, Scenario, WeatherResource};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use reorg::config::{RunConfig, RunOverrides, StorageFormat};
use reorg::create_backend;
use reorg::layers::{concat_fertiliser, integrate_livestock};
use reorg::passes::{Reorganiser, TEMPLATE_RESOURCE};
use reorg::sources::discover_weather_sets;

#[derive(Parser, Debug)]
#[command(name = "reorg")]
#[command(about = "Reorganise ECLIPS climate layers onto a common monthly grid")]
struct Cli {
    /// Run configuration file (YAML)
    #[arg(short, long, global = true, env = "REORG_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Storage format of datasets (zarr or netcdf)
    #[arg(long, global = true)]
    format: Option<StorageFormat>,

    /// Print the final summary as JSON
    #[arg(long, global = true)]
    summary_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Populate the target datasets from historic and future inputs
    Run(RunArgs),

    /// Create empty target datasets and copy in the land-sea mask
    Create {
        #[command(flatten)]
        locations: Locations,

        /// Replace existing targets
        #[arg(long)]
        delete: bool,
    },

    /// Convert n_available_* livestock layers to per-hectare densities
    Livestock {
        /// Directory holding the n_available_* datasets
        dir: PathBuf,

        /// Replace an existing combined dataset
        #[arg(long)]
        delete: bool,
    },

    /// Stack yearly fertiliser layers into one time series
    Concat {
        /// Directory whose subdirectories hold era*_<year> datasets
        dir: PathBuf,

        /// Replace an existing stacked dataset
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Args, Debug, Default)]
struct Locations {
    /// Root holding one directory per weather resource
    #[arg(long, env = "WEATHER_ROOT")]
    weather_root: Option<PathBuf>,

    /// Directory holding the ECLIPS2_0_* input directories
    #[arg(long, env = "ECLIPS_DIR")]
    eclips_dir: Option<PathBuf>,

    /// Directory receiving the target datasets
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Emission scenario, e.g. RCP45
    #[arg(long)]
    scenario: Option<Scenario>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    locations: Locations,

    /// Climate model of the future inputs, e.g. CLMcom_CCLM
    #[arg(long)]
    gcm: Option<String>,

    /// Parallel metric workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Skip the historic decades
    #[arg(long)]
    no_historic: bool,

    /// Skip the future decades
    #[arg(long)]
    no_future: bool,

    /// Process temperature only
    #[arg(long)]
    temperature_only: bool,
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    let started = Utc::now();
    info!(command = ?cli.command, "Starting grid reorganisation");

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let mut overrides = RunOverrides {
        storage_format: cli.format,
        ..Default::default()
    };

    match &cli.command {
        Command::Run(args) => {
            overrides.weather_root = args.locations.weather_root.clone();
            overrides.eclips_dir = args.locations.eclips_dir.clone();
            overrides.output_dir = args.locations.output_dir.clone();
            overrides.scenario = args.locations.scenario;
            overrides.gcm = args.gcm.clone();
            overrides.workers = args.workers;
            overrides.skip_historic = args.no_historic;
            overrides.skip_future = args.no_future;
            overrides.temperature_only = args.temperature_only;
        }
        Command::Create { locations, delete } => {
            overrides.weather_root = locations.weather_root.clone();
            overrides.eclips_dir = locations.eclips_dir.clone();
            overrides.output_dir = locations.output_dir.clone();
            overrides.scenario = locations.scenario;
            overrides.delete_existing = *delete;
        }
        Command::Livestock { .. } | Command::Concat { .. } => {}
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid run configuration")?;

    let backend = create_backend(config.storage_format, &config.processor)?;
    info!(
        backend = backend.name(),
        scenario = %config.scenario,
        gcm = %config.gcm,
        metrics = ?config.active_metrics(),
        "Loaded configuration"
    );

    match cli.command {
        Command::Run(_) => {
            let sets = discover_weather_sets(
                &config.weather_root,
                &config.resources,
                backend.as_ref(),
                &config.processor,
            );
            for resource in [WeatherResource::Eclips2, TEMPLATE_RESOURCE] {
                if let Err(e) = sets.get(resource, Cadence::Monthly) {
                    warn!(error = %e, "Monthly weather set missing");
                }
            }
            let summary = Reorganiser::new(&config, backend.as_ref()).populate()?;
            report(&summary, cli.summary_json)?;
        }
        Command::Create { .. } => {
            let sets = discover_weather_sets(
                &config.weather_root,
                &config.resources,
                backend.as_ref(),
                &config.processor,
            );
            let summary = Reorganiser::new(&config, backend.as_ref()).create_targets(&sets)?;
            report(&summary, cli.summary_json)?;
        }
        Command::Livestock { dir, delete } => {
            let summary = integrate_livestock(backend.as_ref(), &dir, delete, &config.processor)?;
            report(&summary, cli.summary_json)?;
        }
        Command::Concat { dir, delete } => {
            match concat_fertiliser(backend.as_ref(), &dir, delete, &config.processor)? {
                Some(summary) => report(&summary, cli.summary_json)?,
                None => warn!(dir = %dir.display(), "Nothing written"),
            }
        }
    }

    let elapsed = Utc::now() - started;
    info!(elapsed_secs = elapsed.num_seconds(), "Grid reorganisation complete");
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn report<T: Serialize + std::fmt::Display>(summary: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}
