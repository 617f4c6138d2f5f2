//! Command-line driver for the compositing pipeline.
//!
//! Subcommands run one stage each, or all of them in order:
//! - `composite`: per-tile monthly median composites
//! - `mosaic`: merge composites per group into seamless mosaics
//! - `extract`: sample mosaics at GeoJSON points into a CSV table
//! - `run`: all of the above

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geocomposite::{GeoTiffStore, Pipeline, PipelineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Monthly composites, mosaics and point extracts from multi-temporal GeoTIFF tiles
#[derive(Parser, Debug)]
#[command(name = "geocomposite")]
#[command(version)]
struct Args {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build per-tile median composites
    Composite,

    /// Mosaic composites for every configured group
    Mosaic,

    /// Sample every mosaic at the given points
    Extract {
        /// GeoJSON point layer
        #[arg(short, long)]
        points: PathBuf,
    },

    /// Composite, mosaic and extract in sequence
    Run {
        /// GeoJSON point layer
        #[arg(short, long)]
        points: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let store = GeoTiffStore::new(config.compression);
    let pipeline = Pipeline::new(config, store).context("invalid configuration")?;

    match args.command {
        Command::Composite => {
            let report = pipeline.composite()?;
            info!(written = report.written.len(), skipped = report.skipped_rasters.len(), "Done");
        }
        Command::Mosaic => {
            let report = pipeline.mosaic()?;
            info!(written = report.written.len(), skipped = report.skipped_groups.len(), "Done");
        }
        Command::Extract { points } => {
            let table = pipeline
                .extract(&points)
                .with_context(|| format!("extracting values at {}", points.display()))?;
            info!(
                rows = table.rows.len(),
                path = %pipeline.config().extract_csv.display(),
                "Done"
            );
        }
        Command::Run { points } => {
            let report = pipeline.run(&points)?;
            info!(
                composites = report.composites.written.len(),
                mosaics = report.mosaics.written.len(),
                rows = report.extract.rows.len(),
                "Pipeline finished"
            );
        }
    }
    Ok(())
}
