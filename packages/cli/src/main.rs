#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the site predict feature engine.
//!
//! Uses `indicatif-log-bridge` (via [`site_predict_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use site_predict_cli_utils::{IndicatifProgress, MultiProgress};
use site_predict_features::batch::{compute_batch, read_points, write_results};
use site_predict_features::config::PipelineConfig;
use site_predict_features::engine::FeatureEngine;
use site_predict_features_models::FeatureVector;
use site_predict_geography::catalog::UnitCatalog;
use site_predict_geography::paths::{DataPaths, ensure_dir};
use site_predict_geography::tigerweb::TigerwebClient;
use site_predict_geography_models::Region;

#[derive(Parser)]
#[command(name = "site_predict", about = "Geospatial feature engine for retail site prediction")]
struct Cli {
    /// TOML file merged over the built-in configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the feature vector for one candidate site
    Features {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Region code (FL or PA)
        #[arg(long)]
        region: Region,
        /// Store size in square feet (defaults to the region median)
        #[arg(long)]
        sq_ft: Option<f64>,
        /// Record approval of degraded inputs under this name
        #[arg(long, requires = "reason")]
        approve: Option<String>,
        /// Why degraded inputs are acceptable
        #[arg(long)]
        reason: Option<String>,
        /// Print the full vector with provenance as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute features for every point in a CSV file
    /// (`id,region,latitude,longitude,sq_ft`)
    Batch {
        /// Input points
        #[arg(long)]
        input: PathBuf,
        /// Output features CSV
        #[arg(long)]
        output: PathBuf,
        /// Points computed concurrently (overrides the configuration)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Download tract boundary polygons from `TIGERweb`
    FetchBoundaries {
        /// Regions to download; all configured regions if omitted
        #[arg(long, value_delimiter = ',')]
        regions: Vec<Region>,
    },
    /// Print tract counts and attribute medians per loaded region
    CatalogSummary,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = site_predict_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Features {
            lat,
            lon,
            region,
            sq_ft,
            approve,
            reason,
            json,
        } => {
            let engine = FeatureEngine::from_config(&config).await?;
            let mut vector = engine.compute_features(lat, lon, region, sq_ft).await?;

            if let (Some(approver), Some(reason)) = (approve, reason) {
                vector.approve_degraded(approver, reason);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&vector)?);
            } else {
                print_vector(&vector);
            }
            if !vector.is_usable() {
                log::warn!("Vector is degraded and unapproved; pass --approve and --reason to accept it");
            }
        }
        Commands::Batch {
            input,
            output,
            concurrency,
        } => {
            let start = Instant::now();
            let points = read_points(&input)?;
            let engine = FeatureEngine::from_config(&config).await?;

            let progress =
                IndicatifProgress::points_bar(&multi, "Computing features", points.len() as u64);
            let outcomes = compute_batch(
                &engine,
                points,
                concurrency.unwrap_or(config.batch.concurrency),
                &progress,
            )
            .await;
            progress.finish_and_clear();

            let summary = write_results(&output, &outcomes)?;
            log::info!(
                "Batch finished in {:.1}s: {} ok ({} degraded), {} failed, {} tracts fetched live",
                start.elapsed().as_secs_f64(),
                summary.succeeded,
                summary.degraded,
                summary.failed,
                engine.fetch_count()
            );
        }
        Commands::FetchBoundaries { regions } => {
            let regions = if regions.is_empty() {
                config.regions.clone()
            } else {
                regions
            };
            fetch_boundaries(&config, &regions, &multi).await?;
        }
        Commands::CatalogSummary => {
            let catalog = std::sync::Arc::new(UnitCatalog::new(DataPaths::new(&config.data_dir)));
            catalog.load_regions(&config.regions).await?;
            print_summary(&catalog, &config.regions);
        }
    }

    Ok(())
}

async fn fetch_boundaries(
    config: &PipelineConfig,
    regions: &[Region],
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let paths = DataPaths::new(&config.data_dir);
    ensure_dir(&paths.boundaries_dir())?;
    let client = TigerwebClient::new(&config.services.tigerweb_tract_layer_url, config.retry)?;

    for &region in regions {
        let start = Instant::now();
        let progress =
            IndicatifProgress::download_spinner(multi, &format!("{} tracts", region.name()));
        let count = client
            .download_boundaries(region, &paths.boundaries(region), &progress)
            .await?;
        progress.finish(format!("{}: {count} tracts", region.name()));
        log::info!(
            "{region} boundaries complete: {count} tracts in {:.1}s",
            start.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

fn print_vector(vector: &FeatureVector) {
    println!(
        "{} {} home tract {}",
        vector.region, vector.location, vector.provenance.home_unit
    );
    println!("{}", "-".repeat(50));
    for feature in vector.features() {
        let marker = if vector.provenance.imputations.contains_key(&feature.name) {
            " (imputed)"
        } else if vector.provenance.estimated.contains(&feature.name) {
            " (estimated)"
        } else {
            ""
        };
        println!("{:<32} {:>16.4}{marker}", feature.name, feature.value);
    }

    let degradations = vector.degradations();
    if !degradations.is_empty() {
        println!();
        println!("Degraded inputs:");
        for reason in degradations {
            println!("  - {reason}");
        }
    }
    if let Some(approval) = &vector.provenance.approval {
        println!(
            "Approved by {} at {}: {}",
            approval.approver, approval.approved_at, approval.reason
        );
    }
}

fn print_summary(catalog: &UnitCatalog, regions: &[Region]) {
    for &region in regions {
        let Some(summary) = catalog.summary(region) else {
            continue;
        };
        println!("{} ({region})", region.name());
        println!("{}", "-".repeat(50));
        println!("{:<32} {:>16}", "populated tracts", summary.populated);
        println!("{:<32} {:>16}", "unpopulated tracts", summary.unpopulated);
        println!("{:<32} {:>16}", "incomplete tracts", summary.incomplete);
        println!("{:<32} {:>16}", "total population", summary.total_population);
        for (attribute, median) in &summary.medians {
            println!("{:<32} {:>16.1}", format!("median {attribute}"), median);
        }
        println!();
    }
}
