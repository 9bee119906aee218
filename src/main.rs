use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use roster_geocoder::apis::GoogleGeocoder;
use roster_geocoder::boundaries::BoundaryLayerCatalog;
use roster_geocoder::config::Config;
use roster_geocoder::constants::API_KEY_ENV;
use roster_geocoder::logging;
use roster_geocoder::observability::metrics;
use roster_geocoder::pipeline::processing::BranchMap;
use roster_geocoder::pipeline::{PipelineInputs, PipelineOrchestrator, PipelineSummary};
use roster_geocoder::GeocoderError;

#[derive(Parser)]
#[command(name = "roster_geocoder")]
#[command(about = "Geocode a membership roster and tag each member with districts and a branch")]
#[command(version = "0.1.0")]
struct Cli {
    /// Roster CSV to process (a previous run's output or partial file resumes it)
    input: PathBuf,

    /// Where to write the enriched roster
    #[arg(short, long, default_value = "output.csv")]
    output: PathBuf,

    /// Google Geocoding API key
    #[arg(short = 'a', long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    /// Boundary layer and branch table configuration
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Write a Prometheus text snapshot of run metrics to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    logging::init_logging();
    let cli = Cli::parse();

    if cli.api_key.trim().is_empty() {
        bail!("an API key is required (--api-key or {})", API_KEY_ENV);
    }

    metrics::init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let catalog = BoundaryLayerCatalog::from_config(&config)?;
    let branches = BranchMap::load(config.branch_table_path())?;
    let geocoder = GoogleGeocoder::new(&config.geocoder)?;

    let inputs = PipelineInputs {
        api_key: cli.api_key.trim().to_string(),
        id_column: config.roster.id_column.clone(),
        catalog,
        branches,
    };

    info!("Processing roster {}", cli.input.display());
    let mut orchestrator = PipelineOrchestrator::new(&geocoder, inputs);
    let outcome = orchestrator.run(&cli.input, &cli.output);
    write_metrics(cli.metrics_out.as_ref());

    match outcome {
        Ok(summary) => {
            print_summary(&summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(GeocoderError::PartialRun {
            partial_path,
            source,
        }) => {
            error!("Run stopped during geocoding: {}", source);
            println!("\n⚠️  Geocoding stopped early: {}", source);
            println!("   Partial output: {}", partial_path.display());
            println!(
                "   Resume with: roster_geocoder {} -o {}",
                partial_path.display(),
                cli.output.display()
            );
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &PipelineSummary) {
    println!("\n📊 Pipeline Results:");
    println!("   Input records: {}", summary.input_records);
    println!("   Output records: {}", summary.output_records);
    println!(
        "   Geocode calls: {} ({} rejected, {} resumed)",
        summary.geocode.calls, summary.geocode.rejections, summary.geocode.skipped
    );
    println!(
        "   Branches: {} assigned, {} outside chapter",
        summary.branch_assigned, summary.branch_fallback
    );
    println!("   Output file: {}", summary.output_file);
    println!("   SHA-256: {}", summary.output_sha256);
    println!(
        "   Took: {}s",
        (summary.finished_at - summary.started_at).num_seconds()
    );
}

fn write_metrics(path: Option<&PathBuf>) {
    let Some(path) = path else { return };
    let Some(snapshot) = metrics::render() else { return };
    if let Err(e) = std::fs::write(path, snapshot) {
        error!("Failed to write metrics to {}: {}", path.display(), e);
    }
}
