//! sarflood - flood extent mapping from Sentinel-1 change detection
//!
//! Usage:
//!   sarflood derive --bbox 103.2,3.7,103.4,3.9 --before 2021-12-01:2021-12-15 \
//!       --after 2021-12-20:2022-01-03 --out flood.geojson
//!   sarflood export --aoi area.geojson --before ... --after ... --prefix kuantan
//!   sarflood graph --bbox ... --before ... --after ...
//!   sarflood status projects/my-project/operations/ABC123
//!
//! The bearer token for the compute service is read from the environment
//! variable named by `engine.token_env` (default `SARFLOOD_TOKEN`).

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use sarflood::core::flood_extent::{FloodExtentPipeline, FloodRequest};
use sarflood::engine::{GeoCompute, JobId, RemoteEngine};
use sarflood::io::{download, export, geojson};
use sarflood::{AreaOfInterest, Config, DateWindow, FloodError, PassDirection, Polarization};

#[derive(Parser, Debug)]
#[command(name = "sarflood", version, about, long_about = None)]
struct Cli {
    /// Path to TOML configuration file (default: <config dir>/sarflood/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive the flood extent and materialize its polygons
    Derive {
        #[command(flatten)]
        request: RequestArgs,

        /// Write polygons to this GeoJSON file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also download the flood raster and polygons into this directory
        #[arg(long = "download")]
        download_dir: Option<PathBuf>,
    },
    /// Derive the flood extent and export the four result layers
    Export {
        #[command(flatten)]
        request: RequestArgs,

        /// File name prefix for the exported layers
        #[arg(short, long)]
        prefix: Option<String>,

        /// Seconds to wait for the exports; 0 waits forever
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the expression graph as JSON without contacting the service
    Graph {
        #[command(flatten)]
        request: RequestArgs,
    },
    /// Show the state of export jobs
    Status {
        #[arg(required = true)]
        jobs: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Area of interest as min_lon,min_lat,max_lon,max_lat
    #[arg(long, conflicts_with = "aoi", required_unless_present = "aoi")]
    bbox: Option<String>,

    /// Area of interest from a GeoJSON file (last polygon wins)
    #[arg(long)]
    aoi: Option<PathBuf>,

    /// Before window, START:END (end exclusive)
    #[arg(long)]
    before: String,

    /// After window, START:END (end exclusive)
    #[arg(long)]
    after: String,

    /// After/before ratio threshold (default from config)
    #[arg(short, long)]
    threshold: Option<f64>,

    #[arg(long, default_value = "VH")]
    polarization: String,

    #[arg(long, default_value = "Ascending")]
    pass_direction: String,
}

impl RequestArgs {
    fn area(&self) -> anyhow::Result<AreaOfInterest> {
        if let Some(path) = &self.aoi {
            return geojson::read_aoi(path).with_context(|| format!("Failed to read area from {}", path.display()));
        }
        let Some(bbox) = &self.bbox else {
            bail!("either --bbox or --aoi is required");
        };

        let values: Vec<f64> = bbox
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("Invalid --bbox '{}'", bbox))?;
        if values.len() != 4 {
            bail!("--bbox needs four values, got {}", values.len());
        }
        Ok(AreaOfInterest::from_bounds(values[0], values[1], values[2], values[3])?)
    }

    fn request(&self, config: &Config) -> anyhow::Result<FloodRequest> {
        let polarization: Polarization = self.polarization.parse()?;
        let pass_direction = PassDirection::normalize(&self.pass_direction)?;

        let request = FloodRequest::new(
            self.area()?,
            DateWindow::parse(&self.before).context("Invalid --before window")?,
            DateWindow::parse(&self.after).context("Invalid --after window")?,
        )
        .with_threshold(self.threshold.unwrap_or(config.flood.threshold))
        .with_polarization(polarization)
        .with_pass_direction(pass_direction);

        request.validate()?;
        Ok(request)
    }
}

fn remote_engine(config: &Config) -> anyhow::Result<RemoteEngine> {
    RemoteEngine::from_config(&config.engine).context("Failed to set up the compute service client")
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let pipeline = FloodExtentPipeline::with_params(config.flood.clone());

    match cli.command {
        Command::Graph { request } => {
            let request = request.request(&config)?;
            let extent = pipeline.derive_flood_extent(&request);
            println!("{}", serde_json::to_string_pretty(&extent)?);
        }
        Command::Derive {
            request,
            out,
            download_dir,
        } => {
            let request = request.request(&config)?;
            let engine = remote_engine(&config)?;
            let report = pipeline.run(&engine, &request)?;

            println!(
                "{} flood polygons, {} flooded pixels",
                report.features.len(),
                report.flooded_pixels
            );
            if let Some(path) = out {
                geojson::write_geojson(&path, &report.features)?;
                println!("Polygons written to {}", path.display());
            }
            if let Some(dir) = download_dir {
                let extent = pipeline.derive_flood_extent(&request);
                let files = download::download_results(
                    &engine,
                    &extent,
                    &request.aoi,
                    &dir,
                    &config.export.file_prefix,
                    config.export.scale,
                )?;
                println!("Raster: {}", files.raster.display());
                println!("Vector: {}", files.vector.display());
            }
        }
        Command::Export {
            request,
            prefix,
            timeout,
        } => {
            let request = request.request(&config)?;
            let engine = remote_engine(&config)?;
            let extent = pipeline.derive_flood_extent(&request);

            let mut options = config.export.options();
            if let Some(secs) = timeout {
                options.timeout = Duration::from_secs(secs);
            }
            let prefix = prefix.unwrap_or_else(|| config.export.file_prefix.clone());

            let outcome = export::export_results(&engine, &extent, &request.aoi, &prefix, &options)?;
            for (id, status) in outcome.statuses() {
                println!("{}\t{}", id, status);
            }
            if !outcome.is_finished() {
                println!(
                    "Exports still running after {}s; check later with `sarflood status`",
                    outcome.elapsed().as_secs()
                );
            } else if !outcome.failed().is_empty() {
                bail!("{} export job(s) failed", outcome.failed().len());
            }
        }
        Command::Status { jobs } => {
            let engine = remote_engine(&config)?;
            for job in jobs {
                let id = JobId::new(job);
                let status = engine.job_status(&id)?;
                println!("{}\t{}", id, status);
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if let Some(hint) = err.downcast_ref::<FloodError>().and_then(FloodError::remediation_hint) {
                eprintln!("{}", hint);
            }
            ExitCode::FAILURE
        }
    }
}
