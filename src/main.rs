//! `odat`: explain why OpenLR codes decode poorly on a target road network.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use odat::analyzer::Analyzer;
use odat::batch::{BatchRunner, BatchSummary};
use odat::config::{AnalyzerConfig, BatchOptions, DecoderPreset, MapExtent, RunConfig};
use odat::decoder::MapMatchingDecoder;
use odat::error::StartupError;
use odat::geometry::Frame;
use odat::loader::{load_network, load_records};
use odat::report::{render_summary, write_report, RunMetadata, RunTimings};

/// OpenLR Decoding Analysis Tool
#[derive(Parser, Debug)]
#[command(name = "odat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Parquet network store of the target map
    #[arg(long, env = "ODAT_NETWORK")]
    network: PathBuf,

    /// Spatial extension module the network store was prepared with
    #[arg(long, env = "ODAT_SPATIAL_EXTENSION")]
    spatial_extension: Option<PathBuf>,

    /// CRS of the network store: EPSG:4326 or EPSG:3857
    #[arg(long, env = "ODAT_TARGET_CRS", default_value = "EPSG:4326")]
    target_crs: Frame,

    /// JSON or Parquet file of OpenLR codes and source lines
    #[arg(short, long, env = "ODAT_INFILE")]
    input: PathBuf,

    /// Where to write the JSON report
    #[arg(short, long, env = "ODAT_OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Buffer diameter around the source line, in meters or CRS units
    #[arg(long, env = "ODAT_BUFFER", default_value_t = 20.0)]
    buffer: f64,

    /// Search radius around the first and last LRP
    #[arg(long, env = "ODAT_LRP_RADIUS", default_value_t = 20.0)]
    lrp_radius: f64,

    /// Region the network is assumed to cover
    #[arg(long, env = "ODAT_MAP_EXTENT", value_enum, default_value_t = MapExtent::None)]
    map_extent: MapExtent,

    /// Tolerances of the reference decoder
    #[arg(long, env = "ODAT_DECODER_CONFIG", value_enum, default_value_t = DecoderPreset::Strict)]
    decoder_config: DecoderPreset,

    /// Worker threads; defaults to the available parallelism
    #[arg(long, env = "ODAT_NUM_THREADS")]
    num_threads: Option<usize>,

    /// Report records in completion order instead of input order
    #[arg(long, env = "ODAT_UNORDERED")]
    unordered: bool,

    /// Turn on debug logging
    #[arg(short, long, env = "ODAT_VERBOSE")]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        let defaults = BatchOptions::default();
        RunConfig {
            network: self.network,
            spatial_extension: self.spatial_extension,
            target_crs: self.target_crs,
            input: self.input,
            output: self.output,
            analyzer: AnalyzerConfig {
                buffer_diameter: self.buffer,
                lrp_radius: self.lrp_radius,
                map_extent: self.map_extent,
            },
            decoder: self.decoder_config,
            batch: BatchOptions {
                num_threads: self.num_threads.unwrap_or(defaults.num_threads),
                stable_order: !self.unordered,
            },
            verbose: self.verbose,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // Logs go to stderr so the summary on stdout stays readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.into_config();

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid run configuration");
        return Err(e.into());
    }
    run(&config)
}

fn run(config: &RunConfig) -> Result<()> {
    let started = Instant::now();
    let mut timings = RunTimings::default();

    let network = load_network(&config.network, config.target_crs).map_err(|e| {
        let e = StartupError::NetworkLoad {
            path: config.network.clone(),
            message: format!("{:#}", e),
        };
        error!(error = %e, "failed to load network");
        e
    })?;
    if network.link_count() == 0 {
        let e = StartupError::EmptyNetwork(config.network.clone());
        error!(error = %e, "nothing to analyze against");
        return Err(e.into());
    }
    timings.network_load = started.elapsed();

    let records = load_records(&config.input)?;

    let decoder = MapMatchingDecoder::new().with_config(config.decoder.decoder_config());
    let bounds_started = Instant::now();
    let analyzer = Analyzer::new(&network, &decoder, config.analyzer);
    timings.map_bounds = bounds_started.elapsed();

    let analysis_started = Instant::now();
    let runner = BatchRunner::new(analyzer, config.batch);
    if let Err(error) = runner.cancellation_token().cancel_on_interrupt() {
        warn!(%error, "could not install the Ctrl-C handler");
    }
    let outcome = runner.run(&records)?;
    timings.analysis = analysis_started.elapsed();

    if let Some(path) = &config.output {
        let file = File::create(path).with_context(|| format!("Failed to create report {}", path.display()))?;
        write_report(BufWriter::new(file), &RunMetadata::from_config(config), &outcome)?;
        info!(path = %path.display(), "wrote report");
    }

    timings.total = started.elapsed();
    print!("{}", render_summary(&BatchSummary::from_outcome(&outcome), &timings));
    Ok(())
}
