//! Run configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::decoder::DecoderConfig;
use crate::error::StartupError;
use crate::geometry::Frame;

/// Region the network is assumed to cover.
///
/// Source lines outside it are reported as outside the map before any decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MapExtent {
    /// Only the links themselves bound the map
    #[default]
    None,
    /// Axis-aligned box around every link
    BoundingBox,
    /// Convex hull of every link vertex
    ConvexHull,
}

/// Tolerance preset for the reference decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DecoderPreset {
    #[default]
    Strict,
    Relaxed,
}

impl DecoderPreset {
    pub fn decoder_config(&self) -> DecoderConfig {
        match self {
            DecoderPreset::Strict => DecoderConfig::strict(),
            DecoderPreset::Relaxed => DecoderConfig::relaxed(),
        }
    }
}

/// Configuration for classifying a single record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Width of the tolerance region around the source line, in network units
    pub buffer_diameter: f64,
    /// How far an LRP may be from a link that starts or ends a viable path
    pub lrp_radius: f64,
    pub map_extent: MapExtent,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            buffer_diameter: 20.0,
            lrp_radius: 20.0,
            map_extent: MapExtent::None,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), StartupError> {
        if !(self.buffer_diameter.is_finite() && self.buffer_diameter > 0.0) {
            return Err(StartupError::InvalidConfig(format!(
                "buffer diameter must be positive, got {}",
                self.buffer_diameter
            )));
        }
        if !(self.lrp_radius.is_finite() && self.lrp_radius >= 0.0) {
            return Err(StartupError::InvalidConfig(format!(
                "LRP radius must not be negative, got {}",
                self.lrp_radius
            )));
        }
        Ok(())
    }
}

/// Worker pool settings for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub num_threads: usize,
    /// Sort results by input index instead of completion order
    pub stable_order: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            stable_order: true,
        }
    }
}

/// Everything the binary needs for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub network: PathBuf,
    /// Spatial extension module the network store depends on
    pub spatial_extension: Option<PathBuf>,
    pub target_crs: Frame,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub analyzer: AnalyzerConfig,
    pub decoder: DecoderPreset,
    pub batch: BatchOptions,
    pub verbose: bool,
}

impl RunConfig {
    /// Check paths and settings before anything is loaded
    pub fn validate(&self) -> Result<(), StartupError> {
        if !self.network.is_file() {
            return Err(StartupError::MissingNetworkStore(self.network.clone()));
        }
        if let Some(extension) = &self.spatial_extension {
            if !extension.is_file() {
                return Err(StartupError::MissingSpatialExtension(extension.clone()));
            }
        }
        if !self.input.is_file() {
            return Err(StartupError::InvalidConfig(format!(
                "input file {} does not exist",
                self.input.display()
            )));
        }
        if self.batch.num_threads == 0 {
            return Err(StartupError::InvalidConfig("num_threads must be at least 1".to_string()));
        }
        self.analyzer.validate()
    }
}
