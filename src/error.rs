//! Error taxonomy for the diagnostic engine.
//!
//! Per-record errors ([`InputError`], [`CollaboratorError`], [`GeometryError`]) are
//! caught at the classifier boundary and turned into an
//! [`AnalysisResult`](crate::analyzer::AnalysisResult). Only [`StartupError`] aborts a
//! run, and it always happens before the first record is analyzed.

use std::path::PathBuf;

use thiserror::Error;

use crate::location::LocationType;

/// A malformed or unsupported input record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Failed to deserialize OpenLR: {0}")]
    MalformedCode(String),

    #[error("Unsupported location type: {0}")]
    UnsupportedLocationType(LocationType),

    #[error("Line reference needs at least 2 LRPs, got {0}")]
    TooFewPoints(usize),

    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),
}

/// The decoder or the road network misbehaved in a way the engine cannot classify.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Decoder failed unexpectedly: {0}")]
    Decoder(String),

    #[error("Decoded path references unknown link {0}")]
    UnknownLink(u64),

    #[error("Decoded path has {placements} placements for {lrps} LRPs")]
    PlacementCount { placements: usize, lrps: usize },

    #[error("Analysis panicked: {0}")]
    Panicked(String),
}

/// Degenerate input to buffer construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Line needs at least 2 points to be buffered, got {0}")]
    TooFewPoints(usize),

    #[error("Buffer diameter must be positive and finite, got {0}")]
    InvalidDiameter(f64),

    #[error("Line has non-finite coordinates")]
    NonFinite,

    #[error("Line has zero length")]
    ZeroLength,

    #[error("Offset around line produced {0} polygons instead of 1")]
    Degenerate(usize),
}

/// Any error raised while analyzing one record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Fatal errors raised while preparing a run.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Network store not found or unreadable: {0}")]
    MissingNetworkStore(PathBuf),

    #[error("Spatial extension module not found or unreadable: {0}")]
    MissingSpatialExtension(PathBuf),

    #[error("Failed to load network from {path}: {message}")]
    NetworkLoad { path: PathBuf, message: String },

    #[error("Network store {0} contains no links")]
    EmptyNetwork(PathBuf),

    #[error("Unknown target CRS: {0}. Must be one of [EPSG:4326, EPSG:3857]")]
    UnknownCrs(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start worker pool: {0}")]
    WorkerPool(String),
}
