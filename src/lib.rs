//! Diagnoses why OpenLR location references decode poorly against a target road network.
//!
//! Each record pairs an OpenLR code with the line it was encoded from. The
//! [`Analyzer`] decodes the code on the target network, compares the result with a
//! buffer around the source line and, when the two disagree, searches for the
//! attribute mismatch or network defect that explains it.

pub mod analyzer;
pub mod batch;
pub mod candidates;
pub mod config;
pub mod decoder;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod loader;
pub mod location;
pub mod masking;
pub mod report;
pub mod spatial;
pub mod test_utils;
pub mod viable;

pub use analyzer::{Analysis, AnalysisResult, Analyzer, Evidence};
pub use batch::{BatchOutcome, BatchRunner, BatchSummary, CancellationToken, RecordReport};
pub use config::{AnalyzerConfig, BatchOptions, MapExtent, RunConfig};
pub use decoder::{DecodeFailure, DecodedPath, Decoder, MapMatchingDecoder, MaskAttribute, MaskSet};
pub use error::{AnalysisError, CollaboratorError, GeometryError, InputError, StartupError};
pub use geometry::{Buffer, Frame};
pub use graph::{Direction, Fow, Frc, RoadNetwork, TraversedLink};
pub use loader::{load_network, load_records, InputRecord};
pub use location::{parse_location, LineReference, LocationReference, LocationType};
