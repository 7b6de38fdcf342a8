//! Classification of one location reference against its source line.
//!
//! [`Analyzer`] walks a small state machine per record: build the buffer, decode
//! unmasked, then either explain a failed decode (viable path search followed by
//! masking) or an inaccurate one (placement checks followed by masking). Every error
//! raised on the way ends as [`AnalysisResult::UnknownError`]; nothing escapes.

use std::fmt;

use geo::{ConvexHull, Coord, LineString, MultiPoint, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AnalyzerConfig, MapExtent};
use crate::decoder::{DecodeFailure, DecodedPath, Decoder, MaskAttribute, MaskSet, Placement};
use crate::error::{AnalysisError, CollaboratorError, InputError};
use crate::geometry::{covers_line, point_along, Buffer};
use crate::graph::{RoadNetwork, TraversedLink};
use crate::location::{parse_location, LineReference, LocationReference};
use crate::masking::{Acceptance, MaskingSearch, MaskingStep, Verdict};
use crate::viable::{ViablePathOutcome, ViablePathSearch};

/// Classification of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisResult {
    Ok,
    MissingOrMisconfiguredRoad,
    AlternateShortestPath,
    FrcMismatch,
    FowMismatch,
    BearingMismatch,
    PathLengthMismatch,
    UnsupportedLocationType,
    DecodingError,
    IncorrectFirstOrLastLrpPlacement,
    UnknownError,
    OutsideMapBounds,
    MultipleAttributeMismatches,
}

impl AnalysisResult {
    pub const ALL: [AnalysisResult; 13] = [
        AnalysisResult::Ok,
        AnalysisResult::MissingOrMisconfiguredRoad,
        AnalysisResult::AlternateShortestPath,
        AnalysisResult::FrcMismatch,
        AnalysisResult::FowMismatch,
        AnalysisResult::BearingMismatch,
        AnalysisResult::PathLengthMismatch,
        AnalysisResult::UnsupportedLocationType,
        AnalysisResult::DecodingError,
        AnalysisResult::IncorrectFirstOrLastLrpPlacement,
        AnalysisResult::UnknownError,
        AnalysisResult::OutsideMapBounds,
        AnalysisResult::MultipleAttributeMismatches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisResult::Ok => "OK",
            AnalysisResult::MissingOrMisconfiguredRoad => "MISSING_OR_MISCONFIGURED_ROAD",
            AnalysisResult::AlternateShortestPath => "ALTERNATE_SHORTEST_PATH",
            AnalysisResult::FrcMismatch => "FRC_MISMATCH",
            AnalysisResult::FowMismatch => "FOW_MISMATCH",
            AnalysisResult::BearingMismatch => "BEARING_MISMATCH",
            AnalysisResult::PathLengthMismatch => "PATH_LENGTH_MISMATCH",
            AnalysisResult::UnsupportedLocationType => "UNSUPPORTED_LOCATION_TYPE",
            AnalysisResult::DecodingError => "DECODING_ERROR",
            AnalysisResult::IncorrectFirstOrLastLrpPlacement => "INCORRECT_FIRST_OR_LAST_LRP_PLACEMENT",
            AnalysisResult::UnknownError => "UNKNOWN_ERROR",
            AnalysisResult::OutsideMapBounds => "OUTSIDE_MAP_BOUNDS",
            AnalysisResult::MultipleAttributeMismatches => "MULTIPLE_ATTRIBUTE_MISMATCHES",
        }
    }

    /// Result naming the relaxed attributes that fixed a decode
    pub fn from_cause(cause: MaskSet) -> Self {
        match cause.single() {
            Some(MaskAttribute::Frc) => AnalysisResult::FrcMismatch,
            Some(MaskAttribute::Fow) => AnalysisResult::FowMismatch,
            Some(MaskAttribute::Bearing) => AnalysisResult::BearingMismatch,
            Some(MaskAttribute::PathLength) => AnalysisResult::PathLengthMismatch,
            None => AnalysisResult::MultipleAttributeMismatches,
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the classifier saw on the way to its result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viable_path_found: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viable_path: Option<Vec<TraversedLink>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_failure: Option<String>,
    /// Cumulative masking steps in the order they ran
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub masks_applied: Vec<MaskingStep>,
    /// Isolated attempt outside the cumulative sequence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<MaskingStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<MaskSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub misplaced_lrp: Option<usize>,
    /// Links of the unmasked decode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_links: Option<Vec<TraversedLink>>,
    /// Links of the last masked decode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxed_links: Option<Vec<TraversedLink>>,
    /// Whether the fully relaxed decode took the viable path, when it was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxed_matches_viable: Option<bool>,
    /// Trimmed geometry of the unmasked decode, in the network frame
    #[serde(
        serialize_with = "crate::report::serialize_wkt",
        skip_serializing_if = "Option::is_none"
    )]
    pub decoded_geometry: Option<LineString<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraction_within_buffer: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub evidence: Evidence,
}

impl Analysis {
    /// Result for a record that could not be classified
    pub fn error(error: impl fmt::Display) -> Self {
        Analysis {
            result: AnalysisResult::UnknownError,
            evidence: Evidence {
                error: Some(error.to_string()),
                ..Evidence::default()
            },
        }
    }

    /// Share of the decoded geometry within the buffer; 0 when nothing decoded
    pub fn fraction(&self) -> f64 {
        self.evidence.fraction_within_buffer.unwrap_or(0.0)
    }
}

enum Stage {
    Start,
    BufferBuilt(Buffer),
    BaselineDecoded(Buffer, Result<DecodedPath, DecodeFailure>),
    FailedDecode(Buffer),
    InaccurateDecode(Buffer, DecodedPath),
    Diagnosing(Buffer, Acceptance),
    Resolved(AnalysisResult),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::BufferBuilt(..) => "buffer_built",
            Stage::BaselineDecoded(..) => "baseline_decoded",
            Stage::FailedDecode(..) => "failed_decode",
            Stage::InaccurateDecode(..) => "inaccurate_decode",
            Stage::Diagnosing(..) => "diagnosing",
            Stage::Resolved(..) => "resolved",
        }
    }
}

/// Region the network covers, if the extent asks for one
pub fn map_bounds(network: &RoadNetwork, extent: MapExtent) -> Option<Polygon<f64>> {
    match extent {
        MapExtent::None => None,
        MapExtent::BoundingBox => {
            let mut links = network.links();
            let first = links.next()?.bbox;
            let rect = links.fold(first, |acc, link| {
                Rect::new(
                    Coord {
                        x: acc.min().x.min(link.bbox.min().x),
                        y: acc.min().y.min(link.bbox.min().y),
                    },
                    Coord {
                        x: acc.max().x.max(link.bbox.max().x),
                        y: acc.max().y.max(link.bbox.max().y),
                    },
                )
            });
            Some(rect.to_polygon())
        }
        MapExtent::ConvexHull => {
            let points: MultiPoint<f64> = network
                .links()
                .flat_map(|l| l.geometry.coords().map(|c| Point::from(*c)))
                .collect();
            if points.0.is_empty() {
                return None;
            }
            Some(points.convex_hull())
        }
    }
}

/// Classifies records against one network with one decoder
pub struct Analyzer<'a, D: ?Sized> {
    network: &'a RoadNetwork,
    decoder: &'a D,
    config: AnalyzerConfig,
    map_bounds: Option<Polygon<f64>>,
}

impl<'a, D: Decoder + ?Sized> Analyzer<'a, D> {
    pub fn new(network: &'a RoadNetwork, decoder: &'a D, config: AnalyzerConfig) -> Self {
        Analyzer {
            network,
            decoder,
            config,
            map_bounds: map_bounds(network, config.map_extent),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn network(&self) -> &RoadNetwork {
        self.network
    }

    /// Classify a base64 code against the WGS84 line it was generated from
    pub fn analyze(&self, code: &str, geometry: &LineString<f64>) -> Analysis {
        let location = match parse_location(code) {
            Ok(location) => location,
            Err(error) => {
                warn!(%error, "failed to parse location reference");
                return Analysis::error(error);
            }
        };

        let frame = self.network.frame();
        let location = match location {
            LocationReference::Line(line) => LocationReference::Line(line.to_frame(frame)),
            other => other,
        };
        let geometry: LineString<f64> = geometry.coords().map(|c| frame.from_wgs84(*c)).collect();
        self.analyze_location(&location, &geometry)
    }

    /// Classify a location whose coordinates are already in the network frame
    pub fn analyze_location(&self, location: &LocationReference, geometry: &LineString<f64>) -> Analysis {
        let mut evidence = Evidence::default();

        let reference = match location {
            LocationReference::Line(reference) => reference,
            LocationReference::Other(kind) => {
                debug!(location_type = %kind, "unsupported location type");
                evidence.error = Some(InputError::UnsupportedLocationType(*kind).to_string());
                return Analysis {
                    result: AnalysisResult::UnsupportedLocationType,
                    evidence,
                };
            }
        };

        match self.classify(reference, geometry, &mut evidence) {
            Ok(result) => Analysis { result, evidence },
            Err(error) => {
                warn!(%error, "record could not be classified");
                evidence.error = Some(error.to_string());
                Analysis {
                    result: AnalysisResult::UnknownError,
                    evidence,
                }
            }
        }
    }

    fn classify(
        &self,
        reference: &LineReference,
        geometry: &LineString<f64>,
        evidence: &mut Evidence,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut stage = Stage::Start;
        loop {
            stage = match stage {
                Stage::Start => self.start(reference, geometry)?,
                Stage::BufferBuilt(buffer) => self.decode_baseline(buffer, reference, geometry),
                Stage::BaselineDecoded(buffer, outcome) => {
                    self.check_baseline(buffer, outcome, reference, evidence)?
                }
                Stage::FailedDecode(buffer) => self.search_viable_path(buffer, reference, evidence),
                Stage::InaccurateDecode(buffer, path) => {
                    self.check_placements(buffer, &path, reference, evidence)?
                }
                Stage::Diagnosing(buffer, acceptance) => {
                    self.diagnose(&buffer, acceptance, reference, evidence)?
                }
                Stage::Resolved(result) => return Ok(result),
            };
            debug!(stage = stage.name(), "classifier transition");
        }
    }

    fn start(&self, reference: &LineReference, geometry: &LineString<f64>) -> Result<Stage, AnalysisError> {
        if reference.len() < 2 {
            return Err(InputError::TooFewPoints(reference.len()).into());
        }
        let buffer = Buffer::build(geometry, self.config.buffer_diameter, self.network.frame())?;
        Ok(Stage::BufferBuilt(buffer))
    }

    fn decode_baseline(&self, buffer: Buffer, reference: &LineReference, geometry: &LineString<f64>) -> Stage {
        if let Some(bounds) = &self.map_bounds {
            if !covers_line(bounds, geometry) {
                return Stage::Resolved(AnalysisResult::OutsideMapBounds);
            }
        }
        if self.network.links_in_bbox(buffer.bbox()).is_empty() {
            return Stage::Resolved(AnalysisResult::OutsideMapBounds);
        }
        let outcome = self.decoder.decode(reference, self.network, MaskSet::EMPTY);
        Stage::BaselineDecoded(buffer, outcome)
    }

    fn check_baseline(
        &self,
        buffer: Buffer,
        outcome: Result<DecodedPath, DecodeFailure>,
        reference: &LineReference,
        evidence: &mut Evidence,
    ) -> Result<Stage, AnalysisError> {
        let path = match outcome {
            Ok(path) => path,
            Err(failure) if failure.is_expected() => {
                debug!(%failure, "baseline decode failed");
                evidence.baseline_failure = Some(failure.to_string());
                evidence.fraction_within_buffer = Some(0.0);
                return Ok(Stage::FailedDecode(buffer));
            }
            Err(failure) => return Err(CollaboratorError::Decoder(failure.to_string()).into()),
        };

        path.validate(reference.len(), self.network)?;
        let geometry = path
            .geometry(self.network)
            .ok_or_else(|| CollaboratorError::Decoder("decoded path has no geometry".to_string()))?;
        evidence.decoded_links = Some(path.links.clone());

        let covered = buffer.covers_line(&geometry);
        evidence.fraction_within_buffer = Some(if covered {
            1.0
        } else {
            buffer.fraction_within(&geometry)
        });
        evidence.decoded_geometry = Some(geometry);

        if covered {
            Ok(Stage::Resolved(AnalysisResult::Ok))
        } else {
            Ok(Stage::InaccurateDecode(buffer, path))
        }
    }

    fn search_viable_path(&self, buffer: Buffer, reference: &LineReference, evidence: &mut Evidence) -> Stage {
        let search = ViablePathSearch::new(self.network, self.config.lrp_radius);
        match search.find(&buffer, reference.first(), reference.last()) {
            ViablePathOutcome::NoCoverage => {
                evidence.viable_path_found = Some(false);
                Stage::Resolved(AnalysisResult::OutsideMapBounds)
            }
            ViablePathOutcome::NoPath => {
                evidence.viable_path_found = Some(false);
                Stage::Resolved(AnalysisResult::MissingOrMisconfiguredRoad)
            }
            ViablePathOutcome::Found(links) => {
                evidence.viable_path_found = Some(true);
                evidence.viable_path = Some(links);
                Stage::Diagnosing(buffer, Acceptance::WholePath)
            }
        }
    }

    fn check_placements(
        &self,
        buffer: Buffer,
        path: &DecodedPath,
        reference: &LineReference,
        evidence: &mut Evidence,
    ) -> Result<Stage, AnalysisError> {
        let last = reference.len() - 1;

        for (index, placement) in path.placements.iter().enumerate().take(last).skip(1) {
            let link = self
                .network
                .link_by_id(placement.link_id)
                .ok_or(CollaboratorError::UnknownLink(placement.link_id))?;
            if !buffer.covers_line(&link.geometry) {
                debug!(lrp = index, link = link.id, "interior LRP placed outside buffer");
                evidence.misplaced_lrp = Some(index);
                return Ok(Stage::Diagnosing(buffer, Acceptance::Placement(index)));
            }
        }

        for index in [0, last] {
            let Some(placement) = path.placements.get(index) else {
                continue;
            };
            let point = self.placement_point(placement)?;
            if !buffer.covers_point(point) {
                debug!(lrp = index, "terminal LRP placed outside buffer");
                evidence.misplaced_lrp = Some(index);
                return Ok(Stage::Resolved(AnalysisResult::IncorrectFirstOrLastLrpPlacement));
            }
        }

        let mask = MaskSet::only(MaskAttribute::PathLength);
        let search = MaskingSearch::new(self.decoder, self.network, &buffer);
        let attempt = search.attempt(reference, mask, Acceptance::WholePath)?;
        let step = MaskingStep::new(mask, &attempt);
        evidence.confirmation = Some(step);
        if let Some(path) = attempt.path() {
            evidence.relaxed_links = Some(path.links.clone());
        }

        if step.accepted {
            evidence.cause = Some(mask);
            Ok(Stage::Resolved(AnalysisResult::PathLengthMismatch))
        } else {
            Ok(Stage::Resolved(AnalysisResult::AlternateShortestPath))
        }
    }

    /// Coordinate where the decoder put an LRP
    fn placement_point(&self, placement: &Placement) -> Result<Coord<f64>, CollaboratorError> {
        let link = self
            .network
            .link_by_id(placement.link_id)
            .ok_or(CollaboratorError::UnknownLink(placement.link_id))?;
        let frame = self.network.frame();
        let geometry = link.travel_geometry(placement.reversed);
        // Offsets are in link length units, which may differ from the drawn geometry
        let along = if link.length > 0.0 {
            placement.offset / link.length * frame.line_length(&geometry)
        } else {
            0.0
        };
        point_along(&geometry, frame, along)
            .ok_or_else(|| CollaboratorError::Decoder(format!("link {} has empty geometry", link.id)))
    }

    fn diagnose(
        &self,
        buffer: &Buffer,
        acceptance: Acceptance,
        reference: &LineReference,
        evidence: &mut Evidence,
    ) -> Result<Stage, AnalysisError> {
        let diagnosis = MaskingSearch::new(self.decoder, self.network, buffer).diagnose(reference, acceptance)?;

        evidence.masks_applied = diagnosis.steps;
        evidence.confirmation = diagnosis.confirmation;
        if let Some(path) = diagnosis.final_outcome.path() {
            evidence.relaxed_links = Some(path.links.clone());
        }

        let result = match diagnosis.verdict {
            Verdict::Cause(cause) => {
                evidence.cause = Some(cause);
                AnalysisResult::from_cause(cause)
            }
            Verdict::RoutePreference => {
                // The decoder still picks its own route with nothing left to relax
                if let (Some(relaxed), Some(viable)) = (&evidence.relaxed_links, &evidence.viable_path) {
                    evidence.relaxed_matches_viable = Some(relaxed == viable);
                }
                AnalysisResult::AlternateShortestPath
            }
            Verdict::Exhausted => AnalysisResult::DecodingError,
        };
        Ok(Stage::Resolved(result))
    }
}
