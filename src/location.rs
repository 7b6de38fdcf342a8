//! Location references as the engine sees them.
//!
//! Codes are parsed with the `openlr` crate and converted into [`LineReference`]s whose
//! coordinates can be moved into the frame of the target network.

use std::fmt;

use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::geometry::Frame;
use crate::graph::{Fow, Frc};

/// Every location type an OpenLR code can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationType {
    Line,
    GeoCoordinate,
    PointAlongLine,
    Poi,
    Circle,
    Rectangle,
    Grid,
    Polygon,
    ClosedLine,
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocationType::Line => "Line",
            LocationType::GeoCoordinate => "GeoCoordinate",
            LocationType::PointAlongLine => "PointAlongLine",
            LocationType::Poi => "Poi",
            LocationType::Circle => "Circle",
            LocationType::Rectangle => "Rectangle",
            LocationType::Grid => "Grid",
            LocationType::Polygon => "Polygon",
            LocationType::ClosedLine => "ClosedLine",
        };
        f.write_str(name)
    }
}

/// Location Reference Point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lrp {
    pub coord: Coord<f64>,
    /// Degrees clockwise from north. On the last LRP this points backwards along the line.
    pub bearing: f64,
    pub frc: Frc,
    pub fow: Fow,
    /// Distance to the next LRP in meters (network length units after `to_frame`),
    /// absent on the last LRP
    pub dnp: Option<f64>,
}

/// An ordered list of LRPs plus the offsets trimming the path at both ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReference {
    pub points: Vec<Lrp>,
    /// Meters to trim from the start of the path
    pub positive_offset: f64,
    /// Meters to trim from the end of the path
    pub negative_offset: f64,
}

impl LineReference {
    pub fn new(points: Vec<Lrp>, positive_offset: f64, negative_offset: f64) -> Result<Self, InputError> {
        if points.len() < 2 {
            return Err(InputError::TooFewPoints(points.len()));
        }
        Ok(LineReference {
            points,
            positive_offset,
            negative_offset,
        })
    }

    pub fn first(&self) -> &Lrp {
        &self.points[0]
    }

    pub fn last(&self) -> &Lrp {
        &self.points[self.points.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of all distances to next point
    pub fn expected_length(&self) -> f64 {
        self.points.iter().filter_map(|p| p.dnp).sum()
    }

    /// Copy of this reference converted from WGS84 into `frame`.
    ///
    /// Distances to next point and offsets are rescaled from meters into the length
    /// units of `frame`, using the scale halfway along each segment.
    pub fn to_frame(&self, frame: Frame) -> Self {
        let mut converted = self.clone();
        for (i, point) in converted.points.iter_mut().enumerate() {
            let here = self.points[i].coord;
            if let Some(dnp) = point.dnp.as_mut() {
                let next = self.points.get(i + 1).map_or(here, |p| p.coord);
                let middle = Coord {
                    x: (here.x + next.x) / 2.0,
                    y: (here.y + next.y) / 2.0,
                };
                *dnp *= frame.units_per_meter(middle);
            }
            point.coord = frame.from_wgs84(here);
        }
        converted.positive_offset *= frame.units_per_meter(self.first().coord);
        converted.negative_offset *= frame.units_per_meter(self.last().coord);
        converted
    }

    /// Straight line through the LRP coordinates
    pub fn lrp_line(&self) -> LineString<f64> {
        self.points.iter().map(|p| p.coord).collect()
    }
}

/// A parsed code: either a line reference or a location type the engine does not handle
#[derive(Debug, Clone, PartialEq)]
pub enum LocationReference {
    Line(LineReference),
    Other(LocationType),
}

impl LocationReference {
    pub fn location_type(&self) -> LocationType {
        match self {
            LocationReference::Line(_) => LocationType::Line,
            LocationReference::Other(t) => *t,
        }
    }
}

/// Parse a base64 OpenLR code.
///
/// Offsets are stored in the binary form as a share of the first (positive) or last
/// (negative) LRP segment; they are converted to meters here.
pub fn parse_location(code: &str) -> Result<LocationReference, InputError> {
    let location = openlr::decode_base64_openlr(code.trim())
        .map_err(|e| InputError::MalformedCode(format!("{:?}", e)))?;

    let other = match location {
        openlr::LocationReference::Line(line) => return convert_line(line).map(LocationReference::Line),
        openlr::LocationReference::GeoCoordinate(_) => LocationType::GeoCoordinate,
        openlr::LocationReference::PointAlongLine(_) => LocationType::PointAlongLine,
        openlr::LocationReference::Poi(_) => LocationType::Poi,
        openlr::LocationReference::Circle(_) => LocationType::Circle,
        openlr::LocationReference::Rectangle(_) => LocationType::Rectangle,
        openlr::LocationReference::Grid(_) => LocationType::Grid,
        openlr::LocationReference::Polygon(_) => LocationType::Polygon,
        openlr::LocationReference::ClosedLine(_) => LocationType::ClosedLine,
    };
    Ok(LocationReference::Other(other))
}

fn convert_line(line: openlr::Line) -> Result<LineReference, InputError> {
    let points: Vec<Lrp> = line
        .points
        .iter()
        .map(|point| Lrp {
            coord: Coord {
                x: point.coordinate.lon,
                y: point.coordinate.lat,
            },
            bearing: point.line.bear.degrees() as f64,
            frc: Frc::from_u8(point.line.frc as u8),
            fow: Fow::from_u8(point.line.fow as u8),
            dnp: point.path.as_ref().map(|p| p.dnp.meters() as f64),
        })
        .collect();

    if points.len() < 2 {
        return Err(InputError::TooFewPoints(points.len()));
    }

    let first_dnp = points[0].dnp.unwrap_or(0.0);
    let last_dnp = points[points.len() - 2].dnp.unwrap_or(0.0);
    let positive_offset = line.offsets.pos.range() * first_dnp;
    let negative_offset = line.offsets.neg.range() * last_dnp;

    LineReference::new(points, positive_offset, negative_offset)
}
