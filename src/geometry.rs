//! Coordinate frames, buffer construction and containment tests.
//!
//! All geometries handled by the engine live in the frame of the target network.
//! Distances returned by [`Frame::distance`] are meters for [`Frame::Wgs84`] and CRS
//! units for [`Frame::WebMercator`].

use std::fmt;
use std::str::FromStr;

use geo::Buffer as _;
use geo::{BooleanOps, BoundingRect, Coord, LineString, MapCoords, MultiLineString, Point, Polygon};
use geo::{Rect, Relate};
use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, StartupError};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Semi-major axis used by EPSG:3857
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitudes beyond this are clamped when projecting to Web Mercator
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Coordinate reference system of the target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Frame {
    /// EPSG:4326, lon/lat degrees
    #[default]
    Wgs84,
    /// EPSG:3857, planar meters
    WebMercator,
}

impl Frame {
    pub fn crs(&self) -> &'static str {
        match self {
            Frame::Wgs84 => "EPSG:4326",
            Frame::WebMercator => "EPSG:3857",
        }
    }

    /// Distance between two coordinates of this frame
    pub fn distance(&self, a: Coord<f64>, b: Coord<f64>) -> f64 {
        match self {
            Frame::Wgs84 => haversine_distance(a, b),
            Frame::WebMercator => ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt(),
        }
    }

    /// Bearing in degrees (0-360, clockwise from north) from `from` towards `to`
    pub fn bearing(&self, from: Coord<f64>, to: Coord<f64>) -> f64 {
        let degrees = match self {
            Frame::Wgs84 => {
                let lat1 = from.y.to_radians();
                let lat2 = to.y.to_radians();
                let dlon = (to.x - from.x).to_radians();
                let y = dlon.sin() * lat2.cos();
                let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
                y.atan2(x).to_degrees()
            }
            Frame::WebMercator => (to.x - from.x).atan2(to.y - from.y).to_degrees(),
        };
        normalize_bearing(degrees)
    }

    /// Length of a line measured in this frame
    pub fn line_length(&self, line: &LineString<f64>) -> f64 {
        line.lines().map(|l| self.distance(l.start, l.end)).sum()
    }

    /// Convert a WGS84 lon/lat coordinate into this frame
    pub fn from_wgs84(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Frame::Wgs84 => coord,
            Frame::WebMercator => {
                let lat = coord.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
                Coord {
                    x: WEB_MERCATOR_RADIUS * coord.x.to_radians(),
                    y: WEB_MERCATOR_RADIUS
                        * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
                            .tan()
                            .ln(),
                }
            }
        }
    }

    /// Length units of this frame per meter of ground distance at a WGS84 coordinate.
    ///
    /// Web Mercator stretches distances by `1 / cos(lat)`; WGS84 lengths are haversine
    /// meters already.
    pub fn units_per_meter(&self, wgs84: Coord<f64>) -> f64 {
        match self {
            Frame::Wgs84 => 1.0,
            Frame::WebMercator => {
                let lat = wgs84.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
                1.0 / lat.to_radians().cos()
            }
        }
    }

    /// Convert a coordinate of this frame back to WGS84 lon/lat
    pub fn to_wgs84(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Frame::Wgs84 => coord,
            Frame::WebMercator => Coord {
                x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees(),
            },
        }
    }

    /// Bounding box covering every point within `radius` of `center`
    pub fn expand(&self, center: Coord<f64>, radius: f64) -> Rect<f64> {
        let (dx, dy) = match self {
            Frame::Wgs84 => {
                // Approximate degrees from meters, adjusted for latitude
                let meters_per_deg_lat = 111_132.0;
                let meters_per_deg_lon = meters_per_deg_lat * center.y.to_radians().cos().max(1e-6);
                (radius / meters_per_deg_lon, radius / meters_per_deg_lat)
            }
            Frame::WebMercator => (radius, radius),
        };
        Rect::new(
            Coord {
                x: center.x - dx,
                y: center.y - dy,
            },
            Coord {
                x: center.x + dx,
                y: center.y + dy,
            },
        )
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.crs())
    }
}

impl FromStr for Frame {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EPSG:4326" => Ok(Frame::Wgs84),
            "EPSG:3857" => Ok(Frame::WebMercator),
            _ => Err(StartupError::UnknownCrs(s.to_string())),
        }
    }
}

/// Great-circle distance in meters between two lon/lat coordinates
pub fn haversine_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let dlat = (b.y - a.y).to_radians();
    let dlon = (b.x - a.x).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

pub fn normalize_bearing(degrees: f64) -> f64 {
    ((degrees % 360.0) + 360.0) % 360.0
}

/// Planar projection used to offset lines by a metric radius.
///
/// WGS84 coordinates are mapped to a local equirectangular plane centred on `origin`;
/// Web Mercator coordinates are already planar and pass through untouched.
#[derive(Debug, Clone, Copy)]
struct LocalProjection {
    frame: Frame,
    origin: Coord<f64>,
    meters_per_rad_lon: f64,
}

impl LocalProjection {
    fn new(frame: Frame, origin: Coord<f64>) -> Self {
        LocalProjection {
            frame,
            origin,
            meters_per_rad_lon: EARTH_RADIUS_M * origin.y.to_radians().cos().max(1e-6),
        }
    }

    fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        match self.frame {
            Frame::WebMercator => c,
            Frame::Wgs84 => Coord {
                x: (c.x - self.origin.x).to_radians() * self.meters_per_rad_lon,
                y: (c.y - self.origin.y).to_radians() * EARTH_RADIUS_M,
            },
        }
    }

    fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        match self.frame {
            Frame::WebMercator => c,
            Frame::Wgs84 => Coord {
                x: self.origin.x + (c.x / self.meters_per_rad_lon).to_degrees(),
                y: self.origin.y + (c.y / EARTH_RADIUS_M).to_degrees(),
            },
        }
    }
}

/// Tolerance region around a source line.
#[derive(Debug, Clone)]
pub struct Buffer {
    polygon: Polygon<f64>,
    bbox: Rect<f64>,
    diameter: f64,
    frame: Frame,
}

impl Buffer {
    /// Offset `line` by `diameter / 2` on both sides.
    ///
    /// The offset is planar: WGS84 lines are projected to a local equirectangular plane
    /// centred on their first vertex, buffered in meters, and projected back.
    pub fn build(line: &LineString<f64>, diameter: f64, frame: Frame) -> Result<Self, GeometryError> {
        if line.0.len() < 2 {
            return Err(GeometryError::TooFewPoints(line.0.len()));
        }
        if !(diameter.is_finite() && diameter > 0.0) {
            return Err(GeometryError::InvalidDiameter(diameter));
        }
        if line.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(GeometryError::NonFinite);
        }

        let projection = LocalProjection::new(frame, line.0[0]);
        let local: LineString<f64> = line.coords().map(|c| projection.forward(*c)).collect();
        if Frame::WebMercator.line_length(&local) <= 0.0 {
            return Err(GeometryError::ZeroLength);
        }

        let mut offset = local.buffer(diameter / 2.0);
        if offset.0.len() != 1 {
            return Err(GeometryError::Degenerate(offset.0.len()));
        }
        let polygon = offset.0.remove(0).map_coords(|c| projection.inverse(c));
        let bbox = polygon.bounding_rect().ok_or(GeometryError::Degenerate(0))?;

        Ok(Buffer {
            polygon,
            bbox,
            diameter,
            frame,
        })
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bbox(&self) -> Rect<f64> {
        self.bbox
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// True if every point of `line` lies inside or on the boundary of the buffer
    pub fn covers_line(&self, line: &LineString<f64>) -> bool {
        covers_line(&self.polygon, line)
    }

    pub fn covers_point(&self, coord: Coord<f64>) -> bool {
        covers_point(&self.polygon, coord)
    }

    /// Share of the length of `line` that lies within the buffer
    pub fn fraction_within(&self, line: &LineString<f64>) -> f64 {
        fraction_within(&self.polygon, line, self.frame)
    }
}

/// Inclusive containment: boundary-touching geometries count as contained.
pub fn covers_line(polygon: &Polygon<f64>, line: &LineString<f64>) -> bool {
    if line.0.is_empty() {
        return false;
    }
    if line.lines().all(|l| l.start == l.end) {
        return covers_point(polygon, line.0[0]);
    }
    polygon.relate(line).is_covers()
}

pub fn covers_point(polygon: &Polygon<f64>, coord: Coord<f64>) -> bool {
    polygon.relate(&Point::from(coord)).is_covers()
}

/// Length of the part of `line` inside `polygon` divided by the length of `line`
pub fn fraction_within(polygon: &Polygon<f64>, line: &LineString<f64>, frame: Frame) -> f64 {
    let total = frame.line_length(line);
    if total <= 0.0 {
        return 0.0;
    }
    let inside = polygon.clip(&MultiLineString::new(vec![line.clone()]), false);
    let inside_length: f64 = inside.iter().map(|part| frame.line_length(part)).sum();
    (inside_length / total).clamp(0.0, 1.0)
}

/// Coordinate at `distance` along `line`, clamped to its ends
pub fn point_along(line: &LineString<f64>, frame: Frame, distance: f64) -> Option<Coord<f64>> {
    let first = *line.0.first()?;
    if distance <= 0.0 {
        return Some(first);
    }
    let mut walked = 0.0;
    for segment in line.lines() {
        let len = frame.distance(segment.start, segment.end);
        if len > 0.0 && walked + len >= distance {
            let t = (distance - walked) / len;
            return Some(Coord {
                x: segment.start.x + t * (segment.end.x - segment.start.x),
                y: segment.start.y + t * (segment.end.y - segment.start.y),
            });
        }
        walked += len;
    }
    line.0.last().copied()
}

/// Sub-line of `line` after removing `from_start` at the beginning and `from_end` at
/// the end. If the offsets overlap, the result collapses to a single repeated point.
pub fn trim_line(line: &LineString<f64>, frame: Frame, from_start: f64, from_end: f64) -> LineString<f64> {
    let total = frame.line_length(line);
    if line.0.len() < 2 || total <= 0.0 {
        return line.clone();
    }
    let begin = from_start.clamp(0.0, total);
    let finish = (total - from_end.max(0.0)).clamp(begin, total);

    let (Some(head), Some(tail)) = (
        point_along(line, frame, begin),
        point_along(line, frame, finish),
    ) else {
        return line.clone();
    };

    let mut coords = vec![head];
    let mut walked = 0.0;
    for segment in line.lines() {
        walked += frame.distance(segment.start, segment.end);
        if walked > begin && walked < finish {
            coords.push(segment.end);
        }
    }
    coords.push(tail);
    LineString::new(coords)
}

/// Concatenate lines that meet end to start, dropping the shared vertex
pub fn join_lines<'a>(lines: impl IntoIterator<Item = &'a LineString<f64>>) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = Vec::new();
    for line in lines {
        for c in line.coords() {
            if coords.last() != Some(c) {
                coords.push(*c);
            }
        }
    }
    LineString::new(coords)
}
