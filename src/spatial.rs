use geo::{Coord, LineString, Rect};
use petgraph::graph::EdgeIndex;
use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::Frame;

/// Index mode selection for spatial queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialIndexMode {
    /// Use R-tree for fast queries (slower startup, faster queries)
    /// This is the default mode for batch runs
    #[default]
    RTree,
    /// Use linear scan for fast startup (faster startup, slower queries)
    /// Useful when only a handful of records are analyzed
    LinearScan,
}

/// Bounding box of one link in the R-tree
#[derive(Debug, Clone)]
pub struct LinkEnvelope {
    pub link_idx: EdgeIndex,
    pub link_id: u64,
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl LinkEnvelope {
    pub fn new(link_idx: EdgeIndex, link_id: u64, bbox: Rect<f64>) -> Self {
        LinkEnvelope {
            link_idx,
            link_id,
            min: [bbox.min().x, bbox.min().y],
            max: [bbox.max().x, bbox.max().y],
        }
    }

    fn intersects(&self, min: [f64; 2], max: [f64; 2]) -> bool {
        self.min[0] <= max[0] && self.max[0] >= min[0] && self.min[1] <= max[1] && self.max[1] >= min[1]
    }
}

impl RTreeObject for LinkEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

enum SpatialIndexStorage {
    RTree(RTree<LinkEnvelope>),
    LinearScan(Vec<LinkEnvelope>),
}

/// Spatial index over link bounding boxes
pub struct SpatialIndex {
    storage: SpatialIndexStorage,
}

impl SpatialIndex {
    /// Build a new spatial index using R-tree (default)
    pub fn new(links: Vec<LinkEnvelope>) -> Self {
        Self::with_mode(links, SpatialIndexMode::RTree)
    }

    /// Build a new spatial index with the specified mode
    ///
    /// - `RTree`: Builds an R-tree index for O(log N) queries. Slower startup but fast queries.
    /// - `LinearScan`: Skips R-tree construction for instant startup. O(N) queries.
    pub fn with_mode(links: Vec<LinkEnvelope>, mode: SpatialIndexMode) -> Self {
        let storage = match mode {
            SpatialIndexMode::RTree => SpatialIndexStorage::RTree(RTree::bulk_load(links)),
            SpatialIndexMode::LinearScan => SpatialIndexStorage::LinearScan(links),
        };
        SpatialIndex { storage }
    }

    /// Links whose bounding box intersects `rect` (boundary inclusive), in no particular order
    pub fn find_in_rect(&self, rect: Rect<f64>) -> Vec<&LinkEnvelope> {
        let min = [rect.min().x, rect.min().y];
        let max = [rect.max().x, rect.max().y];

        match &self.storage {
            SpatialIndexStorage::RTree(rtree) => rtree
                .locate_in_envelope_intersecting(&AABB::from_corners(min, max))
                .collect(),
            SpatialIndexStorage::LinearScan(links) => {
                links.iter().filter(|e| e.intersects(min, max)).collect()
            }
        }
    }

    /// Links whose bounding box lies within `radius` of `center`
    pub fn find_nearby(&self, center: Coord<f64>, radius: f64, frame: Frame) -> Vec<&LinkEnvelope> {
        self.find_in_rect(frame.expand(center, radius))
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            SpatialIndexStorage::RTree(rtree) => rtree.size(),
            SpatialIndexStorage::LinearScan(links) => links.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the index mode being used
    pub fn mode(&self) -> SpatialIndexMode {
        match &self.storage {
            SpatialIndexStorage::RTree(_) => SpatialIndexMode::RTree,
            SpatialIndexStorage::LinearScan(_) => SpatialIndexMode::LinearScan,
        }
    }
}

/// Calculate bearing difference, accounting for wraparound
/// Returns value in 0-180 range
pub fn bearing_difference(b1: f64, b2: f64) -> f64 {
    let diff = (b1 - b2).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Closest point on a line to a query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub point: Coord<f64>,
    /// Distance from the query point to `point`
    pub distance: f64,
    /// Distance along the line from its first vertex to `point`
    pub along: f64,
    /// `along` divided by the line length (0.0 to 1.0)
    pub fraction: f64,
    /// Bearing of the segment containing `point`
    pub bearing: f64,
}

/// Project a point onto a line.
///
/// Segments are projected in a plane scaled by the cosine of the query latitude for
/// WGS84, so the result is the closest point in meters rather than in degrees.
pub fn project_point(point: Coord<f64>, line: &LineString<f64>, frame: Frame) -> Option<Projection> {
    if line.0.len() < 2 {
        return None;
    }

    let x_scale = match frame {
        Frame::Wgs84 => point.y.to_radians().cos().max(1e-6),
        Frame::WebMercator => 1.0,
    };

    let mut walked = 0.0;
    let mut best: Option<Projection> = None;

    for segment in line.lines() {
        let seg_len = frame.distance(segment.start, segment.end);
        let t = project_onto_segment(point, segment.start, segment.end, x_scale);
        let closest = Coord {
            x: segment.start.x + t * (segment.end.x - segment.start.x),
            y: segment.start.y + t * (segment.end.y - segment.start.y),
        };
        let distance = frame.distance(point, closest);

        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Projection {
                point: closest,
                distance,
                along: walked + t * seg_len,
                fraction: 0.0,
                bearing: frame.bearing(segment.start, segment.end),
            });
        }
        walked += seg_len;
    }

    best.map(|mut p| {
        p.fraction = if walked > 0.0 {
            (p.along / walked).clamp(0.0, 1.0)
        } else {
            0.0
        };
        p
    })
}

/// Fraction along segment `p1 -> p2` of the closest point to `point`
fn project_onto_segment(point: Coord<f64>, p1: Coord<f64>, p2: Coord<f64>, x_scale: f64) -> f64 {
    let dx = (p2.x - p1.x) * x_scale;
    let dy = p2.y - p1.y;

    if dx == 0.0 && dy == 0.0 {
        return 0.0;
    }

    let t = ((point.x - p1.x) * x_scale * dx + (point.y - p1.y) * dy) / (dx * dx + dy * dy);
    t.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    #[test]
    fn test_bearing_difference() {
        assert!((bearing_difference(10.0, 20.0) - 10.0).abs() < 0.01);
        assert!((bearing_difference(350.0, 10.0) - 20.0).abs() < 0.01);
        assert!((bearing_difference(180.0, 0.0) - 180.0).abs() < 0.01);
        assert!((bearing_difference(450.0, 0.0) - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_project_point_planar() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0), (x: 100.0, y: 100.0)];
        let p = project_point(Coord { x: 110.0, y: 50.0 }, &line, Frame::WebMercator).unwrap();

        assert_eq!(p.point, Coord { x: 100.0, y: 50.0 });
        assert!((p.distance - 10.0).abs() < 1e-9);
        assert!((p.along - 150.0).abs() < 1e-9);
        assert!((p.fraction - 0.75).abs() < 1e-9);
        assert!(p.bearing.abs() < 1e-9);
    }

    #[test]
    fn test_project_point_geographic() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 0.01, y: 0.0)];
        let p = project_point(Coord { x: 0.005, y: 0.0001 }, &line, Frame::Wgs84).unwrap();

        assert!((p.fraction - 0.5).abs() < 1e-6);
        // 0.0001 degrees of latitude is ~11m
        assert!((p.distance - 11.1).abs() < 0.2);
        assert!((p.bearing - 90.0).abs() < 1e-6);
    }

    fn create_test_envelopes() -> Vec<LinkEnvelope> {
        let rect = |x0: f64, y0: f64, x1: f64, y1: f64| {
            Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
        };
        vec![
            LinkEnvelope::new(EdgeIndex::new(0), 10, rect(0.0, 0.0, 0.001, 0.0)),
            LinkEnvelope::new(EdgeIndex::new(1), 11, rect(0.001, 0.0, 0.002, 0.0)),
            LinkEnvelope::new(EdgeIndex::new(2), 12, rect(1.0, 1.0, 1.001, 1.0)),
        ]
    }

    #[test]
    fn test_spatial_index_modes() {
        let rtree = SpatialIndex::with_mode(create_test_envelopes(), SpatialIndexMode::RTree);
        let linear = SpatialIndex::with_mode(create_test_envelopes(), SpatialIndexMode::LinearScan);

        assert_eq!(rtree.mode(), SpatialIndexMode::RTree);
        assert_eq!(linear.mode(), SpatialIndexMode::LinearScan);
        assert_eq!(rtree.len(), 3);
        assert!(!linear.is_empty());
        assert_eq!(SpatialIndex::new(Vec::new()).mode(), SpatialIndexMode::RTree);
    }

    #[test]
    fn test_spatial_index_modes_find_same_results() {
        let rtree = SpatialIndex::with_mode(create_test_envelopes(), SpatialIndexMode::RTree);
        let linear = SpatialIndex::with_mode(create_test_envelopes(), SpatialIndexMode::LinearScan);

        let center = Coord { x: 0.001, y: 0.0 };
        let mut rtree_ids: Vec<_> = rtree
            .find_nearby(center, 500.0, Frame::Wgs84)
            .iter()
            .map(|e| e.link_id)
            .collect();
        let mut linear_ids: Vec<_> = linear
            .find_nearby(center, 500.0, Frame::Wgs84)
            .iter()
            .map(|e| e.link_id)
            .collect();
        rtree_ids.sort();
        linear_ids.sort();

        assert_eq!(rtree_ids, vec![10, 11]);
        assert_eq!(rtree_ids, linear_ids);
    }

    #[test]
    fn test_find_in_rect_is_boundary_inclusive() {
        let index = SpatialIndex::new(create_test_envelopes());
        let touching = Rect::new(Coord { x: 1.001, y: 1.0 }, Coord { x: 2.0, y: 2.0 });
        let found: Vec<_> = index.find_in_rect(touching).iter().map(|e| e.link_id).collect();
        assert_eq!(found, vec![12]);
    }
}
