use std::collections::HashMap;

use geo::{BoundingRect, Coord, LineString, Rect};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{normalize_bearing, Frame};
use crate::spatial::{project_point, LinkEnvelope, Projection, SpatialIndex, SpatialIndexMode};

/// Functional Road Class, 0 (most important) to 7 (least important).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Frc {
    Frc0 = 0, // Main road / motorway
    Frc1 = 1, // First class road
    Frc2 = 2, // Second class road
    Frc3 = 3, // Third class road
    Frc4 = 4, // Fourth class road
    Frc5 = 5, // Fifth class road
    Frc6 = 6, // Sixth class road
    Frc7 = 7, // Other class road
}

impl Frc {
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => Frc::Frc0,
            1 => Frc::Frc1,
            2 => Frc::Frc2,
            3 => Frc::Frc3,
            4 => Frc::Frc4,
            5 => Frc::Frc5,
            6 => Frc::Frc6,
            _ => Frc::Frc7,
        }
    }

    /// Map an OSM highway tag to an FRC, for network stores without an `frc` column.
    pub fn from_osm_highway(highway: &str) -> Self {
        match highway {
            "motorway" => Frc::Frc0,
            "trunk" => Frc::Frc1,
            "primary" => Frc::Frc2,
            "secondary" => Frc::Frc3,
            "motorway_link" | "trunk_link" | "primary_link" => Frc::Frc3,
            "tertiary" | "secondary_link" | "tertiary_link" => Frc::Frc4,
            "unclassified" | "residential" | "living_street" => Frc::Frc5,
            "service" | "track" => Frc::Frc6,
            _ => Frc::Frc7,
        }
    }

    /// Check if another FRC is within `tolerance` classes of this one
    pub fn is_compatible(&self, other: Frc, tolerance: u8) -> bool {
        let diff = (*self as i8 - other as i8).unsigned_abs();
        diff <= tolerance
    }
}

/// Form of Way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Fow {
    Undefined = 0,
    Motorway = 1,
    MultipleCarriageway = 2,
    SingleCarriageway = 3,
    Roundabout = 4,
    TrafficSquare = 5,
    SlipRoad = 6,
    Other = 7,
}

impl Fow {
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => Fow::Undefined,
            1 => Fow::Motorway,
            2 => Fow::MultipleCarriageway,
            3 => Fow::SingleCarriageway,
            4 => Fow::Roundabout,
            5 => Fow::TrafficSquare,
            6 => Fow::SlipRoad,
            _ => Fow::Other,
        }
    }

    /// Map OSM tags to FOW
    pub fn from_osm_tags(highway: &str, junction: Option<&str>, lanes: Option<u8>) -> Self {
        if junction == Some("roundabout") {
            return Fow::Roundabout;
        }

        match highway {
            "motorway" => Fow::Motorway,
            "motorway_link" | "trunk_link" | "primary_link" | "secondary_link"
            | "tertiary_link" => Fow::SlipRoad,
            "trunk" | "primary" | "secondary" if lanes.unwrap_or(1) >= 4 => {
                Fow::MultipleCarriageway
            }
            _ => Fow::SingleCarriageway,
        }
    }

    /// How well a link of this FOW substitutes for an LRP's `wanted` FOW.
    /// Returns a score from 0.0 (incompatible) to 1.0 (exact match).
    pub fn substitution_score(&self, wanted: Fow) -> f64 {
        // Row = LRP's FOW (wanted), Column = link's FOW (self)
        #[rustfmt::skip]
        const FOW_SCORE_MATRIX: [[f64; 8]; 8] = [
            //       Und   Mwy   Mlt   Sgl   Rnd   Tsq   Slp   Oth
            /* Und */ [0.50, 0.50, 0.50, 0.50, 0.50, 0.50, 0.50, 0.50],
            /* Mwy */ [0.50, 1.00, 0.75, 0.00, 0.00, 0.00, 0.00, 0.00],
            /* Mlt */ [0.50, 0.75, 1.00, 0.75, 0.50, 0.00, 0.00, 0.00],
            /* Sgl */ [0.50, 0.00, 0.75, 1.00, 0.50, 0.50, 0.00, 0.00],
            /* Rnd */ [0.50, 0.00, 0.50, 0.50, 1.00, 0.50, 0.00, 0.00],
            /* Tsq */ [0.50, 0.00, 0.00, 0.50, 0.50, 1.00, 0.00, 0.00],
            /* Slp */ [0.50, 0.00, 0.00, 0.00, 0.00, 0.00, 1.00, 0.00],
            /* Oth */ [0.50, 0.00, 0.00, 0.00, 0.00, 0.00, 0.00, 1.00],
        ];

        FOW_SCORE_MATRIX[wanted as usize][*self as usize]
    }

    pub fn is_compatible(&self, wanted: Fow) -> bool {
        self.substitution_score(wanted) > 0.0
    }
}

/// Travel directions permitted on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Start to end and end to start
    Both,
    /// Start to end only
    Forward,
    /// End to start only
    Backward,
}

impl Direction {
    /// Decode the network store's direction column (1 both, 2 forward, 3 backward)
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Direction::Both),
            2 => Some(Direction::Forward),
            3 => Some(Direction::Backward),
            _ => None,
        }
    }

    pub fn allows(&self, reversed: bool) -> bool {
        match self {
            Direction::Both => true,
            Direction::Forward => !reversed,
            Direction::Backward => reversed,
        }
    }
}

/// One link travelled in one direction. Ordered by (link id, reversed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraversedLink {
    pub link_id: u64,
    pub reversed: bool,
}

impl TraversedLink {
    pub fn forward(link_id: u64) -> Self {
        TraversedLink {
            link_id,
            reversed: false,
        }
    }

    pub fn backward(link_id: u64) -> Self {
        TraversedLink {
            link_id,
            reversed: true,
        }
    }
}

/// A junction in the road network (intersection or endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Junction {
    pub id: i64,
    pub coord: Coord<f64>,
}

/// A road segment between two junctions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: u64,
    pub start_junction: i64,
    pub end_junction: i64,
    pub direction: Direction,
    pub frc: Frc,
    pub fow: Fow,
    /// Length in network units: meters for WGS84, projected units for Web Mercator
    pub length: f64,
    pub geometry: LineString<f64>,
    pub bbox: Rect<f64>,
    /// Bearing at start of link, travelling start to end (0-360)
    pub bearing_start: f64,
    /// Bearing at end of link, travelling start to end (0-360)
    pub bearing_end: f64,
}

impl Link {
    /// Create a link, deriving length, bounding box and bearings from its geometry
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        start_junction: i64,
        end_junction: i64,
        direction: Direction,
        frc: Frc,
        fow: Fow,
        geometry: LineString<f64>,
        frame: Frame,
    ) -> Result<Self, NetworkError> {
        let coords = &geometry.0;
        if coords.len() < 2 {
            return Err(NetworkError::InvalidGeometry {
                link: id,
                points: coords.len(),
            });
        }
        let n = coords.len();
        let bearing_start = frame.bearing(coords[0], coords[1]);
        let bearing_end = frame.bearing(coords[n - 2], coords[n - 1]);
        let length = frame.line_length(&geometry);
        let bbox = geometry.bounding_rect().ok_or(NetworkError::InvalidGeometry {
            link: id,
            points: 0,
        })?;

        Ok(Link {
            id,
            start_junction,
            end_junction,
            direction,
            frc,
            fow,
            length,
            geometry,
            bbox,
            bearing_start,
            bearing_end,
        })
    }

    /// Replace the derived length with the length recorded in the network store
    pub fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }

    pub fn entry_junction(&self, reversed: bool) -> i64 {
        if reversed {
            self.end_junction
        } else {
            self.start_junction
        }
    }

    pub fn exit_junction(&self, reversed: bool) -> i64 {
        if reversed {
            self.start_junction
        } else {
            self.end_junction
        }
    }

    /// Geometry in travel order
    pub fn travel_geometry(&self, reversed: bool) -> LineString<f64> {
        let mut geometry = self.geometry.clone();
        if reversed {
            geometry.0.reverse();
        }
        geometry
    }

    /// Bearing when entering the link in travel direction
    pub fn entry_bearing(&self, reversed: bool) -> f64 {
        if reversed {
            normalize_bearing(self.bearing_end + 180.0)
        } else {
            self.bearing_start
        }
    }

    /// Bearing when leaving the link in travel direction
    pub fn exit_bearing(&self, reversed: bool) -> f64 {
        if reversed {
            normalize_bearing(self.bearing_start + 180.0)
        } else {
            self.bearing_end
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Duplicate link id {0}")]
    DuplicateLink(u64),

    #[error("Link {link} references unknown junction {junction}")]
    UnknownJunction { link: u64, junction: i64 },

    #[error("Link {link} has {points} geometry points, need at least 2")]
    InvalidGeometry { link: u64, points: usize },
}

/// A link near a query point
#[derive(Debug, Clone, Copy)]
pub struct NearbyLink<'a> {
    pub link: &'a Link,
    pub projection: Projection,
}

/// The road network graph.
///
/// Each link is stored once, as a graph edge from its start to its end junction.
/// Travel direction is a link attribute; [`RoadNetwork::successors`] honours it.
pub struct RoadNetwork {
    frame: Frame,
    graph: DiGraph<Junction, Link>,
    junction_index: HashMap<i64, NodeIndex>,
    link_index: HashMap<u64, EdgeIndex>,
    spatial: Option<SpatialIndex>,
}

impl RoadNetwork {
    pub fn new(frame: Frame) -> Self {
        RoadNetwork {
            frame,
            graph: DiGraph::new(),
            junction_index: HashMap::new(),
            link_index: HashMap::new(),
            spatial: None,
        }
    }

    /// Create a new network with pre-allocated capacity.
    pub fn with_capacity(frame: Frame, junction_hint: usize, link_hint: usize) -> Self {
        RoadNetwork {
            frame,
            graph: DiGraph::with_capacity(junction_hint, link_hint),
            junction_index: HashMap::with_capacity(junction_hint),
            link_index: HashMap::with_capacity(link_hint),
            spatial: None,
        }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Add a junction, or return the existing one with the same id
    pub fn get_or_add_junction(&mut self, id: i64, coord: Coord<f64>) -> NodeIndex {
        if let Some(&idx) = self.junction_index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(Junction { id, coord });
        self.junction_index.insert(id, idx);
        idx
    }

    /// Add a link between two existing junctions
    pub fn add_link(&mut self, link: Link) -> Result<EdgeIndex, NetworkError> {
        if self.link_index.contains_key(&link.id) {
            return Err(NetworkError::DuplicateLink(link.id));
        }
        let junction = |id: i64| {
            self.junction_index
                .get(&id)
                .copied()
                .ok_or(NetworkError::UnknownJunction {
                    link: link.id,
                    junction: id,
                })
        };
        let from = junction(link.start_junction)?;
        let to = junction(link.end_junction)?;

        let link_id = link.id;
        let idx = self.graph.add_edge(from, to, link);
        self.link_index.insert(link_id, idx);
        // Index is stale once the link set changes
        self.spatial = None;
        Ok(idx)
    }

    /// Build the spatial index over all links. Queries before this fall back to a scan.
    pub fn index_links(&mut self, mode: SpatialIndexMode) {
        let envelopes = self
            .graph
            .edge_references()
            .map(|e| LinkEnvelope::new(e.id(), e.weight().id, e.weight().bbox))
            .collect();
        self.spatial = Some(SpatialIndex::with_mode(envelopes, mode));
    }

    pub fn is_indexed(&self) -> bool {
        self.spatial.is_some()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn junction_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn link_by_id(&self, id: u64) -> Option<&Link> {
        self.link_index
            .get(&id)
            .and_then(|&idx| self.graph.edge_weight(idx))
    }

    pub fn junction(&self, id: i64) -> Option<&Junction> {
        self.junction_index
            .get(&id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> + '_ {
        self.graph.edge_weights()
    }

    /// Links whose bounding box intersects `bbox`, in ascending id order
    pub fn links_in_bbox(&self, bbox: Rect<f64>) -> Vec<&Link> {
        let mut links: Vec<&Link> = match &self.spatial {
            Some(index) => index
                .find_in_rect(bbox)
                .into_iter()
                .filter_map(|e| self.graph.edge_weight(e.link_idx))
                .collect(),
            None => self
                .graph
                .edge_weights()
                .filter(|l| rects_intersect(l.bbox, bbox))
                .collect(),
        };
        links.sort_by_key(|l| l.id);
        links
    }

    /// Ids of all links incident to a junction, ascending
    pub fn junction_adjacency(&self, junction_id: i64) -> Vec<u64> {
        let Some(&idx) = self.junction_index.get(&junction_id) else {
            return Vec::new();
        };
        let mut ids: Vec<u64> = self
            .graph
            .edges_directed(idx, EdgeDirection::Outgoing)
            .chain(self.graph.edges_directed(idx, EdgeDirection::Incoming))
            .map(|e| e.weight().id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Traversals that may follow `from`, in ascending (link id, reversed) order.
    ///
    /// A traversal continues through the exit junction of `from` onto any link whose
    /// direction allows leaving that junction. Immediate U-turns onto the same link are
    /// excluded.
    pub fn successors(&self, from: TraversedLink) -> Vec<TraversedLink> {
        let Some(link) = self.link_by_id(from.link_id) else {
            return Vec::new();
        };
        let mut next = self.departures(link.exit_junction(from.reversed));
        next.retain(|t| t.link_id != from.link_id);
        next
    }

    /// Traversals leaving a junction, in ascending (link id, reversed) order
    pub fn departures(&self, junction_id: i64) -> Vec<TraversedLink> {
        let Some(&idx) = self.junction_index.get(&junction_id) else {
            return Vec::new();
        };
        let forward = self
            .graph
            .edges_directed(idx, EdgeDirection::Outgoing)
            .map(|e| e.weight())
            .filter(|l| l.direction.allows(false))
            .map(|l| TraversedLink::forward(l.id));
        let backward = self
            .graph
            .edges_directed(idx, EdgeDirection::Incoming)
            .map(|e| e.weight())
            .filter(|l| l.direction.allows(true))
            .map(|l| TraversedLink::backward(l.id));

        let mut out: Vec<TraversedLink> = forward.chain(backward).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Links whose geometry passes within `radius` of `coord`, closest first.
    /// Ties are broken by link id.
    pub fn links_near(&self, coord: Coord<f64>, radius: f64) -> Vec<NearbyLink<'_>> {
        let mut nearby: Vec<NearbyLink<'_>> = self
            .links_in_bbox(self.frame.expand(coord, radius * 1.5))
            .into_iter()
            .filter_map(|link| {
                project_point(coord, &link.geometry, self.frame)
                    .map(|projection| NearbyLink { link, projection })
            })
            .filter(|n| n.projection.distance <= radius)
            .collect();

        nearby.sort_by(|a, b| {
            a.projection
                .distance
                .total_cmp(&b.projection.distance)
                .then(a.link.id.cmp(&b.link.id))
        });
        nearby
    }
}

fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    a.min().x <= b.max().x && a.max().x >= b.min().x && a.min().y <= b.max().y && a.max().y >= b.min().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn planar_link(id: u64, from: i64, to: i64, direction: Direction, geometry: LineString<f64>) -> Link {
        Link::new(
            id,
            from,
            to,
            direction,
            Frc::Frc3,
            Fow::SingleCarriageway,
            geometry,
            Frame::WebMercator,
        )
        .unwrap()
    }

    /// Junctions 1 (0,0), 2 (100,0), 3 (200,0), 4 (100,100)
    fn small_network() -> RoadNetwork {
        let mut network = RoadNetwork::new(Frame::WebMercator);
        network.get_or_add_junction(1, Coord { x: 0.0, y: 0.0 });
        network.get_or_add_junction(2, Coord { x: 100.0, y: 0.0 });
        network.get_or_add_junction(3, Coord { x: 200.0, y: 0.0 });
        network.get_or_add_junction(4, Coord { x: 100.0, y: 100.0 });

        let links = [
            planar_link(10, 1, 2, Direction::Both, line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)]),
            planar_link(20, 2, 3, Direction::Forward, line_string![(x: 100.0, y: 0.0), (x: 200.0, y: 0.0)]),
            planar_link(30, 4, 2, Direction::Backward, line_string![(x: 100.0, y: 100.0), (x: 100.0, y: 0.0)]),
        ];
        for link in links {
            network.add_link(link).unwrap();
        }
        network
    }

    #[test]
    fn test_frc_from_osm() {
        assert_eq!(Frc::from_osm_highway("motorway"), Frc::Frc0);
        assert_eq!(Frc::from_osm_highway("trunk"), Frc::Frc1);
        assert_eq!(Frc::from_osm_highway("primary"), Frc::Frc2);
        assert_eq!(Frc::from_osm_highway("secondary"), Frc::Frc3);
        assert_eq!(Frc::from_osm_highway("motorway_link"), Frc::Frc3);
        assert_eq!(Frc::from_osm_highway("tertiary"), Frc::Frc4);
        assert_eq!(Frc::from_osm_highway("residential"), Frc::Frc5);
        assert_eq!(Frc::from_osm_highway("service"), Frc::Frc6);
        assert_eq!(Frc::from_osm_highway("cycleway"), Frc::Frc7);
    }

    #[test]
    fn test_frc_compatibility() {
        assert!(Frc::Frc2.is_compatible(Frc::Frc2, 1));
        assert!(Frc::Frc2.is_compatible(Frc::Frc3, 1));
        assert!(!Frc::Frc2.is_compatible(Frc::Frc5, 1));
    }

    #[test]
    fn test_fow_substitution_score() {
        assert_eq!(Fow::Motorway.substitution_score(Fow::Motorway), 1.0);
        assert_eq!(Fow::Undefined.substitution_score(Fow::Motorway), 0.5);
        assert_eq!(Fow::Motorway.substitution_score(Fow::Undefined), 0.5);
        assert_eq!(Fow::Motorway.substitution_score(Fow::MultipleCarriageway), 0.75);

        assert!(!Fow::Roundabout.is_compatible(Fow::Motorway));
        assert!(!Fow::SlipRoad.is_compatible(Fow::SingleCarriageway));
        assert!(Fow::SingleCarriageway.is_compatible(Fow::Roundabout));
    }

    #[test]
    fn test_direction_codes() {
        assert_eq!(Direction::from_code(1), Some(Direction::Both));
        assert_eq!(Direction::from_code(2), Some(Direction::Forward));
        assert_eq!(Direction::from_code(3), Some(Direction::Backward));
        assert_eq!(Direction::from_code(0), None);

        assert!(Direction::Forward.allows(false));
        assert!(!Direction::Forward.allows(true));
        assert!(Direction::Backward.allows(true));
        assert!(Direction::Both.allows(true) && Direction::Both.allows(false));
    }

    #[test]
    fn test_link_derived_attributes() {
        let link = planar_link(
            1,
            1,
            2,
            Direction::Both,
            line_string![(x: 0.0, y: 0.0), (x: 30.0, y: 0.0), (x: 30.0, y: 40.0)],
        );
        assert!((link.length - 70.0).abs() < 1e-9);
        assert!((link.bearing_start - 90.0).abs() < 1e-9);
        assert!(link.bearing_end.abs() < 1e-9);
        assert!((link.entry_bearing(true) - 180.0).abs() < 1e-9);
        assert_eq!(link.bbox.max(), Coord { x: 30.0, y: 40.0 });
        assert_eq!(link.travel_geometry(true).0[0], Coord { x: 30.0, y: 40.0 });
    }

    #[test]
    fn test_add_link_errors() {
        let mut network = small_network();
        let duplicate = planar_link(10, 1, 2, Direction::Both, line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]);
        assert_eq!(network.add_link(duplicate), Err(NetworkError::DuplicateLink(10)));

        let dangling = planar_link(99, 1, 42, Direction::Both, line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]);
        assert_eq!(
            network.add_link(dangling),
            Err(NetworkError::UnknownJunction { link: 99, junction: 42 })
        );

        let single = LineString::new(vec![Coord { x: 0.0, y: 0.0 }]);
        assert!(Link::new(5, 1, 2, Direction::Both, Frc::Frc0, Fow::Motorway, single, Frame::Wgs84).is_err());
    }

    #[test]
    fn test_junction_adjacency() {
        let network = small_network();
        assert_eq!(network.junction_adjacency(2), vec![10, 20, 30]);
        assert_eq!(network.junction_adjacency(1), vec![10]);
        assert!(network.junction_adjacency(77).is_empty());
    }

    #[test]
    fn test_successors_honour_direction() {
        let network = small_network();

        // From 1 -> 2: may continue forward on 20 or up 30 (backward-only, 2 -> 4)
        assert_eq!(
            network.successors(TraversedLink::forward(10)),
            vec![TraversedLink::forward(20), TraversedLink::backward(30)]
        );

        // 20 is forward-only, so nothing enters junction 2 from 3 on it
        assert!(network.successors(TraversedLink::forward(20)).is_empty());

        // 30 only runs 2 -> 4, so junction 4 is a dead end
        assert_eq!(network.departures(4), Vec::<TraversedLink>::new());
        // Reversing 10 arrives at 1, whose only link is 10 itself
        assert_eq!(
            network.successors(TraversedLink::backward(10)),
            Vec::<TraversedLink>::new()
        );
    }

    #[test]
    fn test_links_in_bbox_indexed_and_scanned_agree() {
        let mut network = small_network();
        let bbox = Rect::new(Coord { x: 90.0, y: -5.0 }, Coord { x: 150.0, y: 5.0 });

        let scanned: Vec<u64> = network.links_in_bbox(bbox).iter().map(|l| l.id).collect();
        network.index_links(SpatialIndexMode::RTree);
        assert!(network.is_indexed());
        let indexed: Vec<u64> = network.links_in_bbox(bbox).iter().map(|l| l.id).collect();

        assert_eq!(scanned, vec![10, 20, 30]);
        assert_eq!(scanned, indexed);
    }

    #[test]
    fn test_links_near() {
        let mut network = small_network();
        network.index_links(SpatialIndexMode::LinearScan);

        let near = network.links_near(Coord { x: 150.0, y: 3.0 }, 10.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].link.id, 20);
        assert!((near[0].projection.fraction - 0.5).abs() < 1e-9);

        // Junction 2 is equidistant from all three links; ties resolve by id
        let ids: Vec<u64> = network
            .links_near(Coord { x: 100.0, y: 0.0 }, 1.0)
            .iter()
            .map(|n| n.link.id)
            .collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
