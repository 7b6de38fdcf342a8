//! Test utilities for building road networks and line references programmatically.
//!
//! Networks are built without a network store. Planar networks use EPSG:3857 so
//! coordinates read as meters; geographic networks take lon/lat degrees.
//!
//! # Example
//!
//! ```rust
//! use odat::graph::{Direction, Fow, Frc};
//! use odat::test_utils::TestNetworkBuilder;
//!
//! let network = TestNetworkBuilder::planar()
//!     .add_junction(1, 0.0, 0.0)
//!     .add_junction(2, 100.0, 0.0)
//!     .add_link(10, 1, 2, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
//!     .build();
//!
//! assert_eq!(network.junction_count(), 2);
//! assert_eq!(network.link_count(), 1);
//! ```

use std::collections::HashMap;

use geo::{Coord, LineString};

use crate::decoder::{DecodedPath, Placement};
use crate::geometry::{normalize_bearing, Frame};
use crate::graph::{Direction, Fow, Frc, Link, RoadNetwork, TraversedLink};
use crate::location::{LineReference, Lrp};
use crate::spatial::SpatialIndexMode;

/// A builder for constructing test road networks.
///
/// Junctions are added with explicit ids; link geometry runs straight from the start
/// junction to the end junction through any intermediate points.
pub struct TestNetworkBuilder {
    frame: Frame,
    junctions: HashMap<i64, Coord<f64>>,
    links: Vec<PendingLink>,
}

struct PendingLink {
    id: u64,
    start_junction: i64,
    end_junction: i64,
    via: Vec<Coord<f64>>,
    length: Option<f64>, // If None, calculated from geometry
    direction: Direction,
    frc: Frc,
    fow: Fow,
}

impl TestNetworkBuilder {
    pub fn new(frame: Frame) -> Self {
        TestNetworkBuilder {
            frame,
            junctions: HashMap::new(),
            links: Vec::new(),
        }
    }

    /// Builder for a network in EPSG:3857, where one unit is one meter
    pub fn planar() -> Self {
        Self::new(Frame::WebMercator)
    }

    /// Builder for a network in EPSG:4326
    pub fn geographic() -> Self {
        Self::new(Frame::Wgs84)
    }

    /// Add a junction at `(x, y)`, which is `(lon, lat)` for geographic networks.
    ///
    /// # Panics
    /// Panics if a junction with the same id already exists.
    pub fn add_junction(mut self, id: i64, x: f64, y: f64) -> Self {
        if self.junctions.contains_key(&id) {
            panic!("Junction with id {} already exists", id);
        }
        self.junctions.insert(id, Coord { x, y });
        self
    }

    /// Add a straight link with its length derived from geometry
    pub fn add_link(
        self,
        id: u64,
        start_junction: i64,
        end_junction: i64,
        direction: Direction,
        frc: Frc,
        fow: Fow,
    ) -> Self {
        self.push(PendingLink {
            id,
            start_junction,
            end_junction,
            via: Vec::new(),
            length: None,
            direction,
            frc,
            fow,
        })
    }

    /// Add a straight link whose recorded length differs from its geometry
    #[allow(clippy::too_many_arguments)]
    pub fn add_link_with_length(
        self,
        id: u64,
        start_junction: i64,
        end_junction: i64,
        length: f64,
        direction: Direction,
        frc: Frc,
        fow: Fow,
    ) -> Self {
        self.push(PendingLink {
            id,
            start_junction,
            end_junction,
            via: Vec::new(),
            length: Some(length),
            direction,
            frc,
            fow,
        })
    }

    /// Add a link bending through intermediate points
    #[allow(clippy::too_many_arguments)]
    pub fn add_link_via(
        self,
        id: u64,
        start_junction: i64,
        end_junction: i64,
        via: &[(f64, f64)],
        direction: Direction,
        frc: Frc,
        fow: Fow,
    ) -> Self {
        self.push(PendingLink {
            id,
            start_junction,
            end_junction,
            via: via.iter().map(|&(x, y)| Coord { x, y }).collect(),
            length: None,
            direction,
            frc,
            fow,
        })
    }

    /// Override the recorded length of a link added earlier
    ///
    /// # Panics
    /// Panics if no link with this id was added.
    pub fn with_link_length(mut self, id: u64, length: f64) -> Self {
        match self.links.iter_mut().find(|l| l.id == id) {
            Some(link) => link.length = Some(length),
            None => panic!("Link with id {} does not exist", id),
        }
        self
    }

    fn push(mut self, link: PendingLink) -> Self {
        self.links.push(link);
        self
    }

    /// Build the road network with its spatial index.
    ///
    /// # Panics
    /// Panics if a link references a missing junction or repeats a link id.
    pub fn build(self) -> RoadNetwork {
        let mut network = RoadNetwork::with_capacity(self.frame, self.junctions.len(), self.links.len());

        for (&id, &coord) in &self.junctions {
            network.get_or_add_junction(id, coord);
        }

        for pending in self.links {
            let start = *self.junctions.get(&pending.start_junction).unwrap_or_else(|| {
                panic!(
                    "Start junction {} does not exist for link {}",
                    pending.start_junction, pending.id
                )
            });
            let end = *self.junctions.get(&pending.end_junction).unwrap_or_else(|| {
                panic!(
                    "End junction {} does not exist for link {}",
                    pending.end_junction, pending.id
                )
            });

            let mut coords = vec![start];
            coords.extend(pending.via);
            coords.push(end);

            let mut link = Link::new(
                pending.id,
                pending.start_junction,
                pending.end_junction,
                pending.direction,
                pending.frc,
                pending.fow,
                LineString::new(coords),
                self.frame,
            )
            .unwrap_or_else(|e| panic!("{}", e));
            if let Some(length) = pending.length {
                link = link.with_length(length);
            }
            network.add_link(link).unwrap_or_else(|e| panic!("{}", e));
        }

        network.index_links(SpatialIndexMode::RTree);
        network
    }
}

/// A line reference through `points` (already in `frame`), with bearings and
/// distances derived from the straight segments between them
pub fn line_reference(frame: Frame, points: &[(f64, f64)], frc: Frc, fow: Fow) -> LineReference {
    let coords: Vec<Coord<f64>> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
    let n = coords.len();
    let lrps = coords
        .iter()
        .enumerate()
        .map(|(i, &coord)| {
            let (bearing, dnp) = if i + 1 < n {
                (
                    frame.bearing(coord, coords[i + 1]),
                    Some(frame.distance(coord, coords[i + 1])),
                )
            } else if n > 1 {
                (normalize_bearing(frame.bearing(coords[i - 1], coord) + 180.0), None)
            } else {
                (0.0, None)
            };
            Lrp {
                coord,
                bearing,
                frc,
                fow,
                dnp,
            }
        })
        .collect();
    LineReference::new(lrps, 0.0, 0.0).unwrap_or_else(|e| panic!("{}", e))
}

/// A decoded path over `links`, with `placements` given as (traversal, offset) pairs
pub fn decoded_path(network: &RoadNetwork, links: &[TraversedLink], placements: &[(TraversedLink, f64)]) -> DecodedPath {
    let length = links
        .iter()
        .filter_map(|t| network.link_by_id(t.link_id))
        .map(|l| l.length)
        .sum();
    DecodedPath {
        links: links.to_vec(),
        placements: placements
            .iter()
            .map(|&(t, offset)| Placement {
                link_id: t.link_id,
                reversed: t.reversed,
                offset,
            })
            .collect(),
        length,
        positive_offset: 0.0,
        negative_offset: 0.0,
    }
}

/// A decoded path over `links` with the first LRP at the start of the first link and
/// the last LRP at the end of the last link
pub fn decoded_through(network: &RoadNetwork, links: &[TraversedLink]) -> DecodedPath {
    let (Some(&first), Some(&last)) = (links.first(), links.last()) else {
        return decoded_path(network, links, &[]);
    };
    let last_length = network.link_by_id(last.link_id).map_or(0.0, |l| l.length);
    decoded_path(network, links, &[(first, 0.0), (last, last_length)])
}

impl Default for TestNetworkBuilder {
    fn default() -> Self {
        Self::planar()
    }
}
