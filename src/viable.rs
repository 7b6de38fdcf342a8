//! Decoder-independent search for a route the code *should* have matched.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::geometry::Buffer;
use crate::graph::{Link, RoadNetwork, TraversedLink};
use crate::location::Lrp;
use crate::spatial::project_point;

/// Result of a viable path search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViablePathOutcome {
    /// Links of the first route discovered, in travel order
    Found(Vec<TraversedLink>),
    /// The buffer has coverage but no directed route connects the anchors inside it
    NoPath,
    /// No link lies within the buffer's bounding box
    NoCoverage,
}

/// A traversal near an LRP, with the LRP's projection measured along travel
#[derive(Debug, Clone, Copy)]
struct Anchor {
    traversal: TraversedLink,
    offset: f64,
}

/// Breadth-first search over traversals restricted to a buffer.
///
/// Interior links must be covered by the buffer. The links carrying the first and last
/// LRP only have to pass within `snap_tolerance` of them, since a location usually
/// starts and ends part-way along a link.
pub struct ViablePathSearch<'a> {
    network: &'a RoadNetwork,
    snap_tolerance: f64,
}

impl<'a> ViablePathSearch<'a> {
    pub fn new(network: &'a RoadNetwork, snap_tolerance: f64) -> Self {
        ViablePathSearch {
            network,
            snap_tolerance,
        }
    }

    pub fn find(&self, buffer: &Buffer, start: &Lrp, end: &Lrp) -> ViablePathOutcome {
        let prefiltered = self.network.links_in_bbox(buffer.bbox());
        if prefiltered.is_empty() {
            return ViablePathOutcome::NoCoverage;
        }

        let contained: HashSet<u64> = prefiltered
            .iter()
            .filter(|l| buffer.covers_line(&l.geometry))
            .map(|l| l.id)
            .collect();
        let start_anchors = self.anchors(&prefiltered, start);
        let end_anchors: HashMap<TraversedLink, f64> = self
            .anchors(&prefiltered, end)
            .into_iter()
            .map(|a| (a.traversal, a.offset))
            .collect();

        debug!(
            prefiltered = prefiltered.len(),
            contained = contained.len(),
            start_anchors = start_anchors.len(),
            end_anchors = end_anchors.len(),
            "viable path search"
        );

        let mut visited: HashSet<TraversedLink> = HashSet::new();
        let mut parent: HashMap<TraversedLink, TraversedLink> = HashMap::new();
        let mut queue: VecDeque<TraversedLink> = VecDeque::new();
        let mut root_offsets: HashMap<TraversedLink, f64> = HashMap::new();

        for anchor in &start_anchors {
            if visited.insert(anchor.traversal) {
                root_offsets.insert(anchor.traversal, anchor.offset);
                queue.push_back(anchor.traversal);
            }
        }

        while let Some(current) = queue.pop_front() {
            if let Some(&end_offset) = end_anchors.get(&current) {
                // On the start link itself the end must not lie behind the start
                let reached = match root_offsets.get(&current) {
                    Some(&start_offset) => end_offset >= start_offset,
                    None => true,
                };
                if reached {
                    return ViablePathOutcome::Found(reconstruct(&parent, current));
                }
            }

            for next in self.network.successors(current) {
                let allowed = contained.contains(&next.link_id) || end_anchors.contains_key(&next);
                if allowed && visited.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        ViablePathOutcome::NoPath
    }

    /// Traversals within snap tolerance of an LRP in ascending (link id, reversed) order
    fn anchors(&self, links: &[&Link], lrp: &Lrp) -> Vec<Anchor> {
        let frame = self.network.frame();
        let mut anchors = Vec::new();
        for link in links {
            let Some(projection) = project_point(lrp.coord, &link.geometry, frame) else {
                continue;
            };
            if projection.distance > self.snap_tolerance {
                continue;
            }
            for reversed in [false, true] {
                if !link.direction.allows(reversed) {
                    continue;
                }
                let along = if reversed {
                    1.0 - projection.fraction
                } else {
                    projection.fraction
                };
                anchors.push(Anchor {
                    traversal: TraversedLink {
                        link_id: link.id,
                        reversed,
                    },
                    offset: along * link.length,
                });
            }
        }
        anchors.sort_by_key(|a| a.traversal);
        anchors
    }
}

fn reconstruct(parent: &HashMap<TraversedLink, TraversedLink>, last: TraversedLink) -> Vec<TraversedLink> {
    let mut path = vec![last];
    let mut current = last;
    while let Some(&prev) = parent.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

/// Run a [`ViablePathSearch`] between the first and last LRP of a line
pub fn find_viable_path(
    buffer: &Buffer,
    start: &Lrp,
    end: &Lrp,
    network: &RoadNetwork,
    snap_tolerance: f64,
) -> ViablePathOutcome {
    ViablePathSearch::new(network, snap_tolerance).find(buffer, start, end)
}
