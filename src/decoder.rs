use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Mutex;

use geo::{Coord, LineString};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::trace;

use crate::candidates::{find_candidates, Candidate, CandidateConfig};
use crate::error::CollaboratorError;
use crate::geometry::{join_lines, trim_line};
use crate::graph::{RoadNetwork, TraversedLink};
use crate::location::LineReference;

/// A matching constraint the decoder can be told to ignore
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskAttribute {
    Frc,
    Fow,
    Bearing,
    PathLength,
}

impl MaskAttribute {
    /// Order in which attributes are relaxed while diagnosing
    pub const PRIORITY: [MaskAttribute; 4] = [
        MaskAttribute::Frc,
        MaskAttribute::Fow,
        MaskAttribute::Bearing,
        MaskAttribute::PathLength,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaskAttribute::Frc => "FRC",
            MaskAttribute::Fow => "FOW",
            MaskAttribute::Bearing => "BEARING",
            MaskAttribute::PathLength => "PATH_LENGTH",
        }
    }
}

impl fmt::Display for MaskAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of relaxed attributes. A superset relaxes everything a subset relaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MaskSet(u8);

impl MaskSet {
    pub const EMPTY: MaskSet = MaskSet(0);

    pub fn all() -> Self {
        MaskAttribute::PRIORITY.into_iter().collect()
    }

    pub fn only(attribute: MaskAttribute) -> Self {
        MaskSet(attribute.bit())
    }

    #[must_use]
    pub fn with(self, attribute: MaskAttribute) -> Self {
        MaskSet(self.0 | attribute.bit())
    }

    pub fn contains(&self, attribute: MaskAttribute) -> bool {
        self.0 & attribute.bit() != 0
    }

    pub fn is_superset(&self, other: &MaskSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Attributes in priority order
    pub fn iter(&self) -> impl Iterator<Item = MaskAttribute> + '_ {
        MaskAttribute::PRIORITY
            .into_iter()
            .filter(move |a| self.contains(*a))
    }

    /// The single attribute in this set, if it has exactly one
    pub fn single(&self) -> Option<MaskAttribute> {
        let mut attributes = self.iter();
        match (attributes.next(), attributes.next()) {
            (Some(a), None) => Some(a),
            _ => None,
        }
    }
}

impl FromIterator<MaskAttribute> for MaskSet {
    fn from_iter<I: IntoIterator<Item = MaskAttribute>>(iter: I) -> Self {
        iter.into_iter().fold(MaskSet::EMPTY, MaskSet::with)
    }
}

impl fmt::Display for MaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|a| a.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

impl Serialize for MaskSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Where the decoder put one LRP
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub link_id: u64,
    pub reversed: bool,
    /// Distance along travel from the entry junction of the link
    pub offset: f64,
}

impl Placement {
    pub fn traversal(&self) -> TraversedLink {
        TraversedLink {
            link_id: self.link_id,
            reversed: self.reversed,
        }
    }
}

/// A decoded path result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPath {
    /// Traversed links in travel order
    pub links: Vec<TraversedLink>,
    /// One placement per LRP
    pub placements: Vec<Placement>,
    /// Total length of all traversed links
    pub length: f64,
    /// Distance to trim from the start of the first link
    pub positive_offset: f64,
    /// Distance to trim from the end of the last link
    pub negative_offset: f64,
}

impl DecodedPath {
    /// Check that every referenced link exists and there is one placement per LRP
    pub fn validate(&self, lrps: usize, network: &RoadNetwork) -> Result<(), CollaboratorError> {
        if self.placements.len() != lrps {
            return Err(CollaboratorError::PlacementCount {
                placements: self.placements.len(),
                lrps,
            });
        }
        let referenced = self
            .links
            .iter()
            .map(|t| t.link_id)
            .chain(self.placements.iter().map(|p| p.link_id));
        for id in referenced {
            if network.link_by_id(id).is_none() {
                return Err(CollaboratorError::UnknownLink(id));
            }
        }
        Ok(())
    }

    /// Trimmed geometry of the decoded location, or `None` if a link id is unknown.
    ///
    /// Offsets are in link length units; they are mapped onto the drawn geometry link by
    /// link before trimming, so a recorded length that differs from the drawn one still
    /// cuts at the right place.
    pub fn geometry(&self, network: &RoadNetwork) -> Option<LineString<f64>> {
        let frame = network.frame();
        let mut parts = Vec::with_capacity(self.links.len());
        let mut lengths = Vec::with_capacity(self.links.len());
        for traversal in &self.links {
            let link = network.link_by_id(traversal.link_id)?;
            let part = link.travel_geometry(traversal.reversed);
            lengths.push((link.length, frame.line_length(&part)));
            parts.push(part);
        }
        let joined = join_lines(parts.iter());
        Some(trim_line(
            &joined,
            frame,
            drawn_distance(lengths.iter().copied(), self.positive_offset),
            drawn_distance(lengths.iter().rev().copied(), self.negative_offset),
        ))
    }
}

/// Walk `distance` link length units over `(recorded, drawn)` link lengths and return
/// how far that is along the drawn geometry
fn drawn_distance(lengths: impl Iterator<Item = (f64, f64)>, distance: f64) -> f64 {
    let mut left = distance.max(0.0);
    let mut drawn = 0.0;
    for (recorded, geometric) in lengths {
        if recorded > 0.0 && left <= recorded {
            return drawn + left / recorded * geometric;
        }
        drawn += geometric;
        left -= recorded.max(0.0);
    }
    drawn + left
}

/// Typed decode failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeFailure {
    #[error("No candidates found for LRP {lrp}")]
    NoCandidates { lrp: usize },

    #[error("No valid path found between LRPs {from} and {to}")]
    NoPath { from: usize, to: usize },

    /// Anything the decoder did not anticipate
    #[error("Decoder error: {0}")]
    Internal(String),
}

impl DecodeFailure {
    /// Expected failures are part of the decoder contract and get diagnosed.
    pub fn is_expected(&self) -> bool {
        !matches!(self, DecodeFailure::Internal(_))
    }
}

/// Decodes line references against a road network.
///
/// `mask` lists the attributes the decoder must ignore when matching; relaxing more
/// attributes must never turn an accepted decode into a rejected one.
pub trait Decoder {
    fn decode(
        &self,
        reference: &LineReference,
        network: &RoadNetwork,
        mask: MaskSet,
    ) -> Result<DecodedPath, DecodeFailure>;
}

impl<F> Decoder for F
where
    F: Fn(&LineReference, &RoadNetwork, MaskSet) -> Result<DecodedPath, DecodeFailure>,
{
    fn decode(
        &self,
        reference: &LineReference,
        network: &RoadNetwork,
        mask: MaskSet,
    ) -> Result<DecodedPath, DecodeFailure> {
        self(reference, network, mask)
    }
}

/// Shares a decoder that is not safe to call concurrently by guarding it with a mutex
pub struct Serialized<D> {
    inner: Mutex<D>,
}

impl<D> Serialized<D> {
    pub fn new(decoder: D) -> Self {
        Serialized {
            inner: Mutex::new(decoder),
        }
    }
}

impl<D: Decoder> Decoder for Serialized<D> {
    fn decode(
        &self,
        reference: &LineReference,
        network: &RoadNetwork,
        mask: MaskSet,
    ) -> Result<DecodedPath, DecodeFailure> {
        let decoder = self
            .inner
            .lock()
            .map_err(|_| DecodeFailure::Internal("decoder lock poisoned".to_string()))?;
        decoder.decode(reference, network, mask)
    }
}

/// A* search node for the priority queue
#[derive(Clone)]
struct AStarNode {
    junction: i64,
    g_score: f64, // Cost from start to this junction
    f_score: f64, // g_score + heuristic (estimated total cost)
}

impl PartialEq for AStarNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AStarNode {}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (lower f_score = higher priority)
        other
            .f_score
            .total_cmp(&self.f_score)
            .then(other.junction.cmp(&self.junction))
    }
}

/// Bounded A* over junctions that stops when path cost exceeds `max_cost`.
///
/// Only traversals permitted by link direction are followed and links in `excluded`
/// are never entered. Returns the cost and the traversed links.
fn bounded_astar(
    network: &RoadNetwork,
    start: i64,
    goal: i64,
    max_cost: f64,
    excluded: &[u64],
) -> Option<(f64, Vec<TraversedLink>)> {
    let frame = network.frame();
    let goal_coord: Coord<f64> = network.junction(goal)?.coord;
    let heuristic = |junction: i64| {
        network
            .junction(junction)
            .map(|j| frame.distance(j.coord, goal_coord))
            .unwrap_or(0.0)
    };

    let mut open_set = BinaryHeap::new();
    let mut g_scores: HashMap<i64, f64> = HashMap::new();
    let mut came_from: HashMap<i64, (i64, TraversedLink)> = HashMap::new();

    g_scores.insert(start, 0.0);
    open_set.push(AStarNode {
        junction: start,
        g_score: 0.0,
        f_score: heuristic(start),
    });

    while let Some(current) = open_set.pop() {
        if current.junction == goal {
            let mut path = Vec::new();
            let mut junction = goal;
            while let Some(&(prev, traversal)) = came_from.get(&junction) {
                path.push(traversal);
                junction = prev;
            }
            path.reverse();
            return Some((current.g_score, path));
        }

        // Skip if we've already found a better path to this junction
        if let Some(&best_g) = g_scores.get(&current.junction) {
            if current.g_score > best_g {
                continue;
            }
        }

        for traversal in network.departures(current.junction) {
            if excluded.contains(&traversal.link_id) {
                continue;
            }
            let Some(link) = network.link_by_id(traversal.link_id) else {
                continue;
            };
            let neighbor = link.exit_junction(traversal.reversed);
            let tentative_g = current.g_score + link.length;

            // BOUNDED: Skip if this path already exceeds max cost
            if tentative_g > max_cost {
                continue;
            }

            let dominated = g_scores
                .get(&neighbor)
                .map(|&g| tentative_g >= g)
                .unwrap_or(false);
            if dominated {
                continue;
            }

            came_from.insert(neighbor, (current.junction, traversal));
            g_scores.insert(neighbor, tentative_g);
            open_set.push(AStarNode {
                junction: neighbor,
                g_score: tentative_g,
                f_score: tentative_g + heuristic(neighbor),
            });
        }
    }

    None // No path found within max_cost
}

/// Configuration for the reference decoder
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub candidate_config: CandidateConfig,
    /// Tolerance for path length matching (fraction, e.g., 0.15 = 15%)
    pub length_tolerance: f64,
    /// Absolute tolerance for path length matching
    pub absolute_length_tolerance: f64,
    /// Maximum path search distance multiplier
    pub max_search_distance_factor: f64,
    /// Search distance multiplier once path length is masked
    pub relaxed_search_distance_factor: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            candidate_config: CandidateConfig::default(),
            length_tolerance: 0.35,          // 35% tolerance on path length
            absolute_length_tolerance: 100.0, // 100m absolute tolerance
            max_search_distance_factor: 2.0, // Search up to 2x the expected distance
            relaxed_search_distance_factor: 5.0,
        }
    }
}

impl DecoderConfig {
    /// The default tolerances
    pub fn strict() -> Self {
        Self::default()
    }

    /// Wider candidate search and length tolerance for maps that drift from the source
    pub fn relaxed() -> Self {
        DecoderConfig {
            candidate_config: CandidateConfig {
                search_radius: 150.0,
                max_bearing_diff: 45.0,
                frc_tolerance: 3,
                ..CandidateConfig::default()
            },
            length_tolerance: 0.5,
            absolute_length_tolerance: 150.0,
            max_search_distance_factor: 3.0,
            relaxed_search_distance_factor: 5.0,
        }
    }
}

/// A route between two consecutive LRPs
#[derive(Debug, Clone)]
struct Route {
    links: Vec<TraversedLink>,
    start: Candidate,
    end: Candidate,
}

/// Ordering of competing routes: fewer candidates that only a mask admitted, then score
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct RouteRank {
    relaxed: u8,
    score: f64,
}

impl RouteRank {
    fn new(start: &Candidate, end: &Candidate, score: f64) -> Self {
        RouteRank {
            relaxed: Self::relaxed_count(start, end),
            score,
        }
    }

    fn relaxed_count(start: &Candidate, end: &Candidate) -> u8 {
        u8::from(!start.strict) + u8::from(!end.strict)
    }
}

/// Length bounds for one route
#[derive(Debug, Clone, Copy)]
struct LengthBounds {
    expected: f64,
    min: f64,
    max: f64,
    search: f64,
}

/// Candidate search plus bounded A* between consecutive LRPs.
///
/// Routes are resolved segment by segment; each segment starts from the candidate
/// chosen for the end of the previous one, so the result is always connected.
#[derive(Debug, Clone, Default)]
pub struct MapMatchingDecoder {
    config: DecoderConfig,
}

impl MapMatchingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn bounds(&self, expected: f64, mask: MaskSet) -> LengthBounds {
        if mask.contains(MaskAttribute::PathLength) {
            return LengthBounds {
                expected,
                min: 0.0,
                max: f64::INFINITY,
                search: (expected * self.config.relaxed_search_distance_factor).max(2500.0),
            };
        }

        // Relative tolerance dominates long segments, absolute tolerance short ones
        let rel_min = expected * (1.0 - self.config.length_tolerance);
        let rel_max = expected * (1.0 + self.config.length_tolerance);

        // Be lenient on the minimum: DNP quantization overestimates short distances
        let abs_min = (expected - self.config.absolute_length_tolerance).max(0.0);
        let min = rel_min.min(abs_min).max(10.0).min(expected);

        // For maximum: use whichever is STRICTER (limits longer paths)
        let abs_max = expected + self.config.absolute_length_tolerance;
        let max = rel_max.min(abs_max);

        LengthBounds {
            expected,
            min,
            max,
            search: (expected * self.config.max_search_distance_factor).max(500.0),
        }
    }

    /// Prefer a single link carrying both LRPs when both project closely onto it.
    /// This avoids routes through links contributing almost nothing to the length.
    fn try_same_link_solution(
        &self,
        start_candidates: &[Candidate],
        end_candidates: &[Candidate],
        bounds: LengthBounds,
    ) -> Option<(Route, RouteRank)> {
        const MAX_PROJECTION_DISTANCE: f64 = 10.0;

        let mut best: Option<(Route, RouteRank)> = None;

        for start in start_candidates.iter().take(10) {
            if start.distance > MAX_PROJECTION_DISTANCE {
                continue;
            }
            for end in end_candidates.iter().take(10) {
                if end.distance > MAX_PROJECTION_DISTANCE || start.traversal != end.traversal {
                    continue;
                }
                let Some(score) = self.same_link_score(start, end, bounds) else {
                    continue;
                };
                let rank = RouteRank::new(start, end, score);
                if best.as_ref().map_or(true, |(_, r)| rank < *r) {
                    let route = Route {
                        links: vec![start.traversal],
                        start: *start,
                        end: *end,
                    };
                    best = Some((route, rank));
                }
            }
        }

        best
    }

    fn same_link_score(&self, start: &Candidate, end: &Candidate, bounds: LengthBounds) -> Option<f64> {
        // End must lie after start along travel
        let path_cost = end.offset - start.offset;
        if path_cost <= 0.0 {
            return None;
        }

        // Excellent spatial matches on one link get a relaxed maximum
        let excellent_match = start.distance < 5.0 && end.distance < 5.0;
        let effective_max = if excellent_match {
            bounds.max * 3.0
        } else {
            bounds.max
        };
        if path_cost < bounds.min || path_cost > effective_max {
            return None;
        }

        let length_diff = (path_cost - bounds.expected).abs() / bounds.expected.max(1.0);
        Some(start.score + end.score + length_diff)
    }

    /// Find the best route between candidate sets
    fn find_best_route(
        &self,
        network: &RoadNetwork,
        start_candidates: &[Candidate],
        end_candidates: &[Candidate],
        bounds: LengthBounds,
    ) -> Option<Route> {
        // A strict same-link match wins outright; a masked one only if nothing strict routes
        let mut best = self.try_same_link_solution(start_candidates, end_candidates, bounds);
        if best.as_ref().is_some_and(|(_, rank)| rank.relaxed == 0) {
            return best.map(|(route, _)| route);
        }

        // Multiplicative: pairs where BOTH candidates are good come first, and pairs of
        // strict candidates come before any pair a mask admitted
        let mut pairs: Vec<(usize, usize, u8, f64)> = Vec::with_capacity(100);
        for (i, start) in start_candidates.iter().enumerate().take(10) {
            for (j, end) in end_candidates.iter().enumerate().take(10) {
                let relaxed = RouteRank::relaxed_count(start, end);
                pairs.push((i, j, relaxed, (start.score + 1.0) * (end.score + 1.0)));
            }
        }
        pairs.sort_by(|a, b| a.2.cmp(&b.2).then(a.3.total_cmp(&b.3)));

        for (i, j, _, _) in pairs {
            let start = &start_candidates[i];
            let end = &end_candidates[j];

            if start.traversal == end.traversal {
                if let Some(score) = self.same_link_score(start, end, bounds) {
                    let rank = RouteRank::new(start, end, score);
                    if best.as_ref().map_or(true, |(_, r)| rank < *r) {
                        best = Some((
                            Route {
                                links: vec![start.traversal],
                                start: *start,
                                end: *end,
                            },
                            rank,
                        ));
                    }
                }
                continue;
            }
            // Immediate U-turn on one link
            if start.traversal.link_id == end.traversal.link_id {
                continue;
            }

            let (Some(start_link), Some(end_link)) = (
                network.link_by_id(start.traversal.link_id),
                network.link_by_id(end.traversal.link_id),
            ) else {
                continue;
            };
            let from = start_link.exit_junction(start.traversal.reversed);
            let to = end_link.entry_junction(end.traversal.reversed);

            let partials = start.remaining() + end.offset;
            let middle_max = bounds.search - partials;
            if middle_max < 0.0 {
                continue;
            }

            let (middle_cost, middle) = if from == to {
                (0.0, Vec::new())
            } else {
                let excluded = [start.traversal.link_id, end.traversal.link_id];
                match bounded_astar(network, from, to, middle_max, &excluded) {
                    Some(result) => result,
                    None => continue,
                }
            };

            let path_cost = partials + middle_cost;
            if path_cost < bounds.min || path_cost > bounds.max {
                continue;
            }

            let length_diff = (path_cost - bounds.expected).abs() / bounds.expected.max(1.0);
            let rank = RouteRank::new(start, end, start.score + end.score + length_diff);

            if best.as_ref().map_or(true, |(_, r)| rank < *r) {
                let mut links = vec![start.traversal];
                links.extend(middle);
                links.push(end.traversal);
                best = Some((
                    Route {
                        links,
                        start: *start,
                        end: *end,
                    },
                    rank,
                ));

                // Pairs are sorted by candidate quality, so the first route with
                // a good length match is very likely the best one
                if length_diff < 0.1 {
                    break;
                }
            }
        }

        best.map(|(route, _)| route)
    }
}

impl Decoder for MapMatchingDecoder {
    fn decode(
        &self,
        reference: &LineReference,
        network: &RoadNetwork,
        mask: MaskSet,
    ) -> Result<DecodedPath, DecodeFailure> {
        let points = &reference.points;
        if points.len() < 2 {
            return Err(DecodeFailure::Internal(format!(
                "line reference has {} LRPs",
                points.len()
            )));
        }

        // Find candidates for each LRP
        let mut all_candidates: Vec<Vec<Candidate>> = Vec::with_capacity(points.len());
        for (i, point) in points.iter().enumerate() {
            let is_last = i == points.len() - 1;
            let candidates = find_candidates(
                point,
                is_last,
                network,
                &self.config.candidate_config,
                mask,
            );
            if candidates.is_empty() {
                return Err(DecodeFailure::NoCandidates { lrp: i });
            }
            all_candidates.push(candidates);
        }

        let mut routes: Vec<Route> = Vec::with_capacity(points.len() - 1);
        for i in 0..points.len() - 1 {
            let bounds = self.bounds(points[i].dnp.unwrap_or(0.0), mask);
            let fixed_start;
            let start_candidates: &[Candidate] = match routes.last() {
                Some(previous) => {
                    fixed_start = [previous.end];
                    &fixed_start
                }
                None => &all_candidates[i],
            };

            let route = self
                .find_best_route(network, start_candidates, &all_candidates[i + 1], bounds)
                .ok_or(DecodeFailure::NoPath { from: i, to: i + 1 })?;
            trace!(lrp = i, links = ?route.links, "resolved route");
            routes.push(route);
        }

        // Concatenate, sharing the link that carries each intermediate LRP
        let mut links: Vec<TraversedLink> = Vec::new();
        for route in &routes {
            for (j, traversal) in route.links.iter().enumerate() {
                if j == 0 && links.last() == Some(traversal) {
                    continue;
                }
                links.push(*traversal);
            }
        }

        let mut placements = Vec::with_capacity(points.len());
        placements.push(placement(&routes[0].start));
        placements.extend(routes.iter().map(|r| placement(&r.end)));

        let mut length = 0.0;
        for traversal in &links {
            let link = network
                .link_by_id(traversal.link_id)
                .ok_or_else(|| DecodeFailure::Internal(format!("unknown link {}", traversal.link_id)))?;
            length += link.length;
        }

        let first = &routes[0].start;
        let last = &routes[routes.len() - 1].end;

        Ok(DecodedPath {
            links,
            placements,
            length,
            positive_offset: first.offset + reference.positive_offset,
            negative_offset: last.remaining() + reference.negative_offset,
        })
    }
}

fn placement(candidate: &Candidate) -> Placement {
    Placement {
        link_id: candidate.traversal.link_id,
        reversed: candidate.traversal.reversed,
        offset: candidate.offset,
    }
}
