use crate::decoder::{MaskAttribute, MaskSet};
use crate::graph::{RoadNetwork, TraversedLink};
use crate::location::Lrp;
use crate::spatial::bearing_difference;

/// Projections this close to the far end of a link (as a share of its length) cannot
/// start a route on that link, and projections this close to its start cannot end one
const JUNCTION_EPSILON: f64 = 1e-9;

/// A candidate traversal for matching an LRP
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub traversal: TraversedLink,
    pub distance: f64,     // Distance from LRP to link
    pub bearing_diff: f64, // Bearing difference in degrees
    pub frc_diff: u8,      // FRC difference (0 = exact match)
    pub fow_score: f64,    // FOW substitution score
    pub score: f64,        // Combined score (lower is better)
    /// Distance along travel from the entry junction to the projected LRP
    pub offset: f64,
    pub link_length: f64,
    /// Passes the FRC, FOW, and bearing filters without any mask
    pub strict: bool,
}

impl Candidate {
    /// Distance along travel from the projected LRP to the exit junction
    pub fn remaining(&self) -> f64 {
        (self.link_length - self.offset).max(0.0)
    }
}

/// Configuration for candidate scoring
#[derive(Debug, Clone)]
pub struct CandidateConfig {
    pub search_radius: f64,
    pub max_bearing_diff: f64,
    pub frc_tolerance: u8,
    pub max_candidates: usize,
    // Scoring weights
    pub distance_weight: f64,
    pub bearing_weight: f64,
    pub frc_weight: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        CandidateConfig {
            search_radius: 100.0, // 100m search radius
            max_bearing_diff: 30.0, // ±30 degrees bearing tolerance
            frc_tolerance: 2,     // Allow ±2 FRC classes
            max_candidates: 10,   // Keep top 10 candidates
            // Distance dominates: the LRP should sit on top of the right road.
            // Bearing separates parallel carriageways, FRC only breaks ties.
            distance_weight: 4.0,
            bearing_weight: 0.2,
            frc_weight: 0.1,
        }
    }
}

/// Find and score candidate traversals for an LRP.
///
/// Every nearby link is considered in each direction its `direction` attribute permits.
/// The last LRP's bearing points backwards along the location, so it is compared to the
/// reverse of the travel bearing. Attributes in `mask` are not used to reject candidates
/// but still contribute to the score. Candidates that pass every filter unmasked are
/// ranked ahead of those only a mask admits, so masking never evicts them.
pub fn find_candidates(
    lrp: &Lrp,
    is_last: bool,
    network: &RoadNetwork,
    config: &CandidateConfig,
    mask: MaskSet,
) -> Vec<Candidate> {
    let nearby = network.links_near(lrp.coord, config.search_radius);

    let mut candidates: Vec<Candidate> = Vec::new();
    for near in nearby {
        let link = near.link;
        let projection = near.projection;

        let frc_diff = (link.frc as i8 - lrp.frc as i8).unsigned_abs();
        if !mask.contains(MaskAttribute::Frc) && frc_diff > config.frc_tolerance {
            continue;
        }

        let fow_score = link.fow.substitution_score(lrp.fow);
        if !mask.contains(MaskAttribute::Fow) && fow_score <= 0.0 {
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
            // A route cannot leave a link from its exit junction, nor arrive at its entry
            if (!is_last && along >= 1.0 - JUNCTION_EPSILON) || (is_last && along <= JUNCTION_EPSILON) {
                continue;
            }

            let mut travel_bearing = projection.bearing;
            if reversed {
                travel_bearing += 180.0;
            }
            if is_last {
                travel_bearing += 180.0;
            }
            let bearing_diff = bearing_difference(lrp.bearing, travel_bearing);
            if !mask.contains(MaskAttribute::Bearing) && bearing_diff > config.max_bearing_diff {
                continue;
            }

            let strict = frc_diff <= config.frc_tolerance
                && fow_score > 0.0
                && bearing_diff <= config.max_bearing_diff;
            candidates.push(Candidate {
                traversal: TraversedLink {
                    link_id: link.id,
                    reversed,
                },
                distance: projection.distance,
                bearing_diff,
                frc_diff,
                fow_score,
                score: compute_score(projection.distance, bearing_diff, frc_diff, config),
                offset: link.length * along,
                link_length: link.length,
                strict,
            });
        }
    }

    // Strict candidates first, then by score; ties fall back to traversal order
    candidates.sort_by(|a, b| {
        b.strict
            .cmp(&a.strict)
            .then(a.score.total_cmp(&b.score))
            .then(a.traversal.cmp(&b.traversal))
    });
    candidates.truncate(config.max_candidates);

    candidates
}

/// Compute combined score for a candidate (lower is better)
pub(crate) fn compute_score(distance: f64, bearing_diff: f64, frc_diff: u8, config: &CandidateConfig) -> f64 {
    // Normalize each component to 0-1 range
    let distance_score = distance / config.search_radius;
    let bearing_score = bearing_diff / config.max_bearing_diff;
    let frc_score = frc_diff as f64 / config.frc_tolerance.max(1) as f64;

    // Weighted sum
    config.distance_weight * distance_score
        + config.bearing_weight * bearing_score
        + config.frc_weight * frc_score
}
