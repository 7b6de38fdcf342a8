//! Parallel Roads Test
//!
//! The network topology is:
//! ```text
//!        ____
//! N1---N2____N3---N4
//!
//! Each connection is drivable in both directions.
//! Links 2 and 4 are parallel between N2 and N3 (different lengths: 750m vs 800m)
//! ```
//!
//! The reference decoder must pick the parallel road whose length matches the
//! distance to next point, and the analyzer must explain a location drawn along the
//! longer road as a shortest path preference.

use geo::{Coord, LineString};
use odat::analyzer::{AnalysisResult, Analyzer};
use odat::config::AnalyzerConfig;
use odat::decoder::{Decoder, MapMatchingDecoder, MaskSet};
use odat::geometry::Frame;
use odat::graph::{Direction, Fow, Frc, RoadNetwork};
use odat::location::{LineReference, LocationReference, Lrp};
use odat::test_utils::TestNetworkBuilder;

/// Node coordinates as (lon, lat)
const NODE_1: (f64, f64) = (-73.96526, 40.75629);
const NODE_2: (f64, f64) = (-73.96696, 40.75702);
const NODE_3: (f64, f64) = (-73.96922, 40.75797);
const NODE_4: (f64, f64) = (-73.9708, 40.75862);

/// Link lengths in meters
const LINK_1_LENGTH: f64 = 500.0; // N1 <-> N2
const LINK_2_LENGTH: f64 = 750.0; // N2 <-> N3 (shorter parallel road)
const LINK_3_LENGTH: f64 = 550.0; // N3 <-> N4
const LINK_4_LENGTH: f64 = 800.0; // N2 <-> N3 (longer parallel road)

/// The longer parallel road bends through this point
fn detour_point() -> (f64, f64) {
    (
        (NODE_2.0 + NODE_3.0) / 2.0 - 0.0005,
        (NODE_2.1 + NODE_3.1) / 2.0 + 0.0003,
    )
}

fn coord(node: (f64, f64)) -> Coord<f64> {
    Coord { x: node.0, y: node.1 }
}

fn build_parallel_roads_network() -> RoadNetwork {
    let frc = Frc::Frc5;
    let fow = Fow::MultipleCarriageway;
    TestNetworkBuilder::geographic()
        .add_junction(1, NODE_1.0, NODE_1.1)
        .add_junction(2, NODE_2.0, NODE_2.1)
        .add_junction(3, NODE_3.0, NODE_3.1)
        .add_junction(4, NODE_4.0, NODE_4.1)
        .add_link_with_length(1, 1, 2, LINK_1_LENGTH, Direction::Both, frc, fow)
        .add_link_with_length(2, 2, 3, LINK_2_LENGTH, Direction::Both, frc, fow)
        .add_link_with_length(3, 3, 4, LINK_3_LENGTH, Direction::Both, frc, fow)
        .add_link_via(4, 2, 3, &[detour_point()], Direction::Both, frc, fow)
        .with_link_length(4, LINK_4_LENGTH)
        .build()
}

/// A two-point line reference from `start` to `end`. The first bearing follows
/// `start -> toward`; the last looks back along `end -> back`.
fn reference(start: (f64, f64), toward: (f64, f64), end: (f64, f64), back: (f64, f64), dnp: f64) -> LineReference {
    let frame = Frame::Wgs84;
    let lrp = |at: (f64, f64), bearing: f64, dnp: Option<f64>| Lrp {
        coord: coord(at),
        bearing,
        frc: Frc::Frc5,
        fow: Fow::MultipleCarriageway,
        dnp,
    };
    LineReference::new(
        vec![
            lrp(start, frame.bearing(coord(start), coord(toward)), Some(dnp)),
            lrp(end, frame.bearing(coord(end), coord(back)), None),
        ],
        0.0,
        0.0,
    )
    .unwrap()
}

fn decoded_ids(network: &RoadNetwork, reference: &LineReference) -> Vec<u64> {
    let path = MapMatchingDecoder::new()
        .decode(reference, network, MaskSet::EMPTY)
        .unwrap_or_else(|e| panic!("Decoding failed: {}", e));
    path.links.iter().map(|t| t.link_id).collect()
}

/// Path: N1 -> N2 -> N3 -> N4
/// Expected links: [1, 2, 3]
#[test]
fn test_parallel_roads() {
    let network = build_parallel_roads_network();

    // 500 + 750 + 550 = 1800 (exactly matches DNP)
    // 500 + 800 + 550 = 1850 (50m longer than expected)
    let lrps = reference(NODE_1, NODE_2, NODE_4, NODE_3, 1800.0);
    let link_ids = decoded_ids(&network, &lrps);

    assert_eq!(link_ids, vec![1, 2, 3], "Should choose link 2 (750m) over link 4 (800m)");
}

/// Path: N2 -> N3
/// Expected link: [2] (the shorter one, 750m)
#[test]
fn test_parallel_roads_only() {
    let network = build_parallel_roads_network();

    let lrps = reference(NODE_2, NODE_3, NODE_3, NODE_2, 750.0);
    let link_ids = decoded_ids(&network, &lrps);

    assert_eq!(link_ids, vec![2], "Should choose link 2 (750m, exact match) over link 4 (800m)");
}

/// Path: N1 -> N2 -> N3
/// Expected links: [1, 2]
#[test]
fn test_parallel_roads_at_end() {
    let network = build_parallel_roads_network();

    // 500 + 750 = 1250 (exactly matches DNP)
    let lrps = reference(NODE_1, NODE_2, NODE_3, NODE_2, 1250.0);
    let link_ids = decoded_ids(&network, &lrps);

    assert!(!link_ids.contains(&3), "Path should NOT contain link 3 (N3->N4). Got: {:?}", link_ids);
    assert_eq!(link_ids, vec![1, 2]);
}

/// The source line follows the straight road, so the decode lands in the buffer
#[test]
fn test_analyzer_accepts_matching_road() {
    let network = build_parallel_roads_network();
    let decoder = MapMatchingDecoder::new();
    let analyzer = Analyzer::new(&network, &decoder, AnalyzerConfig::default());

    let source = LineString::from(vec![NODE_1, NODE_2, NODE_3, NODE_4]);
    let location = LocationReference::Line(reference(NODE_1, NODE_2, NODE_4, NODE_3, 1800.0));

    let analysis = analyzer.analyze_location(&location, &source);
    assert_eq!(analysis.result, AnalysisResult::Ok);
    assert_eq!(analysis.fraction(), 1.0);
}

/// The source line follows the longer parallel road. Relaxing the path length still
/// routes over the shorter one, so the decoder simply prefers the shortest path.
#[test]
fn test_analyzer_explains_shortest_path_preference() {
    let network = build_parallel_roads_network();
    let decoder = MapMatchingDecoder::new();
    let analyzer = Analyzer::new(&network, &decoder, AnalyzerConfig::default());

    let source = LineString::from(vec![NODE_1, NODE_2, detour_point(), NODE_3, NODE_4]);
    let location = LocationReference::Line(reference(NODE_1, NODE_2, NODE_4, NODE_3, 1850.0));

    let analysis = analyzer.analyze_location(&location, &source);
    assert_eq!(analysis.result, AnalysisResult::AlternateShortestPath);
    assert_eq!(analysis.evidence.confirmation.map(|c| c.accepted), Some(false));
    let decoded: Vec<u64> = analysis
        .evidence
        .decoded_links
        .as_ref()
        .unwrap()
        .iter()
        .map(|t| t.link_id)
        .collect();
    assert_eq!(decoded, vec![1, 2, 3]);
    let fraction = analysis.fraction();
    assert!(fraction > 0.0 && fraction < 1.0);
}
