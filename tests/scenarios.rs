//! End-to-end classification scenarios and properties of the diagnostic engine.
//!
//! The network is planar (EPSG:3857), so every coordinate and buffer diameter reads as
//! meters:
//! ```text
//!              J6 (150,80)
//!             /  \
//!  J1 ---- J2 ---- J3 ---- J4
//!  (0,0)  (100,0) (200,0) (300,0)
//! ```
//! Links 10, 20 and 40 run along the x axis; link 30 bends north from J2 to J3.

use std::cell::RefCell;

use geo::{line_string, Coord, LineString};
use odat::analyzer::{AnalysisResult, Analyzer};
use odat::config::AnalyzerConfig;
use odat::decoder::{DecodeFailure, DecodedPath, Decoder, MapMatchingDecoder, MaskAttribute, MaskSet};
use odat::geometry::{Buffer, Frame};
use odat::graph::{Direction, Fow, Frc, RoadNetwork, TraversedLink};
use odat::location::{LineReference, LocationReference, LocationType};
use odat::masking::{Acceptance, MaskingSearch};
use odat::test_utils::{decoded_path, decoded_through, line_reference, TestNetworkBuilder};
use odat::viable::{find_viable_path, ViablePathOutcome};

fn network() -> RoadNetwork {
    TestNetworkBuilder::planar()
        .add_junction(1, 0.0, 0.0)
        .add_junction(2, 100.0, 0.0)
        .add_junction(3, 200.0, 0.0)
        .add_junction(4, 300.0, 0.0)
        .add_link(10, 1, 2, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(20, 2, 3, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link_via(30, 2, 3, &[(150.0, 80.0)], Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(40, 3, 4, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .build()
}

fn source() -> LineString<f64> {
    line_string![(x: 0.0, y: 0.0), (x: 300.0, y: 0.0)]
}

fn reference() -> LineReference {
    line_reference(
        Frame::WebMercator,
        &[(0.0, 0.0), (300.0, 0.0)],
        Frc::Frc3,
        Fow::SingleCarriageway,
    )
}

fn links(ids: &[u64]) -> Vec<TraversedLink> {
    ids.iter().copied().map(TraversedLink::forward).collect()
}

fn straight(n: &RoadNetwork) -> DecodedPath {
    decoded_through(n, &links(&[10, 20, 40]))
}

fn detour(n: &RoadNetwork) -> DecodedPath {
    decoded_through(n, &links(&[10, 30, 40]))
}

#[test]
fn scenario_a_accurate_decode_is_ok() {
    let network = TestNetworkBuilder::planar()
        .add_junction(1, 0.0, 0.0)
        .add_junction(2, 100.0, 0.0)
        .add_junction(3, 200.0, 0.0)
        .add_link(10, 1, 2, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(20, 2, 3, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .build();
    let decoder = MapMatchingDecoder::new();
    let config = AnalyzerConfig {
        buffer_diameter: 50.0,
        ..AnalyzerConfig::default()
    };
    let location = LocationReference::Line(line_reference(
        Frame::WebMercator,
        &[(0.0, 0.0), (200.0, 0.0)],
        Frc::Frc3,
        Fow::SingleCarriageway,
    ));

    let analysis = Analyzer::new(&network, &decoder, config)
        .analyze_location(&location, &line_string![(x: 0.0, y: 0.0), (x: 200.0, y: 0.0)]);

    assert_eq!(analysis.result, AnalysisResult::Ok);
    assert_eq!(analysis.evidence.decoded_links, Some(links(&[10, 20])));
    assert_eq!(analysis.fraction(), 1.0);
}

#[test]
fn scenario_b_no_coverage_is_outside_map_bounds() {
    let network = network();
    let decoder = |_: &LineReference, _: &RoadNetwork, _: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        Err(DecodeFailure::NoCandidates { lrp: 0 })
    };
    let far_away = LocationReference::Line(line_reference(
        Frame::WebMercator,
        &[(5000.0, 5000.0), (5300.0, 5000.0)],
        Frc::Frc3,
        Fow::SingleCarriageway,
    ));

    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default())
        .analyze_location(&far_away, &line_string![(x: 5000.0, y: 5000.0), (x: 5300.0, y: 5000.0)]);

    assert_eq!(analysis.result, AnalysisResult::OutsideMapBounds);
    assert!(analysis.evidence.masks_applied.is_empty());
}

#[test]
fn scenario_c_fow_relaxation_fixes_failed_decode() {
    let network = network();
    let decoder = |_: &LineReference, n: &RoadNetwork, mask: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        if mask.contains(MaskAttribute::Fow) {
            Ok(straight(n))
        } else {
            Err(DecodeFailure::NoCandidates { lrp: 1 })
        }
    };

    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default())
        .analyze_location(&LocationReference::Line(reference()), &source());

    assert_eq!(analysis.result, AnalysisResult::FowMismatch);
    assert_eq!(analysis.evidence.viable_path_found, Some(true));
    assert_eq!(analysis.evidence.viable_path, Some(links(&[10, 20, 40])));
    assert_eq!(analysis.evidence.cause, Some(MaskSet::only(MaskAttribute::Fow)));
    let masks: Vec<MaskSet> = analysis.evidence.masks_applied.iter().map(|s| s.mask).collect();
    assert_eq!(
        masks,
        vec![
            MaskSet::only(MaskAttribute::Frc),
            MaskSet::only(MaskAttribute::Frc).with(MaskAttribute::Fow),
        ]
    );
}

#[test]
fn scenario_d_bearing_relaxation_fixes_interior_placement() {
    let network = network();
    let location = LocationReference::Line(line_reference(
        Frame::WebMercator,
        &[(0.0, 0.0), (150.0, 0.0), (300.0, 0.0)],
        Frc::Frc3,
        Fow::SingleCarriageway,
    ));
    let decoder = |_: &LineReference, n: &RoadNetwork, mask: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        let (middle, route) = if mask.contains(MaskAttribute::Bearing) {
            (20, [10, 20, 40])
        } else {
            (30, [10, 30, 40])
        };
        Ok(decoded_path(
            n,
            &links(&route),
            &[
                (TraversedLink::forward(10), 0.0),
                (TraversedLink::forward(middle), 50.0),
                (TraversedLink::forward(40), 100.0),
            ],
        ))
    };

    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default()).analyze_location(&location, &source());

    assert_eq!(analysis.result, AnalysisResult::BearingMismatch);
    assert_eq!(analysis.evidence.misplaced_lrp, Some(1));
    assert_eq!(analysis.evidence.masks_applied.len(), 3);
    assert_eq!(analysis.evidence.confirmation.map(|c| c.accepted), Some(true));
}

#[test]
fn scenario_e_full_relaxation_still_detours() {
    let network = network();
    let decoder = |_: &LineReference, n: &RoadNetwork, mask: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        if mask == MaskSet::all() {
            Ok(detour(n))
        } else {
            Err(DecodeFailure::NoPath { from: 0, to: 1 })
        }
    };

    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default())
        .analyze_location(&LocationReference::Line(reference()), &source());

    assert_eq!(analysis.result, AnalysisResult::AlternateShortestPath);
    assert_eq!(analysis.evidence.viable_path_found, Some(true));
    assert_eq!(analysis.evidence.masks_applied.len(), 4);
    assert_eq!(analysis.evidence.relaxed_links, Some(links(&[10, 30, 40])));
    assert_eq!(analysis.evidence.relaxed_matches_viable, Some(false));
}

#[test]
fn scenario_f_point_location_is_unsupported() {
    let network = network();
    let calls = RefCell::new(0);
    let decoder = |_: &LineReference, _: &RoadNetwork, _: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        *calls.borrow_mut() += 1;
        Err(DecodeFailure::NoCandidates { lrp: 0 })
    };
    let analyzer = Analyzer::new(&network, &decoder, AnalyzerConfig::default());

    let analysis = analyzer.analyze_location(&LocationReference::Other(LocationType::PointAlongLine), &source());
    assert_eq!(analysis.result, AnalysisResult::UnsupportedLocationType);

    // A real geo-coordinate code takes the same exit
    let analysis = analyzer.analyze("I+djotZ9eA==", &source());
    assert_eq!(analysis.result, AnalysisResult::UnsupportedLocationType);

    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn exhausted_relaxation_is_decoding_error() {
    let network = network();
    let decoder = |_: &LineReference, _: &RoadNetwork, _: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        Err(DecodeFailure::NoPath { from: 0, to: 1 })
    };

    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default())
        .analyze_location(&LocationReference::Line(reference()), &source());

    assert_eq!(analysis.result, AnalysisResult::DecodingError);
    assert_eq!(analysis.evidence.masks_applied.len(), 4);
    assert!(analysis.evidence.masks_applied.iter().all(|s| !s.accepted));
}

#[test]
fn missing_road_without_viable_path() {
    // The straight middle link is one-way westbound, so only the detour connects
    let network = TestNetworkBuilder::planar()
        .add_junction(1, 0.0, 0.0)
        .add_junction(2, 100.0, 0.0)
        .add_junction(3, 200.0, 0.0)
        .add_junction(4, 300.0, 0.0)
        .add_link(10, 1, 2, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(20, 2, 3, Direction::Backward, Frc::Frc3, Fow::SingleCarriageway)
        .add_link_via(30, 2, 3, &[(150.0, 80.0)], Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(40, 3, 4, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .build();
    let decoder = |_: &LineReference, _: &RoadNetwork, _: MaskSet| -> Result<DecodedPath, DecodeFailure> {
        Err(DecodeFailure::NoPath { from: 0, to: 1 })
    };

    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default())
        .analyze_location(&LocationReference::Line(reference()), &source());

    assert_eq!(analysis.result, AnalysisResult::MissingOrMisconfiguredRoad);
    assert_eq!(analysis.evidence.viable_path_found, Some(false));
}

#[test]
fn buffer_covers_its_generator() {
    let planar = [
        line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)],
        line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0), (x: 100.0, y: 100.0)],
        line_string![(x: 0.0, y: 0.0), (x: 50.0, y: 40.0), (x: 100.0, y: 0.0), (x: 150.0, y: 40.0)],
        line_string![(x: -20.0, y: 5.0), (x: 0.0, y: 0.0), (x: 30.0, y: 30.0), (x: 30.0, y: 90.0)],
    ];
    for line in &planar {
        for diameter in [1.0, 20.0, 50.0] {
            let buffer = Buffer::build(line, diameter, Frame::WebMercator).unwrap();
            assert!(buffer.covers_line(line), "diameter {} line {:?}", diameter, line);
            assert!((buffer.fraction_within(line) - 1.0).abs() < 1e-6);
        }
    }

    let geographic = line_string![(x: 4.90, y: 52.37), (x: 4.91, y: 52.371), (x: 4.915, y: 52.38)];
    for diameter in [5.0, 20.0, 100.0] {
        let buffer = Buffer::build(&geographic, diameter, Frame::Wgs84).unwrap();
        assert!(buffer.covers_line(&geographic));
    }
}

#[test]
fn relaxation_never_revokes_acceptance() {
    // Every link is a residential street while the reference asks for a primary road
    let network = TestNetworkBuilder::planar()
        .add_junction(1, 0.0, 0.0)
        .add_junction(2, 100.0, 0.0)
        .add_junction(3, 200.0, 0.0)
        .add_link(10, 1, 2, Direction::Both, Frc::Frc5, Fow::SingleCarriageway)
        .add_link(20, 2, 3, Direction::Both, Frc::Frc5, Fow::SingleCarriageway)
        .build();
    let source = line_string![(x: 0.0, y: 0.0), (x: 200.0, y: 0.0)];
    let reference = line_reference(
        Frame::WebMercator,
        &[(0.0, 0.0), (200.0, 0.0)],
        Frc::Frc2,
        Fow::SingleCarriageway,
    );
    let buffer = Buffer::build(&source, 20.0, Frame::WebMercator).unwrap();
    let decoder = MapMatchingDecoder::new();
    let search = MaskingSearch::new(&decoder, &network, &buffer);

    let masks = all_masks();
    let accepted: Vec<bool> = masks
        .iter()
        .map(|&mask| search.attempt(&reference, mask, Acceptance::WholePath).unwrap().is_accepted())
        .collect();

    assert!(!accepted[0], "the unmasked decode must fail on FRC");
    assert!(accepted[15], "the fully relaxed decode must succeed");
    for (i, small) in masks.iter().enumerate() {
        for (j, large) in masks.iter().enumerate() {
            if large.is_superset(small) && accepted[i] {
                assert!(accepted[j], "{} accepted but {} rejected", small, large);
            }
        }
    }
}

fn all_masks() -> Vec<MaskSet> {
    (0u8..16)
        .map(|bits| {
            MaskAttribute::PRIORITY
                .iter()
                .enumerate()
                .filter(|(i, _)| bits & (1 << i) != 0)
                .fold(MaskSet::EMPTY, |mask, (_, &attribute)| mask.with(attribute))
        })
        .collect()
}

#[test]
fn relaxation_keeps_route_among_crowded_candidates() {
    // Ten dead-end FRC6 stubs run right through the first LRP; the FRC3 road is 5 away
    let mut builder = TestNetworkBuilder::planar()
        .add_junction(1, 0.0, 0.0)
        .add_junction(2, 100.0, 0.0)
        .add_junction(3, 200.0, 0.0)
        .add_link(1, 1, 2, Direction::Forward, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(2, 2, 3, Direction::Forward, Frc::Frc3, Fow::SingleCarriageway);
    for i in 0..10 {
        let from = 100 + 2 * i;
        builder = builder
            .add_junction(from, 40.0, 5.0)
            .add_junction(from + 1, 60.0, 5.0)
            .add_link(100 + i as u64, from, from + 1, Direction::Forward, Frc::Frc6, Fow::SingleCarriageway);
    }
    let network = builder.build();
    let mut reference = line_reference(
        Frame::WebMercator,
        &[(50.0, 5.0), (200.0, 0.0)],
        Frc::Frc3,
        Fow::SingleCarriageway,
    );
    reference.points[0].bearing = 90.0;
    reference.points[0].dnp = Some(150.0);
    let source = line_string![(x: 50.0, y: 0.0), (x: 200.0, y: 0.0)];
    let buffer = Buffer::build(&source, 20.0, Frame::WebMercator).unwrap();
    let decoder = MapMatchingDecoder::new();
    let search = MaskingSearch::new(&decoder, &network, &buffer);

    for mask in all_masks() {
        let path = decoder.decode(&reference, &network, mask).unwrap();
        assert_eq!(path.links, links(&[1, 2]), "mask {}", mask);
        assert!(search.attempt(&reference, mask, Acceptance::WholePath).unwrap().is_accepted());
    }
}

#[test]
fn geographic_reference_decodes_on_web_mercator_network() {
    // Three links of about 100 m each along latitude 52, stored in EPSG:3857
    let step = 100.0 / (111_320.0 * 52f64.to_radians().cos());
    let wgs84: Vec<Coord<f64>> = (0..4).map(|i| Coord { x: 4.0 + i as f64 * step, y: 52.0 }).collect();
    let projected: Vec<Coord<f64>> = wgs84.iter().map(|&c| Frame::WebMercator.from_wgs84(c)).collect();
    let mut builder = TestNetworkBuilder::planar();
    for (i, c) in projected.iter().enumerate() {
        builder = builder.add_junction(i as i64 + 1, c.x, c.y);
    }
    let network = builder
        .add_link(1, 1, 2, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(2, 2, 3, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .add_link(3, 3, 4, Direction::Both, Frc::Frc3, Fow::SingleCarriageway)
        .build();

    let geographic = line_reference(
        Frame::Wgs84,
        &[(wgs84[0].x, wgs84[0].y), (wgs84[3].x, wgs84[3].y)],
        Frc::Frc3,
        Fow::SingleCarriageway,
    );
    let reference = geographic.to_frame(Frame::WebMercator);
    let source: LineString<f64> = projected.iter().copied().collect();

    // Lengths on the network are stretched by about 1 / cos(52) against meters
    let network_length: f64 = (1..=3).map(|id| network.link_by_id(id).unwrap().length).sum();
    assert!(network_length > 450.0);
    assert!((reference.expected_length() - network_length).abs() / network_length < 0.01);

    let decoder = MapMatchingDecoder::new();
    let analysis = Analyzer::new(&network, &decoder, AnalyzerConfig::default())
        .analyze_location(&LocationReference::Line(reference), &source);

    assert_eq!(analysis.result, AnalysisResult::Ok);
    assert_eq!(analysis.evidence.decoded_links, Some(links(&[1, 2, 3])));
}

#[test]
fn viable_path_search_is_deterministic() {
    let network = network();
    let reference = reference();
    let buffer = Buffer::build(&source(), 20.0, Frame::WebMercator).unwrap();

    let first = find_viable_path(&buffer, reference.first(), reference.last(), &network, 20.0);
    let second = find_viable_path(&buffer, reference.first(), reference.last(), &network, 20.0);
    assert_eq!(first, second);
    assert_eq!(first, ViablePathOutcome::Found(links(&[10, 20, 40])));
}

#[test]
fn classification_is_idempotent() {
    let network = network();
    let decoder = MapMatchingDecoder::new();
    let analyzer = Analyzer::new(&network, &decoder, AnalyzerConfig::default());
    let location = LocationReference::Line(reference());

    let first = analyzer.analyze_location(&location, &source());
    let second = analyzer.analyze_location(&location, &source());
    assert_eq!(first, second);
}
