//! JSON report and console summary for a finished batch.

use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use geo::LineString;
use geozero::ToWkt;
use serde::{Serialize, Serializer};

use crate::analyzer::{AnalysisResult, Evidence};
use crate::batch::{BatchOutcome, BatchSummary, RecordReport};
use crate::config::{MapExtent, RunConfig};

/// Serialize an optional line as WKT
pub fn serialize_wkt<S: Serializer>(geometry: &Option<LineString<f64>>, serializer: S) -> Result<S::Ok, S::Error> {
    match geometry {
        Some(line) => {
            let wkt = geo::Geometry::LineString(line.clone())
                .to_wkt()
                .map_err(serde::ser::Error::custom)?;
            serializer.serialize_str(&wkt)
        }
        None => serializer.serialize_none(),
    }
}

/// Settings the run was made with
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub input_file: String,
    pub network: String,
    pub spatial_extension: Option<String>,
    pub target_crs: String,
    pub buffer_diameter: f64,
    pub lrp_radius: f64,
    pub map_extent: MapExtent,
    pub num_threads: usize,
    pub version: &'static str,
}

impl RunMetadata {
    pub fn from_config(config: &RunConfig) -> Self {
        RunMetadata {
            input_file: config.input.display().to_string(),
            network: config.network.display().to_string(),
            spatial_extension: config.spatial_extension.as_ref().map(|p| p.display().to_string()),
            target_crs: config.target_crs.crs().to_string(),
            buffer_diameter: config.analyzer.buffer_diameter,
            lrp_radius: config.analyzer.lrp_radius,
            map_extent: config.analyzer.map_extent,
            num_threads: config.batch.num_threads,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Wall-clock time spent in each phase of a run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTimings {
    pub network_load: Duration,
    pub map_bounds: Duration,
    pub analysis: Duration,
    pub total: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationEntry<'a> {
    location_reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    category: Option<&'a str>,
    frc: Option<i64>,
    result: AnalysisResult,
    fraction: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    duplicate: bool,
    evidence: &'a Evidence,
}

impl<'a> From<&'a RecordReport> for LocationEntry<'a> {
    fn from(report: &'a RecordReport) -> Self {
        LocationEntry {
            location_reference: &report.code,
            id: report.id.as_deref(),
            category: report.category.as_deref(),
            frc: report.frc,
            result: report.analysis.result,
            fraction: report.analysis.fraction(),
            duplicate: report.duplicate,
            evidence: &report.analysis.evidence,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    metadata: &'a RunMetadata,
    summary: &'a BatchSummary,
    locations: Vec<LocationEntry<'a>>,
}

/// Write the JSON report for a batch
pub fn write_report<W: Write>(writer: W, metadata: &RunMetadata, outcome: &BatchOutcome) -> Result<()> {
    let summary = BatchSummary::from_outcome(outcome);
    let report = Report {
        metadata,
        summary: &summary,
        locations: outcome.reports.iter().map(LocationEntry::from).collect(),
    };
    serde_json::to_writer_pretty(writer, &report).context("Failed to write report")?;
    Ok(())
}

/// Render the per-result table and run statistics for the console
pub fn render_summary(summary: &BatchSummary, timings: &RunTimings) -> String {
    let mut rows = summary.categories.clone();
    // Most frequent first; ties keep result order
    rows.sort_by(|a, b| b.count.cmp(&a.count));

    let counted = summary.analyzed - summary.duplicates;
    let name_width = rows
        .iter()
        .map(|r| r.result.as_str().len())
        .chain(["DUPLICATE_OPENLR_CODE".len(), "Result".len()])
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "ODAT analysis summary");
    let _ = writeln!(
        out,
        "{:>name_width$}  {:>8}  {:>10}  {:>15}",
        "Result", "Count", "% of total", "% within buffer"
    );
    for row in &rows {
        let _ = writeln!(
            out,
            "{:>name_width$}  {:>8}  {:>9.2}%  {:>14.2}%",
            row.result.as_str(),
            row.count,
            100.0 * row.share,
            100.0 * row.mean_fraction
        );
    }
    if summary.duplicates > 0 {
        let _ = writeln!(
            out,
            "{:>name_width$}  {:>8}  {:>10}  {:>15}",
            "DUPLICATE_OPENLR_CODE", summary.duplicates, "-", "-"
        );
    }

    let overall = if counted > 0 {
        summary
            .categories
            .iter()
            .map(|c| c.mean_fraction * c.count as f64)
            .sum::<f64>()
            / counted as f64
    } else {
        0.0
    };

    let _ = writeln!(out);
    let _ = writeln!(out, "Run statistics");
    let _ = writeln!(out, "{:<32}{}", "OpenLRs processed", counted);
    let _ = writeln!(out, "{:<32}{}", "Skipped (cancelled)", summary.skipped);
    let _ = writeln!(out, "{:<32}{:.2}%", "Average % within buffer", 100.0 * overall);
    let _ = writeln!(out, "{:<32}{:.4} secs", "Network load time", timings.network_load.as_secs_f64());
    let _ = writeln!(out, "{:<32}{:.4} secs", "Map boundary calculation time", timings.map_bounds.as_secs_f64());
    let _ = writeln!(out, "{:<32}{:.4} secs", "OpenLR analysis time", timings.analysis.as_secs_f64());
    let _ = writeln!(out, "{:<32}{:.4} secs", "Total elapsed time", timings.total.as_secs_f64());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analysis;
    use geo::line_string;

    fn report(index: usize, code: &str, analysis: Analysis, duplicate: bool) -> RecordReport {
        RecordReport {
            index,
            id: None,
            code: code.to_string(),
            category: Some("urban".to_string()),
            frc: Some(3),
            analysis,
            duplicate,
        }
    }

    fn ok_analysis() -> Analysis {
        Analysis {
            result: AnalysisResult::Ok,
            evidence: Evidence {
                decoded_geometry: Some(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)]),
                fraction_within_buffer: Some(1.0),
                ..Evidence::default()
            },
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            input_file: "input.json".to_string(),
            network: "network.parquet".to_string(),
            spatial_extension: None,
            target_crs: "EPSG:3857".to_string(),
            buffer_diameter: 20.0,
            lrp_radius: 20.0,
            map_extent: MapExtent::None,
            num_threads: 2,
            version: "test",
        }
    }

    #[test]
    fn test_evidence_geometry_is_wkt() {
        let json = serde_json::to_value(ok_analysis().evidence).unwrap();
        let wkt = json["decoded_geometry"].as_str().unwrap();
        assert!(wkt.starts_with("LINESTRING"));
        assert_eq!(json["fraction_within_buffer"], 1.0);
        // Absent evidence is left out entirely
        assert!(json.get("error").is_none());
        assert!(json.get("masks_applied").is_none());
    }

    #[test]
    fn test_write_report() {
        let outcome = BatchOutcome {
            reports: vec![
                report(0, "AAA", ok_analysis(), false),
                report(1, "BBB", Analysis::error("boom"), false),
                report(2, "AAA", ok_analysis(), true),
            ],
            skipped: 0,
        };

        let mut buf = Vec::new();
        write_report(&mut buf, &metadata(), &outcome).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(json["metadata"]["target_crs"], "EPSG:3857");
        assert_eq!(json["metadata"]["map_extent"], "none");
        let locations = json["locations"].as_array().unwrap();
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[0]["locationReference"], "AAA");
        assert_eq!(locations[0]["result"], "OK");
        assert_eq!(locations[0]["fraction"], 1.0);
        assert!(locations[0].get("duplicate").is_none());
        assert_eq!(locations[1]["result"], "UNKNOWN_ERROR");
        assert_eq!(locations[1]["evidence"]["error"], "boom");
        assert_eq!(locations[2]["duplicate"], true);
        assert_eq!(json["summary"]["duplicates"], 1);
    }

    #[test]
    fn test_render_summary() {
        let outcome = BatchOutcome {
            reports: vec![
                report(0, "AAA", ok_analysis(), false),
                report(1, "BBB", ok_analysis(), false),
                report(2, "CCC", Analysis::error("boom"), false),
                report(3, "AAA", ok_analysis(), true),
            ],
            skipped: 1,
        };
        let summary = BatchSummary::from_outcome(&outcome);
        let text = render_summary(&summary, &RunTimings::default());

        let ok_line = text.lines().find(|l| l.trim_start().starts_with("OK ")).unwrap();
        assert!(ok_line.contains("66.67%"));
        assert!(ok_line.contains("100.00%"));
        assert!(text.contains("UNKNOWN_ERROR"));
        assert!(text.contains("DUPLICATE_OPENLR_CODE"));
        assert!(text.contains("OpenLRs processed"));
        // OK is listed before the less frequent error row
        assert!(text.find("OK ").unwrap() < text.find("UNKNOWN_ERROR").unwrap());
    }
}
