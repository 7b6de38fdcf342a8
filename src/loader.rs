//! Load the network store and input records from Parquet or JSON files.

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryViewArray, Float64Array, Int32Array, Int64Array,
    LargeBinaryArray, LargeStringArray, RecordBatch, StringArray, StringViewArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use geo::LineString;
use geoarrow_array::array::LineStringArray;
use geoarrow_array::{GeoArrowArray, GeoArrowArrayAccessor};
use geoarrow_schema::GeoArrowType;
use geozero::{wkb, wkt, ToGeo};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::geometry::Frame;
use crate::graph::{Direction, Fow, Frc, Link, NetworkError, RoadNetwork};
use crate::spatial::SpatialIndexMode;

/// String column in any of the Arrow string layouts
#[derive(Clone, Copy)]
enum StringSource<'a> {
    String(&'a StringArray),
    LargeString(&'a LargeStringArray),
    StringView(&'a StringViewArray),
}

impl<'a> StringSource<'a> {
    fn from_column(col: &'a ArrayRef) -> Option<Self> {
        let any = col.as_any();
        if let Some(arr) = any.downcast_ref::<StringArray>() {
            return Some(StringSource::String(arr));
        }
        if let Some(arr) = any.downcast_ref::<LargeStringArray>() {
            return Some(StringSource::LargeString(arr));
        }
        any.downcast_ref::<StringViewArray>().map(StringSource::StringView)
    }

    fn value(&self, row: usize) -> Option<&'a str> {
        match *self {
            StringSource::String(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            StringSource::LargeString(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            StringSource::StringView(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
        }
    }
}

/// Binary column in any of the Arrow binary layouts
#[derive(Clone, Copy)]
enum BinarySource<'a> {
    Binary(&'a BinaryArray),
    LargeBinary(&'a LargeBinaryArray),
    BinaryView(&'a BinaryViewArray),
}

impl<'a> BinarySource<'a> {
    fn from_column(col: &'a ArrayRef) -> Option<Self> {
        let any = col.as_any();
        if let Some(arr) = any.downcast_ref::<BinaryArray>() {
            return Some(BinarySource::Binary(arr));
        }
        if let Some(arr) = any.downcast_ref::<LargeBinaryArray>() {
            return Some(BinarySource::LargeBinary(arr));
        }
        any.downcast_ref::<BinaryViewArray>().map(BinarySource::BinaryView)
    }

    fn value(&self, row: usize) -> Option<&'a [u8]> {
        match *self {
            BinarySource::Binary(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            BinarySource::LargeBinary(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            BinarySource::BinaryView(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
        }
    }
}

/// Integer column; ids may be stored signed or unsigned
#[derive(Clone, Copy)]
enum IntSource<'a> {
    Int64(&'a Int64Array),
    Int32(&'a Int32Array),
    UInt64(&'a UInt64Array),
}

impl<'a> IntSource<'a> {
    fn from_column(col: &'a ArrayRef) -> Option<Self> {
        let any = col.as_any();
        if let Some(arr) = any.downcast_ref::<Int64Array>() {
            return Some(IntSource::Int64(arr));
        }
        if let Some(arr) = any.downcast_ref::<Int32Array>() {
            return Some(IntSource::Int32(arr));
        }
        any.downcast_ref::<UInt64Array>().map(IntSource::UInt64)
    }

    fn value(&self, row: usize) -> Option<i64> {
        match *self {
            IntSource::Int64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            IntSource::Int32(arr) => (!arr.is_null(row)).then(|| arr.value(row) as i64),
            IntSource::UInt64(arr) => {
                if arr.is_null(row) {
                    None
                } else {
                    i64::try_from(arr.value(row)).ok()
                }
            }
        }
    }

    fn value_u64(&self, row: usize) -> Option<u64> {
        match *self {
            IntSource::UInt64(arr) => (!arr.is_null(row)).then(|| arr.value(row)),
            _ => self.value(row).and_then(|v| u64::try_from(v).ok()),
        }
    }
}

/// Geometry column format detected from the Arrow schema
enum GeometryFormat<'a> {
    /// WKB binary (Binary, LargeBinary, BinaryView)
    Wkb(BinarySource<'a>),
    /// WKT or hex WKB string (String, LargeString, StringView)
    Wkt(StringSource<'a>),
    /// GeoArrow native LineString
    GeoArrow(LineStringArray),
    /// No usable geometry column
    None,
}

impl GeometryFormat<'_> {
    fn linestring(&self, row: usize) -> Option<LineString<f64>> {
        match self {
            GeometryFormat::Wkb(source) => source.value(row).and_then(parse_wkb_linestring),
            GeometryFormat::Wkt(source) => source.value(row).and_then(parse_text_linestring),
            GeometryFormat::GeoArrow(arr) => {
                if arr.is_null(row) {
                    None
                } else {
                    parse_geoarrow_linestring(arr, row)
                }
            }
            GeometryFormat::None => None,
        }
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<StringSource<'a>> {
    batch.column_by_name(name).and_then(StringSource::from_column)
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<IntSource<'a>> {
    batch.column_by_name(name).and_then(IntSource::from_column)
}

/// Returns the expected Arrow schema for network store files.
///
/// Required columns:
/// - `linkId` (UInt64): unique link identifier
/// - `startJunction`, `endJunction` (Int64): junction ids
/// - `direction` (Int64): 1 both, 2 forward, 3 backward
/// - `geometry`: LineString in the network CRS as WKB, WKT, or GeoArrow native
///
/// Optional columns:
/// - `frc`, `fow` (Int64): OpenLR attributes. Without them `highway` is required.
/// - `length` (Float64): link length overriding the geometric length
/// - `highway` (Utf8), `junction` (Utf8), `lanes` (Int64): OSM tags for FRC/FOW inference
pub fn network_schema() -> Schema {
    Schema::new(vec![
        Field::new("linkId", DataType::UInt64, false),
        Field::new("startJunction", DataType::Int64, false),
        Field::new("endJunction", DataType::Int64, false),
        Field::new("direction", DataType::Int64, false),
        Field::new("frc", DataType::Int64, true),
        Field::new("fow", DataType::Int64, true),
        Field::new("length", DataType::Float64, true),
        Field::new("highway", DataType::Utf8, true),
        Field::new("junction", DataType::Utf8, true),
        Field::new("lanes", DataType::Int64, true),
        Field::new("geometry", DataType::Binary, false),
    ])
}

/// Load the road network from a Parquet network store whose geometry is in `frame`
pub fn load_network(path: &Path, frame: Frame) -> Result<RoadNetwork> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open network store {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    // Read total row count from parquet metadata for pre-allocation
    let link_count_hint = builder
        .metadata()
        .file_metadata()
        .num_rows()
        .try_into()
        .unwrap_or(0usize);

    let reader = builder.build()?;
    build_network_from_batches(reader.map(|r| r.map_err(|e| anyhow!(e))), frame, link_count_hint)
}

/// Build a road network from Arrow RecordBatches and index it.
///
/// Rows with null ids, an unknown direction code or unusable geometry are skipped.
pub fn build_network_from_batches<I>(batches: I, frame: Frame, link_count_hint: usize) -> Result<RoadNetwork>
where
    I: Iterator<Item = Result<RecordBatch>>,
{
    // Road networks have roughly as many junctions as links
    let mut network = RoadNetwork::with_capacity(frame, link_count_hint, link_count_hint);
    let mut skipped = 0;

    for batch_result in batches {
        let batch = batch_result?;
        skipped += process_network_batch(&batch, &mut network)?;
    }

    if skipped > 0 {
        warn!(skipped, "skipped unusable network rows");
    }

    network.index_links(SpatialIndexMode::RTree);
    info!(
        links = network.link_count(),
        junctions = network.junction_count(),
        crs = %frame,
        "loaded road network"
    );
    Ok(network)
}

/// Add the links of one batch to the network, returning how many rows were skipped
fn process_network_batch(batch: &RecordBatch, network: &mut RoadNetwork) -> Result<usize> {
    let frame = network.frame();

    let link_id = int_column(batch, "linkId").ok_or_else(|| anyhow!("network store has no linkId column"))?;
    let start_junction =
        int_column(batch, "startJunction").ok_or_else(|| anyhow!("network store has no startJunction column"))?;
    let end_junction =
        int_column(batch, "endJunction").ok_or_else(|| anyhow!("network store has no endJunction column"))?;
    let direction = int_column(batch, "direction").ok_or_else(|| anyhow!("network store has no direction column"))?;

    let geometry_format = detect_geometry_format(batch);
    if matches!(geometry_format, GeometryFormat::None) {
        bail!("network store has no readable geometry column");
    }

    let frc_col = int_column(batch, "frc");
    let fow_col = int_column(batch, "fow");
    let highway = string_column(batch, "highway");
    let junction = string_column(batch, "junction");
    let lanes = int_column(batch, "lanes");
    let length = batch
        .column_by_name("length")
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>());

    if (frc_col.is_none() || fow_col.is_none()) && highway.is_none() {
        bail!("network store needs frc and fow columns or a highway column");
    }

    // PARALLEL PHASE: geometry parsing, attribute inference and Link construction
    let pending: Vec<Option<Link>> = (0..batch.num_rows())
        .into_par_iter()
        .map(|row| {
            let id = link_id.value_u64(row)?;
            let start = start_junction.value(row)?;
            let end = end_junction.value(row)?;
            let Some(direction) = direction.value(row).and_then(Direction::from_code) else {
                debug!(link = id, "unknown direction code");
                return None;
            };

            let hw_tag = highway.and_then(|h| h.value(row)).unwrap_or("");
            let frc = match frc_col.and_then(|c| c.value(row)) {
                Some(v) => Frc::from_u8(v.clamp(0, 7) as u8),
                None => Frc::from_osm_highway(hw_tag),
            };
            let fow = match fow_col.and_then(|c| c.value(row)) {
                Some(v) => Fow::from_u8(v.clamp(0, 7) as u8),
                None => {
                    let lane_count = lanes.and_then(|l| l.value(row)).map(|v| v.clamp(0, 255) as u8);
                    Fow::from_osm_tags(hw_tag, junction.and_then(|j| j.value(row)), lane_count)
                }
            };

            let Some(geometry) = geometry_format.linestring(row) else {
                debug!(link = id, "unreadable geometry");
                return None;
            };
            let link = match Link::new(id, start, end, direction, frc, fow, geometry, frame) {
                Ok(link) => link,
                Err(e) => {
                    debug!(error = %e, "invalid link");
                    return None;
                }
            };
            Some(match length.filter(|l| !l.is_null(row)).map(|l| l.value(row)) {
                Some(stored) if stored > 0.0 => link.with_length(stored),
                _ => link,
            })
        })
        .collect();

    // SEQUENTIAL PHASE: junctions come from the link endpoints
    let mut skipped = 0;
    for entry in pending {
        let Some(link) = entry else {
            skipped += 1;
            continue;
        };
        let (Some(&first), Some(&last)) = (link.geometry.0.first(), link.geometry.0.last()) else {
            skipped += 1;
            continue;
        };
        network.get_or_add_junction(link.start_junction, first);
        network.get_or_add_junction(link.end_junction, last);
        match network.add_link(link) {
            Ok(_) => {}
            Err(NetworkError::DuplicateLink(id)) => {
                warn!(link = id, "duplicate link id in network store");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(skipped)
}

/// Detect the geometry format from the batch schema and data.
fn detect_geometry_format(batch: &RecordBatch) -> GeometryFormat<'_> {
    let schema = batch.schema();
    let Some((idx, field)) = schema.column_with_name("geometry") else {
        return GeometryFormat::None;
    };
    let col = batch.column(idx);

    if let Some(ext_name) = field.metadata().get("ARROW:extension:name") {
        if ext_name.starts_with("geoarrow.linestring") {
            if let Some(arr) = try_parse_geoarrow_linestring(col.clone(), field) {
                return GeometryFormat::GeoArrow(arr);
            }
        }
    }

    if let Some(source) = BinarySource::from_column(col) {
        return GeometryFormat::Wkb(source);
    }
    if let Some(source) = StringSource::from_column(col) {
        return GeometryFormat::Wkt(source);
    }

    GeometryFormat::None
}

/// Try to parse an Arrow array as a GeoArrow LineString array.
fn try_parse_geoarrow_linestring(col: ArrayRef, field: &Field) -> Option<LineStringArray> {
    let line_type = match GeoArrowType::try_from(field).ok()? {
        GeoArrowType::LineString(t) => t,
        _ => return None,
    };
    LineStringArray::try_from((col.as_ref(), line_type)).ok()
}

fn parse_wkb_linestring(wkb_bytes: &[u8]) -> Option<LineString<f64>> {
    let geom = wkb::Wkb(wkb_bytes.to_vec()).to_geo().ok()?;
    extract_linestring(geom)
}

/// Parse a WKT LineString; any other geometry type gives `None`
pub fn parse_wkt_linestring(wkt_str: &str) -> Option<LineString<f64>> {
    let geom = wkt::Wkt(wkt_str).to_geo().ok()?;
    extract_linestring(geom)
}

/// WKT, or hex-encoded WKB as some exporters write it
fn parse_text_linestring(text: &str) -> Option<LineString<f64>> {
    parse_wkt_linestring(text).or_else(|| decode_hex(text).as_deref().and_then(parse_wkb_linestring))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

fn parse_geoarrow_linestring(arr: &LineStringArray, row: usize) -> Option<LineString<f64>> {
    use geo_traits::{CoordTrait, LineStringTrait};

    let ls = arr.value(row).ok()?;
    let coords: Vec<_> = ls.coords().map(|c| (c.x(), c.y())).collect();
    Some(LineString::from(coords))
}

fn extract_linestring(geom: geo::Geometry<f64>) -> Option<LineString<f64>> {
    match geom {
        geo::Geometry::LineString(ls) => Some(ls),
        _ => None,
    }
}

/// One location to analyze
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    /// Position in the input file
    pub index: usize,
    pub id: Option<String>,
    /// Base64 OpenLR code
    pub code: String,
    /// Intended location on the source map, WGS84
    pub geometry: LineString<f64>,
    pub category: Option<String>,
    pub frc: Option<i64>,
}

/// Load input records from a `.json` or `.parquet` file
pub fn load_records(path: &Path) -> Result<Vec<InputRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let records = match extension.as_deref() {
        Some("json") => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            parse_records_json(&text)?
        }
        Some("parquet") => load_records_parquet(path)?,
        other => bail!("Unsupported input format {:?}, expected .json or .parquet", other),
    };
    info!(records = records.len(), path = %path.display(), "loaded input records");
    Ok(records)
}

#[derive(Deserialize)]
struct RecordFile {
    locations: Vec<RawRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    location_reference: Option<String>,
    geometry: Option<String>,
    id: Option<serde_json::Value>,
    category: Option<String>,
    frc: Option<i64>,
}

/// Parse records from `{"locations": [...]}` JSON, skipping unusable entries
pub fn parse_records_json(text: &str) -> Result<Vec<InputRecord>> {
    let file: RecordFile = serde_json::from_str(text).context("Failed to parse input JSON")?;

    let mut records = Vec::with_capacity(file.locations.len());
    for (index, raw) in file.locations.into_iter().enumerate() {
        let id = raw.id.and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });
        if let Some(record) = make_record(index, id, raw.location_reference, raw.geometry.as_deref(), raw.category, raw.frc) {
            records.push(record);
        }
    }
    Ok(records)
}

fn make_record(
    index: usize,
    id: Option<String>,
    code: Option<String>,
    geometry: Option<&str>,
    category: Option<String>,
    frc: Option<i64>,
) -> Option<InputRecord> {
    let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
        warn!(index, ?id, "skipping record without a location reference");
        return None;
    };
    let Some(geometry) = geometry.and_then(parse_text_linestring) else {
        warn!(index, ?id, "skipping record whose geometry is not a LineString");
        return None;
    };
    Some(InputRecord {
        index,
        id,
        code,
        geometry,
        category,
        frc,
    })
}

/// Load records from Parquet.
///
/// Expected columns:
/// - `openlr` (STRING): base64 OpenLR code
/// - `geometry`: WKT or hex WKB string, WKB binary or GeoArrow LineString
/// - `id` (STRING or INT64, optional), `category` (STRING, optional), `frc` (INT64, optional)
pub fn load_records_parquet(path: &Path) -> Result<Vec<InputRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open input file {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    let mut offset = 0;
    for batch_result in reader {
        let batch = batch_result?;
        let codes = string_column(&batch, "openlr").ok_or_else(|| anyhow!("input file has no openlr column"))?;
        let geometry = detect_geometry_format(&batch);
        let id_text = string_column(&batch, "id");
        let id_int = int_column(&batch, "id");
        let category = string_column(&batch, "category");
        let frc = int_column(&batch, "frc");

        for row in 0..batch.num_rows() {
            let index = offset + row;
            let id = id_text
                .and_then(|c| c.value(row).map(str::to_string))
                .or_else(|| id_int.and_then(|c| c.value(row)).map(|v| v.to_string()));
            let Some(line) = geometry.linestring(row) else {
                warn!(index, ?id, "skipping record whose geometry is not a LineString");
                continue;
            };
            let Some(code) = codes.value(row).filter(|c| !c.trim().is_empty()) else {
                warn!(index, ?id, "skipping record without a location reference");
                continue;
            };
            records.push(InputRecord {
                index,
                id,
                code: code.to_string(),
                geometry: line,
                category: category.and_then(|c| c.value(row)).map(str::to_string),
                frc: frc.and_then(|c| c.value(row)),
            });
        }
        offset += batch.num_rows();
    }
    Ok(records)
}
