//! Response-shape sniffing and record extraction.
//!
//! The incident API has answered with three document shapes over time:
//!
//! - a GeoJSON `FeatureCollection`
//! - an object wrapping either of the others under `data`
//! - a bare array of features (or of flat property objects)
//!
//! [`sniff`] picks the shape, [`parse_document`] turns every element into an
//! [`IncidentRecord`]. Nothing outside this module looks at raw JSON.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::coerce::{first_text, to_count, to_f64, to_i64, to_text};
use crate::error::{Error, Result};
use crate::types::{Coordinates, IncidentRecord, ResourceCounts, ResourceKind};

const ID_KEYS: &[&str] = &["id", "globalId", "globalid", "ogc_fid", "ogcId", "uid"];
const AREA_KEYS: &[&str] = &["concelho", "municipio", "county", "municipality"];
const DISTRICT_KEYS: &[&str] = &["district", "distrito"];
const REGION_KEYS: &[&str] = &["regiao", "region"];
const SUB_REGION_KEYS: &[&str] = &["sub_regiao", "subRegiao", "sub_region"];
const PARISH_KEYS: &[&str] = &["freguesia", "parish"];
const NATURE_KEYS: &[&str] = &["natureza", "type", "tipo"];
const NATURE_CODE_KEYS: &[&str] = &["naturezaCode", "natureza_code", "natureCode"];
const STATUS_KEYS: &[&str] = &["status", "phase", "estado"];
const STATUS_CODE_KEYS: &[&str] = &["statusCode", "status_code"];

/// Naive timestamp layouts seen upstream, read as UTC.
const NAIVE_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M"];

/// Document shape recognized in a feed response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedShape<'a> {
    /// `{"type": "FeatureCollection", "features": [...]}`
    FeatureCollection(&'a [Value]),
    /// `{"data": <collection or array>}`
    Wrapped(&'a [Value]),
    /// `[...]`
    Array(&'a [Value]),
}

impl<'a> FeedShape<'a> {
    pub fn items(&self) -> &'a [Value] {
        match self {
            FeedShape::FeatureCollection(items)
            | FeedShape::Wrapped(items)
            | FeedShape::Array(items) => items,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedShape::FeatureCollection(_) => "feature_collection",
            FeedShape::Wrapped(_) => "wrapped",
            FeedShape::Array(_) => "array",
        }
    }
}

/// Features of a typed collection object, or `None` if `map` has no `type`.
///
/// A collection without `features` is a valid empty result.
fn collection_items(map: &Map<String, Value>) -> Option<&[Value]> {
    let typed = map
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty());
    if !typed {
        return None;
    }
    Some(
        map.get("features")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    )
}

/// Identify the document shape, trying collection, wrapper, then array.
pub fn sniff(value: &Value) -> Option<FeedShape<'_>> {
    match value {
        Value::Array(items) => Some(FeedShape::Array(items)),
        Value::Object(map) => {
            if let Some(items) = collection_items(map) {
                return Some(FeedShape::FeatureCollection(items));
            }
            match map.get("data")? {
                Value::Array(items) => Some(FeedShape::Wrapped(items)),
                Value::Object(inner) => collection_items(inner).map(FeedShape::Wrapped),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Parse a raw response body into incident records.
///
/// An empty collection is a valid, empty result. A body that is not JSON or
/// has none of the known shapes is a feed error.
pub fn parse_document(body: &[u8]) -> Result<Vec<IncidentRecord>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Feed(format!("invalid JSON in feed response: {}", e)))?;

    let shape = sniff(&value).ok_or_else(|| Error::Feed("unknown response shape".to_string()))?;
    let records: Vec<IncidentRecord> = shape.items().iter().filter_map(parse_feature).collect();

    tracing::debug!(
        shape = shape.as_str(),
        items = shape.items().len(),
        records = records.len(),
        "Parsed feed document"
    );

    Ok(records)
}

/// Convert one feature (or flat property object) into a record.
///
/// Returns `None` only for elements that are not objects. Missing or
/// malformed attributes become absent fields.
pub fn parse_feature(item: &Value) -> Option<IncidentRecord> {
    let object = item.as_object()?;
    let props = match object.get("properties") {
        Some(Value::Object(props)) => props,
        _ => object,
    };

    let mut resources = ResourceCounts::default();
    for kind in ResourceKind::ALL {
        resources.set(kind, to_count(props.get(kind.feed_key())));
    }

    let coordinates = object
        .get("geometry")
        .and_then(geometry_point)
        .or_else(|| property_point(props));

    Some(IncidentRecord {
        id: feature_id(props),
        area_name: first_text(props, AREA_KEYS),
        district: first_text(props, DISTRICT_KEYS),
        region: first_text(props, REGION_KEYS),
        sub_region: first_text(props, SUB_REGION_KEYS),
        parish: first_text(props, PARISH_KEYS),
        nature: first_text(props, NATURE_KEYS),
        nature_code: first_text(props, NATURE_CODE_KEYS),
        status: first_text(props, STATUS_KEYS),
        status_code: STATUS_CODE_KEYS
            .iter()
            .find_map(|k| props.get(*k).and_then(to_i64)),
        resources,
        annotation: props.get("extra").and_then(to_text),
        coordinates,
        created_at: props.get("dateTime").and_then(parse_timestamp),
        updated_at: props.get("updated").and_then(parse_timestamp),
    })
}

/// Incident ID: first non-empty string or non-zero number among the ID keys.
fn feature_id(props: &Map<String, Value>) -> Option<String> {
    ID_KEYS.iter().find_map(|k| match props.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => (u != 0).then(|| u.to_string()),
            (None, Some(i)) => Some(i.to_string()),
            (None, None) => n
                .as_f64()
                .filter(|f| *f != 0.0 && f.is_finite())
                .map(|f| format!("{:.0}", f)),
        },
        _ => None,
    })
}

/// GeoJSON point: `coordinates = [lon, lat]`.
fn geometry_point(geometry: &Value) -> Option<Coordinates> {
    let coords = geometry.get("coordinates")?.as_array()?;
    let lon = to_f64(coords.first()?)?;
    let lat = to_f64(coords.get(1)?)?;
    Some(Coordinates { lat, lon })
}

/// Flat `lat` / `lng` (or `lon`) properties, as in the non-GeoJSON API.
fn property_point(props: &Map<String, Value>) -> Option<Coordinates> {
    let lat = to_f64(props.get("lat")?)?;
    let lon = props
        .get("lng")
        .or_else(|| props.get("lon"))
        .and_then(to_f64)?;
    Some(Coordinates { lat, lon })
}

/// Read a timestamp in any of the encodings the feed uses.
///
/// Accepts RFC 3339 strings, a couple of naive layouts (taken as UTC),
/// epoch seconds, and `{"sec": n}` objects. Anything else is `None`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            NAIVE_LAYOUTS
                .iter()
                .find_map(|layout| NaiveDateTime::parse_from_str(s, layout).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(_) => epoch_seconds(value),
        Value::Object(map) => map.get("sec").and_then(epoch_seconds),
        _ => None,
    }
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = to_i64(value).filter(|s| *s > 0)?;
    Utc.timestamp_opt(secs, 0).single()
}
