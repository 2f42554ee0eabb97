//! Purpose: Normalize the `obm_geometry` field of measurement records to WKT.
//! Exports: `GEOMETRY_FIELD`, `is_point_wkt`, `geometry_to_wkt`, `normalize_geometry`.
//! Role: Pure value rewriting used by the measurement extractor.
//! Invariants: WKT points are written `POINT(<lng> <lat>)`, longitude first.
//! Invariants: Records without the geometry field are left untouched.
use serde_json::{Map, Value};

pub const GEOMETRY_FIELD: &str = "obm_geometry";

/// `POINT ( <num> <num> )` with optional sign and decimal part and flexible spacing.
pub fn is_point_wkt(text: &str) -> bool {
    let Some(rest) = text.strip_prefix("POINT") else {
        return false;
    };
    let rest = rest.trim_start();
    let Some(inner) = rest
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    else {
        return false;
    };
    let mut coords = inner.split_whitespace();
    matches!(
        (coords.next(), coords.next(), coords.next()),
        (Some(x), Some(y), None) if is_decimal(x) && is_decimal(y)
    )
}

fn is_decimal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    all_digits(whole) && fraction.is_none_or(all_digits)
}

fn lat_lng_point(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    let lat = map.get("latitude")?;
    let lng = map.get("longitude")?;
    Some(format!("POINT({} {})", coordinate_text(lng), coordinate_text(lat)))
}

fn coordinate_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// WKT text for one geometry value.
pub fn geometry_to_wkt(value: &Value) -> String {
    if let Some(point) = lat_lng_point(value) {
        return point;
    }
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) if map.get("wktType").and_then(Value::as_str) == Some("point") => map
            .get("wktValue")
            .and_then(lat_lng_point)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

pub fn normalize_geometry(record: &mut Map<String, Value>) {
    if let Some(geometry) = record.get_mut(GEOMETRY_FIELD) {
        *geometry = Value::String(geometry_to_wkt(geometry));
    }
}
