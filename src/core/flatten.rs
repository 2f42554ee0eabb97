//! Purpose: Turn nested JSON values into the flat text used in form CSV cells.
//! Exports: `flatten`, `cell_text`, `scalar_text`.
//! Role: Pure string rendering; no I/O.
//! Invariants: Separators go between siblings of the outermost level only; nested
//! levels concatenate their leaves. Existing exports depend on this exact output.
//! Invariants: Scalars render the way the legacy form export printed them.
use serde_json::Value;

/// Join `values` depth-first, left to right.
///
/// The separator is written after every sibling except the last. Nested arrays and
/// objects recurse without a separator, so `[a, [b, c], d]` joined by `,` yields
/// `a,bc,d`.
pub fn flatten<'a, I>(separator: &str, values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
    I::IntoIter: ExactSizeIterator,
{
    let values = values.into_iter();
    let last = values.len().saturating_sub(1);
    let mut out = String::new();
    for (index, item) in values.enumerate() {
        match item {
            Value::Array(items) => out.push_str(&flatten("", items)),
            Value::Object(map) => out.push_str(&flatten("", map.values())),
            scalar => out.push_str(&scalar_text(scalar)),
        }
        if index != last {
            out.push_str(separator);
        }
    }
    out
}

/// Text of one `data` field: scalars as-is, nested values flattened.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Array(items) => flatten("", items),
        Value::Object(map) => flatten("", map.values()),
        scalar => scalar_text(scalar),
    }
}

pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(false) => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::String(text) => text.clone(),
        Value::Number(number) => {
            if number.is_f64() {
                number.as_f64().map(float_text).unwrap_or_else(|| number.to_string())
            } else {
                number.to_string()
            }
        }
        // Not reached for scalars; keep the text stable anyway.
        nested => cell_text(nested),
    }
}

// Integral floats print without a fraction (1.0 -> "1").
fn float_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
