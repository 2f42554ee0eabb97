//! Purpose: Shared JSON receipt serializers for CLI command results.
//! Exports: `normalize_receipt_json`, `flatten_receipt_json`, `extract_receipt_json`.
//! Role: Keep receipt envelope shapes consistent across commands and tests.
//! Invariants: Stable key names and order; each receipt is wrapped in its command name.

use obmkit::api::{ExtractReport, FileExtract, FormFlattenReport, NormalizeReport};
use serde_json::{Map, Value, json};

pub(crate) fn normalize_receipt_json(report: &NormalizeReport) -> Value {
    let mut map = Map::new();
    map.insert("input".to_string(), json!(report.input.display().to_string()));
    map.insert("output".to_string(), json!(report.output.display().to_string()));
    map.insert("keys".to_string(), json!(report.keys));
    map.insert("substituted".to_string(), json!(report.substituted));
    json!({ "normalize": Value::Object(map) })
}

pub(crate) fn flatten_receipt_json(form_id: u64, input: &str, report: &FormFlattenReport) -> Value {
    let written: Vec<Value> = report
        .written
        .iter()
        .map(|row| {
            json!({
                "position": row.position,
                "path": row.path.display().to_string(),
            })
        })
        .collect();
    let mut map = Map::new();
    map.insert("form_id".to_string(), json!(form_id));
    map.insert("input".to_string(), json!(input));
    map.insert("records".to_string(), json!(report.records));
    map.insert("written".to_string(), Value::Array(written));
    map.insert("skipped".to_string(), json!(report.skipped));
    json!({ "flatten": Value::Object(map) })
}

fn file_extract_json(file: &FileExtract) -> Value {
    let tables: Vec<Value> = file
        .tables
        .iter()
        .map(|table| {
            json!({
                "observation": table.observation,
                "path": table.path.display().to_string(),
                "rows": table.rows,
            })
        })
        .collect();
    json!({
        "input": file.input.display().to_string(),
        "tables": tables,
    })
}

pub(crate) fn extract_receipt_json(report: &ExtractReport) -> Value {
    let files: Vec<Value> = report.files.iter().map(file_extract_json).collect();
    let failed: Vec<String> = report
        .failed
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    json!({
        "extract": {
            "files": files,
            "failed": failed,
        }
    })
}
