//! Purpose: Export the `data` mapping of form records as one small CSV file per record.
//! Exports: `FlattenedRow`, `FormFlattenOptions`, `FormFlattenReport`, `WrittenRow`,
//! `flatten_record`, `render_row_csv`, `row_file_name`, `flatten_form_records`,
//! `flatten_form_file`.
//! Role: Applies `flatten::cell_text` per field and writes quoted two-line files.
//! Invariants: File numbering uses the position among all records, including skipped ones.
//! Invariants: Files already written stay on disk if a later write fails; the error
//! carries the failing record's position.
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::backup::value_type_name;
use super::error::{Error, ErrorKind};
use super::flatten::cell_text;
use super::input::{read_first_line, write_text};
use crate::json::parse;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlattenedRow {
    pub header: Vec<String>,
    pub row: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct FormFlattenOptions {
    pub form_id: u64,
    pub out_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenRow {
    pub position: u64,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct FormFlattenReport {
    pub records: u64,
    pub written: Vec<WrittenRow>,
    pub skipped: Vec<u64>,
}

/// Header and row for a record with a usable `data` field, `None` otherwise.
///
/// `data` given as an array uses its indices as header. Null or scalar `data`
/// counts as missing.
pub fn flatten_record(record: &Value) -> Option<FlattenedRow> {
    match record.get("data")? {
        Value::Object(map) => Some(FlattenedRow {
            header: map.keys().cloned().collect(),
            row: map.values().map(cell_text).collect(),
        }),
        Value::Array(items) => Some(FlattenedRow {
            header: (0..items.len()).map(|index| index.to_string()).collect(),
            row: items.iter().map(cell_text).collect(),
        }),
        _ => None,
    }
}

/// Two lines, each `'f1','f2',...` terminated by `\n`. Field text is not escaped.
pub fn render_row_csv(row: &FlattenedRow) -> String {
    format!("{}\n{}\n", quote_line(&row.header), quote_line(&row.row))
}

fn quote_line(fields: &[String]) -> String {
    format!("'{}'", fields.join("','"))
}

pub fn row_file_name(form_id: u64, position: u64) -> String {
    format!("form_{form_id}_row_{position}.csv")
}

pub fn flatten_form_records(
    records: &[Value],
    options: &FormFlattenOptions,
) -> Result<FormFlattenReport, Error> {
    let mut report = FormFlattenReport {
        records: records.len() as u64,
        ..FormFlattenReport::default()
    };
    for (position, record) in records.iter().enumerate() {
        let position = position as u64;
        let Some(row) = flatten_record(record) else {
            report.skipped.push(position);
            continue;
        };
        let path = options
            .out_dir
            .join(row_file_name(options.form_id, position));
        write_text(&path, &render_row_csv(&row))
            .map_err(|err| err.with_position(position))?;
        report.written.push(WrittenRow { position, path });
    }
    Ok(report)
}

pub fn flatten_form_file(
    input: &Path,
    options: &FormFlattenOptions,
) -> Result<FormFlattenReport, Error> {
    let line = read_first_line(input)?;
    let value: Value = parse::from_str(&line).map_err(|err| {
        Error::new(ErrorKind::Malformed)
            .with_message("form export is not valid JSON")
            .with_path(input)
            .with_hint(parse::hint_for_error(&err, "form.records"))
            .with_source(err)
    })?;
    match value {
        Value::Array(records) => flatten_form_records(&records, options),
        other => Err(Error::new(ErrorKind::Malformed)
            .with_message(format!(
                "form export must be a JSON array, found {}",
                value_type_name(&other)
            ))
            .with_path(input)),
    }
}
