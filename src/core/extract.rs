//! Purpose: Pull unsynced measurements of one project out of app backups as CSV tables.
//! Exports: `ExtractOptions`, `ExtractedTable`, `FileExtract`, `ExtractReport`,
//! `decode_servers`, `project_observations`, `unsynced_measurements`, `observation_tables`,
//! `extract_file`, `extract_path`.
//! Role: Walks servers -> databases -> observations -> measurements and writes one table per
//! observation.
//! Invariants: `servers` is decoded a second time when stored as JSON text.
//! Invariants: Only measurements with `isSynced` false (or numeric 0) are exported.
//! Invariants: Directory runs report failed files and continue; single-file runs fail fast.
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::backup::value_type_name;
use super::error::{Error, ErrorKind, io_error};
use super::geometry::normalize_geometry;
use super::input::{read_text, write_text};
use super::table::Table;
use crate::json::parse;

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub server_url: String,
    pub project: String,
    pub out_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedTable {
    pub observation: String,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileExtract {
    pub input: PathBuf,
    pub tables: Vec<ExtractedTable>,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractReport {
    pub files: Vec<FileExtract>,
    pub failed: Vec<PathBuf>,
}

fn malformed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Malformed).with_message(message)
}

fn field<'a>(value: &'a Value, key: &str, context: &str) -> Result<&'a Value, Error> {
    value
        .get(key)
        .ok_or_else(|| malformed(format!("backup is missing `{context}.{key}`")))
}

fn data_items<'a>(value: &'a Value, context: &str) -> Result<&'a Vec<Value>, Error> {
    let data = field(value, "data", context)?;
    data.as_array().ok_or_else(|| {
        malformed(format!(
            "`{context}.data` must be an array, found {}",
            value_type_name(data)
        ))
    })
}

/// The `servers` entry, decoded from JSON text when the backup is still raw.
pub fn decode_servers(backup: &Map<String, Value>) -> Result<Value, Error> {
    match backup.get("servers") {
        Some(Value::String(text)) => parse::from_str(text).map_err(|err| {
            malformed("backup `servers` is not valid JSON text")
                .with_key("servers")
                .with_hint(parse::hint_for_error(&err, "extract.servers"))
                .with_source(err)
        }),
        Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
        Some(other) => Err(malformed(format!(
            "backup `servers` must be JSON text or an object, found {}",
            value_type_name(other)
        ))
        .with_key("servers")),
        None => Err(malformed("backup has no `servers` entry")),
    }
}

pub fn project_observations<'a>(
    servers: &'a Value,
    server_url: &str,
    project: &str,
) -> Result<&'a Vec<Value>, Error> {
    let server = data_items(servers, "servers")?
        .iter()
        .find(|server| server.get("url").and_then(Value::as_str) == Some(server_url))
        .ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("server {server_url} is not in the backup"))
                .with_hint("Check --server-url against the app's server list.")
        })?;
    let databases = field(server, "databases", "server")?;
    let database = data_items(databases, "server.databases")?
        .iter()
        .find(|database| database.get("name").and_then(Value::as_str) == Some(project))
        .ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("project {project} is not in the backup"))
                .with_hint("Check --project against the server's project names.")
        })?;
    let observations = field(database, "observations", "project")?;
    data_items(observations, "project.observations")
}

/// Unsynced measurement records with normalized geometry; `None` when the
/// observation has no `measurements` field at all.
pub fn unsynced_measurements(observation: &Value) -> Result<Option<Vec<Map<String, Value>>>, Error> {
    let Some(measurements) = observation.get("measurements") else {
        return Ok(None);
    };
    let mut records = Vec::new();
    for measurement in data_items(measurements, "observation.measurements")? {
        if !measurement.get("isSynced").is_some_and(is_unsynced_flag) {
            continue;
        }
        if let Some(Value::Object(data)) = measurement.get("data") {
            let mut record = data.clone();
            normalize_geometry(&mut record);
            records.push(record);
        }
    }
    Ok(Some(records))
}

/// `false`, or a numeric zero written by older app versions.
fn is_unsynced_flag(flag: &Value) -> bool {
    match flag {
        Value::Bool(synced) => !synced,
        Value::Number(number) => number.as_f64() == Some(0.0),
        _ => false,
    }
}

fn observation_id(observation: &Value) -> Result<String, Error> {
    match observation.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(other) => Err(malformed(format!(
            "observation id must be a string or number, found {}",
            value_type_name(other)
        ))),
        None => Err(malformed("observation has no `id`")),
    }
}

/// One table per observation that carries measurements, keyed by observation id.
pub fn observation_tables(
    backup_text: &str,
    options: &ExtractOptions,
) -> Result<Vec<(String, Table)>, Error> {
    let backup: Value = parse::from_str(backup_text).map_err(|err| {
        malformed("backup is not valid JSON")
            .with_hint(parse::hint_for_error(&err, "extract.backup"))
            .with_source(err)
    })?;
    let Some(backup) = backup.as_object() else {
        return Err(malformed(format!(
            "backup must be a JSON object, found {}",
            value_type_name(&backup)
        )));
    };
    let servers = decode_servers(backup)?;
    let observations = project_observations(&servers, &options.server_url, &options.project)?;

    let mut tables = Vec::new();
    for (position, observation) in observations.iter().enumerate() {
        let at_position = |err: Error| err.with_position(position as u64);
        if let Some(records) = unsynced_measurements(observation).map_err(at_position)? {
            let id = observation_id(observation).map_err(at_position)?;
            tables.push((id, Table::from_records(records)));
        }
    }
    Ok(tables)
}

/// File name up to its first `.`, used as the table file prefix.
fn backup_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((prefix, _)) => prefix.to_string(),
        None => name,
    }
}

pub fn extract_file(input: &Path, options: &ExtractOptions) -> Result<FileExtract, Error> {
    let text = read_text(input)?;
    let tables = observation_tables(&text, options).map_err(|err| {
        if err.path().is_none() {
            err.with_path(input)
        } else {
            err
        }
    })?;
    fs::create_dir_all(&options.out_dir)
        .map_err(|err| io_error(err, "failed to create output directory", &options.out_dir))?;

    let prefix = backup_prefix(input);
    let mut written = Vec::with_capacity(tables.len());
    for (observation, table) in tables {
        let path = options.out_dir.join(format!("{prefix}_{observation}.csv"));
        write_text(&path, &table.to_csv())?;
        written.push(ExtractedTable {
            observation,
            path,
            rows: table.len(),
        });
    }
    Ok(FileExtract {
        input: input.to_path_buf(),
        tables: written,
    })
}

/// Extract a single backup, or every regular file of a directory in name order.
///
/// In directory mode `on_failure` receives each failed file and its error and the
/// walk continues.
pub fn extract_path<F>(
    input: &Path,
    options: &ExtractOptions,
    mut on_failure: F,
) -> Result<ExtractReport, Error>
where
    F: FnMut(&Path, &Error),
{
    let mut report = ExtractReport::default();
    if !input.is_dir() {
        report.files.push(extract_file(input, options)?);
        return Ok(report);
    }

    let entries = fs::read_dir(input)
        .map_err(|err| io_error(err, "failed to list backup directory", input))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error(err, "failed to list backup directory", input))?;
        let path = entry.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        match extract_file(&path, options) {
            Ok(file) => report.files.push(file),
            Err(err) => {
                on_failure(&path, &err);
                report.failed.push(path);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{
        ExtractOptions, backup_prefix, extract_path, observation_tables, unsynced_measurements,
    };
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};
    use std::path::{Path, PathBuf};

    const SERVER: &str = "https://openbiomaps.org/projects/demo/";

    fn options(out_dir: PathBuf) -> ExtractOptions {
        ExtractOptions {
            server_url: SERVER.to_string(),
            project: "demo".to_string(),
            out_dir,
        }
    }

    fn servers() -> Value {
        json!({
            "data": [
                {"url": "https://elsewhere.org/", "databases": {"data": []}},
                {
                    "url": SERVER,
                    "databases": {"data": [{
                        "name": "demo",
                        "observations": {"data": [
                            {
                                "id": "obs1",
                                "measurements": {"data": [
                                    {"isSynced": false, "data": {"species": "Parus major", "obm_geometry": {"latitude": 46.5, "longitude": 17.25}}},
                                    {"isSynced": true, "data": {"species": "Sitta europaea"}},
                                    {"isSynced": false, "data": {"species": "Erithacus rubecula", "count": 2}},
                                    {"isSynced": false}
                                ]}
                            },
                            {"id": 2}
                        ]}
                    }]}
                }
            ]
        })
    }

    fn raw_backup() -> String {
        let servers = serde_json::to_string(&servers()).expect("encode");
        serde_json::to_string(&json!({"servers": servers, "settings": "{}"})).expect("encode")
    }

    #[test]
    fn raw_and_normalized_backups_give_same_tables() {
        let temp = tempfile::tempdir().expect("tempdir");
        let raw = observation_tables(&raw_backup(), &options(temp.path().to_path_buf()))
            .expect("raw");
        let normalized = json!({"servers": servers()}).to_string();
        let decoded = observation_tables(&normalized, &options(temp.path().to_path_buf()))
            .expect("normalized");
        assert_eq!(raw, decoded);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].0, "obs1");
        assert_eq!(
            raw[0].1.to_csv(),
            "species,obm_geometry,count\nParus major,POINT(17.25 46.5),\nErithacus rubecula,,2\n"
        );
    }

    #[test]
    fn only_unsynced_measurements_with_data_are_kept() {
        let observation = json!({"measurements": {"data": [
            {"isSynced": false, "data": {"a": 1}},
            {"isSynced": 0, "data": {"a": 2}},
            {"data": {"a": 3}},
            {"isSynced": false, "data": null}
        ]}});
        let records = unsynced_measurements(&observation)
            .expect("measurements")
            .expect("present");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["a"], 1);
        assert_eq!(records[1]["a"], 2);

        let observation = json!({"measurements": {"data": [
            {"isSynced": 1, "data": {"a": 1}},
            {"isSynced": "false", "data": {"a": 2}},
            {"isSynced": 0.0, "data": {"a": 3}}
        ]}});
        let records = unsynced_measurements(&observation)
            .expect("measurements")
            .expect("present");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["a"], 3);

        assert!(unsynced_measurements(&json!({"id": "x"})).expect("ok").is_none());
    }

    #[test]
    fn unknown_server_or_project_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut opts = options(temp.path().to_path_buf());
        opts.server_url = "https://nowhere.org/".to_string();
        let err = observation_tables(&raw_backup(), &opts).expect_err("server");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut opts = options(temp.path().to_path_buf());
        opts.project = "other".to_string();
        let err = observation_tables(&raw_backup(), &opts).expect_err("project");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn bad_observation_reports_its_position() {
        let temp = tempfile::tempdir().expect("tempdir");
        let servers = json!({"data": [{
            "url": SERVER,
            "databases": {"data": [{
                "name": "demo",
                "observations": {"data": [
                    {"id": "ok", "measurements": {"data": []}},
                    {"id": true, "measurements": {"data": []}}
                ]}
            }]}
        }]});
        let backup = json!({"servers": servers}).to_string();
        let err = observation_tables(&backup, &options(temp.path().to_path_buf()))
            .expect_err("bad id");
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(err.position(), Some(1));
    }

    #[test]
    fn prefix_is_name_before_first_dot() {
        assert_eq!(backup_prefix(Path::new("/x/phone1.backup.txt")), "phone1");
        assert_eq!(backup_prefix(Path::new("phone2")), "phone2");
    }

    #[test]
    fn directory_mode_skips_failed_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backups = temp.path().join("backups");
        std::fs::create_dir(&backups).expect("mkdir");
        std::fs::write(backups.join("a.txt"), raw_backup()).expect("write a");
        std::fs::write(backups.join("b.txt"), "not json").expect("write b");
        let out_dir = temp.path().join("output");

        let mut failures = Vec::new();
        let report = extract_path(&backups, &options(out_dir.clone()), |path, err| {
            failures.push((path.to_path_buf(), err.kind()));
        })
        .expect("extract");

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].tables[0].rows, 2);
        assert_eq!(report.failed, [backups.join("b.txt")]);
        assert_eq!(failures, [(backups.join("b.txt"), ErrorKind::Malformed)]);
        assert!(out_dir.join("a_obs1.csv").is_file());
    }

    #[test]
    fn single_file_mode_fails_fast() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("broken.txt");
        std::fs::write(&input, "{").expect("write");
        let err = extract_path(&input, &options(temp.path().join("out")), |_, _| {})
            .expect_err("broken");
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(err.path(), Some(input.as_path()));
    }
}
