//! Purpose: Normalize app backups whose values are JSON-encoded strings.
//! Exports: `InnerDecodePolicy`, `NormalizedBackup`, `NormalizeOptions`, `NormalizeReport`,
//! `decode_outer`, `decode_inner`, `normalize_line`, `render_pretty`, `default_output_path`,
//! `normalize_file`.
//! Role: Two-stage decode (outer object, then each value) feeding a pretty JSON writer.
//! Invariants: Output key order equals outer key order.
//! Invariants: A value that fails the inner decode is never dropped silently; the policy
//! either aborts or records the key as substituted.
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use super::error::{Error, ErrorKind};
use super::input::{read_first_line, write_text};
use crate::json::parse;

const PRETTY_INDENT: &[u8] = b"    ";

/// What to do with an outer value that does not decode as JSON text.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum InnerDecodePolicy {
    /// Abort the run and name the key.
    #[default]
    Fail,
    /// Substitute `null`.
    Null,
    /// Keep the undecoded outer value.
    Raw,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedBackup {
    pub document: Map<String, Value>,
    /// Keys whose values were replaced under `Null` or `Raw`, in outer order.
    pub substituted: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct NormalizeOptions {
    pub policy: InnerDecodePolicy,
    pub output: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct NormalizeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub keys: usize,
    pub substituted: Vec<String>,
}

pub fn decode_outer(line: &str) -> Result<Map<String, Value>, Error> {
    let value: Value = parse::from_str(line).map_err(|err| {
        Error::new(ErrorKind::Malformed)
            .with_message("backup is not valid JSON")
            .with_hint(parse::hint_for_error(&err, "backup.outer"))
            .with_source(err)
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::new(ErrorKind::Malformed)
            .with_message(format!(
                "backup must be a JSON object, found {}",
                value_type_name(&other)
            ))
            .with_hint("The first line should look like {\"key\":\"<json text>\", ...}.")),
    }
}

/// Decode one outer value. Returns the decoded value and whether it was substituted.
pub fn decode_inner(
    key: &str,
    value: Value,
    policy: InnerDecodePolicy,
) -> Result<(Value, bool), Error> {
    let failure = match &value {
        Value::String(text) => match parse::from_str::<Value>(text) {
            Ok(decoded) => return Ok((decoded, false)),
            Err(err) => Error::new(ErrorKind::Malformed)
                .with_message("backup value is not valid JSON text")
                .with_key(key)
                .with_hint(parse::hint_for_error(&err, "backup.inner"))
                .with_source(err),
        },
        other => Error::new(ErrorKind::Malformed)
            .with_message(format!(
                "backup value must be a JSON-encoded string, found {}",
                value_type_name(other)
            ))
            .with_key(key),
    };
    match policy {
        InnerDecodePolicy::Fail => {
            Err(failure.with_hint("Use --on-invalid null or --on-invalid raw to keep going."))
        }
        InnerDecodePolicy::Null => Ok((Value::Null, true)),
        InnerDecodePolicy::Raw => Ok((value, true)),
    }
}

pub fn normalize_line(line: &str, policy: InnerDecodePolicy) -> Result<NormalizedBackup, Error> {
    let outer = decode_outer(line)?;
    let mut normalized = NormalizedBackup::default();
    for (key, value) in outer {
        let (decoded, substituted) = decode_inner(&key, value, policy)?;
        if substituted {
            normalized.substituted.push(key.clone());
        }
        normalized.document.insert(key, decoded);
    }
    Ok(normalized)
}

/// Four-space indented JSON; slashes and non-ASCII stay unescaped.
pub fn render_pretty(document: &Map<String, Value>) -> Result<String, Error> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(PRETTY_INDENT));
    document.serialize(&mut serializer).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode normalized backup")
            .with_source(err)
    })?;
    String::from_utf8(buf).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("encoded backup is not UTF-8")
            .with_source(err)
    })
}

/// `<input>.json`, appended to the full input path.
pub fn default_output_path(input: &Path) -> PathBuf {
    let mut path = OsString::from(input.as_os_str());
    path.push(".json");
    PathBuf::from(path)
}

pub fn normalize_file(input: &Path, options: &NormalizeOptions) -> Result<NormalizeReport, Error> {
    let line = read_first_line(input)?;
    let normalized = normalize_line(&line, options.policy).map_err(|err| {
        if err.path().is_none() {
            err.with_path(input)
        } else {
            err
        }
    })?;
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(input));
    let rendered = render_pretty(&normalized.document)?;
    write_text(&output, &rendered)?;
    Ok(NormalizeReport {
        input: input.to_path_buf(),
        output,
        keys: normalized.document.len(),
        substituted: normalized.substituted,
    })
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::{
        InnerDecodePolicy, NormalizeOptions, decode_outer, default_output_path, normalize_file,
        normalize_line, render_pretty,
    };
    use crate::core::error::ErrorKind;
    use serde_json::{Map, Value, json};
    use std::path::Path;

    #[test]
    fn decodes_each_value_in_order() {
        let normalized =
            normalize_line(r#"{"a":"1","b":"[2,3]"}"#, InnerDecodePolicy::Fail).expect("decode");
        assert_eq!(Value::Object(normalized.document.clone()), json!({"a": 1, "b": [2, 3]}));
        let keys: Vec<&str> = normalized.document.keys().map(String::as_str).collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(normalized.substituted.is_empty());
    }

    #[test]
    fn key_order_follows_input_not_sort_order() {
        let normalized = normalize_line(
            r#"{"zeta":"1","alpha":"2","mid":"{\"y\":1,\"x\":2}"}"#,
            InnerDecodePolicy::Fail,
        )
        .expect("decode");
        let keys: Vec<&str> = normalized.document.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        let inner: Vec<&str> = normalized.document["mid"]
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(inner, ["y", "x"]);
    }

    #[test]
    fn output_round_trips_and_keeps_key_set() {
        let line = r#"{"servers":"{\"data\":[{\"url\":\"https://x.org/\"}]}","lang":"\"hu\"","n":"null"}"#;
        let normalized = normalize_line(line, InnerDecodePolicy::Fail).expect("decode");
        let rendered = render_pretty(&normalized.document).expect("render");
        let reparsed: Map<String, Value> = serde_json::from_str(&rendered).expect("reparse");
        assert_eq!(reparsed, normalized.document);

        let outer = decode_outer(line).expect("outer");
        let outer_keys: Vec<&String> = outer.keys().collect();
        let output_keys: Vec<&String> = reparsed.keys().collect();
        assert_eq!(outer_keys, output_keys);
    }

    #[test]
    fn render_uses_four_spaces_and_leaves_slashes_and_unicode() {
        let normalized = normalize_line(
            r#"{"url":"\"https://example.org/a\"","name":"\"Bán\""}"#,
            InnerDecodePolicy::Fail,
        )
        .expect("decode");
        let rendered = render_pretty(&normalized.document).expect("render");
        assert_eq!(
            rendered,
            "{\n    \"url\": \"https://example.org/a\",\n    \"name\": \"Bán\"\n}"
        );
    }

    #[test]
    fn malformed_outer_json_is_rejected() {
        let err = normalize_line(r#"{"a":"1""#, InnerDecodePolicy::Fail).expect_err("outer");
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(err.hint().unwrap_or_default().contains("backup.outer"));

        let err = normalize_line(r#"["a"]"#, InnerDecodePolicy::Fail).expect_err("array");
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn fail_policy_names_the_bad_key() {
        let err = normalize_line(r#"{"a":"1","b":"{oops"}"#, InnerDecodePolicy::Fail)
            .expect_err("inner");
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(err.key(), Some("b"));
    }

    #[test]
    fn null_policy_substitutes_and_reports() {
        let normalized = normalize_line(r#"{"a":"1","b":"{oops","c":7}"#, InnerDecodePolicy::Null)
            .expect("decode");
        assert_eq!(
            Value::Object(normalized.document),
            json!({"a": 1, "b": null, "c": null})
        );
        assert_eq!(normalized.substituted, ["b", "c"]);
    }

    #[test]
    fn raw_policy_keeps_outer_value() {
        let normalized =
            normalize_line(r#"{"a":"{oops","b":"2"}"#, InnerDecodePolicy::Raw).expect("decode");
        assert_eq!(
            Value::Object(normalized.document),
            json!({"a": "{oops", "b": 2})
        );
        assert_eq!(normalized.substituted, ["a"]);
    }

    #[test]
    fn output_path_appends_suffix() {
        assert_eq!(
            default_output_path(Path::new("/data/obm_backup.txt")),
            Path::new("/data/obm_backup.txt.json")
        );
    }

    #[test]
    fn normalize_file_writes_sibling_and_ignores_later_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("backup");
        std::fs::write(&input, "{\"a\":\"1\",\"b\":\"[2,3]\"}\nnot json at all\n").expect("write");

        let report = normalize_file(&input, &NormalizeOptions::default()).expect("normalize");
        assert_eq!(report.output, temp.path().join("backup.json"));
        assert_eq!(report.keys, 2);

        let written = std::fs::read_to_string(&report.output).expect("read");
        let value: Value = serde_json::from_str(&written).expect("json");
        assert_eq!(value, json!({"a": 1, "b": [2, 3]}));
    }

    #[test]
    fn malformed_file_error_carries_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("backup");
        std::fs::write(&input, "not json\n").expect("write");
        let err = normalize_file(&input, &NormalizeOptions::default()).expect_err("bad");
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(err.path(), Some(input.as_path()));
        assert!(!temp.path().join("backup.json").exists());
    }
}
