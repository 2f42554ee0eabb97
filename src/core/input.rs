//! Purpose: Whole-file reads and writes for the file-based commands.
//! Exports: `read_text`, `first_line`, `read_first_line`, `write_text`.
//! Role: Keep I/O error mapping in one place so commands report paths consistently.
//! Invariants: Only the first line of line-oriented inputs is significant.
//! Invariants: Inputs must be UTF-8; anything else is `Malformed`, not `Io`.
use std::fs;
use std::path::Path;

use super::error::{Error, ErrorKind, io_error};

pub fn read_text(path: &Path) -> Result<String, Error> {
    let bytes = fs::read(path).map_err(|err| {
        let mapped = io_error(err, "failed to read input", path);
        if mapped.kind() == ErrorKind::NotFound {
            mapped.with_hint("Check the input path.")
        } else {
            mapped
        }
    })?;
    String::from_utf8(bytes).map_err(|err| {
        Error::new(ErrorKind::Malformed)
            .with_message("input is not valid UTF-8")
            .with_path(path)
            .with_source(err)
    })
}

/// First line of `text` without its terminator; `None` when there is no line at all.
pub fn first_line(text: &str) -> Option<&str> {
    if text.is_empty() {
        return None;
    }
    let line = text.split('\n').next().unwrap_or_default();
    Some(line.strip_suffix('\r').unwrap_or(line))
}

pub fn read_first_line(path: &Path) -> Result<String, Error> {
    let text = read_text(path)?;
    match first_line(&text) {
        Some(line) if !line.trim().is_empty() => Ok(line.to_string()),
        _ => Err(Error::new(ErrorKind::Malformed)
            .with_message("input has no JSON on its first line")
            .with_path(path)
            .with_hint("The first line of the file must hold the JSON document.")),
    }
}

pub fn write_text(path: &Path, contents: &str) -> Result<(), Error> {
    fs::write(path, contents).map_err(|err| {
        let mapped = io_error(err, "failed to write output", path);
        // A missing parent directory is a write failure, not a missing input.
        if mapped.kind() == ErrorKind::NotFound {
            Error::new(ErrorKind::Io)
                .with_message("failed to write output (parent directory missing)")
                .with_path(path)
        } else {
            mapped
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{first_line, read_first_line, read_text, write_text};
    use crate::core::error::ErrorKind;

    #[test]
    fn first_line_strips_terminators() {
        assert_eq!(first_line("{}\nrest"), Some("{}"));
        assert_eq!(first_line("{}\r\nrest"), Some("{}"));
        assert_eq!(first_line("{}"), Some("{}"));
        assert_eq!(first_line("\n{}"), Some(""));
        assert_eq!(first_line(""), None);
    }

    #[test]
    fn missing_input_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_text(&temp.path().join("nope.txt")).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.hint().is_some());
    }

    #[test]
    fn blank_first_line_is_malformed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("blank.txt");
        std::fs::write(&path, "\n{\"a\":\"1\"}\n").expect("write");
        let err = read_first_line(&path).expect_err("blank");
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn non_utf8_input_is_malformed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bin.txt");
        std::fs::write(&path, [0xff, b'{', b'}']).expect("write");
        let err = read_text(&path).expect_err("utf8");
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn write_into_missing_directory_is_io() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = write_text(&temp.path().join("no/such/dir/out.json"), "{}").expect_err("write");
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
