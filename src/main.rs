//! Purpose: `obmkit` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON receipts on stdout.
//! Invariants: Stdout carries only command receipts (pretty on a terminal, compact otherwise).
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod receipt_json;
mod serve;

use obmkit::api::{Error, ErrorKind, InnerDecodePolicy, to_exit_code};
use obmkit::notice::{Notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "obmkit",
    version,
    about = "Tools for OpenBioMaps app backups and one-time secret links",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Backups from the mobile app store every value as JSON text inside JSON.

Mental model:
  - `normalize` decodes a backup into readable JSON
  - `flatten` turns form records into one small CSV per record
  - `extract` pulls unsynced measurements of a project into CSV tables
  - `share serve` runs a one-time secret link endpoint
"#,
    after_help = r#"EXAMPLES
  $ obmkit normalize obm_backup.txt          # writes obm_backup.txt.json
  $ obmkit flatten 7 forms.json              # writes form_7_row_<n>.csv
  $ obmkit extract backups/ --server-url https://openbiomaps.org/projects/demo/ --project demo
  $ obmkit share serve --bind 127.0.0.1:9800

LEARN MORE
  $ obmkit <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OnInvalidCli {
    Fail,
    Null,
    Raw,
}

impl From<OnInvalidCli> for InnerDecodePolicy {
    fn from(value: OnInvalidCli) -> Self {
        match value {
            OnInvalidCli::Fail => InnerDecodePolicy::Fail,
            OnInvalidCli::Null => InnerDecodePolicy::Null,
            OnInvalidCli::Raw => InnerDecodePolicy::Raw,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Decode a backup into pretty JSON",
        long_about = r#"Decode a backup whose first line is a JSON object of JSON-encoded strings.

Each value is decoded a second time and the result is written, 4-space
indented, to <INPUT>.json next to the input."#,
        after_help = r#"EXAMPLES
  $ obmkit normalize obm_backup.txt
  $ obmkit normalize obm_backup.txt --on-invalid null
  $ obmkit normalize obm_backup.txt --output readable.json

NOTES
  - Only the first line of the input is read
  - --on-invalid fail (default) stops at the first value that is not JSON text
  - null replaces such values with null; raw keeps them undecoded"#
    )]
    Normalize {
        #[arg(help = "Backup file", value_hint = ValueHint::FilePath)]
        input: PathBuf,
        #[arg(long, help = "Output path (default: <INPUT>.json)", value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
        #[arg(
            long = "on-invalid",
            value_enum,
            default_value = "fail",
            help = "Values that are not JSON text: fail|null|raw"
        )]
        on_invalid: OnInvalidCli,
    },
    #[command(
        arg_required_else_help = true,
        about = "Write each form record's data as a two-line CSV",
        long_about = r#"Flatten the `data` mapping of every record in a JSON array.

Each record with data becomes form_<FORM_ID>_row_<N>.csv, where N is the
record's position in the array (records without data still count)."#,
        after_help = r#"EXAMPLES
  $ obmkit flatten 7 forms.json
  $ obmkit flatten 7 forms.json --out-dir exports/

NOTES
  - Fields are single-quoted and joined by ','
  - Nested values are concatenated without separators"#
    )]
    Flatten {
        #[arg(help = "Numeric form identifier")]
        form_id: u64,
        #[arg(help = "JSON array of form records", value_hint = ValueHint::FilePath)]
        input: PathBuf,
        #[arg(
            long,
            default_value = ".",
            help = "Directory for the CSV files",
            value_hint = ValueHint::DirPath
        )]
        out_dir: PathBuf,
    },
    #[command(
        arg_required_else_help = true,
        about = "Export unsynced measurements of a project as CSV",
        long_about = r#"Export measurements not yet synced to the server, one CSV per observation.

INPUT may be a backup file or a directory of backup files. Geometries are
written as WKT points."#,
        after_help = r#"EXAMPLES
  $ obmkit extract phone1.txt --server-url https://openbiomaps.org/projects/demo/ --project demo
  $ OBMKIT_PROJECT=demo obmkit extract backups/ --server-url https://openbiomaps.org/projects/demo/

NOTES
  - Output files are <OUT_DIR>/<backup name>_<observation id>.csv
  - In directory mode, unreadable backups are reported and skipped"#
    )]
    Extract(ExtractArgs),
    #[command(
        arg_required_else_help = true,
        about = "One-time secret links",
        long_about = r#"Share text through links that work exactly once."#
    )]
    Share {
        #[command(subcommand)]
        command: ShareCommand,
    },
    #[command(
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ obmkit completion bash > ~/.local/share/bash-completion/completions/obmkit
  $ obmkit completion zsh > ~/.zfunc/_obmkit"#
    )]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(help = "Backup file or directory of backups", value_hint = ValueHint::AnyPath)]
    input: PathBuf,
    #[arg(long, env = "OBMKIT_SERVER_URL", help = "Server URL as stored in the app")]
    server_url: String,
    #[arg(long, env = "OBMKIT_PROJECT", help = "Project (database) name")]
    project: String,
    #[arg(
        long,
        default_value = DEFAULT_EXTRACT_DIR,
        help = "Directory for the CSV files",
        value_hint = ValueHint::DirPath
    )]
    out_dir: PathBuf,
}

#[derive(Subcommand)]
enum ShareCommand {
    #[command(
        about = "Run the share endpoint",
        after_help = r#"EXAMPLES
  $ obmkit share serve
  $ obmkit share serve --bind 0.0.0.0:9800 --allow-non-loopback --public-url https://example.org/pwshare
  $ curl -F code= -F 'data=s3cret' http://127.0.0.1:9800/

NOTES
  - GET /?code=<key> shows the text once and deletes it
  - An empty code gets a random 16-character key"#
    )]
    Serve(ShareServeArgs),
}

#[derive(Args)]
struct ShareServeArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Bind address")]
    bind: String,
    #[arg(
        long,
        default_value = DEFAULT_STORE_DIR,
        help = "Directory holding pending secrets",
        value_hint = ValueHint::DirPath
    )]
    store_dir: PathBuf,
    #[arg(long, help = "Base URL used in share links (default: http://<Host>)")]
    public_url: Option<String>,
    #[arg(long, help = "Allow binding to non-loopback addresses")]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Maximum request body size in bytes"
    )]
    max_body_bytes: u64,
}

const DEFAULT_BIND: &str = "127.0.0.1:9800";
const DEFAULT_STORE_DIR: &str = "pwshare";
const DEFAULT_EXTRACT_DIR: &str = "output";
const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024;

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check file and directory permissions.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn notice(kind: &str, cmd: &str, input: &str, message: String, details: Map<String, Value>) -> Notice {
    Notice {
        kind: kind.to_string(),
        time: notice_time_now().unwrap_or_default(),
        cmd: cmd.to_string(),
        input: input.to_string(),
        message,
        details,
    }
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (input: {})", notice.message, notice.input);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Malformed => "malformed input".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(position) = err.position() {
        inner.insert("position".to_string(), json!(position));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(key) = err.key() {
        lines.push(format!(
            "{} {key}",
            colorize_label("key:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(position) = err.position() {
        lines.push(format!(
            "{} {position}",
            colorize_label("position:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `obmkit --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "obmkit") else {
        return "Try `obmkit --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `obmkit --help`.".to_string();
    }
    format!("Try `obmkit {} --help`.", parts.join(" "))
}
