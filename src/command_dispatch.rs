//! Purpose: Hold top-level CLI command dispatch for `obmkit`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every successful command prints exactly one receipt on stdout.
//! Invariants: Non-fatal events become notices; they never change the exit code.

use std::net::SocketAddr;

use obmkit::api::{
    ExtractOptions, FormFlattenOptions, NormalizeOptions, extract_path, flatten_form_file,
    normalize_file,
};

use super::receipt_json::{
    extract_receipt_json, flatten_receipt_json, normalize_receipt_json,
};
use super::*;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "obmkit", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Normalize {
            input,
            output,
            on_invalid,
        } => {
            let options = NormalizeOptions {
                policy: on_invalid.into(),
                output,
            };
            let report = normalize_file(&input, &options)?;
            let input_label = input.display().to_string();
            for key in &report.substituted {
                let mut details = Map::new();
                details.insert("key".to_string(), json!(key));
                details.insert("policy".to_string(), json!(format!("{on_invalid:?}").to_lowercase()));
                let message = match on_invalid {
                    OnInvalidCli::Raw => format!("value for {key} kept undecoded"),
                    _ => format!("value for {key} replaced with null"),
                };
                emit_notice(
                    &notice("substituted", "normalize", &input_label, message, details),
                    color_mode,
                );
            }
            emit_json(normalize_receipt_json(&report));
            Ok(RunOutcome::ok())
        }
        Command::Flatten {
            form_id,
            input,
            out_dir,
        } => {
            let options = FormFlattenOptions { form_id, out_dir };
            let report = flatten_form_file(&input, &options)?;
            emit_json(flatten_receipt_json(
                form_id,
                &input.display().to_string(),
                &report,
            ));
            Ok(RunOutcome::ok())
        }
        Command::Extract(args) => {
            let options = ExtractOptions {
                server_url: args.server_url,
                project: args.project,
                out_dir: args.out_dir,
            };
            let report = extract_path(&args.input, &options, |path, err| {
                let mut details = Map::new();
                details.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
                details.insert("error".to_string(), json!(error_message(err)));
                emit_notice(
                    &notice(
                        "skipped",
                        "extract",
                        &path.display().to_string(),
                        "backup skipped".to_string(),
                        details,
                    ),
                    color_mode,
                );
            })?;
            emit_json(extract_receipt_json(&report));
            Ok(RunOutcome::ok())
        }
        Command::Share { command } => match command {
            ShareCommand::Serve(args) => {
                let config = share_config_from_args(args)?;
                serve::validate_config(&config)?;
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| {
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to start runtime")
                            .with_source(err)
                    })?;
                runtime.block_on(serve::serve(config))?;
                Ok(RunOutcome::ok())
            }
        },
    }
}

fn share_config_from_args(args: ShareServeArgs) -> Result<serve::ShareConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:9800.")
    })?;
    Ok(serve::ShareConfig {
        bind,
        store_dir: args.store_dir,
        public_url: args.public_url,
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
    })
}
