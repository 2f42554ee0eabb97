//! Purpose: Serve the one-time secret share endpoint over HTTP.
//! Exports: `ShareConfig`, `serve`, `validate_config`.
//! Role: Axum front end over `SecretStore`; form page, store on POST, reveal-and-delete on GET.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Secret text and keys are never written to logs.
//! Notes: POST accepts urlencoded and multipart bodies so `curl -F` keeps working.

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use obmkit::api::{Error, ErrorKind, SecretStore};

const SHARE_FORM: &str = "<form method='post'>One click link generation for the following text:<br>\
<textarea name='data' rows=3 cols=45></textarea><br>\
<input type='hidden' name='code' value=''>\
<input type='submit'></form>";

#[derive(Clone, Debug)]
pub struct ShareConfig {
    pub bind: SocketAddr,
    pub store_dir: PathBuf,
    pub public_url: Option<String>,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

struct AppState {
    store: SecretStore,
    public_url: Option<String>,
    bind: SocketAddr,
}

pub async fn serve(config: ShareConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let state = Arc::new(AppState {
        store: SecretStore::open(&config.store_dir)?,
        public_url: config.public_url.clone(),
        bind: config.bind,
    });

    let app = Router::new()
        .route("/", get(reveal_or_form).post(store_secret))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(
        bind = %config.bind,
        store = %config.store_dir.display(),
        "share server listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ShareConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 65536."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if let Some(url) = &config.public_url {
        let parsed = url::Url::parse(url).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("--public-url is not a valid URL")
                .with_hint("Use an absolute URL like https://example.org/pwshare.")
                .with_source(err)
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--public-url must use http or https"));
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[derive(Debug, Deserialize)]
struct RevealQuery {
    code: Option<String>,
}

#[derive(Debug, Default)]
struct SecretForm {
    code: Option<String>,
    data: Option<String>,
}

impl SecretForm {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "code" => self.code = Some(value),
            "data" => self.data = Some(value),
            _ => {}
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn reveal_or_form(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RevealQuery>,
) -> Response {
    let Some(code) = query.code else {
        return Html(SHARE_FORM).into_response();
    };
    match state.store.take(&code) {
        Ok(Some(text)) => {
            tracing::info!(bytes = text.len(), "secret revealed and deleted");
            Html(format!("<h2>{}</h2>", escape_html(&text))).into_response()
        }
        Ok(None) => {
            tracing::info!("secret lookup missed");
            error_response(
                Error::new(ErrorKind::NotFound)
                    .with_message("no secret for this code")
                    .with_hint("The link was already opened or never existed."),
            )
        }
        Err(err) => error_response(err),
    }
}

async fn store_secret(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let form = match read_secret_form(request).await {
        Ok(form) => form,
        Err(err) => return error_response(err),
    };
    let Some(data) = form.data else {
        return error_response(
            Error::new(ErrorKind::Usage)
                .with_message("missing `data` field")
                .with_hint("Send the secret text in a form field named data."),
        );
    };
    let generated = form.code.as_deref().is_none_or(str::is_empty);
    match state.store.put(form.code.as_deref(), &data) {
        Ok(key) => {
            tracing::info!(bytes = data.len(), generated, "secret stored");
            let base = public_base(state.public_url.as_deref(), &headers, state.bind);
            text_response(format!("{}\n", share_link(&base, &key)))
        }
        Err(err) => error_response(err),
    }
}

async fn read_secret_form(request: Request) -> Result<SecretForm, Error> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));
    let mut form = SecretForm::default();

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| form_error("invalid multipart body").with_source(err))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| form_error("invalid multipart field").with_source(err))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let value = field
                .text()
                .await
                .map_err(|err| form_error("invalid multipart field").with_source(err))?;
            form.set(&name, value);
        }
    } else {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|err| form_error("unreadable form body").with_source(err))?;
        for (name, value) in url::form_urlencoded::parse(&body) {
            form.set(&name, value.into_owned());
        }
    }
    Ok(form)
}

fn form_error(message: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(message)
        .with_hint("Post `code` and `data` as form fields (urlencoded or multipart).")
}

/// Base URL for share links: `--public-url`, else the request's Host, else the bind address.
fn public_base(public_url: Option<&str>, headers: &HeaderMap, bind: SocketAddr) -> String {
    if let Some(url) = public_url {
        return url.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| bind.to_string());
    format!("http://{host}")
}

/// Reveal link for `key`; the key is form-encoded so `+`, `&`, `#` survive the round trip.
fn share_link(base: &str, key: &str) -> String {
    let code: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
    format!("{base}/?code={code}")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn text_response(body: String) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage | ErrorKind::Malformed => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Permission | ErrorKind::Io | ErrorKind::Internal => {
            tracing::warn!(error = %err, "share request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
        },
    };
    (status, Json(body)).into_response()
}
