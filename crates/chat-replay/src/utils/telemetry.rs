use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const DEFAULT_FILTER: &str = "chat_replay=debug";
static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid tracing filter directive `{directive}`: {source}")]
    InvalidFilter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs a process-global subscriber for chat-replay spans and events,
/// filtered by `RUST_LOG` or `chat_replay=debug`.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    init_tracing_with(DEFAULT_FILTER)
}

/// Like [`init_tracing`], with `fallback` used when `RUST_LOG` is unset or invalid.
///
/// Output goes to stderr. Closing spans are reported, which shows how long each
/// cache build and producer call took. Calls after the first successful one do
/// nothing.
pub fn init_tracing_with(fallback: &str) -> Result<(), TelemetryInitError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(fallback).map_err(|source| {
            TelemetryInitError::InvalidFilter {
                directive: fallback.to_string(),
                source,
            }
        })?,
    };

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(());
    Ok(())
}

/// Longest prefix of `value` with at most `max_chars` characters.
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((cutoff, _)) => &value[..cutoff],
        None => value,
    }
}
