//! Console tracing setup and span-field conventions for GEPA runs.
//!
//! The engine emits `gepa.*` spans and discrete events (`gepa.engine.accepted`,
//! `gepa.engine.rejected`, `gepa.proposer.candidate`, `gepa.memory.updated`)
//! no matter which subscriber is installed; [`init_tracing`] is a convenience
//! for binaries and examples that want a run narrated to stderr without
//! wiring their own subscriber.

use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Fallback filter when `RUST_LOG` is unset: the engine's acceptance,
/// rejection, and completion events, without per-strategy debug noise.
const DEFAULT_FILTER: &str = "gepa_rs=info";

/// Instruction texts and LM responses recorded on spans are clipped to this
/// many characters, so a runaway reflection prompt cannot flood the trace
/// output.
pub const SPAN_TEXT_LIMIT: usize = 120;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid tracing filter directive `{directive}`")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global tracing subscriber is already installed")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs a process-global subscriber tuned for watching an optimization
/// run: compact single-line output, engine events at `info`, strategy and
/// proposer detail available by raising `RUST_LOG` (e.g.
/// `RUST_LOG=gepa_rs=debug`).
///
/// Idempotent: repeated calls are no-ops after the first successful init.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    init_tracing_with(DEFAULT_FILTER)
}

/// Like [`init_tracing`], with an explicit fallback filter used when
/// `RUST_LOG` is unset or invalid.
pub fn init_tracing_with(fallback: &str) -> Result<(), TelemetryInitError> {
    if TRACING_INITIALIZED.get().is_some() {
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
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    let _ = TRACING_INITIALIZED.set(());
    Ok(())
}

/// Clips `value` to the span-field convention ([`SPAN_TEXT_LIMIT`] chars),
/// cutting on a character boundary.
pub fn span_text(value: &str) -> &str {
    match value.char_indices().nth(SPAN_TEXT_LIMIT) {
        Some((cutoff, _)) => &value[..cutoff],
        None => value,
    }
}
