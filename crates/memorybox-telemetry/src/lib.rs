//! Structured logging setup shared by the memorybox CLI and library.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Errors that can occur while wiring up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The global subscriber was already installed by someone else.
    #[error("global tracing subscriber already set")]
    AlreadySet,
}

/// Initialize structured JSON logging with an env filter.
///
/// Controlled via `RUST_LOG`, e.g. `"info,memorybox_core=debug"`. Defaults
/// to `"info"` when unset or unparsable. Safe to call once per process;
/// a second call returns [`TelemetryError::AlreadySet`] instead of
/// panicking, so CLI subcommands that init lazily don't need to coordinate.
pub fn init_json_logging(debug: bool) -> Result<(), TelemetryError> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(|_| TelemetryError::AlreadySet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_set() {
        let first = init_json_logging(false);
        assert!(first.is_ok());
        let second = init_json_logging(false);
        assert!(matches!(second, Err(TelemetryError::AlreadySet)));
    }
}
