//! Tracing subscriber setup for the `commentlens` binary.

use crate::error::AppError;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const SERVICE_NAME: &str = "commentlens";
const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// With `json` set, events are emitted as bunyan JSON lines; otherwise as a
/// compact human format. Both go to stderr so stdout stays clean for reports.
pub fn init(json: bool) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|e| AppError::Config(format!("Invalid log filter: {}", e)))?;

    let (storage, bunyan, compact) = if json {
        (
            Some(JsonStorageLayer),
            Some(BunyanFormattingLayer::new(SERVICE_NAME.to_string(), std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            None,
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false).compact()),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(storage)
        .with(bunyan)
        .with(compact)
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to install tracing subscriber: {}", e)))
}
