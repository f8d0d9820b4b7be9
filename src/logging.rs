//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Applications that have no
//! subscriber of their own can install one here; `RUST_LOG` overrides the
//! default level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LEVEL: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install a human-readable subscriber. Does nothing if one is already set.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer())
        .try_init();
}

/// Install a JSON subscriber. Does nothing if one is already set.
pub fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().flatten_event(true))
        .try_init();
}
