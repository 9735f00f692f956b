//! Logging setup for prebake embedders.
//!
//! Library crates only emit `tracing` events; this module is the one
//! place that installs a subscriber. Call it once at startup, before any
//! pipeline work.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// The filter level is determined in this order:
/// 1. `verbose`: debug level for the prebake crates
/// 2. `quiet`: errors only
/// 3. the `RUST_LOG` environment variable
/// 4. default: info level for the prebake crates
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let filter = if verbose {
        EnvFilter::new("prebake=debug,prebake_core=debug,prebake_graph=debug,prebake_record=debug")
    } else if quiet {
        EnvFilter::new("prebake=error")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("prebake=info,prebake_core=info,prebake_graph=info"))
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Initialize with a caller-built filter, for tests and embedders that
/// need precise control.
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
