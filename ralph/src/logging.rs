//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   Not part of ralph's product output.
//!
//! - **Reports (`report`)**: iteration lines, final status and usage tables on
//!   stdout. Always printed, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or `ralph=debug`
/// when `verbose` is true. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=ralph=trace ralph run ./project --plan "add tests" -n 3
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "ralph=debug" } else { "warn" }
}
