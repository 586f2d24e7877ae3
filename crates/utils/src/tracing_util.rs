//! Helpers for bootstrapping the `tracing` stack.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the process-global tracing subscriber.
///
/// The filter is read from the conventional `RUST_LOG` environment
/// variable, defaulting to `warn`. Output goes to stderr so captured
/// command output on stdout stays clean. Calling this more than once is
/// harmless; later calls are ignored.
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let format = tracing_subscriber::fmt::layer()
        .without_time()
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init();
}
