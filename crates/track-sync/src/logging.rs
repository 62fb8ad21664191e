/*!
Logging setup for the track-sync binary.

With the `profiling` feature the `profiling::scope!` calls in the library are
emitted as tracing spans, so they show up in the same fmt output at `trace`
level. Without it the scopes compile to nothing.
*/

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize logging. If RUST_LOG is not set, a sensible default is used.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug,hyper_util=info,reqwest::connect=info");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }

    // Logs go to stderr; stdout is reserved for the sync summary
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    if cfg!(feature = "profiling") {
        tracing::info!("Logging initialized with profiling spans");
    } else {
        tracing::debug!("Logging initialized");
    }
}
