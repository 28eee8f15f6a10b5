//! Structured logging bootstrap for the binary.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// The filter honors `RUST_LOG` when set, otherwise defaults to
/// `engram=info` (`engram=debug` with `verbose`). Logs go to stderr so
/// command output on stdout stays clean. Repeated initialization (tests,
/// embedding) is a no-op.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "engram=debug" } else { "engram=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
