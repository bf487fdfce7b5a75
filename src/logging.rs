//! Tracing subscriber setup for embedding applications.
//!
//! The engine itself only emits events; nothing in the pipeline depends
//! on a subscriber being installed. Hosts that want output call
//! [`init_subscriber`] once at startup.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber writing to stderr.
///
/// The filter honors `RUST_LOG` when set; otherwise `verbose` selects
/// `debug` over `info`. Calling this twice is harmless, the second call
/// is a no-op.
pub fn init_subscriber(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
