//! Logging bootstrap.
//!
//! One `tracing-subscriber` registry with environment-based filtering.
//! `RUST_LOG` always wins; otherwise the configured `debug` flag decides
//! the default directive. Safe to call more than once.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes logging for a server process.
pub fn init(debug: bool) {
    if LOGGING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init(false);
        init(true);
    }
}
