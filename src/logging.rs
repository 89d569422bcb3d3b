//! Logging initialization.
//!
//! Installs a `tracing_subscriber::fmt` subscriber once per process.
//! `RUST_LOG` overrides the filter from `[logging]`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

static INIT_ONCE: Once = Once::new();

/// Initialize logging. Later calls are no-ops.
///
/// Logs go to stderr so command output on stdout stays parseable.
pub fn init(config: &LoggingConfig) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        // A subscriber installed elsewhere (tests, embedding) wins.
        let _ = match config.format {
            LogFormat::Pretty => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
    });
}
