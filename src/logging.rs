//! Logging configuration using tracing
//!
//! Log lines go to stderr and, when `SPOOLMAIL_LOG` names a file, are also
//! appended there without ANSI colour. Detached jobs run with stderr closed,
//! so the file is the only place their activity shows up.

use crate::config::SpoolConfig;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber
///
/// `RUST_LOG` overrides both outputs. Otherwise stderr shows warnings only
/// (mail clients treat chatter on stderr as failure) and the log file gets
/// `info`. With `SPOOLMAIL_DEBUG` set both drop to `debug`.
///
/// # Errors
/// Returns an error if the log file cannot be opened or the subscriber has
/// already been initialized
pub fn init(config: &SpoolConfig) -> crate::Result<()> {
    let (stderr_level, file_level) = if config.debug {
        ("debug", "debug")
    } else {
        ("warn", "info")
    };

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Arc::new(file))
                    .with_filter(filter(file_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter(stderr_level)),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::SpoolError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init(&SpoolConfig::default());
}
