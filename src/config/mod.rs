//! Configuration
//!
//! Everything a spool process needs to know is gathered once into a
//! [`SpoolConfig`] and handed to each component at construction.
//!
//! Values come from the environment:
//! - `SPOOLMAIL_QUEUE_DIR` - spool directory (default `~/.spoolmail/queue`)
//! - `SPOOLMAIL_LOG` - optional log file
//! - `SPOOLMAIL_DEBUG` - debug verbosity
//! - `SPOOLMAIL_TRANSPORT` - transport program (default `msmtp`)
//! - `SPOOLMAIL_MSMTPRC` - transport configuration file
//! - `SPOOLMAIL_FORK` - deliver and watch in detached processes by default
//! - `SPOOLMAIL_POLL_INTERVAL` - watcher poll interval in seconds
//! - `SPOOLMAIL_WATCHER_LOCK` - file locked by the running watcher (default
//!   `.watcher.lock` in the spool directory)

mod spool_config;

pub use spool_config::{
    SpoolConfig, DEFAULT_POLL_INTERVAL, DEFAULT_TRANSPORT, SUBMIT_PROBE_TIMEOUT,
    WATCHER_LOCK_FILE, WATCH_PROBE_TIMEOUT,
};
