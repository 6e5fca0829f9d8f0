//! spoolmail - offline-capable outbound mail spooler
//!
//! spoolmail sits in front of an msmtp-compatible transport. Every message is
//! written to a spool directory before anything else happens; delivery is
//! attempted right away when the mail server answers, and otherwise a
//! single background watcher keeps retrying until the queue is empty.
//!
//! # Architecture
//!
//! - **queue**: Spool directory layout, entry ids, per-entry and watcher locks
//! - **probe**: Bounded TCP reachability checks
//! - **transport**: Runs the real transport program
//! - **flush**: Locked, single-attempt delivery of queued entries
//! - **watcher**: Singleton polling loop that drains the queue
//! - **submit**: Submission front end and `--q-*` directives
//! - **launcher**: Detached background jobs
//! - **commands**: `--q-mgmt` management commands
//!
//! Destinations are looked up in msmtp configuration by the `msmtprc` crate.

pub mod commands;
pub mod config;
pub mod error;
pub mod flush;
pub mod launcher;
pub mod logging;
pub mod probe;
pub mod queue;
pub mod submit;
pub mod transport;
pub mod watcher;

// Re-exports
pub use error::{Result, SpoolError};
