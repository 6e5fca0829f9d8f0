//! Submission front end
//!
//! Every submitted message is written to the queue first. Only then does the
//! front end decide whether to try it now: it resolves the destination, gives
//! the server one short probe, and either flushes (inline or in a detached
//! process) or leaves the mail for the watcher. An unreachable server is
//! never a submission failure.

use crate::config::SpoolConfig;
use crate::flush::Flusher;
use crate::launcher::{BackgroundJob, Launcher};
use crate::probe::Prober;
use crate::queue::{EntryId, QueueStore};
use crate::watcher::{Watcher, WatcherExit};
use crate::{Result, SpoolError};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Wrapper-only flags mixed into the transport arguments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directives {
    /// Queue without attempting delivery
    pub queue_only: bool,
    /// Deliver and watch in detached processes.
    ///
    /// Without it the submitting process does both itself, so an
    /// unreachable server keeps the caller waiting until the queue drains
    /// (or the watcher is interrupted). Mail clients that must not block
    /// should pass `--q-fork` or set `SPOOLMAIL_FORK`.
    pub fork: bool,
    /// Never start a watcher for this submission
    pub no_watcher: bool,
}

impl Directives {
    pub const QUEUE_ONLY: &'static str = "--q-queue-only";
    pub const FORK: &'static str = "--q-fork";
    pub const NO_WATCHER: &'static str = "--q-no-watcher";

    /// Separate directives from the arguments meant for the transport.
    ///
    /// Directives are recognised anywhere in the vector and removed; the
    /// remaining arguments keep their order.
    pub fn split<I, S>(argv: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut directives = Self::default();
        let mut rest = Vec::new();

        for arg in argv {
            let arg = arg.into();
            match arg.as_str() {
                Self::QUEUE_ONLY => directives.queue_only = true,
                Self::FORK => directives.fork = true,
                Self::NO_WATCHER => directives.no_watcher = true,
                _ => rest.push(arg),
            }
        }

        (directives, rest)
    }
}

/// Convert raw process arguments, rejecting any that are not UTF-8.
///
/// Arguments are stored one per line as text, so a non-UTF-8 argument could
/// not be replayed to the transport faithfully.
pub fn utf8_args<I>(argv: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = OsString>,
{
    argv.into_iter()
        .map(|arg| {
            arg.into_string().map_err(|bad| {
                SpoolError::Config(format!("argument {:?} is not valid UTF-8", bad))
            })
        })
        .collect()
}

/// Why a submission was left queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueReason {
    /// `--q-queue-only`
    Requested,
    /// The short probe got no answer
    Unreachable,
    /// An inline flush did not deliver the new entry
    NotDelivered,
}

/// What happened about a watcher after queueing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStart {
    /// `--q-no-watcher`
    Suppressed,
    /// Watcher handed to a detached process
    Detached,
    /// Watcher ran in this process
    Inline(WatcherExit),
    /// The detached watcher could not be started; mail stays queued
    LaunchFailed,
}

/// Result of a submission; the mail is always safely queued or sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Delivered inline before returning
    Sent { id: EntryId },
    /// Delivery handed to a detached process
    Dispatched { id: EntryId },
    /// Left in the queue
    Queued {
        id: EntryId,
        reason: QueueReason,
        watcher: WatcherStart,
    },
}

impl SubmitOutcome {
    pub fn id(&self) -> &EntryId {
        match self {
            SubmitOutcome::Sent { id }
            | SubmitOutcome::Dispatched { id }
            | SubmitOutcome::Queued { id, .. } => id,
        }
    }
}

/// Accepts messages and routes them to delivery or the queue
pub struct Frontend {
    store: QueueStore,
    flusher: Flusher,
    prober: Arc<dyn Prober>,
    launcher: Arc<dyn Launcher>,
    watcher: Watcher,
    transport_config: Option<PathBuf>,
    probe_timeout: Duration,
    fork_default: bool,
}

impl Frontend {
    pub fn new(
        config: &SpoolConfig,
        flusher: Flusher,
        prober: Arc<dyn Prober>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            store: flusher.store().clone(),
            watcher: Watcher::new(config, flusher.clone(), prober.clone()),
            flusher,
            prober,
            launcher,
            transport_config: config.transport_config(),
            probe_timeout: config.submit_probe_timeout,
            fork_default: config.fork,
        }
    }

    /// Submit one message.
    ///
    /// Errors before the entry is written mean nothing was queued. A
    /// resolution error afterwards leaves the entry queued and is returned
    /// so the caller can report the broken configuration.
    pub async fn submit(&self, payload: &[u8], args: &[String], directives: Directives) -> Result<SubmitOutcome> {
        let id = self.store.enqueue(payload, args)?;
        let fork = directives.fork || self.fork_default;
        tracing::debug!(id = %id, ?directives, "Routing submission");

        if directives.queue_only {
            return self.leave_queued(id, QueueReason::Requested, directives, fork).await;
        }

        let dest = match msmtprc::resolve(args, self.transport_config.as_deref()) {
            Ok(dest) => dest,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Cannot resolve destination, mail stays queued");
                return Err(e.into());
            }
        };

        if !self
            .prober
            .is_reachable(&dest.host, dest.port, self.probe_timeout)
            .await
        {
            tracing::info!(id = %id, destination = %dest, "Server unreachable, deferring");
            return self.leave_queued(id, QueueReason::Unreachable, directives, fork).await;
        }

        if fork {
            let job = BackgroundJob::Deliver {
                watch: !directives.no_watcher,
            };
            match self.launcher.launch(job) {
                Ok(()) => return Ok(SubmitOutcome::Dispatched { id }),
                Err(e) => {
                    tracing::warn!(error = %e, "Background delivery failed to start, delivering inline");
                }
            }
        }

        let report = self.flusher.flush_all().await?;
        if report.delivered.contains(&id) {
            Ok(SubmitOutcome::Sent { id })
        } else {
            self.leave_queued(id, QueueReason::NotDelivered, directives, fork).await
        }
    }

    async fn leave_queued(
        &self,
        id: EntryId,
        reason: QueueReason,
        directives: Directives,
        fork: bool,
    ) -> Result<SubmitOutcome> {
        let watcher = if directives.no_watcher {
            WatcherStart::Suppressed
        } else if fork {
            match self.launcher.launch(BackgroundJob::Watch) {
                Ok(()) => WatcherStart::Detached,
                Err(e) => {
                    tracing::error!(error = %e, "Watcher failed to start, mail stays queued");
                    WatcherStart::LaunchFailed
                }
            }
        } else {
            tracing::info!(id = %id, "Watching the queue in the foreground until it drains");
            WatcherStart::Inline(self.watcher.run().await?)
        };

        Ok(SubmitOutcome::Queued { id, reason, watcher })
    }
}
