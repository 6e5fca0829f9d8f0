//! Connectivity watcher
//!
//! A singleton background loop that keeps retrying queued mail until the
//! queue is empty. Each round it sleeps, re-reads the queue, resolves every
//! entry's destination, probes each distinct `host:port` once and flushes the
//! entries whose server answered. Only one watcher runs at a time; the
//! [`WatcherLock`] decides who.

use crate::config::SpoolConfig;
use crate::flush::{FlushOutcome, FlushReport, Flusher};
use crate::probe::Prober;
use crate::queue::{EntryId, QueueStore, WatcherLock};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Why a watcher returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    /// Another watcher holds the lock; this one did nothing
    AlreadyRunning,
    /// The queue emptied
    Drained { rounds: usize },
    /// Stopped by a signal with mail still queued
    Interrupted { rounds: usize },
}

/// What one polling round did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Probes actually issued (one per distinct destination)
    pub probes: usize,
    /// Destinations that answered, as `host:port`
    pub reachable: Vec<String>,
    /// Entries whose arguments or destination could not be worked out
    pub unresolved: Vec<EntryId>,
    pub flush: FlushReport,
}

/// Polls connectivity and flushes until the queue is empty
pub struct Watcher {
    store: QueueStore,
    flusher: Flusher,
    prober: Arc<dyn Prober>,
    transport_config: Option<PathBuf>,
    poll_interval: Duration,
    probe_timeout: Duration,
    lock_path: PathBuf,
}

impl Watcher {
    pub fn new(config: &SpoolConfig, flusher: Flusher, prober: Arc<dyn Prober>) -> Self {
        Self {
            store: flusher.store().clone(),
            flusher,
            prober,
            transport_config: config.transport_config(),
            poll_interval: config.poll_interval,
            probe_timeout: config.watch_probe_timeout,
            lock_path: config.watcher_lock.clone(),
        }
    }

    /// Run until the queue drains, stopping early on SIGTERM or SIGINT
    pub async fn run(&self) -> Result<WatcherExit> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until the queue drains or `shutdown` completes
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<WatcherExit> {
        let lock = match WatcherLock::try_acquire(&self.lock_path)? {
            Some(lock) => lock,
            None => {
                tracing::info!(lock = %self.lock_path.display(), "Watcher already running");
                return Ok(WatcherExit::AlreadyRunning);
            }
        };

        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Watcher started"
        );
        tokio::pin!(shutdown);

        let mut rounds = 0;
        let exit = loop {
            if self.store.is_empty()? {
                break WatcherExit::Drained { rounds };
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("Watcher stopping on signal");
                    break WatcherExit::Interrupted { rounds };
                }
            }

            rounds += 1;
            match self.poll_once().await {
                Ok(report) => tracing::debug!(
                    round = rounds,
                    probes = report.probes,
                    delivered = report.flush.delivered.len(),
                    "Watcher round complete"
                ),
                Err(e) => tracing::warn!(round = rounds, error = %e, "Watcher round failed"),
            }
        };

        if let WatcherExit::Drained { .. } = exit {
            tracing::info!(rounds, "Queue empty, watcher exiting");
        }
        if let Err(e) = lock.release() {
            tracing::warn!(error = %e, "Failed to release watcher lock");
        }
        Ok(exit)
    }

    /// One polling round over the current queue.
    ///
    /// Destinations are resolved afresh each round so config edits take
    /// effect; probe results are only shared within the round.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let mut report = PollReport::default();
        let mut probed: HashMap<String, bool> = HashMap::new();

        for id in self.store.list()? {
            let args = match self.store.read_args(&id) {
                Ok(args) => args,
                Err(e) if e.is_not_found() => {
                    report.flush.vanished.push(id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Cannot read entry arguments, skipping");
                    report.unresolved.push(id);
                    continue;
                }
            };

            let dest = match msmtprc::resolve(&args, self.transport_config.as_deref()) {
                Ok(dest) => dest,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Cannot resolve destination, skipping");
                    report.unresolved.push(id);
                    continue;
                }
            };

            let key = dest.key();
            let reachable = match probed.get(&key) {
                Some(reachable) => *reachable,
                None => {
                    let reachable = self
                        .prober
                        .is_reachable(&dest.host, dest.port, self.probe_timeout)
                        .await;
                    report.probes += 1;
                    if reachable {
                        report.reachable.push(key.clone());
                    }
                    probed.insert(key, reachable);
                    reachable
                }
            };

            if !reachable {
                continue;
            }

            match self.flusher.flush(&id).await {
                Ok(FlushOutcome::Delivered) => report.flush.delivered.push(id),
                Ok(FlushOutcome::Deferred) => report.flush.deferred.push(id),
                Ok(FlushOutcome::Busy) => report.flush.busy.push(id),
                Err(e) if e.is_not_found() => report.flush.vanished.push(id),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Flush failed, mail stays queued");
                    report.flush.deferred.push(id);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to set up signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
