//! Flush orchestration
//!
//! One flush is one delivery attempt for one entry, made while holding that
//! entry's lock. Losing the lock race, an unreachable server and a failing
//! transport all leave the entry queued for a later attempt; none of them is
//! an error.

use crate::queue::{EntryId, EntryLock, QueueStore};
use crate::transport::{Delivery, Transport};
use crate::{Result, SpoolError};
use serde::Serialize;
use std::io;
use std::sync::Arc;

/// Result of a single flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Transport succeeded and the entry was removed
    Delivered,
    /// Transport failed or could not run; entry left queued
    Deferred,
    /// Another sender holds the entry lock; nothing was done
    Busy,
}

/// Tally of a batch flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub delivered: Vec<EntryId>,
    pub deferred: Vec<EntryId>,
    pub busy: Vec<EntryId>,
    /// Listed but gone by the time we got to it
    pub vanished: Vec<EntryId>,
}

impl FlushReport {
    fn record(&mut self, id: &EntryId, outcome: FlushOutcome) {
        let bucket = match outcome {
            FlushOutcome::Delivered => &mut self.delivered,
            FlushOutcome::Deferred => &mut self.deferred,
            FlushOutcome::Busy => &mut self.busy,
        };
        bucket.push(id.clone());
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: FlushReport) {
        self.delivered.extend(other.delivered);
        self.deferred.extend(other.deferred);
        self.busy.extend(other.busy);
        self.vanished.extend(other.vanished);
    }

    /// Number of entries attempted
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.deferred.len() + self.busy.len()
    }
}

/// Delivers queued entries through a transport
#[derive(Clone)]
pub struct Flusher {
    store: QueueStore,
    transport: Arc<dyn Transport>,
}

impl Flusher {
    pub fn new(store: QueueStore, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Attempt delivery of one entry.
    ///
    /// `EntryNotFound` if either file is missing, including when a concurrent
    /// sender delivered it between the existence check and the lock.
    pub async fn flush(&self, id: &EntryId) -> Result<FlushOutcome> {
        if !self.store.exists(id) {
            return Err(SpoolError::EntryNotFound(id.clone()));
        }

        let lock = match EntryLock::try_acquire(self.store.args_path(id)) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::info!(id = %id, "Entry locked by another sender, skipping");
                return Ok(FlushOutcome::Busy);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SpoolError::EntryNotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let args = self.store.read_args(id)?;
        let payload = self.store.read_payload(id)?;

        let outcome = match self.transport.deliver(&args, &payload).await {
            Ok(Delivery::Sent) => match self.store.delete_entry(id) {
                Ok(()) => {
                    tracing::info!(id = %id, "Mail sent");
                    FlushOutcome::Delivered
                }
                Err(e) if e.is_not_found() => FlushOutcome::Delivered,
                Err(e) => return Err(e),
            },
            Ok(Delivery::Rejected { code }) => {
                tracing::info!(id = %id, exit_code = ?code, "Transport failed, mail stays queued");
                FlushOutcome::Deferred
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Transport could not run, mail stays queued");
                FlushOutcome::Deferred
            }
        };

        if let Err(e) = lock.release() {
            tracing::warn!(id = %id, error = %e, "Failed to release entry lock");
        }
        Ok(outcome)
    }

    /// Flush the given ids in order, tolerating entries that vanish
    pub async fn flush_ids(&self, ids: &[EntryId]) -> FlushReport {
        let mut report = FlushReport::default();
        for id in ids {
            match self.flush(id).await {
                Ok(outcome) => report.record(id, outcome),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(id = %id, "Entry vanished before flush");
                    report.vanished.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Flush failed, mail stays queued");
                    report.deferred.push(id.clone());
                }
            }
        }
        report
    }

    /// Flush everything currently queued, oldest first
    pub async fn flush_all(&self) -> Result<FlushReport> {
        let ids = self.store.list()?;
        let report = self.flush_ids(&ids).await;
        tracing::info!(
            delivered = report.delivered.len(),
            deferred = report.deferred.len(),
            busy = report.busy.len(),
            "Queue flushed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Counts calls; fails for any recipient containing "fail", optionally
    /// stalls to widen race windows
    #[derive(Default)]
    struct FakeTransport {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn deliver(&self, args: &[String], _payload: &[u8]) -> std::result::Result<Delivery, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if args.iter().any(|a| a.contains("fail")) {
                Ok(Delivery::Rejected { code: Some(75) })
            } else {
                Ok(Delivery::Sent)
            }
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl Transport for BrokenTransport {
        async fn deliver(&self, _args: &[String], _payload: &[u8]) -> std::result::Result<Delivery, TransportError> {
            Err(TransportError::Spawn {
                program: "msmtp".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "not installed"),
            })
        }
    }

    fn create_test_flusher(transport: Arc<dyn Transport>) -> (Flusher, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::new(temp_dir.path().join("queue"));
        (Flusher::new(store, transport), temp_dir)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_flush_delivers_and_removes() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport.clone());
        let id = flusher.store().enqueue(b"x", &args(&["ok@example.com"])).unwrap();

        let outcome = flusher.flush(&id).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Delivered);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(!flusher.store().payload_path(&id).exists());
        assert!(!flusher.store().args_path(&id).exists());
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_entry() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport);
        let id = flusher.store().enqueue(b"x", &args(&["fail@example.com"])).unwrap();

        let outcome = flusher.flush(&id).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Deferred);
        assert!(flusher.store().exists(&id));

        // Lock was released: a second attempt runs again
        assert_eq!(flusher.flush(&id).await.unwrap(), FlushOutcome::Deferred);
    }

    #[tokio::test]
    async fn test_flush_spawn_error_keeps_entry() {
        let (flusher, _dir) = create_test_flusher(Arc::new(BrokenTransport));
        let id = flusher.store().enqueue(b"x", &[]).unwrap();

        assert_eq!(flusher.flush(&id).await.unwrap(), FlushOutcome::Deferred);
        assert!(flusher.store().exists(&id));
        assert!(EntryLock::try_acquire(flusher.store().args_path(&id)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_flush_missing_is_not_found_twice() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport.clone());
        let id = flusher.store().enqueue(b"x", &[]).unwrap();

        assert_eq!(flusher.flush(&id).await.unwrap(), FlushOutcome::Delivered);
        assert!(matches!(flusher.flush(&id).await, Err(SpoolError::EntryNotFound(_))));
        assert!(matches!(flusher.flush(&id).await, Err(SpoolError::EntryNotFound(_))));

        let never = EntryId::from("2020-01-01-00.00.00-deadbeef");
        assert!(matches!(flusher.flush(&never).await, Err(SpoolError::EntryNotFound(_))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_orphaned_args_is_not_found() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport.clone());
        let id = flusher.store().enqueue(b"x", &[]).unwrap();
        std::fs::remove_file(flusher.store().payload_path(&id)).unwrap();

        assert!(matches!(flusher.flush(&id).await, Err(SpoolError::EntryNotFound(_))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flush_locked_entry_is_busy() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport.clone());
        let id = flusher.store().enqueue(b"x", &[]).unwrap();

        let _held = EntryLock::try_acquire(flusher.store().args_path(&id)).unwrap().unwrap();
        assert_eq!(flusher.flush(&id).await.unwrap(), FlushOutcome::Busy);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(flusher.store().exists(&id));
    }

    #[tokio::test]
    async fn test_concurrent_flush_single_invocation() {
        let transport = Arc::new(FakeTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let (flusher, _dir) = create_test_flusher(transport.clone());
        let id = flusher.store().enqueue(b"x", &[]).unwrap();

        let (a, b) = tokio::join!(flusher.flush(&id), flusher.flush(&id));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == FlushOutcome::Busy);

        assert_eq!(outcomes, vec![FlushOutcome::Delivered, FlushOutcome::Busy]);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_all_partial_failure() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport.clone());
        let store = flusher.store();
        store.enqueue(b"1", &args(&["a@example.com"])).unwrap();
        let failing = store.enqueue(b"2", &args(&["fail@example.com"])).unwrap();
        store.enqueue(b"3", &args(&["c@example.com"])).unwrap();

        let report = flusher.flush_all().await.unwrap();
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.deferred, vec![failing.clone()]);
        assert_eq!(report.attempted(), 3);
        assert_eq!(store.list().unwrap(), vec![failing]);
    }

    #[tokio::test]
    async fn test_flush_ids_records_vanished() {
        let transport = Arc::new(FakeTransport::default());
        let (flusher, _dir) = create_test_flusher(transport);
        let id = flusher.store().enqueue(b"x", &[]).unwrap();
        let gone = EntryId::from("2020-01-01-00.00.00-00000000");

        let report = flusher.flush_ids(&[gone.clone(), id.clone()]).await;
        assert_eq!(report.vanished, vec![gone]);
        assert_eq!(report.delivered, vec![id]);
    }
}
