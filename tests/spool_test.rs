//! Integration tests for spoolmail
//!
//! These tests drive the public API end to end over a real spool directory,
//! with `/bin/sh` standing in for the transport where a real process matters.

use spoolmail::commands::Spool;
use spoolmail::config::SpoolConfig;
use spoolmail::flush::{FlushOutcome, Flusher};
use spoolmail::launcher::SelfLauncher;
use spoolmail::probe::{Prober, TcpProber};
use spoolmail::queue::{QueueStore, WatcherLock};
use spoolmail::submit::{Directives, Frontend, QueueReason, SubmitOutcome, WatcherStart};
use spoolmail::transport::{CommandTransport, Transport};
use spoolmail::watcher::WatcherExit;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Appends the payload to `out`, fails for recipients containing "fail".
/// One line, since stored transport arguments cannot contain line breaks.
const SINK_SCRIPT: &str =
    r#"out="$1"; shift; for a in "$@"; do case "$a" in *fail*) exit 75;; esac; done; cat >> "$out""#;

fn sink_args(out: &Path, recipients: &[&str]) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        SINK_SCRIPT.to_string(),
        "sh".to_string(),
        out.display().to_string(),
    ];
    args.extend(recipients.iter().map(|r| r.to_string()));
    args
}

fn write_msmtprc(path: &Path, port: u16) {
    std::fs::write(
        path,
        format!(
            "defaults\nport {}\n\naccount default\nhost 127.0.0.1\n",
            port
        ),
    )
    .unwrap();
}

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

struct TestSpool {
    dir: TempDir,
    config: SpoolConfig,
}

impl TestSpool {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = SpoolConfig::new(dir.path().join("queue"))
            .with_transport("sh")
            .with_msmtprc(dir.path().join("msmtprc"))
            .with_watcher_lock(dir.path().join("watcher.lock"))
            .with_poll_interval(Duration::from_millis(20))
            .with_probe_timeouts(Duration::from_millis(500), Duration::from_millis(500));
        Self { dir, config }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn store(&self) -> QueueStore {
        QueueStore::new(&self.config.queue_dir)
    }

    fn spool(&self) -> Spool {
        Spool::from_config(self.config.clone())
    }

    fn frontend(&self) -> Frontend {
        let spool = self.spool();
        Frontend::new(
            &self.config,
            spool.flusher,
            spool.prober,
            Arc::new(SelfLauncher::with_exe("/nonexistent/spoolmail")),
        )
    }
}

#[cfg(unix)]
mod flush_tests {
    use super::*;

    #[tokio::test]
    async fn test_flush_all_delivers_two_of_three() {
        let ts = TestSpool::new();
        let out = ts.path("delivered");
        let store = ts.store();

        store.enqueue(b"one\n", &sink_args(&out, &["a@example.com"])).unwrap();
        let failing = store
            .enqueue(b"two\n", &sink_args(&out, &["fail@example.com"]))
            .unwrap();
        store.enqueue(b"three\n", &sink_args(&out, &["c@example.com"])).unwrap();

        let report = ts.spool().flusher.flush_all().await.unwrap();

        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.deferred, vec![failing.clone()]);
        assert_eq!(store.list().unwrap(), vec![failing]);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "one\nthree\n");
    }

    #[tokio::test]
    async fn test_two_flushers_one_delivery() {
        let ts = TestSpool::new();
        let out = ts.path("delivered");
        let mut args = sink_args(&out, &["a@example.com"]);
        // Hold the lock long enough for the second flusher to collide
        args[1] = format!("sleep 0.3; {}", SINK_SCRIPT);
        let id = ts.store().enqueue(b"once\n", &args).unwrap();

        // Independent handles, as two processes would have
        let first = Flusher::new(ts.store(), Arc::new(CommandTransport::new("sh")));
        let second = Flusher::new(ts.store(), Arc::new(CommandTransport::new("sh")));

        let (a, b) = tokio::join!(first.flush(&id), second.flush(&id));
        let outcomes = [a.unwrap(), b.unwrap()];

        assert!(outcomes.contains(&FlushOutcome::Delivered));
        assert!(outcomes.contains(&FlushOutcome::Busy));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "once\n");
        assert!(ts.store().is_empty().unwrap());
    }

    #[test]
    fn test_sink_args_are_storable() {
        let ts = TestSpool::new();
        let args = sink_args(&ts.path("out"), &["a@example.com"]);
        assert!(args.iter().all(|a| !a.contains(['\n', '\r'])));

        let id = ts.store().enqueue(b"x", &args).unwrap();
        assert_eq!(ts.store().read_args(&id).unwrap(), args);
    }

    #[tokio::test]
    async fn test_missing_transport_leaves_mail_queued() {
        let ts = TestSpool::new();
        let id = ts.store().enqueue(b"x", &["bob@example.com".to_string()]).unwrap();

        let transport: Arc<dyn Transport> = Arc::new(CommandTransport::new("/nonexistent/msmtp"));
        let flusher = Flusher::new(ts.store(), transport);

        assert_eq!(flusher.flush(&id).await.unwrap(), FlushOutcome::Deferred);
        assert!(ts.store().exists(&id));
    }
}

#[cfg(unix)]
mod submit_tests {
    use super::*;

    #[tokio::test]
    async fn test_reachable_submit_sends_inline() {
        let ts = TestSpool::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        write_msmtprc(&ts.path("msmtprc"), listener.local_addr().unwrap().port());
        let out = ts.path("delivered");

        let outcome = ts
            .frontend()
            .submit(b"Subject: hi\n\nbody\n", &sink_args(&out, &["bob@example.com"]), Directives::default())
            .await
            .unwrap();

        assert!(matches!(outcome, SubmitOutcome::Sent { .. }));
        assert!(ts.store().is_empty().unwrap());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "Subject: hi\n\nbody\n");
    }

    #[tokio::test]
    async fn test_unreachable_submit_then_watcher_drains() {
        let ts = TestSpool::new();
        let rc = ts.path("msmtprc");
        write_msmtprc(&rc, closed_port().await);
        let out = ts.path("delivered");

        let directives = Directives {
            no_watcher: true,
            ..Default::default()
        };
        let outcome = ts
            .frontend()
            .submit(b"later\n", &sink_args(&out, &["bob@example.com"]), directives)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SubmitOutcome::Queued {
                reason: QueueReason::Unreachable,
                watcher: WatcherStart::Suppressed,
                ..
            }
        ));
        assert_eq!(ts.store().list().unwrap(), vec![outcome.id().clone()]);
        assert!(!out.exists());

        // The server comes back somewhere else; the watcher re-reads the config
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        write_msmtprc(&rc, listener.local_addr().unwrap().port());

        let exit = ts.spool().watcher().run_until(std::future::pending()).await.unwrap();

        assert!(matches!(exit, WatcherExit::Drained { .. }));
        assert!(ts.store().is_empty().unwrap());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "later\n");
    }

    #[tokio::test]
    async fn test_second_watcher_does_nothing() {
        let ts = TestSpool::new();
        write_msmtprc(&ts.path("msmtprc"), closed_port().await);
        ts.store().enqueue(b"x", &["bob@example.com".to_string()]).unwrap();

        let _running = WatcherLock::try_acquire(&ts.config.watcher_lock).unwrap().unwrap();
        let exit = ts.spool().watcher().run_until(std::future::pending()).await.unwrap();

        assert_eq!(exit, WatcherExit::AlreadyRunning);
        assert_eq!(ts.store().list().unwrap().len(), 1);
    }
}

mod probe_tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_matches_listener_state() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = TcpProber::new();

        assert!(prober.is_reachable("127.0.0.1", port, Duration::from_secs(1)).await);
        drop(listener);
        assert!(!prober.is_reachable("127.0.0.1", port, Duration::from_secs(1)).await);
    }
}

#[cfg(unix)]
mod cli_tests {
    use super::*;
    use std::io::Write;
    use std::process::{Command, Stdio};

    fn spoolmail(ts: &TestSpool) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_spoolmail"));
        cmd.env("SPOOLMAIL_QUEUE_DIR", &ts.config.queue_dir)
            .env("SPOOLMAIL_WATCHER_LOCK", &ts.config.watcher_lock)
            .env("SPOOLMAIL_MSMTPRC", ts.path("msmtprc"))
            .env_remove("SPOOLMAIL_FORK")
            .env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn test_cli_queue_only_then_list() {
        let ts = TestSpool::new();

        let mut child = spoolmail(&ts)
            .args(["--q-queue-only", "--q-no-watcher", "-a", "work", "bob@example.com"])
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(b"Subject: From the CLI\n\nbody\n")
            .unwrap();
        assert!(child.wait().unwrap().success());

        let ids = ts.store().list().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(
            ts.store().read_args(&ids[0]).unwrap(),
            vec!["-a", "work", "bob@example.com"]
        );

        let output = spoolmail(&ts).args(["--q-mgmt", "list"]).output().unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(stdout.contains("From the CLI"));
        assert!(stdout.contains(ids[0].as_str()));
    }

    #[test]
    fn test_cli_unknown_entry_fails() {
        let ts = TestSpool::new();
        let output = spoolmail(&ts)
            .args(["--q-mgmt", "show", "2020-01-01-00.00.00-00000000"])
            .output()
            .unwrap();

        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
    }
}
