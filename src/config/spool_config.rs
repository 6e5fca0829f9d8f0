//! Spool configuration loaded from the environment

use crate::{Result, SpoolError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default watcher poll interval (30 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Probe timeout on the submission path (2 seconds)
pub const SUBMIT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe timeout for watcher re-checks (10 seconds)
pub const WATCH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default transport program
pub const DEFAULT_TRANSPORT: &str = "msmtp";

/// Watcher lock file name within the spool directory
pub const WATCHER_LOCK_FILE: &str = ".watcher.lock";

/// Spool configuration
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Directory holding queued entries
    pub queue_dir: PathBuf,

    /// Optional log file, in addition to stderr
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    pub debug: bool,

    /// Transport program invoked for delivery
    pub transport: String,

    /// Transport configuration file, when not the transport's own default
    pub msmtprc: Option<PathBuf>,

    /// Deliver and watch in detached processes
    pub fork: bool,

    /// Sleep between watcher rounds
    pub poll_interval: Duration,

    /// Probe timeout at submission time
    pub submit_probe_timeout: Duration,

    /// Probe timeout inside the watcher
    pub watch_probe_timeout: Duration,

    /// File the watcher holds an exclusive lock on
    pub watcher_lock: PathBuf,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        let queue_dir = default_queue_dir();
        let watcher_lock = default_watcher_lock(&queue_dir);
        Self {
            queue_dir,
            log_file: None,
            debug: false,
            transport: DEFAULT_TRANSPORT.to_string(),
            msmtprc: None,
            fork: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            submit_probe_timeout: SUBMIT_PROBE_TIMEOUT,
            watch_probe_timeout: WATCH_PROBE_TIMEOUT,
            watcher_lock,
        }
    }
}

fn default_queue_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".spoolmail");
    path.push("queue");
    path
}

/// Inside the spool, so each spool directory gets its own watcher
fn default_watcher_lock(queue_dir: &Path) -> PathBuf {
    queue_dir.join(WATCHER_LOCK_FILE)
}

impl SpoolConfig {
    /// Create a config rooted at a spool directory
    pub fn new(queue_dir: impl Into<PathBuf>) -> Self {
        let queue_dir = queue_dir.into();
        Self {
            watcher_lock: default_watcher_lock(&queue_dir),
            queue_dir,
            ..Default::default()
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match get("SPOOLMAIL_QUEUE_DIR") {
            Some(dir) => Self::new(msmtprc::expand_home(&dir)),
            None => Self::default(),
        };

        config.log_file = get("SPOOLMAIL_LOG").map(|p| msmtprc::expand_home(&p));
        config.debug = get("SPOOLMAIL_DEBUG").is_some_and(|v| is_truthy(&v));
        config.fork = get("SPOOLMAIL_FORK").is_some_and(|v| is_truthy(&v));

        if let Some(transport) = get("SPOOLMAIL_TRANSPORT") {
            config.transport = transport;
        }
        if let Some(rc) = get("SPOOLMAIL_MSMTPRC") {
            config.msmtprc = Some(msmtprc::expand_home(&rc));
        }
        if let Some(lock) = get("SPOOLMAIL_WATCHER_LOCK") {
            config.watcher_lock = msmtprc::expand_home(&lock);
        }
        if let Some(secs) = get("SPOOLMAIL_POLL_INTERVAL") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                SpoolError::Config(format!(
                    "SPOOLMAIL_POLL_INTERVAL must be a number of seconds, got {:?}",
                    secs
                ))
            })?;
            config.poll_interval = Duration::from_secs(secs);
        }

        tracing::debug!(
            queue_dir = %config.queue_dir.display(),
            transport = %config.transport,
            fork = config.fork,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Set the transport program
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    /// Set the transport configuration file
    pub fn with_msmtprc(mut self, path: impl Into<PathBuf>) -> Self {
        self.msmtprc = Some(path.into());
        self
    }

    /// Set the watcher poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set both probe timeouts
    pub fn with_probe_timeouts(mut self, submit: Duration, watch: Duration) -> Self {
        self.submit_probe_timeout = submit;
        self.watch_probe_timeout = watch;
        self
    }

    /// Set the watcher lock file
    pub fn with_watcher_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.watcher_lock = path.into();
        self
    }

    /// Set the default detach behaviour
    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    /// Transport configuration used when an entry's args carry no `-C`
    pub fn transport_config(&self) -> Option<PathBuf> {
        self.msmtprc.clone().or_else(msmtprc::default_config_path)
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
