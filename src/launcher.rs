//! Detached background jobs
//!
//! Fork mode hands delivery and watching to a separate process so the
//! submitting program gets control back at once. The job is this same binary
//! re-run in management mode, in its own process group with stdio detached,
//! so it outlives the caller and never holds the caller's terminal or pipes.

use crate::commands::MGMT_FLAG;
use crate::{Result, SpoolError};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Work a detached process can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundJob {
    /// Flush the whole queue, then watch if anything is left and `watch` is set
    Deliver { watch: bool },
    /// Run the watcher
    Watch,
}

impl BackgroundJob {
    /// Management arguments that perform this job
    pub fn args(&self) -> Vec<&'static str> {
        match self {
            BackgroundJob::Deliver { watch: true } => vec![MGMT_FLAG, "flush", "--all", "--watch"],
            BackgroundJob::Deliver { watch: false } => vec![MGMT_FLAG, "flush", "--all"],
            BackgroundJob::Watch => vec![MGMT_FLAG, "watch"],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BackgroundJob::Deliver { .. } => "delivery",
            BackgroundJob::Watch => "watcher",
        }
    }
}

/// Starts background jobs without waiting for them
pub trait Launcher: Send + Sync {
    fn launch(&self, job: BackgroundJob) -> Result<()>;
}

/// Launches jobs by re-running an executable, normally the current one
#[derive(Debug, Clone)]
pub struct SelfLauncher {
    exe: PathBuf,
}

impl SelfLauncher {
    /// Launcher for the running binary
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|source| SpoolError::Launch {
            job: "process",
            source,
        })?;
        Ok(Self { exe })
    }

    pub fn with_exe(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }
}

impl Launcher for SelfLauncher {
    fn launch(&self, job: BackgroundJob) -> Result<()> {
        let mut command = Command::new(&self.exe);
        command
            .args(job.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|source| SpoolError::Launch {
            job: job.name(),
            source,
        })?;
        tracing::info!(pid = child.id(), job = job.name(), "Background job started");
        Ok(())
    }
}
