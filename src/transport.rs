//! Mail transport capability
//!
//! Delivery is delegated to an external program that takes the stored
//! arguments, reads the message on stdin and reports success through its exit
//! status. The [`Transport`] trait lets tests swap the program for a fake.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors from running the transport program
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stream message to {program}: {source}")]
    Stream {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a delivery attempt ended, when the program ran at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Zero exit status
    Sent,
    /// Non-zero exit, or killed by a signal (`code` is `None`)
    Rejected { code: Option<i32> },
}

impl From<ExitStatus> for Delivery {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Delivery::Sent
        } else {
            Delivery::Rejected {
                code: status.code(),
            }
        }
    }
}

/// Hands a message to whatever actually delivers it
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, args: &[String], payload: &[u8]) -> Result<Delivery, TransportError>;
}

/// Runs an msmtp-compatible program: `[program, ...args]`, payload on stdin
#[derive(Debug, Clone)]
pub struct CommandTransport {
    program: String,
}

impl CommandTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The program being run
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Transport for CommandTransport {
    async fn deliver(&self, args: &[String], payload: &[u8]) -> Result<Delivery, TransportError> {
        tracing::debug!(program = %self.program, args = ?args, "Starting transport");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Close stdin before waiting, and reap the child even if streaming
        // failed (the program may exit early without reading everything)
        let streamed = match child.stdin.take() {
            Some(mut stdin) => {
                let result = stdin.write_all(payload).await;
                let result = match result {
                    Ok(()) => stdin.shutdown().await,
                    Err(e) => Err(e),
                };
                drop(stdin);
                result
            }
            None => Ok(()),
        };

        let status = child.wait().await.map_err(|source| TransportError::Wait {
            program: self.program.clone(),
            source,
        })?;

        match streamed {
            Ok(()) => {}
            // The program stopped reading and exited; its status decides
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(program = %self.program, "Transport closed stdin early");
            }
            Err(source) => {
                return Err(TransportError::Stream {
                    program: self.program.clone(),
                    source,
                })
            }
        }

        Ok(Delivery::from(status))
    }
}
