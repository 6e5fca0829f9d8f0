//! Connectivity probing
//!
//! A probe answers one question with a hard time bound: does `host:port`
//! accept a TCP connection right now? Anything other than a completed
//! connection inside the deadline counts as unreachable.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// Checks whether a destination is currently reachable
#[async_trait]
pub trait Prober: Send + Sync {
    /// Never takes longer than `limit`, never fails
    async fn is_reachable(&self, host: &str, port: u16, limit: Duration) -> bool;
}

/// TCP connect probe
///
/// Name resolution and the non-blocking connect both run under a single
/// deadline. The socket is closed before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl TcpProber {
    pub fn new() -> Self {
        Self
    }

    async fn connect(host: &str, port: u16) -> std::io::Result<()> {
        let mut last_err = None;
        for addr in lookup_host((host, port)).await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    drop(stream);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", host),
            )
        }))
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn is_reachable(&self, host: &str, port: u16, limit: Duration) -> bool {
        match timeout(limit, Self::connect(host, port)).await {
            Ok(Ok(())) => {
                tracing::debug!(host, port, "Destination reachable");
                true
            }
            Ok(Err(e)) => {
                tracing::info!(host, port, error = %e, "Destination unreachable");
                false
            }
            Err(_) => {
                tracing::info!(
                    host,
                    port,
                    timeout_ms = limit.as_millis() as u64,
                    "Destination probe timed out"
                );
                false
            }
        }
    }
}
