//! Gateway transport client
//!
//! One connection attempt at startup, bounded by a timeout. Sends are
//! best-effort: without a live connection they are no-ops, and the first
//! failed or stalled write drops the connection for good. Nothing is queued
//! or replayed.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::protocol::{encode_event, WireEvent};

/// Write bound for a client built with [`TransportClient::offline`]
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame written; carries its size in bytes
    Sent(usize),
    /// No connection; the event was dropped
    Offline,
    /// Write failed or timed out; the connection is now closed
    Failed,
    /// Event could not be encoded; connection untouched
    Rejected,
}

pub struct TransportClient {
    addr: String,
    stream: Option<TcpStream>,
    send_timeout: Duration,
}

impl TransportClient {
    /// Client that never had a connection
    pub fn offline(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Single connection attempt. Failure leaves the client offline.
    /// `timeout` also bounds every later frame write.
    pub async fn connect(addr: impl Into<String>, timeout: Duration) -> Self {
        let addr = addr.into();
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Could not set TCP_NODELAY");
                }
                tracing::info!(addr = %addr, "Connected to gateway");
                Some(stream)
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %addr, error = %e, "Gateway not available");
                None
            }
            Err(_) => {
                tracing::warn!(addr = %addr, timeout = ?timeout, "Gateway connect timed out");
                None
            }
        };
        Self {
            addr,
            stream,
            send_timeout: timeout,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn send(&mut self, event: &WireEvent) -> SendOutcome {
        let send_timeout = self.send_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return SendOutcome::Offline;
        };

        let frame = match encode_event(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Event not sent");
                return SendOutcome::Rejected;
            }
        };

        // A timed-out write may leave a partial frame on the wire.
        match tokio::time::timeout(send_timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {
                tracing::info!(bytes = frame.len(), name = %event.name, "Streamed event to gateway");
                SendOutcome::Sent(frame.len())
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %self.addr, error = %e, "Stream failed, gateway link dropped");
                self.stream = None;
                SendOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    addr = %self.addr,
                    timeout = ?send_timeout,
                    "Gateway stopped reading, link dropped"
                );
                self.stream = None;
                SendOutcome::Failed
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "Gateway shutdown");
            }
            tracing::info!("Gateway connection closed");
        }
    }
}
