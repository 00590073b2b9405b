//! Gateway Transport Server
//!
//! Accepts controller connections over TCP and feeds decoded events into the
//! shared [`EventStore`].
//!
//! Each connection runs in its own task. A frame error ends only that
//! connection; the accept loop keeps going until shutdown.
//!
//! Image payloads are decoded before being written to the captures
//! directory. A payload that does not decode is not persisted, but the event
//! is still stored.

use chrono::Local;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::protocol::{read_event, WireEvent};
use crate::store::EventStore;
use crate::Result;

/// Server-local capture name. Two events in the same second overwrite each
/// other's file.
pub fn capture_file_name(now: chrono::DateTime<Local>) -> String {
    format!("{}.jpg", now.format("%H%M%S"))
}

/// Broadcast `signal` to every clone of the returned receiver.
///
/// If the signal cannot be installed the sender is kept alive forever, so
/// receivers wait instead of seeing a closed channel.
pub fn shutdown_watch<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Resolve once shutdown has been broadcast.
pub async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        tracing::warn!("Shutdown channel closed");
    }
}

pub struct TransportServer {
    store: Arc<EventStore>,
    captures_dir: PathBuf,
}

impl TransportServer {
    pub async fn new(store: Arc<EventStore>, captures_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&captures_dir).await?;
        Ok(Self {
            store,
            captures_dir,
        })
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn captures_dir(&self) -> &Path {
        &self.captures_dir
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Transport server listening on {}", addr);
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Transport server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "Controller connected");
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            match server.handle_connection(stream, peer).await {
                                Ok(events) => tracing::info!(%peer, events, "Controller disconnected"),
                                Err(e) if e.is_frame_error() => {
                                    tracing::warn!(%peer, error = %e, "Bad frame, connection dropped")
                                }
                                Err(e) => tracing::error!(%peer, error = %e, "Connection error"),
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                },
            }
        }
    }

    /// Read frames until the peer closes or sends something invalid.
    /// Returns the number of events ingested.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        let mut events = 0;
        while let Some(event) = read_event(&mut stream).await? {
            tracing::debug!(%peer, name = %event.name, status = %event.status, "Frame received");
            self.ingest(event).await;
            events += 1;
        }
        Ok(events)
    }

    /// Persist the capture and append the event. Returns the store id.
    pub async fn ingest(&self, event: WireEvent) -> u64 {
        let capture = self.persist_capture(&event).await;

        tracing::info!(
            name = %event.name,
            status = %event.status,
            timestamp = %event.timestamp,
            bytes = event.image.len(),
            capture = capture.as_deref().unwrap_or("-"),
            "Event stored"
        );
        self.store.append_with_capture(event, capture)
    }

    /// Write the image under its capture name once it decodes.
    async fn persist_capture(&self, event: &WireEvent) -> Option<String> {
        let payload = event.image.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&payload).map(|frame| (frame.width(), frame.height()))
        })
        .await;

        match decoded {
            Ok(Ok((width, height))) => {
                tracing::debug!(width, height, "Capture decoded");
            }
            Ok(Err(e)) => {
                tracing::warn!(name = %event.name, error = %e, "Undecodable capture, not persisted");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Capture decode task failed");
                return None;
            }
        }

        let file_name = capture_file_name(Local::now());
        let path = self.captures_dir.join(&file_name);
        match tokio::fs::write(&path, &event.image).await {
            Ok(()) => Some(file_name),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist capture");
                None
            }
        }
    }
}
