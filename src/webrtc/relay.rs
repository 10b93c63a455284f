//! Relay pipes carrying signaling frames
//!
//! A pipe is a pair of text channels plus a close handle. Each binding
//! spawns one pump task that owns the underlying connection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

/// Closes the pump task of a pipe when dropped or closed
pub struct RelayCloser(Option<oneshot::Sender<()>>);

impl RelayCloser {
    pub fn close(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Open bidirectional connection to the relay
pub struct RelayPipe {
    /// Frames to the relay; sends never block
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Frames from the relay; `None` once the relay is gone
    pub incoming: mpsc::Receiver<String>,
    pub closer: RelayCloser,
}

/// Something that can open a relay pipe
#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    async fn open(&self) -> Result<RelayPipe>;
}

/// Relay reached over a WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    url: String,
}

impl WebSocketRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RelayConnector for WebSocketRelay {
    async fn open(&self) -> Result<RelayPipe> {
        info!("Connecting to relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to relay {}", self.url))?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::channel::<String>(100);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let url = self.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Some(text) = out_rx.recv() => {
                        trace!("-> {}: {}", url, text);
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!("Failed to write to relay {}: {}", url, e);
                            break;
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                trace!("<- {}: {}", url, text.as_str());
                                if in_tx.send(text.as_str().to_owned()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("WebSocket closed: {}", url);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error from {}: {}", url, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("Relay pump for {} stopped", url);
        });

        Ok(RelayPipe {
            outgoing: out_tx,
            incoming: in_rx,
            closer: RelayCloser(Some(close_tx)),
        })
    }
}

/// In-process relay that echoes every frame to every open pipe,
/// including the one that sent it
#[derive(Clone)]
pub struct MemoryRelay {
    hub: broadcast::Sender<String>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (hub, _) = broadcast::channel(1024);
        Self { hub }
    }

    /// Number of pipes currently attached
    pub fn listeners(&self) -> usize {
        self.hub.receiver_count()
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    async fn open(&self) -> Result<RelayPipe> {
        let hub = self.hub.clone();
        let mut frames = hub.subscribe();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::channel::<String>(100);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => break,
                    Some(text) = out_rx.recv() => {
                        let _ = hub.send(text);
                    }
                    frame = frames.recv() => {
                        match frame {
                            Ok(text) => {
                                if in_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Memory relay pipe lagged, {} frames lost", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        Ok(RelayPipe {
            outgoing: out_tx,
            incoming: in_rx,
            closer: RelayCloser(Some(close_tx)),
        })
    }
}
