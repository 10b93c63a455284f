//! Application-facing mesh node
//!
//! `connect` spawns one session task that owns the registry and runs every
//! relay frame, transport event, command and prune tick to completion, one
//! at a time.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::NegotiationEngine;
use super::events::{EventBus, EventName, PeerEvent};
use super::registry::PeerStatus;
use super::relay::{RelayCloser, RelayConnector};
use super::signaling::SignalingLink;
use super::transport::{Transport, TransportEvent};
use super::types::{MeshConfig, PeerId};
use crate::error::{MeshError, Result};

enum Command {
    Send {
        peer: PeerId,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Broadcast {
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<usize>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerStatus>>,
    },
}

struct Session {
    shutdown: watch::Sender<bool>,
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

/// A participant in the mesh
pub struct MeshNode {
    my_id: PeerId,
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    relay: Arc<dyn RelayConnector>,
    events: Arc<EventBus>,
    session: Option<Session>,
}

impl MeshNode {
    /// Create a node with a freshly generated identifier
    pub fn new(config: MeshConfig, transport: Arc<dyn Transport>, relay: Arc<dyn RelayConnector>) -> Self {
        Self::with_id(PeerId::generate(), config, transport, relay)
    }

    pub fn with_id(
        my_id: PeerId,
        config: MeshConfig,
        transport: Arc<dyn Transport>,
        relay: Arc<dyn RelayConnector>,
    ) -> Self {
        Self {
            my_id,
            config,
            transport,
            relay,
            events: Arc::new(EventBus::new()),
            session: None,
        }
    }

    pub fn my_id(&self) -> &PeerId {
        &self.my_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Register the handler for `name`, replacing any previous one
    pub fn on<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        self.events.on(name, handler);
    }

    /// True while the session task is alive
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Open the relay, announce ourselves and start the session loop
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(MeshError::AlreadyConnected);
        }
        self.session = None;

        let (link, incoming, closer) = SignalingLink::connect(self.relay.as_ref(), &self.my_id)
            .await
            .map_err(|e| MeshError::Relay(format!("{:#}", e)))?;

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let engine = NegotiationEngine::new(
            self.config.clone(),
            self.transport.clone(),
            link,
            self.events.clone(),
            transport_tx,
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (commands, command_rx) = mpsc::channel(32);

        let handle = tokio::spawn(run_session(
            engine,
            incoming,
            closer,
            transport_rx,
            command_rx,
            shutdown_rx,
        ));

        self.session = Some(Session {
            shutdown,
            commands,
            handle,
        });
        Ok(())
    }

    /// Close every peer, stop pruning and close the relay
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        info!("Closing connection...");
        let _ = session.shutdown.send(true);
        if let Err(e) = session.handle.await {
            error!("Session task failed: {}", e);
        }
        Ok(())
    }

    /// Send a JSON payload to one connected peer
    pub async fn send(&self, peer: &PeerId, payload: serde_json::Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            peer: peer.clone(),
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| MeshError::NotConnected)?
    }

    /// Send a JSON payload to every peer with an open channel
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Broadcast { payload, reply }).await?;
        rx.await.map_err(|_| MeshError::NotConnected)?
    }

    /// Snapshot of all live peer records
    pub async fn peers(&self) -> Result<Vec<PeerStatus>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Peers { reply }).await?;
        rx.await.map_err(|_| MeshError::NotConnected)
    }

    async fn command(&self, cmd: Command) -> Result<()> {
        let session = self.session.as_ref().ok_or(MeshError::NotConnected)?;
        session
            .commands
            .send(cmd)
            .await
            .map_err(|_| MeshError::NotConnected)
    }
}

async fn run_session(
    mut engine: NegotiationEngine,
    mut incoming: mpsc::Receiver<String>,
    closer: RelayCloser,
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    mut command_rx: mpsc::Receiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut prune_ticker = engine.pruner().ticker();
    debug!(
        "Session for {} started, pruning after {:?} of silence",
        engine.my_id().short(),
        engine.pruner().timeout()
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Mesh node {} shutting down", engine.my_id().short());
                    break;
                }
            }
            frame = incoming.recv() => {
                let Some(frame) = frame else {
                    warn!("Relay connection closed");
                    break;
                };
                if let Some(msg) = engine.link().accept(&frame) {
                    let from = msg.from.clone();
                    let msg_type = msg.msg_type().to_string();
                    if let Err(e) = engine.handle_message(msg, Instant::now()).await {
                        warn!("Error handling {} from {}: {}", msg_type, from.short(), e);
                    }
                }
            }
            Some(event) = transport_rx.recv() => {
                engine.handle_transport_event(event, Instant::now()).await;
            }
            Some(cmd) = command_rx.recv() => {
                handle_command(&engine, cmd).await;
            }
            _ = prune_ticker.tick() => {
                let evicted = engine.prune(Instant::now()).await;
                if !evicted.is_empty() {
                    debug!("Pruned {} stale peers", evicted.len());
                }
            }
        }
    }

    engine.close_all().await;
    closer.close();
}

async fn handle_command(engine: &NegotiationEngine, cmd: Command) {
    match cmd {
        Command::Send {
            peer,
            payload,
            reply,
        } => {
            let _ = reply.send(engine.send_to(&peer, &payload).await);
        }
        Command::Broadcast { payload, reply } => {
            let _ = reply.send(engine.broadcast(&payload).await);
        }
        Command::Peers { reply } => {
            let _ = reply.send(engine.statuses(Instant::now()));
        }
    }
}
