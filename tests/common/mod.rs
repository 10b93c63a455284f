//! Shared helpers for mesh integration tests
//!
//! `LoopbackTransport` stands in for the WebRTC stack: two endpoints that
//! have both applied a local and a remote description are considered
//! connected, and data channel sends are delivered straight to the other
//! endpoint's event sink.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use peermesh::webrtc::{
    ChannelOptions, ConnectionSpec, DataChannel, PeerConnection, RelayConnector, RelayPipe,
    Transport, TransportEventKind,
};
use peermesh::{EventName, MeshConfig, MeshNode, MemoryRelay, PeerEvent, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Key = (PeerId, PeerId);

#[derive(Default)]
struct Network {
    endpoints: Mutex<HashMap<Key, Arc<Endpoint>>>,
}

struct Endpoint {
    spec: ConnectionSpec,
    has_local: AtomicBool,
    has_remote: AtomicBool,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl Endpoint {
    fn negotiated(&self) -> bool {
        self.has_local.load(Ordering::SeqCst) && self.has_remote.load(Ordering::SeqCst)
    }

    fn key(&self) -> Key {
        (self.spec.local.clone(), self.spec.remote.clone())
    }
}

impl Network {
    fn lookup(&self, key: &Key) -> Option<Arc<Endpoint>> {
        self.endpoints.lock().unwrap().get(key).cloned()
    }

    /// Open both sides once both have finished offer/answer
    fn try_open(&self, endpoint: &Arc<Endpoint>) {
        let Some(other) = self.lookup(&(endpoint.spec.remote.clone(), endpoint.spec.local.clone()))
        else {
            return;
        };
        if !endpoint.negotiated() || !other.negotiated() {
            return;
        }
        if endpoint.opened.swap(true, Ordering::SeqCst) || other.opened.swap(true, Ordering::SeqCst) {
            return;
        }
        // Sending side first so a peer is writable by the time it is reported joined
        for (side, peer) in [(endpoint, &other), (&other, endpoint)] {
            side.spec
                .emit(TransportEventKind::SendChannelOpen(Arc::new(LoopbackChannel {
                    target: peer.clone(),
                })));
            side.spec.emit(TransportEventKind::ChannelOpen);
        }
    }

    fn close(&self, endpoint: &Arc<Endpoint>) {
        if endpoint.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let key = endpoint.key();
        {
            let mut endpoints = self.endpoints.lock().unwrap();
            if endpoints.get(&key).is_some_and(|e| Arc::ptr_eq(e, endpoint)) {
                endpoints.remove(&key);
            }
        }
        if !endpoint.opened.load(Ordering::SeqCst) {
            return;
        }
        if let Some(other) = self.lookup(&(key.1, key.0)) {
            if other.opened.load(Ordering::SeqCst) && !other.closed.load(Ordering::SeqCst) {
                other.spec.emit(TransportEventKind::ChannelClosed);
            }
        }
    }
}

/// In-process transport shared by every node of one test
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    network: Arc<Network>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn create_connection(&self, spec: ConnectionSpec) -> Result<Arc<dyn PeerConnection>> {
        let endpoint = Arc::new(Endpoint {
            spec,
            has_local: AtomicBool::new(false),
            has_remote: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.network
            .endpoints
            .lock()
            .unwrap()
            .insert(endpoint.key(), endpoint.clone());
        Ok(Arc::new(LoopbackConnection {
            network: self.network.clone(),
            endpoint,
        }))
    }
}

struct LoopbackConnection {
    network: Arc<Network>,
    endpoint: Arc<Endpoint>,
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_data_channel(&self, _options: &ChannelOptions) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<peermesh::webrtc::SessionDescription> {
        Ok(peermesh::webrtc::SessionDescription::offer(format!(
            "loopback-offer-{}",
            self.endpoint.spec.local
        )))
    }

    async fn create_answer(&self) -> Result<peermesh::webrtc::SessionDescription> {
        Ok(peermesh::webrtc::SessionDescription::answer(format!(
            "loopback-answer-{}",
            self.endpoint.spec.local
        )))
    }

    async fn set_local_description(&self, _desc: peermesh::webrtc::SessionDescription) -> Result<()> {
        self.endpoint.has_local.store(true, Ordering::SeqCst);
        self.network.try_open(&self.endpoint);
        Ok(())
    }

    async fn set_remote_description(&self, _desc: peermesh::webrtc::SessionDescription) -> Result<()> {
        self.endpoint.has_remote.store(true, Ordering::SeqCst);
        self.network.try_open(&self.endpoint);
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: peermesh::webrtc::Candidate) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.network.close(&self.endpoint);
        Ok(())
    }
}

struct LoopbackChannel {
    target: Arc<Endpoint>,
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        if self.target.closed.load(Ordering::SeqCst) {
            anyhow::bail!("channel closed");
        }
        self.target.spec.emit(TransportEventKind::Message(text));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Relay whose open pipes can be cut from the test, as if the server went away
#[derive(Clone)]
pub struct KillableRelay {
    inner: MemoryRelay,
    kills: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
}

impl KillableRelay {
    pub fn new(inner: &MemoryRelay) -> Self {
        Self {
            inner: inner.clone(),
            kills: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// End the incoming stream of every pipe opened so far
    pub fn kill(&self) {
        for kill in self.kills.lock().unwrap().drain(..) {
            let _ = kill.send(());
        }
    }
}

#[async_trait]
impl RelayConnector for KillableRelay {
    async fn open(&self) -> Result<RelayPipe> {
        let RelayPipe {
            outgoing,
            mut incoming,
            closer,
        } = self.inner.open().await?;
        let (tx, rx) = mpsc::channel(100);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        self.kills.lock().unwrap().push(kill_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut kill_rx => break,
                    frame = incoming.recv() => match frame {
                        Some(frame) => {
                            if tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(RelayPipe {
            outgoing,
            incoming: rx,
            closer,
        })
    }
}

/// Node config with a timeout long enough that idle peers survive a test
pub fn test_config() -> MeshConfig {
    MeshConfig {
        peer_timeout_ms: 30_000,
        ..Default::default()
    }
}

/// Node whose peer events are forwarded to the returned receiver
pub fn spawn_node(
    id: &str,
    config: MeshConfig,
    transport: &LoopbackTransport,
    relay: &MemoryRelay,
) -> (MeshNode, mpsc::UnboundedReceiver<PeerEvent>) {
    spawn_node_on(id, config, transport, Arc::new(relay.clone()))
}

/// Same as [`spawn_node`] over any relay
pub fn spawn_node_on(
    id: &str,
    config: MeshConfig,
    transport: &LoopbackTransport,
    relay: Arc<dyn RelayConnector>,
) -> (MeshNode, mpsc::UnboundedReceiver<PeerEvent>) {
    let node = MeshNode::with_id(PeerId::from(id), config, Arc::new(transport.clone()), relay);
    let (tx, rx) = mpsc::unbounded_channel();
    for name in [EventName::PeerJoined, EventName::PeerLeft, EventName::PeerUpdated] {
        let tx = tx.clone();
        node.on(name, move |event: &PeerEvent| {
            let _ = tx.send(event.clone());
        });
    }
    (node, rx)
}

/// Wait for the next event, failing the test after five seconds
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for peer event")
        .expect("event channel closed")
}

/// Poll until the node's session task has stopped
pub async fn wait_disconnected(node: &MeshNode) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while node.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session did not stop");
}
