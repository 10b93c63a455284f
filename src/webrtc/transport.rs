//! Transport seam between the negotiation engine and the WebRTC stack
//!
//! The engine only ever talks to these traits. Callbacks from the stack are
//! turned into [`TransportEvent`]s and posted to the session loop, so no
//! transport callback ever touches peer state directly.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::types::{Candidate, PeerId, SessionDescription};

/// Sink for transport notifications
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Options for the locally created data channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub label: String,
    pub ordered: bool,
    /// Time-boxed retransmission window in milliseconds
    pub max_packet_life_time_ms: u16,
}

/// Everything a transport needs to build one peer connection
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub local: PeerId,
    pub remote: PeerId,
    /// Tag copied onto every event this connection emits
    pub epoch: u64,
    pub stun_server: String,
    pub events: EventSender,
}

impl ConnectionSpec {
    /// Post an event for this connection; a closed session loop is ignored
    pub fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent {
            peer: self.remote.clone(),
            epoch: self.epoch,
            kind,
        });
    }
}

/// Factory for peer connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn create_connection(&self, spec: ConnectionSpec) -> Result<Arc<dyn PeerConnection>>;
}

/// One negotiated connection to a remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create the channel the remote peer sends on
    async fn create_data_channel(&self, options: &ChannelOptions) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: Candidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Channel used to send application data to a peer
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Notification from a peer connection
pub struct TransportEvent {
    pub peer: PeerId,
    pub epoch: u64,
    pub kind: TransportEventKind,
}

pub enum TransportEventKind {
    /// Local ICE candidate to forward over the relay
    LocalCandidate(Candidate),
    /// Our receive channel is open
    ChannelOpen,
    /// Our receive channel closed
    ChannelClosed,
    /// Text frame on the receive channel
    Message(String),
    /// The remote-created channel opened and can be used for sending
    SendChannelOpen(Arc<dyn DataChannel>),
    SendChannelClosed,
    /// ICE reported disconnected, failed or closed
    ConnectivityLost,
}

impl TransportEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEventKind::LocalCandidate(_) => "local-candidate",
            TransportEventKind::ChannelOpen => "channel-open",
            TransportEventKind::ChannelClosed => "channel-closed",
            TransportEventKind::Message(_) => "message",
            TransportEventKind::SendChannelOpen(_) => "send-channel-open",
            TransportEventKind::SendChannelClosed => "send-channel-closed",
            TransportEventKind::ConnectivityLost => "connectivity-lost",
        }
    }
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvent")
            .field("peer", &self.peer)
            .field("epoch", &self.epoch)
            .field("kind", &self.kind.name())
            .finish()
    }
}
