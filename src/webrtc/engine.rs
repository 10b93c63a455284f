//! Per-peer negotiation state machine
//!
//! Roles are not negotiated explicitly. A node that sees a bare envelope
//! (no description, no candidate) from a peer it is still initializing
//! becomes the offerer; a node that receives an offer answers it.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::events::{EventBus, PeerEvent};
use super::pruner::Pruner;
use super::registry::{PeerRecord, PeerRegistry, PeerState, PeerStatus};
use super::signaling::SignalingLink;
use super::transport::{
    ChannelOptions, ConnectionSpec, EventSender, Transport, TransportEvent, TransportEventKind,
};
use super::types::{Candidate, MeshConfig, PeerId, SdpKind, SessionDescription, SignalingMessage};
use crate::error::{MeshError, Result};

pub struct NegotiationEngine {
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    link: SignalingLink,
    events: Arc<EventBus>,
    transport_tx: EventSender,
    registry: PeerRegistry,
    pruner: Pruner,
}

impl NegotiationEngine {
    pub fn new(
        config: MeshConfig,
        transport: Arc<dyn Transport>,
        link: SignalingLink,
        events: Arc<EventBus>,
        transport_tx: EventSender,
    ) -> Self {
        let pruner = Pruner::new(config.peer_timeout());
        Self {
            config,
            transport,
            link,
            events,
            transport_tx,
            registry: PeerRegistry::new(),
            pruner,
        }
    }

    pub fn my_id(&self) -> &PeerId {
        self.link.my_id()
    }

    pub fn link(&self) -> &SignalingLink {
        &self.link
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn pruner(&self) -> &Pruner {
        &self.pruner
    }

    pub fn statuses(&self, now: Instant) -> Vec<PeerStatus> {
        self.registry.statuses(now)
    }

    /// Process one inbound envelope
    pub async fn handle_message(&mut self, msg: SignalingMessage, now: Instant) -> Result<()> {
        if !self.link.is_for_me(&msg) {
            return Ok(());
        }
        let peer = msg.from;
        debug!(
            "Envelope from {}: candidate={} description={}",
            peer.short(),
            msg.candidate.is_some(),
            msg.description.as_ref().map(|d| d.sdp_type.as_str()).unwrap_or("none")
        );

        self.ensure_peer(&peer, now).await?;

        if let Some(candidate) = msg.candidate {
            return self.apply_candidate(&peer, candidate).await;
        }

        match msg.description {
            None => {
                if self.registry.state(&peer) == Some(PeerState::Initializing) {
                    self.send_offer(&peer).await
                } else {
                    trace!("Bare envelope from {} ignored outside initializing", peer.short());
                    Ok(())
                }
            }
            Some(desc) => match desc.kind() {
                Some(SdpKind::Offer) => self.answer_offer(&peer, desc).await,
                Some(SdpKind::Answer) => self.apply_answer(&peer, desc).await,
                None => Err(MeshError::InvalidDescriptionType(desc.sdp_type)),
            },
        }
    }

    /// Create the record and its transport connection on first contact
    async fn ensure_peer(&mut self, peer: &PeerId, now: Instant) -> Result<()> {
        if self.registry.contains(peer) {
            return Ok(());
        }

        info!("Initializing peer {}", peer);
        let epoch = self.registry.next_epoch();
        let spec = ConnectionSpec {
            local: self.my_id().clone(),
            remote: peer.clone(),
            epoch,
            stun_server: self.config.stun_server.clone(),
            events: self.transport_tx.clone(),
        };
        let connection = self.transport.create_connection(spec).await?;
        self.registry
            .insert(PeerRecord::new(peer.clone(), epoch, connection.clone(), now));

        let options = ChannelOptions {
            label: self.config.channel_label.clone(),
            ordered: false,
            max_packet_life_time_ms: self.config.max_packet_life_time_ms,
        };
        if let Err(e) = connection.create_data_channel(&options).await {
            warn!("Failed to create data channel for {}: {}", peer.short(), e);
        }
        Ok(())
    }

    async fn apply_candidate(&mut self, peer: &PeerId, candidate: Candidate) -> Result<()> {
        let Some(record) = self.registry.get(peer) else {
            return Ok(());
        };
        debug!("Add ICE candidate for {}", peer.short());
        record.connection().add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn send_offer(&mut self, peer: &PeerId) -> Result<()> {
        let Some(record) = self.registry.get(peer) else {
            return Ok(());
        };
        let connection = record.connection();

        info!("Offer connection to {}", peer.short());
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;

        self.registry.set_state(peer, PeerState::Offering);
        self.link
            .send(&SignalingMessage::description(self.link.my_id(), peer, offer));
        Ok(())
    }

    async fn answer_offer(&mut self, peer: &PeerId, offer: SessionDescription) -> Result<()> {
        let Some(record) = self.registry.get(peer) else {
            return Ok(());
        };
        let connection = record.connection();

        info!("Received offer from {}", peer.short());
        connection.set_remote_description(offer).await?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;

        // A re-offer on an open link renegotiates without leaving Connected
        if self.registry.state(peer) != Some(PeerState::Connected) {
            self.registry.set_state(peer, PeerState::Answering);
        }
        self.link
            .send(&SignalingMessage::description(self.link.my_id(), peer, answer));
        info!("Sent answer to {}", peer.short());
        Ok(())
    }

    async fn apply_answer(&mut self, peer: &PeerId, answer: SessionDescription) -> Result<()> {
        let Some(record) = self.registry.get(peer) else {
            return Ok(());
        };
        if record.state() != PeerState::Offering {
            return Err(MeshError::UnexpectedAnswer {
                peer: peer.clone(),
                state: record.state(),
            });
        }
        record.connection().set_remote_description(answer).await?;
        info!("Applied answer from {}", peer.short());
        Ok(())
    }

    /// Process one transport notification
    pub async fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        let TransportEvent { peer, epoch, kind } = event;
        if !self.registry.is_current(&peer, epoch) {
            trace!("Dropping {} for retired connection to {}", kind.name(), peer.short());
            return;
        }

        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                self.link
                    .send(&SignalingMessage::candidate(self.link.my_id(), &peer, candidate));
            }
            TransportEventKind::ChannelOpen => {
                if self.registry.state(&peer) != Some(PeerState::Connected) {
                    self.registry.set_state(&peer, PeerState::Connected);
                    info!("Peer {} joined", peer);
                    self.events.emit(&PeerEvent::Joined(peer));
                }
            }
            TransportEventKind::ChannelClosed => {
                debug!("Data channel closed for {}", peer.short());
                self.teardown(&peer).await;
            }
            TransportEventKind::ConnectivityLost => {
                debug!("ICE closed for {}", peer.short());
                self.teardown(&peer).await;
            }
            TransportEventKind::Message(text) => match serde_json::from_str(&text) {
                Ok(payload) => {
                    self.registry.touch(&peer, now);
                    self.events.emit(&PeerEvent::Updated(peer, payload));
                }
                Err(e) => {
                    warn!("Undecodable message from {}: {}", peer.short(), e);
                }
            },
            TransportEventKind::SendChannelOpen(channel) => {
                debug!("Send channel open for {}", peer.short());
                self.registry.set_channel(&peer, Some(channel));
            }
            TransportEventKind::SendChannelClosed => {
                debug!("Send channel closed for {}", peer.short());
                self.registry.set_channel(&peer, None);
            }
        }
    }

    /// Evict a peer: close its channel and connection, then notify.
    /// Returns false if there was no record.
    pub async fn teardown(&mut self, peer: &PeerId) -> bool {
        let Some(record) = self.registry.remove(peer) else {
            return false;
        };
        info!("Closing {}", peer);
        if let Some(channel) = record.channel() {
            if let Err(e) = channel.close().await {
                debug!("Error closing channel to {}: {}", peer.short(), e);
            }
        }
        if let Err(e) = record.connection().close().await {
            debug!("Error closing connection to {}: {}", peer.short(), e);
        }
        self.events.emit(&PeerEvent::Left(peer.clone()));
        true
    }

    /// Evict every record that has gone stale at `now`
    pub async fn prune(&mut self, now: Instant) -> Vec<PeerId> {
        let stale = self.pruner.sweep(&self.registry, now);
        for peer in &stale {
            debug!("Peer {} timed out", peer.short());
            self.teardown(peer).await;
        }
        stale
    }

    /// Tear down every record
    pub async fn close_all(&mut self) {
        for peer in self.registry.ids() {
            self.teardown(&peer).await;
        }
    }

    /// Send a JSON payload to one peer over its sending channel
    pub async fn send_to(&self, peer: &PeerId, payload: &serde_json::Value) -> Result<()> {
        let record = self
            .registry
            .get(peer)
            .ok_or_else(|| MeshError::UnknownPeer(peer.clone()))?;
        let channel = record
            .channel()
            .ok_or_else(|| MeshError::ChannelNotOpen(peer.clone()))?;
        channel.send_text(serde_json::to_string(payload)?).await?;
        Ok(())
    }

    /// Send a JSON payload to every peer with an open sending channel.
    /// Returns how many sends succeeded.
    pub async fn broadcast(&self, payload: &serde_json::Value) -> Result<usize> {
        let text = serde_json::to_string(payload)?;
        let mut sent = 0;
        for (peer, channel) in self.registry.channels() {
            match channel.send_text(text.clone()).await {
                Ok(()) => sent += 1,
                Err(e) => debug!("Failed to send to {}: {}", peer.short(), e),
            }
        }
        Ok(sent)
    }
}
