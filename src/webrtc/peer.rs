//! Transport binding on top of the `webrtc` crate

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::transport::{
    ChannelOptions, ConnectionSpec, DataChannel, PeerConnection, Transport, TransportEventKind,
};
use super::types::{Candidate, SdpKind, SessionDescription};

/// Creates one `RTCPeerConnection` per peer record
#[derive(Debug, Default, Clone)]
pub struct RtcTransport;

impl RtcTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for RtcTransport {
    async fn create_connection(&self, spec: ConnectionSpec) -> Result<Arc<dyn PeerConnection>> {
        Ok(Arc::new(RtcPeer::open(spec).await?))
    }
}

/// One WebRTC connection to a remote node
struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    spec: ConnectionSpec,
    receive_channel: Mutex<Option<Arc<RTCDataChannel>>>,
}

impl RtcPeer {
    async fn open(spec: ConnectionSpec) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![spec.stun_server.clone()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);
        let peer = Self {
            pc,
            spec,
            receive_channel: Mutex::new(None),
        };
        peer.setup_handlers();
        Ok(peer)
    }

    fn setup_handlers(&self) {
        // Local ICE candidates
        let spec = self.spec.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let spec = spec.clone();
                Box::pin(async move {
                    let Some(c) = candidate else {
                        return;
                    };
                    match c.to_json().map(|init| serde_json::to_value(&init)) {
                        Ok(Ok(value)) => {
                            trace!("Got ice candidate for {}", spec.remote.short());
                            spec.emit(TransportEventKind::LocalCandidate(Candidate(value)));
                        }
                        Ok(Err(e)) => debug!("Failed to encode candidate: {}", e),
                        Err(e) => debug!("Failed to convert candidate: {}", e),
                    }
                })
            }));

        // ICE connectivity
        let spec = self.spec.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                match state {
                    RTCIceConnectionState::Disconnected
                    | RTCIceConnectionState::Failed
                    | RTCIceConnectionState::Closed => {
                        info!("ICE {} for {}", state, spec.remote.short());
                        spec.emit(TransportEventKind::ConnectivityLost);
                    }
                    _ => debug!("ICE state {} for {}", state, spec.remote.short()),
                }
                Box::pin(async {})
            }));

        // The remote side's channel is the one we send on
        let spec = self.spec.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let spec = spec.clone();
                Box::pin(async move {
                    debug!("Got data channel '{}' from {}", dc.label(), spec.remote.short());

                    let open_spec = spec.clone();
                    let open_dc = dc.clone();
                    dc.on_open(Box::new(move || {
                        open_spec.emit(TransportEventKind::SendChannelOpen(Arc::new(RtcChannel(open_dc))));
                        Box::pin(async {})
                    }));

                    let close_spec = spec.clone();
                    dc.on_close(Box::new(move || {
                        close_spec.emit(TransportEventKind::SendChannelClosed);
                        Box::pin(async {})
                    }));
                })
            }));
    }
}

fn to_description(desc: &RTCSessionDescription) -> SessionDescription {
    SessionDescription {
        sdp_type: desc.sdp_type.to_string().to_lowercase(),
        sdp: desc.sdp.clone(),
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match desc.kind() {
        Some(SdpKind::Offer) => RTCSessionDescription::offer(desc.sdp)?,
        Some(SdpKind::Answer) => RTCSessionDescription::answer(desc.sdp)?,
        None => bail!("Bad SDP type {}", desc.sdp_type),
    })
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_data_channel(&self, options: &ChannelOptions) -> Result<()> {
        let init = RTCDataChannelInit {
            ordered: Some(options.ordered),
            max_packet_life_time: Some(options.max_packet_life_time_ms),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(&options.label, Some(init)).await?;

        let spec = self.spec.clone();
        dc.on_open(Box::new(move || {
            spec.emit(TransportEventKind::ChannelOpen);
            Box::pin(async {})
        }));

        let spec = self.spec.clone();
        dc.on_close(Box::new(move || {
            spec.emit(TransportEventKind::ChannelClosed);
            Box::pin(async {})
        }));

        let spec = self.spec.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => spec.emit(TransportEventKind::Message(text)),
                    Err(e) => debug!("Non UTF-8 text from {}: {}", spec.remote.short(), e),
                }
            } else {
                trace!("Ignoring {} binary bytes from {}", msg.data.len(), spec.remote.short());
            }
            Box::pin(async {})
        }));

        *self.receive_channel.lock().await = Some(dc);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(to_description(&offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(to_description(&answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Candidate) -> Result<()> {
        // Empty candidate marks end of gathering
        let Some(init) = candidate_init(&candidate.0) else {
            return Ok(());
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(dc) = self.receive_channel.lock().await.take() {
            if let Err(e) = dc.close().await {
                debug!("Error closing data channel to {}: {}", self.spec.remote.short(), e);
            }
        }
        self.pc.close().await?;
        Ok(())
    }
}

/// Parse a JSON ICE candidate; `None` for an empty candidate string
fn candidate_init(value: &serde_json::Value) -> Option<RTCIceCandidateInit> {
    let candidate_str = value
        .get("candidate")
        .and_then(|c| c.as_str())
        .unwrap_or("");
    if candidate_str.is_empty() {
        return None;
    }

    Some(RTCIceCandidateInit {
        candidate: candidate_str.to_string(),
        sdp_mid: value
            .get("sdpMid")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
        sdp_mline_index: value
            .get("sdpMLineIndex")
            .and_then(|i| i.as_u64())
            .and_then(|i| u16::try_from(i).ok()),
        username_fragment: value
            .get("usernameFragment")
            .and_then(|u| u.as_str())
            .map(|s| s.to_string()),
    })
}

/// Sending side of a data channel
struct RtcChannel(Arc<RTCDataChannel>);

#[async_trait]
impl DataChannel for RtcChannel {
    async fn send_text(&self, text: String) -> Result<()> {
        self.0.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.close().await?;
        Ok(())
    }
}
