//! WebRTC data channel mesh over a shared signaling relay
//!
//! Relay frames are JSON envelopes `{ice, sdp, target, uuid}` where `false`
//! marks an absent field:
//! - join: `ice` and `sdp` both false, broadcast
//! - offer / answer: `sdp` carries the session description
//! - candidate: `ice` carries an ICE candidate

mod engine;
mod events;
mod node;
mod peer;
mod pruner;
mod registry;
pub mod relay;
mod signaling;
pub mod transport;
mod types;


pub use engine::NegotiationEngine;
pub use events::{EventBus, EventName, PeerEvent};
pub use node::MeshNode;
pub use peer::RtcTransport;
pub use pruner::Pruner;
pub use registry::{PeerRecord, PeerRegistry, PeerState, PeerStatus};
pub use relay::{MemoryRelay, RelayCloser, RelayConnector, RelayPipe, WebSocketRelay};
pub use signaling::SignalingLink;
pub use transport::{
    ChannelOptions, ConnectionSpec, DataChannel, EventSender, PeerConnection, Transport,
    TransportEvent, TransportEventKind,
};
pub use types::{
    generate_uuid, Candidate, MeshConfig, PeerId, SdpKind, SessionDescription, SignalingMessage,
};
