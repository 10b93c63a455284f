pub mod config;
pub mod error;
pub mod webrtc;

pub use config::Config;
pub use error::{MeshError, Result};
pub use webrtc::{
    EventName, MemoryRelay, MeshConfig, MeshNode, PeerEvent, PeerId, RtcTransport, WebSocketRelay,
};
