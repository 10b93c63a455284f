//! Error types for peermesh

use thiserror::Error;

use crate::webrtc::{PeerId, PeerState};

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Invalid session description type: {0}")]
    InvalidDescriptionType(String),

    #[error("Unexpected answer from {peer} in state {state}")]
    UnexpectedAnswer { peer: PeerId, state: PeerState },

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("No open channel to {0}")]
    ChannelNotOpen(PeerId),

    #[error("Not connected to the relay")]
    NotConnected,

    #[error("Already connected to the relay")]
    AlreadyConnected,

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;
