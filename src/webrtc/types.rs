//! Signaling types for the relay wire protocol
//!
//! Every relay frame is a single JSON object:
//! `{"ice": <candidate|false>, "sdp": <description|false>, "target": <id|false>, "uuid": <id>}`

use serde::{Deserialize, Serialize};
use std::time::Duration;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of generated node identifiers
pub const ID_LEN: usize = 16;

/// Generate a random base36 identifier for this node
pub fn generate_uuid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Node identifier, used both as relay address and as registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier; generated once per node
    pub fn generate() -> Self {
        Self(generate_uuid())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for logs
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session description kinds the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// Opaque negotiation payload produced by the transport
///
/// The `type` tag is kept as a raw string so that unknown values survive
/// decoding and can be rejected by the engine instead of the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpKind::Offer.to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpKind::Answer.to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn kind(&self) -> Option<SdpKind> {
        match self.sdp_type.as_str() {
            "offer" => Some(SdpKind::Offer),
            "answer" => Some(SdpKind::Answer),
            _ => None,
        }
    }
}

/// Opaque ICE candidate as produced by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(pub serde_json::Value);

/// Relay envelope
///
/// `to == None` is a broadcast. A message with neither candidate nor
/// description is a join announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "ice", default, with = "or_false")]
    pub candidate: Option<Candidate>,
    #[serde(rename = "sdp", default, with = "or_false")]
    pub description: Option<SessionDescription>,
    #[serde(
        rename = "target",
        default,
        serialize_with = "or_false::serialize",
        deserialize_with = "target_or_false"
    )]
    pub to: Option<PeerId>,
    #[serde(rename = "uuid")]
    pub from: PeerId,
}

impl SignalingMessage {
    pub fn join(from: &PeerId) -> Self {
        Self {
            candidate: None,
            description: None,
            to: None,
            from: from.clone(),
        }
    }

    pub fn description(from: &PeerId, to: &PeerId, description: SessionDescription) -> Self {
        Self {
            candidate: None,
            description: Some(description),
            to: Some(to.clone()),
            from: from.clone(),
        }
    }

    pub fn candidate(from: &PeerId, to: &PeerId, candidate: Candidate) -> Self {
        Self {
            candidate: Some(candidate),
            description: None,
            to: Some(to.clone()),
            from: from.clone(),
        }
    }

    pub fn is_join(&self) -> bool {
        self.candidate.is_none() && self.description.is_none()
    }

    pub fn msg_type(&self) -> &str {
        match (&self.candidate, &self.description) {
            (Some(_), _) => "candidate",
            (None, Some(desc)) => desc.sdp_type.as_str(),
            (None, None) => "join",
        }
    }
}

/// Wire encoding where `false` stands for an absent value
mod or_false {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OrFalse<T> {
        Flag(bool),
        Value(T),
    }

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        match Option::<OrFalse<T>>::deserialize(deserializer)? {
            None | Some(OrFalse::Flag(false)) => Ok(None),
            Some(OrFalse::Flag(true)) => Err(D::Error::custom("expected a value or false, got true")),
            Some(OrFalse::Value(v)) => Ok(Some(v)),
        }
    }
}

/// An empty target is a broadcast, same as `false`
fn target_or_false<'de, D>(deserializer: D) -> Result<Option<PeerId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let target: Option<PeerId> = or_false::deserialize(deserializer)?;
    Ok(target.filter(|t| !t.as_str().is_empty()))
}

/// Runtime configuration for a mesh node
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// STUN server handed to every peer connection
    pub stun_server: String,
    /// Staleness timeout in milliseconds; also the pruner period
    pub peer_timeout_ms: u64,
    /// Label of the locally created data channel
    pub channel_label: String,
    /// Retransmission window of the data channel in milliseconds
    pub max_packet_life_time_ms: u16,
}

impl MeshConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            stun_server: "stun:127.0.0.1:3478".to_string(),
            peer_timeout_ms: 1000,
            channel_label: "peermesh".to_string(),
            max_packet_life_time_ms: 33,
        }
    }
}
