//! Signaling link to the shared relay
//!
//! Owns the outgoing half of the relay pipe, encodes envelopes and filters
//! inbound frames that are our own echoes or addressed to someone else.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::relay::{RelayCloser, RelayConnector, RelayPipe};
use super::types::{PeerId, SignalingMessage};

/// Sending side of the relay connection plus this node's identity
#[derive(Clone)]
pub struct SignalingLink {
    my_id: PeerId,
    outgoing: mpsc::UnboundedSender<String>,
}

impl SignalingLink {
    pub fn new(my_id: PeerId, outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self { my_id, outgoing }
    }

    /// Open the relay and announce ourselves.
    ///
    /// Returns the link, the inbound frame stream and the pipe's close handle.
    pub async fn connect(
        relay: &dyn RelayConnector,
        my_id: &PeerId,
    ) -> Result<(Self, mpsc::Receiver<String>, RelayCloser)> {
        let RelayPipe {
            outgoing,
            incoming,
            closer,
        } = relay.open().await?;

        let link = Self::new(my_id.clone(), outgoing);
        link.announce();
        info!("Joined relay as {}", my_id);

        Ok((link, incoming, closer))
    }

    pub fn my_id(&self) -> &PeerId {
        &self.my_id
    }

    /// Broadcast a join announcement
    pub fn announce(&self) -> bool {
        self.send(&SignalingMessage::join(&self.my_id))
    }

    /// Encode and send one envelope. Failures are logged, never retried.
    pub fn send(&self, msg: &SignalingMessage) -> bool {
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} envelope: {}", msg.msg_type(), e);
                return false;
            }
        };
        match self.outgoing.send(text) {
            Ok(()) => {
                debug!(
                    "Sent {} to {}",
                    msg.msg_type(),
                    msg.to.as_ref().map(|t| t.short()).unwrap_or("*")
                );
                true
            }
            Err(_) => {
                debug!("Relay gone, dropped {} envelope", msg.msg_type());
                false
            }
        }
    }

    /// True unless the envelope is our own echo or targeted at another node
    pub fn is_for_me(&self, msg: &SignalingMessage) -> bool {
        if msg.from == self.my_id {
            return false;
        }
        match &msg.to {
            Some(target) => *target == self.my_id,
            None => true,
        }
    }

    /// Decode a relay frame, dropping anything not meant for this node
    pub fn accept(&self, frame: &str) -> Option<SignalingMessage> {
        let msg: SignalingMessage = match serde_json::from_str(frame) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Ignoring undecodable relay frame: {}", e);
                return None;
            }
        };
        if !self.is_for_me(&msg) {
            trace!("Filtered {} from {}", msg.msg_type(), msg.from.short());
            return None;
        }
        Some(msg)
    }
}
