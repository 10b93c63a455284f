//! Per-peer records keyed by identifier

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::transport::{DataChannel, PeerConnection};
use super::types::PeerId;

/// Negotiation state of a live record
///
/// There is no `Closed` variant: a closed peer has no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Initializing,
    Offering,
    Answering,
    Connected,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Initializing => write!(f, "initializing"),
            PeerState::Offering => write!(f, "offering"),
            PeerState::Answering => write!(f, "answering"),
            PeerState::Connected => write!(f, "connected"),
        }
    }
}

/// State bundle for one remote peer
pub struct PeerRecord {
    peer_id: PeerId,
    epoch: u64,
    state: PeerState,
    connection: Arc<dyn PeerConnection>,
    channel: Option<Arc<dyn DataChannel>>,
    last_activity: Instant,
}

impl PeerRecord {
    /// New record in `Initializing`, with activity seeded to `now`
    pub fn new(peer_id: PeerId, epoch: u64, connection: Arc<dyn PeerConnection>, now: Instant) -> Self {
        Self {
            peer_id,
            epoch,
            state: PeerState::Initializing,
            connection,
            channel: None,
            last_activity: now,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn connection(&self) -> Arc<dyn PeerConnection> {
        self.connection.clone()
    }

    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.clone()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }
}

/// Snapshot of a record for the application
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub peer_id: PeerId,
    pub state: PeerState,
    pub has_channel: bool,
    pub idle: Duration,
}

/// Owned table of peer records
///
/// Entries are only changed through the methods below; callers never get a
/// mutable reference to a record.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
    next_epoch: u64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch for the next record to be created
    pub fn next_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    /// Insert a new record. Returns false and leaves the table untouched if
    /// the identifier already has one.
    pub fn insert(&mut self, record: PeerRecord) -> bool {
        if self.peers.contains_key(&record.peer_id) {
            return false;
        }
        self.peers.insert(record.peer_id.clone(), record);
        true
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.remove(peer_id)
    }

    pub fn state(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.peers.get(peer_id).map(|r| r.state)
    }

    /// True if `epoch` belongs to the live record for `peer_id`
    pub fn is_current(&self, peer_id: &PeerId, epoch: u64) -> bool {
        self.peers.get(peer_id).is_some_and(|r| r.epoch == epoch)
    }

    pub fn set_state(&mut self, peer_id: &PeerId, state: PeerState) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_channel(&mut self, peer_id: &PeerId, channel: Option<Arc<dyn DataChannel>>) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(record) => {
                record.channel = channel;
                true
            }
            None => false,
        }
    }

    /// Refresh last activity
    pub fn touch(&mut self, peer_id: &PeerId, now: Instant) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(record) => {
                record.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Identifiers whose last activity is at least `timeout` old
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|r| r.is_stale(now, timeout))
            .map(|r| r.peer_id.clone())
            .collect()
    }

    pub fn channels(&self) -> Vec<(PeerId, Arc<dyn DataChannel>)> {
        self.peers
            .values()
            .filter_map(|r| r.channel.clone().map(|ch| (r.peer_id.clone(), ch)))
            .collect()
    }

    pub fn statuses(&self, now: Instant) -> Vec<PeerStatus> {
        self.peers
            .values()
            .map(|r| PeerStatus {
                peer_id: r.peer_id.clone(),
                state: r.state,
                has_channel: r.channel.is_some(),
                idle: now.saturating_duration_since(r.last_activity),
            })
            .collect()
    }
}
