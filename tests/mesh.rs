//! Mesh behaviour over an in-process relay and loopback transport

mod common;

use common::{
    next_event, spawn_node, spawn_node_on, test_config, wait_disconnected, KillableRelay,
    LoopbackTransport,
};
use peermesh::webrtc::PeerState;
use peermesh::{MemoryRelay, MeshConfig, MeshError, MeshNode, PeerEvent, PeerId};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Events = mpsc::UnboundedReceiver<PeerEvent>;

/// Start A, then B, and wait until each reports the other joined
async fn connected_pair(config: MeshConfig) -> (MeshNode, Events, MeshNode, Events) {
    let relay = MemoryRelay::new();
    let transport = LoopbackTransport::new();

    let (mut a, mut a_rx) = spawn_node("node-a", config.clone(), &transport, &relay);
    let (mut b, mut b_rx) = spawn_node("node-b", config, &transport, &relay);

    a.connect().await.unwrap();
    b.connect().await.unwrap();

    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Joined(PeerId::from("node-b")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Joined(PeerId::from("node-a")));

    (a, a_rx, b, b_rx)
}

#[tokio::test]
async fn test_two_nodes_join_each_other() {
    let (mut a, _a_rx, mut b, _b_rx) = connected_pair(test_config()).await;

    let peers = a.peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].peer_id, PeerId::from("node-b"));
    assert_eq!(peers[0].state, PeerState::Connected);
    assert!(peers[0].has_channel);

    let peers = b.peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].peer_id, PeerId::from("node-a"));

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_payloads_arrive_as_updates() {
    let (mut a, mut a_rx, mut b, mut b_rx) = connected_pair(test_config()).await;

    a.send(&PeerId::from("node-b"), json!({"x": 1.5, "y": -2}))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut b_rx).await,
        PeerEvent::Updated(PeerId::from("node-a"), json!({"x": 1.5, "y": -2}))
    );

    let sent = b.broadcast(json!({"text": "hi"})).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(
        next_event(&mut a_rx).await,
        PeerEvent::Updated(PeerId::from("node-b"), json!({"text": "hi"}))
    );

    let err = a
        .send(&PeerId::from("node-z"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::UnknownPeer(_)));

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_third_node_joins_everyone() {
    let relay = MemoryRelay::new();
    let transport = LoopbackTransport::new();

    let (mut a, mut a_rx) = spawn_node("node-a", test_config(), &transport, &relay);
    let (mut b, mut b_rx) = spawn_node("node-b", test_config(), &transport, &relay);
    let (mut c, mut c_rx) = spawn_node("node-c", test_config(), &transport, &relay);

    a.connect().await.unwrap();
    b.connect().await.unwrap();
    next_event(&mut a_rx).await;
    next_event(&mut b_rx).await;

    c.connect().await.unwrap();
    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Joined(PeerId::from("node-c")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Joined(PeerId::from("node-c")));

    let mut joined = HashSet::new();
    for _ in 0..2 {
        match next_event(&mut c_rx).await {
            PeerEvent::Joined(peer) => {
                joined.insert(peer);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(
        joined,
        HashSet::from([PeerId::from("node-a"), PeerId::from("node-b")])
    );
    assert_eq!(c.broadcast(json!({"hello": "mesh"})).await.unwrap(), 2);

    for node in [&mut a, &mut b, &mut c] {
        node.disconnect().await.unwrap();
    }
}

#[tokio::test]
async fn test_silent_peers_are_pruned() {
    let config = MeshConfig {
        peer_timeout_ms: 300,
        ..Default::default()
    };
    let (mut a, mut a_rx, mut b, mut b_rx) = connected_pair(config).await;

    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Left(PeerId::from("node-b")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Left(PeerId::from("node-a")));
    assert!(a.peers().await.unwrap().is_empty());
    assert!(b.peers().await.unwrap().is_empty());

    // Both stay attached to the relay
    assert!(a.is_connected());
    assert!(b.is_connected());

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_notifies_both_sides() {
    let (mut a, mut a_rx, mut b, mut b_rx) = connected_pair(test_config()).await;

    a.disconnect().await.unwrap();
    assert!(!a.is_connected());
    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Left(PeerId::from("node-b")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Left(PeerId::from("node-a")));

    // Second disconnect is a no-op
    a.disconnect().await.unwrap();
    assert!(a_rx.try_recv().is_err());

    b.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rejoin_after_disconnect() {
    let (mut a, mut a_rx, mut b, mut b_rx) = connected_pair(test_config()).await;

    a.disconnect().await.unwrap();
    next_event(&mut a_rx).await;
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Left(PeerId::from("node-a")));

    a.connect().await.unwrap();
    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Joined(PeerId::from("node-b")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Joined(PeerId::from("node-a")));

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_relay_loss_ends_session() {
    let relay = MemoryRelay::new();
    let transport = LoopbackTransport::new();
    let flaky = KillableRelay::new(&relay);

    let (mut a, mut a_rx) = spawn_node("node-a", test_config(), &transport, &relay);
    let (mut b, mut b_rx) =
        spawn_node_on("node-b", test_config(), &transport, Arc::new(flaky.clone()));

    a.connect().await.unwrap();
    b.connect().await.unwrap();
    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Joined(PeerId::from("node-b")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Joined(PeerId::from("node-a")));

    flaky.kill();

    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Left(PeerId::from("node-a")));
    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Left(PeerId::from("node-b")));
    wait_disconnected(&b).await;

    assert!(matches!(b.peers().await, Err(MeshError::NotConnected)));
    assert!(matches!(
        b.send(&PeerId::from("node-a"), json!({})).await,
        Err(MeshError::NotConnected)
    ));
    assert!(a.is_connected());

    // No reconnect happens on its own
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!b.is_connected());
    assert!(b_rx.try_recv().is_err());

    b.connect().await.unwrap();
    assert_eq!(next_event(&mut a_rx).await, PeerEvent::Joined(PeerId::from("node-b")));
    assert_eq!(next_event(&mut b_rx).await, PeerEvent::Joined(PeerId::from("node-a")));

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_requires_connection() {
    let relay = MemoryRelay::new();
    let transport = LoopbackTransport::new();
    let (mut node, _rx) = spawn_node("lonely", test_config(), &transport, &relay);

    assert!(!node.is_connected());
    assert!(matches!(
        node.send(&PeerId::from("other"), json!({})).await,
        Err(MeshError::NotConnected)
    ));
    assert!(matches!(
        node.broadcast(json!({})).await,
        Err(MeshError::NotConnected)
    ));
    assert!(matches!(node.peers().await, Err(MeshError::NotConnected)));
    node.disconnect().await.unwrap();

    node.connect().await.unwrap();
    assert!(matches!(node.connect().await, Err(MeshError::AlreadyConnected)));
    assert_eq!(relay.listeners(), 1);
    assert_eq!(node.broadcast(json!({})).await.unwrap(), 0);

    node.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.listeners(), 0);
}
