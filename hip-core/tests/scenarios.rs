//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! End-to-end scenario tests driving two full `Router` instances against
//! each other through an in-memory backbone/bridge, the way
//! `holo-bfd`/`holo-vrrp` keep their packet-conformance suites in `tests/`
//! alongside the in-module unit tests. Each test relays datagrams by
//! hand between two routers rather than spawning the reader tasks, since
//! a single scenario only ever has one packet in flight at a time.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use hip_core::identity::{HostIdentity, IdentityStore, PeerRecord, TrustState};
use hip_core::network::{BackboneDuplex, BridgeDuplex};
use hip_core::packet::{IPPROTO_AH, IPPROTO_HIP};
use hip_core::router::Router;
use hip_core::tasks::messages::input::ProtocolMsg;
use hip_utils::mac_addr::MacAddr;

/// A backbone stand-in that only records what `Router` writes to it; the
/// test drains and relays these by hand. `recv` is never polled, since
/// nothing here spawns the reader tasks.
struct RecordingBackbone {
    sent: Mutex<Vec<(IpAddr, u8, Bytes)>>,
}

impl RecordingBackbone {
    fn new() -> RecordingBackbone {
        RecordingBackbone { sent: Mutex::new(Vec::new()) }
    }

    fn drain(&self) -> Vec<(IpAddr, u8, Bytes)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl BackboneDuplex for RecordingBackbone {
    async fn recv(&self) -> std::io::Result<(IpAddr, u8, Bytes)> {
        std::future::pending().await
    }

    async fn send(&self, to: IpAddr, protocol: u8, datagram: Bytes) -> std::io::Result<()> {
        self.sent.lock().unwrap().push((to, protocol, datagram));
        Ok(())
    }
}

/// A bridge stand-in that records every frame delivered to it (the
/// far-end router's decapsulated Ethernet frame) and never yields
/// anything from `recv`.
struct RecordingBridge {
    delivered: Mutex<Vec<Bytes>>,
}

impl RecordingBridge {
    fn new() -> RecordingBridge {
        RecordingBridge { delivered: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl BridgeDuplex for RecordingBridge {
    async fn recv(&self) -> std::io::Result<Bytes> {
        std::future::pending().await
    }

    async fn send(&self, frame: Bytes) -> std::io::Result<()> {
        self.delivered.lock().unwrap().push(frame);
        Ok(())
    }
}

/// Scenario 1: clean BEX plus a single frame. R1 receives an Ethernet
/// frame destined for a MAC fronted by R2; the exchange runs I1/R1/I2/R2
/// to completion, both sides allocate a matching SA pair, and the frame
/// arrives on R2's bridge unchanged.
#[tokio::test]
async fn clean_bex_establishes_matching_sas_and_delivers_the_frame() {
    let identity_r1 = HostIdentity::new(SigningKey::generate(&mut OsRng));
    let identity_r2 = HostIdentity::new(SigningKey::generate(&mut OsRng));
    let hit_r1 = identity_r1.hit;
    let hit_r2 = identity_r2.hit;
    let mac_r1 = MacAddr::new([0x02, 0, 0, 0, 0, 0x01]);
    let mac_r2 = MacAddr::new([0x02, 0, 0, 0, 0, 0x02]);
    let addr_r1 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    let addr_r2 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    let mut store_r1 = IdentityStore::new();
    let mut peer_r2 = PeerRecord::new(identity_r2.verifying_key(), addr_r2, TrustState::Configured);
    peer_r2.macs.push(mac_r2);
    store_r1.insert(peer_r2);

    let mut store_r2 = IdentityStore::new();
    let mut peer_r1 = PeerRecord::new(identity_r1.verifying_key(), addr_r1, TrustState::Configured);
    peer_r1.macs.push(mac_r1);
    store_r2.insert(peer_r1);

    let bridge_r1 = Arc::new(RecordingBridge::new());
    let backbone_r1 = Arc::new(RecordingBackbone::new());
    let (txp_r1, _rxc_r1) = tokio::sync::mpsc::channel(8);
    let mut router_r1 = Router::new(
        identity_r1,
        store_r1,
        [0x7a; 32],
        bridge_r1.clone(),
        backbone_r1.clone(),
        txp_r1,
    );

    let bridge_r2 = Arc::new(RecordingBridge::new());
    let backbone_r2 = Arc::new(RecordingBackbone::new());
    let (txp_r2, _rxc_r2) = tokio::sync::mpsc::channel(8);
    let mut router_r2 = Router::new(
        identity_r2,
        store_r2,
        [0x7b; 32],
        bridge_r2.clone(),
        backbone_r2.clone(),
        txp_r2,
    );

    // R1 receives an Ethernet frame fronted by R2's MAC.
    let mut frame = vec![0u8; 18];
    frame[0..6].copy_from_slice(&mac_r2.octets());
    frame[6..12].copy_from_slice(&mac_r1.octets());
    frame[12..14].copy_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(b"hello");
    let frame = Bytes::from(frame);

    router_r1.handle(ProtocolMsg::BridgeFrame(frame.clone())).await;

    // R1 -> I1 -> R2.
    let sent = backbone_r1.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, IPPROTO_HIP);
    router_r2
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r1,
            protocol: sent[0].1,
            datagram: sent[0].2.clone(),
        })
        .await;

    // R2 -> R1 -> R1.
    let sent = backbone_r2.drain();
    assert_eq!(sent.len(), 1);
    router_r1
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r2,
            protocol: sent[0].1,
            datagram: sent[0].2.clone(),
        })
        .await;

    // R1 -> I2 (puzzle solution + DH share) -> R2.
    let sent = backbone_r1.drain();
    assert_eq!(sent.len(), 1);
    router_r2
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r1,
            protocol: sent[0].1,
            datagram: sent[0].2.clone(),
        })
        .await;

    // R2 allocates its SA pair and answers R2 -> R1.
    let sent = backbone_r2.drain();
    assert_eq!(sent.len(), 1);
    router_r1
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r2,
            protocol: sent[0].1,
            datagram: sent[0].2.clone(),
        })
        .await;

    // R1 now has a matching SA pair and drains its queued frame as an
    // AH datagram addressed to R2.
    let sent = backbone_r1.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, IPPROTO_AH);
    router_r2
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r1,
            protocol: sent[0].1,
            datagram: sent[0].2.clone(),
        })
        .await;

    // R2 authenticates the datagram and delivers the original frame.
    let delivered = bridge_r2.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0], frame);
    drop(delivered);

    let counters_r1 = router_r1.counters(&hit_r2).expect("R1 tracks R2's peer state");
    assert_eq!(counters_r1.bex_successes.load(std::sync::atomic::Ordering::Relaxed), 1);
    let counters_r2 = router_r2.counters(&hit_r1).expect("R2 tracks R1's peer state");
    assert_eq!(counters_r2.bex_successes.load(std::sync::atomic::Ordering::Relaxed), 1);
}

/// Scenario 2: replaying a captured AH datagram is rejected without
/// disturbing the original delivery.
#[tokio::test]
async fn replayed_ah_datagram_is_dropped() {
    let identity_r1 = HostIdentity::new(SigningKey::generate(&mut OsRng));
    let identity_r2 = HostIdentity::new(SigningKey::generate(&mut OsRng));
    let hit_r1 = identity_r1.hit;
    let mac_r1 = MacAddr::new([0x02, 0, 0, 0, 0, 0x11]);
    let mac_r2 = MacAddr::new([0x02, 0, 0, 0, 0, 0x12]);
    let addr_r1 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11));
    let addr_r2 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 12));

    let mut store_r1 = IdentityStore::new();
    let mut peer_r2 = PeerRecord::new(identity_r2.verifying_key(), addr_r2, TrustState::Configured);
    peer_r2.macs.push(mac_r2);
    store_r1.insert(peer_r2);

    let mut store_r2 = IdentityStore::new();
    let mut peer_r1 = PeerRecord::new(identity_r1.verifying_key(), addr_r1, TrustState::Configured);
    peer_r1.macs.push(mac_r1);
    store_r2.insert(peer_r1);

    let bridge_r1 = Arc::new(RecordingBridge::new());
    let backbone_r1 = Arc::new(RecordingBackbone::new());
    let (txp_r1, _rxc_r1) = tokio::sync::mpsc::channel(8);
    let mut router_r1 = Router::new(
        identity_r1,
        store_r1,
        [0x7a; 32],
        bridge_r1.clone(),
        backbone_r1.clone(),
        txp_r1,
    );

    let bridge_r2 = Arc::new(RecordingBridge::new());
    let backbone_r2 = Arc::new(RecordingBackbone::new());
    let (txp_r2, _rxc_r2) = tokio::sync::mpsc::channel(8);
    let mut router_r2 = Router::new(
        identity_r2,
        store_r2,
        [0x7b; 32],
        bridge_r2.clone(),
        backbone_r2.clone(),
        txp_r2,
    );

    let mut frame = vec![0u8; 18];
    frame[0..6].copy_from_slice(&mac_r2.octets());
    frame[6..12].copy_from_slice(&mac_r1.octets());
    frame[12..14].copy_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(b"replay me");
    let frame = Bytes::from(frame);

    router_r1.handle(ProtocolMsg::BridgeFrame(frame.clone())).await;

    // I1 -> R1 -> I2 -> R2, then R1 drains its queue as an AH datagram.
    relay_bex(&backbone_r1, addr_r1, &mut router_r2).await;
    relay_bex(&backbone_r2, addr_r2, &mut router_r1).await;
    relay_bex(&backbone_r1, addr_r1, &mut router_r2).await;
    relay_bex(&backbone_r2, addr_r2, &mut router_r1).await;

    let ah_sent = backbone_r1.drain();
    assert_eq!(ah_sent.len(), 1);
    assert_eq!(ah_sent[0].1, IPPROTO_AH);

    router_r2
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r1,
            protocol: ah_sent[0].1,
            datagram: ah_sent[0].2.clone(),
        })
        .await;
    assert_eq!(bridge_r2.delivered.lock().unwrap().len(), 1);

    // Re-inject the exact same datagram.
    router_r2
        .handle(ProtocolMsg::BackboneDatagram {
            from: addr_r1,
            protocol: ah_sent[0].1,
            datagram: ah_sent[0].2.clone(),
        })
        .await;

    // No second frame delivered, and the drop is attributed to R1.
    assert_eq!(bridge_r2.delivered.lock().unwrap().len(), 1);
    let counters_r2 = router_r2.counters(&hit_r1).expect("R2 tracks R1's peer state");
    assert_eq!(counters_r2.replay_drops.load(std::sync::atomic::Ordering::Relaxed), 1);
}

/// Relays every datagram currently queued in `backbone` into `to`,
/// tagging each with `from` as the observed source address.
async fn relay_bex(backbone: &RecordingBackbone, from: IpAddr, to: &mut Router) {
    for (_, protocol, datagram) in backbone.drain() {
        to.handle(ProtocolMsg::BackboneDatagram { from, protocol, datagram }).await;
    }
}
