//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Router dispatcher (component C7): the single-owner protocol worker
//! that routes frames between the bridge side and the backbone side,
//! invoking the state machine on control packets and the data plane on
//! AH datagrams, and owning the per-peer queue of pre-BEX frames.
//!
//! Grounded on `holo-bfd/src/master.rs`'s `process_protocol_msg`
//! dispatch, narrowed to this core's two peers (bridge, backbone)
//! instead of a multi-protocol northbound/southbound bus — this router
//! speaks only to C3 through C6, never to an external management
//! plane.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hip_utils::task::TimeoutTask;
use hip_utils::Sender;

use crate::dataplane;
use crate::debug::Debug;
use crate::fsm::{Action, Fsm, StatelessResponder};
use crate::identity::{Hit, HostIdentity, IdentityStore};
use crate::network::{BackboneDuplex, BridgeDuplex};
use crate::packet::control::{ControlPacket, PacketType};
use crate::packet::{IPPROTO_AH, IPPROTO_HIP};
use crate::sadb::Sadb;
use crate::tasks::{self, messages};

/// Bound on the per-peer pre-BEX frame queue. Overflow drops the oldest
/// queued frame.
pub const DEFAULT_QUEUE_BOUND: usize = 64;

/// Per-peer operator-visible counters, published via atomic writes so
/// an observer can read them without locking the worker.
#[derive(Debug, Default)]
pub struct PeerCounters {
    pub bex_attempts: AtomicU64,
    pub bex_successes: AtomicU64,
    pub auth_failures: AtomicU64,
    pub replay_drops: AtomicU64,
    pub unknown_spi_drops: AtomicU64,
    pub seq_out: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_bytes: AtomicU64,
}

struct PeerState {
    fsm: Fsm,
    queue: VecDeque<Bytes>,
    retransmit_timer: Option<TimeoutTask>,
    counters: Arc<PeerCounters>,
}

impl PeerState {
    fn new(local_hit: Hit, peer_hit: Hit) -> PeerState {
        PeerState {
            fsm: Fsm::new(local_hit, peer_hit),
            queue: VecDeque::new(),
            retransmit_timer: None,
            counters: Arc::new(PeerCounters::default()),
        }
    }
}

/// The protocol worker. Single-threaded by construction: nothing here
/// takes a lock, since only one task ever calls these methods (fed by
/// the bridge/backbone reader tasks and the retransmit timers armed in
/// [`crate::tasks`]).
pub struct Router {
    identity: HostIdentity,
    store: IdentityStore,
    sadb: Sadb,
    peers: HashMap<Hit, PeerState>,
    responder: StatelessResponder,
    queue_bound: usize,
    bridge: Arc<dyn BridgeDuplex>,
    backbone: Arc<dyn BackboneDuplex>,
    input_txp: Sender<messages::input::ProtocolMsg>,
}

impl Router {
    pub fn new(
        identity: HostIdentity,
        store: IdentityStore,
        responder_secret: [u8; 32],
        bridge: Arc<dyn BridgeDuplex>,
        backbone: Arc<dyn BackboneDuplex>,
        input_txp: Sender<messages::input::ProtocolMsg>,
    ) -> Router {
        Router {
            identity,
            store,
            sadb: Sadb::new(),
            peers: HashMap::new(),
            responder: StatelessResponder::new(responder_secret),
            queue_bound: DEFAULT_QUEUE_BOUND,
            bridge,
            backbone,
            input_txp,
        }
    }

    /// Overrides the pre-BEX frame queue bound, in place of
    /// [`DEFAULT_QUEUE_BOUND`].
    pub fn with_queue_bound(mut self, queue_bound: usize) -> Router {
        self.queue_bound = queue_bound;
        self
    }

    /// Overrides the stateless responder's puzzle difficulty, in place
    /// of [`crate::fsm::DEFAULT_PUZZLE_K`].
    pub fn with_puzzle_k(mut self, puzzle_k: u8) -> Router {
        self.responder = self.responder.with_puzzle_k(puzzle_k);
        self
    }

    /// Spawns the bridge and backbone reader tasks feeding this
    /// worker's input channel. Returned tasks are owned by the caller
    /// (typically the daemon's main future) for the process lifetime.
    pub fn spawn_io_tasks(&self) -> (hip_utils::task::Task<()>, hip_utils::task::Task<()>) {
        (
            tasks::bridge_rx(self.bridge.clone(), &self.input_txp),
            tasks::backbone_rx(self.backbone.clone(), &self.input_txp),
        )
    }

    /// Counters for an already-known peer, if any.
    pub fn counters(&self, peer_hit: &Hit) -> Option<Arc<PeerCounters>> {
        self.peers.get(peer_hit).map(|p| p.counters.clone())
    }

    /// Dispatches one input message, per the event loop this worker
    /// never blocks inside.
    pub async fn handle(&mut self, msg: messages::input::ProtocolMsg) {
        match msg {
            messages::input::ProtocolMsg::BridgeFrame(frame) => {
                self.handle_bridge_frame(frame).await;
            }
            messages::input::ProtocolMsg::BackboneDatagram { from, protocol, datagram } => {
                self.handle_backbone_datagram(from, protocol, &datagram).await;
            }
            messages::input::ProtocolMsg::RetransmitTimer { peer_hit } => {
                self.handle_retransmit_timer(peer_hit).await;
            }
        }
    }

    // Outbound path: frame in -> destination MAC -> peer HIT -> SA.
    async fn handle_bridge_frame(&mut self, frame: Bytes) {
        let Some(dest_mac) = parse_dest_mac(&frame) else {
            return;
        };
        let Some(peer) = self.store.resolve_by_mac(&dest_mac) else {
            return;
        };
        let peer_hit = peer.hit;

        if let Some(out_sa) = self.sadb.lookup_out_mut(&peer_hit) {
            match dataplane::encapsulate(out_sa, &frame) {
                Ok(datagram) => {
                    if let Some(state) = self.peers.get(&peer_hit) {
                        state.counters.seq_out.store(datagram.seq as u64, Ordering::Relaxed);
                    }
                    let locator = self.store.resolve_by_hit(&peer_hit).map(|p| p.locator);
                    if let Some(locator) = locator {
                        self.send_ah(locator, datagram).await;
                    }
                    return;
                }
                Err(error) => {
                    error.log();
                    self.drop_peer_sa(peer_hit).await;
                }
            }
        }

        self.enqueue_and_trigger(peer_hit, frame).await;
    }

    fn enqueue(&mut self, peer_hit: Hit, frame: Bytes) {
        let local_hit = self.identity.hit;
        let peer = self
            .peers
            .entry(peer_hit)
            .or_insert_with(|| PeerState::new(local_hit, peer_hit));
        if peer.queue.len() >= self.queue_bound {
            peer.queue.pop_front();
        }
        peer.queue.push_back(frame);
        Debug::FrameQueued(&peer_hit, peer.queue.len()).log();
    }

    async fn enqueue_and_trigger(&mut self, peer_hit: Hit, frame: Bytes) {
        self.enqueue(peer_hit, frame);
        let needs_trigger = matches!(
            self.peers.get(&peer_hit).map(|p| p.fsm.state),
            Some(crate::fsm::State::Unassociated)
        );
        if needs_trigger {
            let actions = self.peers.get_mut(&peer_hit).unwrap().fsm.trigger();
            self.peers
                .get(&peer_hit)
                .unwrap()
                .counters
                .bex_attempts
                .fetch_add(1, Ordering::Relaxed);
            self.apply_actions(peer_hit, actions).await;
        }
    }

    // Inbound path: datagram in, classified by IP protocol number.
    async fn handle_backbone_datagram(&mut self, from: IpAddr, protocol: u8, datagram: &[u8]) {
        match protocol {
            IPPROTO_HIP => self.handle_control_datagram(from, datagram).await,
            IPPROTO_AH => self.handle_ah_datagram(datagram).await,
            _ => {}
        }
    }

    async fn handle_ah_datagram(&mut self, datagram: &[u8]) {
        let peer_hit = self.sadb_peer_for_datagram(datagram);
        match dataplane::decapsulate(&mut self.sadb, datagram) {
            Ok(frame) => {
                if let Some(peer) = peer_hit {
                    if let Some(mac) = parse_src_mac(&frame) {
                        self.store.learn_mac(&peer, mac);
                    }
                    if let Some(state) = self.peers.get(&peer) {
                        state.counters.rx_bytes.fetch_add(datagram.len() as u64, Ordering::Relaxed);
                    }
                }
                let _ = self.bridge.send(frame).await;
            }
            Err(error) => {
                if let Some(counters) = peer_hit.and_then(|hit| self.peers.get(&hit)).map(|p| &p.counters) {
                    match &error {
                        crate::error::Error::AuthFailure => {
                            counters.auth_failures.fetch_add(1, Ordering::Relaxed);
                        }
                        crate::error::Error::ReplayDetected { .. } => {
                            counters.replay_drops.fetch_add(1, Ordering::Relaxed);
                        }
                        crate::error::Error::UnknownSpi(..) => {
                            counters.unknown_spi_drops.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                }
                error.log();
            }
        }
    }

    fn sadb_peer_for_datagram(&self, datagram: &[u8]) -> Option<Hit> {
        let spi = crate::packet::ah::AhDatagram::decode(datagram, dataplane::ICV_LEN)
            .ok()?
            .spi;
        self.sadb.lookup_in(spi).map(|sa| sa.peer_hit)
    }

    async fn handle_control_datagram(&mut self, from: IpAddr, datagram: &[u8]) {
        let packet = match ControlPacket::decode(datagram) {
            Ok(packet) => packet,
            Err(error) => {
                crate::error::Error::MalformedPacket(error).log();
                return;
            }
        };

        match packet.packet_type {
            PacketType::I1 => self.handle_i1(from, &packet).await,
            PacketType::R1 => self.handle_r1(&packet).await,
            PacketType::I2 => self.handle_i2(from, &packet).await,
            PacketType::R2 => self.handle_r2(&packet).await,
            PacketType::Update | PacketType::Close | PacketType::CloseAck => {
                // CLOSE/CLOSE_ACK teardown is an extension point; the
                // base core tears down on re-BEX instead.
            }
        }
    }

    // Responder side: I1 never allocates per-peer state.
    async fn handle_i1(&mut self, from: IpAddr, packet: &ControlPacket) {
        let sender_hit = packet.sender_hit;
        if let Some(existing) = self.peers.get(&sender_hit) {
            if existing.fsm.state != crate::fsm::State::Unassociated {
                if !Fsm::yields_to(&self.identity.hit, &sender_hit) {
                    // We are already initiating and hold the larger HIT:
                    // ignore the peer's I1 per the tie-break rule.
                    return;
                }
                // We hold the smaller HIT: discard our in-flight I1/I2
                // and fall back to the responder role for this peer.
                if let Some(peer) = self.peers.get_mut(&sender_hit) {
                    peer.fsm = Fsm::new(self.identity.hit, sender_hit);
                    peer.retransmit_timer = None;
                }
            }
        }
        let r1 = self.responder.generate_r1(&self.identity, sender_hit, self.identity.hit);
        self.send_control(from, sender_hit, r1).await;
    }

    async fn handle_r1(&mut self, packet: &ControlPacket) {
        let sender_hit = packet.sender_hit;
        let Some(peer_key) = self.peer_verifying_key(&sender_hit) else {
            return;
        };
        let Some(peer) = self.peers.get_mut(&sender_hit) else {
            return;
        };
        let old_state = peer.fsm.state;
        let result = peer.fsm.recv_r1(&self.identity, &peer_key, packet);
        match result {
            Ok(actions) => {
                let new_state = self.peers.get(&sender_hit).map(|p| p.fsm.state).unwrap_or(old_state);
                Debug::FsmTransition(&sender_hit, old_state, new_state).log();
                self.apply_actions(sender_hit, actions).await;
            }
            Err(error) => error.log(),
        }
    }

    // Responder side: a valid I2 is the only thing that allocates SA
    // state.
    async fn handle_i2(&mut self, from: IpAddr, packet: &ControlPacket) {
        let peer_hit = packet.sender_hit;
        let Some(peer_key) = self.peer_verifying_key(&peer_hit) else {
            return;
        };

        match self.responder.verify_i2(&peer_key, self.identity.hit, peer_hit, packet) {
            Ok((inbound, outbound)) => {
                self.sadb.insert_pair(peer_hit, inbound, outbound.clone());
                Debug::SaPairCreated(&peer_hit).log();
                let r2 = self.responder.generate_r2(
                    &self.identity,
                    self.identity.hit,
                    peer_hit,
                    &outbound,
                );
                self.send_control(from, peer_hit, r2).await;
                let local_hit = self.identity.hit;
                let peer = self
                    .peers
                    .entry(peer_hit)
                    .or_insert_with(|| PeerState::new(local_hit, peer_hit));
                peer.fsm.state = crate::fsm::State::Established;
                peer.counters.bex_successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => error.log(),
        }
    }

    async fn handle_r2(&mut self, packet: &ControlPacket) {
        let sender_hit = packet.sender_hit;
        let Some(peer_key) = self.peer_verifying_key(&sender_hit) else {
            return;
        };
        let Some(peer) = self.peers.get_mut(&sender_hit) else {
            return;
        };
        match peer.fsm.recv_r2(&peer_key, packet) {
            Ok(actions) => {
                peer.counters.bex_successes.fetch_add(1, Ordering::Relaxed);
                self.apply_actions(sender_hit, actions).await;
            }
            Err(error) => error.log(),
        }
    }

    async fn handle_retransmit_timer(&mut self, peer_hit: Hit) {
        let Some(peer) = self.peers.get_mut(&peer_hit) else {
            return;
        };
        let actions = peer.fsm.handle_timeout();
        self.apply_actions(peer_hit, actions).await;
    }

    async fn apply_actions(&mut self, peer_hit: Hit, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SendPacket { to, packet } => {
                    if let Some(locator) = self.store.resolve_by_hit(&to).map(|p| p.locator) {
                        self.send_control(locator, to, packet).await;
                    }
                }
                Action::ArmRetransmitTimer(timeout) => {
                    let timer = tasks::retransmit_timer(peer_hit, timeout, &self.input_txp);
                    if let Some(peer) = self.peers.get_mut(&peer_hit) {
                        peer.retransmit_timer = Some(timer);
                    }
                }
                Action::DisarmRetransmitTimer => {
                    if let Some(peer) = self.peers.get_mut(&peer_hit) {
                        peer.retransmit_timer = None;
                    }
                }
                Action::EstablishSaPair { peer_hit, inbound, outbound } => {
                    self.sadb.insert_pair(peer_hit, inbound, outbound);
                    Debug::SaPairCreated(&peer_hit).log();
                    Debug::BexEstablished(&peer_hit).log();
                    self.drain_queue(peer_hit).await;
                }
                Action::DropSaPair { peer_hit } => {
                    self.sadb.drop_pair(&peer_hit);
                    Debug::SaPairTorndown(&peer_hit).log();
                }
                Action::FlushQueue { peer_hit } => {
                    self.drain_queue(peer_hit).await;
                }
                Action::BexFailed { peer_hit } => {
                    Debug::BexFailed(&peer_hit).log();
                    if let Some(peer) = self.peers.get_mut(&peer_hit) {
                        peer.retransmit_timer = None;
                    }
                }
            }
        }
    }

    async fn drain_queue(&mut self, peer_hit: Hit) {
        let Some(peer) = self.peers.get_mut(&peer_hit) else {
            return;
        };
        let frames: Vec<Bytes> = peer.queue.drain(..).collect();
        let drained = frames.len();
        for frame in frames {
            let Some(out_sa) = self.sadb.lookup_out_mut(&peer_hit) else {
                break;
            };
            if let Ok(datagram) = dataplane::encapsulate(out_sa, &frame) {
                if let Some(state) = self.peers.get(&peer_hit) {
                    state.counters.seq_out.store(datagram.seq as u64, Ordering::Relaxed);
                }
                if let Some(locator) = self.store.resolve_by_hit(&peer_hit).map(|p| p.locator) {
                    self.send_ah(locator, datagram).await;
                }
            }
        }
        if drained > 0 {
            Debug::FrameQueueDrained(&peer_hit, drained).log();
        }
    }

    async fn send_control(&self, to: IpAddr, peer_hit: Hit, packet: ControlPacket) {
        let encoded = packet.encode();
        if let Some(peer) = self.peers.get(&peer_hit) {
            peer.counters.tx_bytes.fetch_add(encoded.len() as u64, Ordering::Relaxed);
        }
        let _ = self.backbone.send(to, IPPROTO_HIP, encoded.freeze()).await;
    }

    async fn send_ah(&self, to: IpAddr, datagram: crate::packet::ah::AhDatagram) {
        let encoded = datagram.encode();
        let _ = self.backbone.send(to, IPPROTO_AH, encoded.freeze()).await;
    }

    async fn drop_peer_sa(&mut self, peer_hit: Hit) {
        self.sadb.drop_pair(&peer_hit);
        if let Some(peer) = self.peers.get_mut(&peer_hit) {
            peer.fsm = Fsm::new(self.identity.hit, peer_hit);
        }
    }

    fn peer_verifying_key(&self, hit: &Hit) -> Option<ed25519_dalek::VerifyingKey> {
        self.store.resolve_by_hit(hit).map(|peer| peer.verifying_key)
    }
}

fn parse_dest_mac(frame: &[u8]) -> Option<hip_utils::mac_addr::MacAddr> {
    let bytes: [u8; 6] = frame.get(0..6)?.try_into().ok()?;
    Some(hip_utils::mac_addr::MacAddr::new(bytes))
}

fn parse_src_mac(frame: &[u8]) -> Option<hip_utils::mac_addr::MacAddr> {
    let bytes: [u8; 6] = frame.get(6..12)?.try_into().ok()?;
    Some(hip_utils::mac_addr::MacAddr::new(bytes))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::*;
    use crate::sadb::{Sa, Spi};

    struct RecordingBackbone {
        sent: Mutex<Vec<(IpAddr, u8, Bytes)>>,
    }

    impl RecordingBackbone {
        fn new() -> RecordingBackbone {
            RecordingBackbone { sent: Mutex::new(Vec::new()) }
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

    struct NullBridge;

    #[async_trait]
    impl BridgeDuplex for NullBridge {
        async fn recv(&self) -> std::io::Result<Bytes> {
            std::future::pending().await
        }

        async fn send(&self, _frame: Bytes) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_router() -> (Router, Arc<RecordingBackbone>) {
        let identity = HostIdentity::new(SigningKey::generate(&mut OsRng));
        let store = IdentityStore::new();
        let bridge: Arc<dyn BridgeDuplex> = Arc::new(NullBridge);
        let backbone = Arc::new(RecordingBackbone::new());
        let (input_txp, _input_rxc) = tokio::sync::mpsc::channel(8);
        let router = Router::new(
            identity,
            store,
            [0x5a; 32],
            bridge,
            backbone.clone(),
            input_txp,
        );
        (router, backbone)
    }

    fn larger_hit() -> Hit {
        // Real Host Identities all carry the fixed ORCHID prefix
        // 0x20_01_00_10 in their first four bytes; an all-0xff HIT is
        // numerically larger than any of them.
        Hit::from_bytes([0xff; 16])
    }

    #[tokio::test]
    async fn simultaneous_bex_loser_discards_its_in_flight_i1() {
        let (mut router, backbone) = test_router();
        let local_hit = router.identity.hit;
        let peer_hit = larger_hit();

        // Simulate this router having already triggered BEX towards
        // `peer_hit` (we are I1-SENT) before its I1 arrives from the
        // other side.
        let mut peer_state = PeerState::new(local_hit, peer_hit);
        peer_state.fsm.trigger();
        assert_eq!(peer_state.fsm.state, crate::fsm::State::I1Sent);
        router.peers.insert(peer_hit, peer_state);

        let incoming_i1 = ControlPacket::new(PacketType::I1, peer_hit, local_hit, vec![]);
        router
            .handle_control_datagram(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), &incoming_i1.encode())
            .await;

        // We hold the smaller HIT, so we yield: our in-flight I1 is
        // discarded and the timer disarmed, per the tie-break rule.
        let peer = router.peers.get(&peer_hit).unwrap();
        assert_eq!(peer.fsm.state, crate::fsm::State::Unassociated);
        assert!(peer.retransmit_timer.is_none());

        // And we still answered with an R1.
        let sent = backbone.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (_, protocol, _) = &sent[0];
        assert_eq!(*protocol, IPPROTO_HIP);
    }

    #[tokio::test]
    async fn larger_hit_holder_ignores_peers_i1() {
        let (mut router, backbone) = test_router();
        let local_hit = larger_hit();
        router.identity.hit = local_hit;
        let peer_hit = Hit::from_bytes([0x01; 16]);

        let mut peer_state = PeerState::new(local_hit, peer_hit);
        peer_state.fsm.trigger();
        router.peers.insert(peer_hit, peer_state);

        let incoming_i1 = ControlPacket::new(PacketType::I1, peer_hit, local_hit, vec![]);
        router
            .handle_control_datagram(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), &incoming_i1.encode())
            .await;

        // We hold the larger HIT: our own I1 stands, and we do not
        // reply to the peer's competing I1.
        let peer = router.peers.get(&peer_hit).unwrap();
        assert_eq!(peer.fsm.state, crate::fsm::State::I1Sent);
        assert!(backbone.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ah_decapsulation_failures_are_attributed_to_the_sending_peer() {
        let (mut router, _backbone) = test_router();
        let local_hit = router.identity.hit;
        let peer_hit = Hit::from_bytes([0x02; 16]);

        // Our inbound SPI is what the peer addresses datagrams to; build
        // the far-end's matching outbound SA under that same SPI and key
        // to produce a datagram this router's inbound lookup will find.
        let key = [0x11u8; 32];
        let in_spi = Spi(0x1000);
        router.sadb.insert_pair(
            peer_hit,
            Sa::new_in(in_spi, local_hit, peer_hit, key),
            Sa::new_out(Spi(0x2000), local_hit, peer_hit, key),
        );
        router.peers.insert(peer_hit, PeerState::new(local_hit, peer_hit));

        let mut peer_side_sa = Sa::new_out(in_spi, peer_hit, local_hit, key);
        let frame = Bytes::from_static(b"an ethernet frame");
        let datagram = dataplane::encapsulate(&mut peer_side_sa, &frame).unwrap();
        let mut encoded = datagram.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        router.handle_ah_datagram(&encoded).await;

        let counters = &router.peers.get(&peer_hit).unwrap().counters;
        assert_eq!(counters.auth_failures.load(Ordering::Relaxed), 1);
        assert_eq!(counters.replay_drops.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn bridge_frame_without_a_known_peer_is_dropped_silently() {
        let (mut router, backbone) = test_router();
        // No peer configured for this destination MAC: the frame is
        // silently dropped rather than queued against an unknown peer.
        let mut frame = vec![0u8; 14];
        frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x42]);
        router.handle_bridge_frame(Bytes::from(frame)).await;

        assert!(router.peers.is_empty());
        assert!(backbone.sent.lock().unwrap().is_empty());
    }
}
