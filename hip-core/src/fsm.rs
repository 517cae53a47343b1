//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! HIP state machine (component C5): the per-peer Base Exchange
//! automaton, plus the stateless R1 responder.
//!
//! Generalized from the BFD session FSM in `holo-bfd/src/session.rs`:
//! `Fsm::state_update`-style explicit transitions, but producing a list
//! of [`Action`]s instead of mutating shared session/statistics state
//! directly. The protocol worker (`router.rs`) is the only place that
//! turns an `Action` into a socket write, a SADB mutation, or an armed
//! timer — the FSM itself never touches I/O or the SADB, which keeps it
//! trivially testable and matches the single-owner worker model.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::VerifyingKey;

use crate::crypto::{self, DhKeypair, KDF_LABEL_I2R, KDF_LABEL_R2I};
use crate::error::Error;
use crate::identity::{Hit, HostIdentity};
use crate::packet::control::{
    ControlPacket, DhGroup, EspTransformId, Parameter, PacketType, TransformId,
};
use crate::sadb::{Sa, Spi};

/// Default puzzle difficulty, in bits of required work. Chosen as a
/// moderate default; operators needing stronger DoS resistance raise it
/// per deployment.
pub const DEFAULT_PUZZLE_K: u8 = 12;

/// Default retransmission timeout for I1/I2.
pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default maximum number of retransmissions before `BexFailed`.
pub const DEFAULT_MAX_RETRANSMITS: u32 = 4;

/// Base Exchange state, per peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unassociated,
    I1Sent,
    I2Sent,
    R2Sent,
    Established,
    Closing,
    Closed,
}

/// Side effects the worker must carry out in response to an FSM
/// transition. The FSM never performs these itself.
#[derive(Debug)]
pub enum Action {
    SendPacket { to: Hit, packet: ControlPacket },
    ArmRetransmitTimer(Duration),
    DisarmRetransmitTimer,
    EstablishSaPair { peer_hit: Hit, inbound: Sa, outbound: Sa },
    DropSaPair { peer_hit: Hit },
    FlushQueue { peer_hit: Hit },
    BexFailed { peer_hit: Hit },
}

/// Per-peer Base Exchange session, owned by the initiator side while a
/// handshake is in flight. Dropped once `ESTABLISHED` (the SADB is the
/// source of truth from then on) or on `BexFailed`.
#[derive(Debug)]
pub struct Fsm {
    pub peer_hit: Hit,
    pub state: State,
    local_hit: Hit,
    retransmit_count: u32,
    max_retransmits: u32,
    retransmit_timeout: Duration,
    dh_keypair: Option<DhKeypair>,
    last_packet: Option<ControlPacket>,
    derived_out_key: Option<[u8; 32]>,
    derived_in_key: Option<[u8; 32]>,
}

impl Fsm {
    pub fn new(local_hit: Hit, peer_hit: Hit) -> Fsm {
        Fsm {
            peer_hit,
            state: State::Unassociated,
            local_hit,
            retransmit_count: 0,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            dh_keypair: None,
            last_packet: None,
            derived_out_key: None,
            derived_in_key: None,
        }
    }

    /// Whether `local_hit` yields the initiator role to `peer_hit` under
    /// the simultaneous-BEX tie-break rule: the numerically larger HIT
    /// wins and keeps initiating.
    pub fn yields_to(local_hit: &Hit, peer_hit: &Hit) -> bool {
        local_hit.as_bytes() < peer_hit.as_bytes()
    }

    /// UNASSOCIATED + `trigger` -> I1-SENT.
    pub fn trigger(&mut self) -> Vec<Action> {
        if self.state != State::Unassociated {
            return vec![];
        }
        let packet = ControlPacket::new(
            PacketType::I1,
            self.local_hit,
            self.peer_hit,
            vec![],
        );
        self.state = State::I1Sent;
        self.retransmit_count = 0;
        self.last_packet = Some(packet.clone());
        vec![
            Action::SendPacket { to: self.peer_hit, packet },
            Action::ArmRetransmitTimer(self.retransmit_timeout),
        ]
    }

    /// Retransmit timer fired in I1-SENT or I2-SENT.
    pub fn handle_timeout(&mut self) -> Vec<Action> {
        match self.state {
            State::I1Sent | State::I2Sent => {
                self.retransmit_count += 1;
                if self.retransmit_count > self.max_retransmits {
                    self.state = State::Unassociated;
                    return vec![Action::BexFailed { peer_hit: self.peer_hit }];
                }
                let Some(packet) = self.last_packet.clone() else {
                    return vec![];
                };
                vec![
                    Action::SendPacket { to: self.peer_hit, packet },
                    Action::ArmRetransmitTimer(self.retransmit_timeout),
                ]
            }
            _ => vec![],
        }
    }

    /// I1-SENT + valid R1 -> I2-SENT. Verifies R1's signature, solves
    /// the puzzle, derives the DH shared secret, and sends I2.
    pub fn recv_r1(
        &mut self,
        local_identity: &HostIdentity,
        peer_key: &VerifyingKey,
        packet: &ControlPacket,
    ) -> Result<Vec<Action>, Error> {
        if self.state != State::I1Sent {
            return Ok(vec![]);
        }

        let sig_index = packet
            .params
            .iter()
            .position(|p| matches!(p, Parameter::HipSignature { .. }))
            .ok_or(Error::AuthFailure)?;
        let Some(Parameter::HipSignature { signature }) = packet.params.get(sig_index)
        else {
            return Err(Error::AuthFailure);
        };
        let signed = packet.encode_upto(sig_index);
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| Error::AuthFailure)?;
        if !crypto::verify(peer_key, &signed, &sig) {
            return Err(Error::AuthFailure);
        }

        let Some(Parameter::Puzzle { i, k }) =
            packet.param(|p| matches!(p, Parameter::Puzzle { .. }))
        else {
            return Err(Error::AuthFailure);
        };
        let Some(Parameter::DiffieHellman { public_value, .. }) =
            packet.param(|p| matches!(p, Parameter::DiffieHellman { .. }))
        else {
            return Err(Error::AuthFailure);
        };
        let peer_dh_public = decode_dh_public(public_value)?;

        let j = crypto::puzzle_solve(i, *k, self.local_hit.as_bytes(), self.peer_hit.as_bytes());

        let dh_keypair = crypto::dh_keypair();
        let shared = crypto::dh_shared(&dh_keypair.private, &peer_dh_public);
        self.derive_keys(&shared);
        self.dh_keypair = Some(dh_keypair);

        let i2 = self.build_i2(local_identity, j)?;
        self.state = State::I2Sent;
        self.retransmit_count = 0;
        self.last_packet = Some(i2.clone());

        Ok(vec![
            Action::SendPacket { to: self.peer_hit, packet: i2 },
            Action::ArmRetransmitTimer(self.retransmit_timeout),
        ])
    }

    /// I2-SENT + valid R2 -> ESTABLISHED.
    pub fn recv_r2(
        &mut self,
        peer_key: &VerifyingKey,
        packet: &ControlPacket,
    ) -> Result<Vec<Action>, Error> {
        if self.state != State::I2Sent {
            return Ok(vec![]);
        }
        self.verify_hmac_then_signature(peer_key, packet)?;

        let (in_spi, out_spi) = spi_pair(&self.local_hit, &self.peer_hit);
        let out_key = self.derived_out_key.ok_or(Error::AuthFailure)?;
        let in_key = self.derived_in_key.ok_or(Error::AuthFailure)?;
        let inbound = Sa::new_in(in_spi, self.local_hit, self.peer_hit, in_key);
        let outbound = Sa::new_out(out_spi, self.local_hit, self.peer_hit, out_key);

        self.state = State::Established;
        Ok(vec![
            Action::DisarmRetransmitTimer,
            Action::EstablishSaPair { peer_hit: self.peer_hit, inbound, outbound },
            Action::FlushQueue { peer_hit: self.peer_hit },
        ])
    }

    fn verify_hmac_then_signature(
        &self,
        peer_key: &VerifyingKey,
        packet: &ControlPacket,
    ) -> Result<(), Error> {
        let hmac_index = packet
            .params
            .iter()
            .position(|p| matches!(p, Parameter::Hmac { .. }))
            .ok_or(Error::AuthFailure)?;
        let Some(Parameter::Hmac { digest }) = packet.params.get(hmac_index) else {
            return Err(Error::AuthFailure);
        };
        // R2's HMAC is computed by the responder over its outbound SA,
        // whose key is r2i — the same key this side derived as its
        // *inbound* key. The i2r key (`derived_out_key`) only covers I2.
        let hmac_key = self.derived_in_key.ok_or(Error::AuthFailure)?;
        let covered = packet.encode_upto(hmac_index);
        let expected = crypto::hmac(&hmac_key, &covered);
        if expected[..] != digest[..] {
            return Err(Error::AuthFailure);
        }

        let sig_index = packet
            .params
            .iter()
            .position(|p| matches!(p, Parameter::HipSignature { .. }))
            .ok_or(Error::AuthFailure)?;
        let Some(Parameter::HipSignature { signature }) = packet.params.get(sig_index)
        else {
            return Err(Error::AuthFailure);
        };
        let signed = packet.encode_upto(sig_index);
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| Error::AuthFailure)?;
        if !crypto::verify(peer_key, &signed, &sig) {
            return Err(Error::AuthFailure);
        }
        Ok(())
    }

    // By the time `recv_r1` calls this, `self` is the confirmed
    // initiator: the router resets any FSM that loses the simultaneous-
    // BEX tie-break to `Unassociated` before it can ever reach here (see
    // `router.rs::handle_i1`), so `local_hit` is always `hit_i` and
    // `peer_hit` is always `hit_r` — the same fixed convention
    // `StatelessResponder::verify_i2` uses on the other side.
    fn derive_keys(&mut self, shared_secret: &[u8]) {
        let i2r = crypto::kdf(
            shared_secret,
            self.local_hit.as_bytes(),
            self.peer_hit.as_bytes(),
            KDF_LABEL_I2R,
        );
        let r2i = crypto::kdf(
            shared_secret,
            self.local_hit.as_bytes(),
            self.peer_hit.as_bytes(),
            KDF_LABEL_R2I,
        );
        self.derived_out_key = Some(i2r);
        self.derived_in_key = Some(r2i);
    }

    fn build_i2(&self, local_identity: &HostIdentity, j: u64) -> Result<ControlPacket, Error> {
        let dh_keypair = self.dh_keypair.as_ref().expect("dh keypair set before build_i2");
        let mut params = vec![
            Parameter::Solution { j },
            Parameter::DiffieHellman {
                group: DhGroup::Curve25519,
                public_value: dh_keypair.public.as_bytes().to_vec(),
            },
            Parameter::HipTransform { selected: TransformId::HmacSha256 },
            Parameter::EspTransform { selected: EspTransformId::None },
            Parameter::HostId {
                public_key: local_identity.verifying_key().as_bytes().to_vec(),
            },
        ];
        let mut packet =
            ControlPacket::new(PacketType::I2, self.local_hit, self.peer_hit, params.clone());

        let hmac_key = self.derived_out_key.ok_or(Error::AuthFailure)?;
        let covered = packet.encode_upto(params.len());
        let digest = crypto::hmac(&hmac_key, &covered);
        params.push(Parameter::Hmac { digest: digest.to_vec() });
        packet.params = params.clone();

        let covered = packet.encode_upto(params.len());
        let sig = crypto::sign(&local_identity.signing_key, &covered);
        params.push(Parameter::HipSignature { signature: sig.to_bytes().to_vec() });
        packet.params = params;

        Ok(packet)
    }
}

/// Derives the (inbound, outbound) SPI pair for a freshly-established
/// SA pair from the two peers' HITs. Using a hash rather than a random
/// value keeps the pair deterministic for tests and trivially satisfies
/// invariant I1 in practice (birthday collisions across the full 32-bit
/// space are astronomically unlikely for any real deployment size);
/// production deployments may prefer `rand` if strict uniqueness must
/// be guaranteed under adversarial SPI choice.
///
/// Each direction's SPI is `hash(sender_hit || receiver_hit)`, with no
/// further tag: this is what makes the two ends agree without
/// exchanging SPIs on the wire. The sender of a direction always
/// derives it as that direction's *outbound* SPI, and the receiver of
/// the same direction always derives the identical bytes as its
/// *inbound* SPI, since both evaluate the same `sender || receiver`
/// order.
fn spi_pair(local_hit: &Hit, peer_hit: &Hit) -> (Spi, Spi) {
    let mut in_data = Vec::with_capacity(32);
    in_data.extend_from_slice(peer_hit.as_bytes());
    in_data.extend_from_slice(local_hit.as_bytes());
    let in_digest = crypto::hash(&in_data);

    let mut out_data = Vec::with_capacity(32);
    out_data.extend_from_slice(local_hit.as_bytes());
    out_data.extend_from_slice(peer_hit.as_bytes());
    let out_digest = crypto::hash(&out_data);

    (
        Spi(u32::from_be_bytes(in_digest[0..4].try_into().unwrap())),
        Spi(u32::from_be_bytes(out_digest[0..4].try_into().unwrap())),
    )
}

fn decode_dh_public(bytes: &[u8]) -> Result<x25519_dalek::PublicKey, Error> {
    let array: [u8; 32] = bytes.try_into().map_err(|_| Error::AuthFailure)?;
    Ok(x25519_dalek::PublicKey::from(array))
}

/// Width of one puzzle epoch: the R1 generator's secret-derived puzzle
/// and DH keypair are stable for this long, bounding how late an I2 can
/// arrive and still be accepted.
const EPOCH_WIDTH: Duration = Duration::from_secs(30);

/// The stateless R1 responder: derives R1 content and verifies I2 from
/// a process-lifetime secret keyed on the peer HIT and a coarse time
/// epoch, never allocating a per-peer record on I1.
pub struct StatelessResponder {
    secret: [u8; 32],
    puzzle_k: u8,
}

impl StatelessResponder {
    pub fn new(secret: [u8; 32]) -> StatelessResponder {
        StatelessResponder { secret, puzzle_k: DEFAULT_PUZZLE_K }
    }

    pub fn with_puzzle_k(mut self, puzzle_k: u8) -> StatelessResponder {
        self.puzzle_k = puzzle_k;
        self
    }

    fn epoch(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            / EPOCH_WIDTH.as_secs()
    }

    fn puzzle_seed(&self, sender_hit: &Hit, receiver_hit: &Hit, epoch: u64) -> [u8; 8] {
        let mut data = Vec::with_capacity(32 + 32 + 8);
        data.extend_from_slice(&self.secret);
        data.extend_from_slice(sender_hit.as_bytes());
        data.extend_from_slice(receiver_hit.as_bytes());
        data.extend_from_slice(&epoch.to_be_bytes());
        let digest = crypto::hash(&data);
        digest[0..8].try_into().unwrap()
    }

    fn dh_keypair_for(&self, sender_hit: &Hit, receiver_hit: &Hit, epoch: u64) -> DhKeypair {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 4);
        data.extend_from_slice(&self.secret);
        data.extend_from_slice(receiver_hit.as_bytes());
        data.extend_from_slice(sender_hit.as_bytes());
        data.extend_from_slice(&epoch.to_be_bytes());
        data.extend_from_slice(b"dh");
        let scalar = crypto::hash(&data);
        let private = x25519_dalek::StaticSecret::from(scalar);
        let public = x25519_dalek::PublicKey::from(&private);
        DhKeypair { private, public }
    }

    /// Builds the R1 to send in response to an I1 from `sender_hit`.
    /// Allocates nothing keyed on `sender_hit` beyond this call.
    pub fn generate_r1(
        &self,
        local_identity: &HostIdentity,
        sender_hit: Hit,
        receiver_hit: Hit,
    ) -> ControlPacket {
        let epoch = self.epoch();
        let i = self.puzzle_seed(&sender_hit, &receiver_hit, epoch);
        let dh_keypair = self.dh_keypair_for(&sender_hit, &receiver_hit, epoch);

        let mut params = vec![
            Parameter::R1Counter { counter: epoch },
            Parameter::Puzzle { i, k: self.puzzle_k },
            Parameter::DiffieHellman {
                group: DhGroup::Curve25519,
                public_value: dh_keypair.public.as_bytes().to_vec(),
            },
            Parameter::HostId {
                public_key: local_identity.verifying_key().as_bytes().to_vec(),
            },
        ];
        let mut packet =
            ControlPacket::new(PacketType::R1, receiver_hit, sender_hit, params.clone());

        let covered = packet.encode_upto(params.len());
        let sig = crypto::sign(&local_identity.signing_key, &covered);
        params.push(Parameter::HipSignature { signature: sig.to_bytes().to_vec() });
        packet.params = params;
        packet
    }

    /// Verifies an I2's puzzle solution, HMAC, and signature against a
    /// recomputed (not stored) R1 context, and derives the SA keys on
    /// success. The epoch used is the current one; an I2 arriving after
    /// its R1's epoch has rolled over is rejected (the initiator simply
    /// retries BEX from I1).
    pub fn verify_i2(
        &self,
        peer_key: &VerifyingKey,
        local_hit: Hit,
        peer_hit: Hit,
        packet: &ControlPacket,
    ) -> Result<(Sa, Sa), Error> {
        let epoch = self.epoch();
        let i = self.puzzle_seed(&peer_hit, &local_hit, epoch);
        let dh_keypair = self.dh_keypair_for(&peer_hit, &local_hit, epoch);

        let Some(Parameter::Solution { j }) =
            packet.param(|p| matches!(p, Parameter::Solution { .. }))
        else {
            return Err(Error::AuthFailure);
        };
        if !crypto::puzzle_verify(&i, *j, self.puzzle_k, peer_hit.as_bytes(), local_hit.as_bytes())
        {
            return Err(Error::PuzzleFailed);
        }

        let Some(Parameter::DiffieHellman { public_value, .. }) =
            packet.param(|p| matches!(p, Parameter::DiffieHellman { .. }))
        else {
            return Err(Error::AuthFailure);
        };
        let peer_dh_public = decode_dh_public(public_value)?;
        let shared = crypto::dh_shared(&dh_keypair.private, &peer_dh_public);

        let hmac_index = packet
            .params
            .iter()
            .position(|p| matches!(p, Parameter::Hmac { .. }))
            .ok_or(Error::AuthFailure)?;
        let Some(Parameter::Hmac { digest }) = packet.params.get(hmac_index) else {
            return Err(Error::AuthFailure);
        };
        // Initiator keeps the role determined by the tie-break rule;
        // the responder here is always the numerically smaller HIT.
        let i2r = crypto::kdf(&shared, peer_hit.as_bytes(), local_hit.as_bytes(), KDF_LABEL_I2R);
        let r2i = crypto::kdf(&shared, peer_hit.as_bytes(), local_hit.as_bytes(), KDF_LABEL_R2I);

        let covered = packet.encode_upto(hmac_index);
        if crypto::hmac(&i2r, &covered)[..] != digest[..] {
            return Err(Error::AuthFailure);
        }

        let sig_index = packet
            .params
            .iter()
            .position(|p| matches!(p, Parameter::HipSignature { .. }))
            .ok_or(Error::AuthFailure)?;
        let Some(Parameter::HipSignature { signature }) = packet.params.get(sig_index)
        else {
            return Err(Error::AuthFailure);
        };
        let covered = packet.encode_upto(sig_index);
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| Error::AuthFailure)?;
        if !crypto::verify(peer_key, &covered, &sig) {
            return Err(Error::AuthFailure);
        }

        let (in_spi, out_spi) = spi_pair(&local_hit, &peer_hit);
        let inbound = Sa::new_in(in_spi, local_hit, peer_hit, i2r);
        let outbound = Sa::new_out(out_spi, local_hit, peer_hit, r2i);
        Ok((inbound, outbound))
    }

    /// Builds the R2 confirming a newly-created SA pair.
    pub fn generate_r2(
        &self,
        local_identity: &HostIdentity,
        local_hit: Hit,
        peer_hit: Hit,
        out_sa: &Sa,
    ) -> ControlPacket {
        let mut params = vec![];
        let mut packet = ControlPacket::new(PacketType::R2, local_hit, peer_hit, params.clone());

        let covered = packet.encode_upto(params.len());
        let digest = crypto::hmac(&out_sa.hmac_key, &covered);
        params.push(Parameter::Hmac { digest: digest.to_vec() });
        packet.params = params.clone();

        let covered = packet.encode_upto(params.len());
        let sig = crypto::sign(&local_identity.signing_key, &covered);
        params.push(Parameter::HipSignature { signature: sig.to_bytes().to_vec() });
        packet.params = params;
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn identity() -> HostIdentity {
        HostIdentity::new(SigningKey::generate(&mut OsRng))
    }

    #[test]
    fn trigger_moves_to_i1_sent_and_arms_timer() {
        let local = identity();
        let peer = identity();
        let mut fsm = Fsm::new(local.hit, peer.hit);
        let actions = fsm.trigger();
        assert_eq!(fsm.state, State::I1Sent);
        assert!(matches!(actions[0], Action::SendPacket { .. }));
        assert!(matches!(actions[1], Action::ArmRetransmitTimer(_)));
    }

    #[test]
    fn full_base_exchange_establishes_matching_keys() {
        let initiator_identity = identity();
        let responder_identity = identity();

        let mut initiator_fsm = Fsm::new(initiator_identity.hit, responder_identity.hit);
        initiator_fsm.trigger();

        let responder = StatelessResponder::new([0x7a; 32]);
        let r1 = responder.generate_r1(
            &responder_identity,
            initiator_identity.hit,
            responder_identity.hit,
        );

        let actions = initiator_fsm
            .recv_r1(&initiator_identity, &responder_identity.verifying_key(), &r1)
            .unwrap();
        assert_eq!(initiator_fsm.state, State::I2Sent);
        let Action::SendPacket { packet: i2, .. } = &actions[0] else {
            panic!("expected SendPacket action");
        };

        let (inbound, outbound) = responder
            .verify_i2(
                &initiator_identity.verifying_key(),
                responder_identity.hit,
                initiator_identity.hit,
                i2,
            )
            .unwrap();

        let r2 = responder.generate_r2(
            &responder_identity,
            responder_identity.hit,
            initiator_identity.hit,
            &outbound,
        );

        let actions = initiator_fsm
            .recv_r2(&responder_identity.verifying_key(), &r2)
            .unwrap();
        assert_eq!(initiator_fsm.state, State::Established);

        let Action::EstablishSaPair { inbound: init_in, outbound: init_out, .. } = &actions[1]
        else {
            panic!("expected EstablishSaPair action");
        };

        // The initiator's outbound key equals the responder's inbound
        // key, and vice versa.
        assert_eq!(init_out.hmac_key, inbound.hmac_key);
        assert_eq!(init_in.hmac_key, outbound.hmac_key);

        // The SPIs must agree the same way: an AH datagram the
        // initiator sends under `init_out.spi` has to be found by the
        // responder's inbound lookup, which indexes by `inbound.spi`.
        assert_eq!(init_out.spi, inbound.spi);
        assert_eq!(init_in.spi, outbound.spi);
    }

    #[test]
    fn forged_puzzle_solution_is_rejected() {
        let initiator_identity = identity();
        let responder_identity = identity();
        let responder = StatelessResponder::new([0x11; 32]);

        let mut i2 = ControlPacket::new(
            PacketType::I2,
            initiator_identity.hit,
            responder_identity.hit,
            vec![
                Parameter::Solution { j: 0 },
                Parameter::DiffieHellman {
                    group: DhGroup::Curve25519,
                    public_value: crypto::dh_keypair().public.as_bytes().to_vec(),
                },
            ],
        );
        let hmac_key = [0u8; 32];
        let covered = i2.encode_upto(i2.params.len());
        i2.params.push(Parameter::Hmac { digest: crypto::hmac(&hmac_key, &covered).to_vec() });
        let covered = i2.encode_upto(i2.params.len());
        let sig = crypto::sign(&initiator_identity.signing_key, &covered);
        i2.params.push(Parameter::HipSignature { signature: sig.to_bytes().to_vec() });

        let result = responder.verify_i2(
            &initiator_identity.verifying_key(),
            responder_identity.hit,
            initiator_identity.hit,
            &i2,
        );
        assert!(matches!(result, Err(Error::PuzzleFailed)));
    }

    #[test]
    fn retransmission_exhaustion_surfaces_bex_failed() {
        let local = identity();
        let peer = identity();
        let mut fsm = Fsm::new(local.hit, peer.hit);
        fsm.max_retransmits = 1;
        fsm.trigger();

        fsm.handle_timeout();
        let actions = fsm.handle_timeout();
        assert_eq!(fsm.state, State::Unassociated);
        assert!(matches!(actions[0], Action::BexFailed { .. }));
    }

    #[test]
    fn tie_break_favors_the_larger_hit() {
        let smaller = Hit::from_bytes([0x01; 16]);
        let larger = Hit::from_bytes([0xff; 16]);
        assert!(Fsm::yields_to(&smaller, &larger));
        assert!(!Fsm::yields_to(&larger, &smaller));
    }
}
