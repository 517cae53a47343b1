//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Host Identity store (component C3): the local Host Identity keypair,
//! the Host Identity Tag derived from a public key, and the table of
//! known peers keyed by HIT and by their current bridge-side MAC.
//!
//! Grounded on the keychain's key/lookup pattern in the teacher's
//! `holo-keychain` crate, narrowed from a list of time-bounded shared
//! secrets down to the single long-lived asymmetric identity this
//! router speaks BEX with per peer.

use std::collections::HashMap;
use std::net::IpAddr;

use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::crypto;
use hip_utils::mac_addr::MacAddr;

/// Width of a Host Identity Tag, in bytes (ORCHID-style, RFC 7343
/// profile truncated to fit the fixed 128-bit HIT field on the wire).
pub const HIT_LEN: usize = 16;

/// The ORCHID prefix occupying the top 28 bits of every HIT this router
/// generates or accepts, identifying the HIT as belonging to the
/// "experimental/non-IANA-assigned" OGA context used by this
/// deployment. Kept as a constant rather than wire-negotiated since this
/// core speaks exactly one HI suite.
const HIT_PREFIX: [u8; 4] = [0x20, 0x01, 0x00, 0x10];

/// A Host Identity Tag: the 128-bit, routable-looking hash that stands
/// in for a Host Identity on the wire and in the SADB/bridge tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hit([u8; HIT_LEN]);

impl Hit {
    /// Derives the HIT for a given Ed25519 public key: the low 96 bits
    /// of `SHA256(pubkey)`, behind the fixed ORCHID prefix and a 4-bit
    /// OGA id of zero (the only orchid generation algorithm this core
    /// defines).
    pub fn from_public_key(public_key: &VerifyingKey) -> Hit {
        let digest = crypto::hash(public_key.as_bytes());
        let mut bytes = [0u8; HIT_LEN];
        bytes[0..4].copy_from_slice(&HIT_PREFIX);
        // OGA id (4 bits) left as zero, packed into the top nibble of
        // byte 4 alongside the first 4 bits of the truncated hash.
        bytes[4..16].copy_from_slice(&digest[20..32]);
        Hit(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HIT_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; HIT_LEN]) -> Hit {
        Hit(bytes)
    }
}

impl std::fmt::Display for Hit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, group) in self.0.chunks(2).enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}{:02x}", group[0], group[1])?;
        }
        Ok(())
    }
}

/// The local Host Identity: the long-term signing keypair this router
/// proves possession of during every Base Exchange.
pub struct HostIdentity {
    pub signing_key: SigningKey,
    pub hit: Hit,
}

impl HostIdentity {
    pub fn new(signing_key: SigningKey) -> HostIdentity {
        let hit = Hit::from_public_key(&signing_key.verifying_key());
        HostIdentity { signing_key, hit }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// How much a peer's Host Identity is trusted to originate traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    /// Listed in the local configuration; BEX may be initiated or
    /// accepted.
    Configured,
    /// A prior BEX with this HIT completed and an SA pair is active.
    Associated,
}

/// A remembered peer: the identity material and locator needed to
/// initiate or respond to a Base Exchange, plus whatever bridge-side MAC
/// addresses have been observed arriving behind that HIT.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub hit: Hit,
    pub verifying_key: VerifyingKey,
    pub locator: IpAddr,
    pub trust_state: TrustState,
    pub macs: Vec<MacAddr>,
}

impl PeerRecord {
    pub fn new(
        verifying_key: VerifyingKey,
        locator: IpAddr,
        trust_state: TrustState,
    ) -> PeerRecord {
        let hit = Hit::from_public_key(&verifying_key);
        PeerRecord { hit, verifying_key, locator, trust_state, macs: Vec::new() }
    }
}

/// The Host Identity store: the local identity plus every known peer,
/// indexed both by HIT (the BEX/SADB lookup key) and by MAC (the bridge
/// forwarding lookup key).
#[derive(Debug, Default)]
pub struct IdentityStore {
    peers: HashMap<Hit, PeerRecord>,
    mac_index: HashMap<MacAddr, Hit>,
}

impl IdentityStore {
    pub fn new() -> IdentityStore {
        IdentityStore::default()
    }

    pub fn insert(&mut self, peer: PeerRecord) {
        for mac in &peer.macs {
            self.mac_index.insert(*mac, peer.hit);
        }
        self.peers.insert(peer.hit, peer);
    }

    pub fn remove(&mut self, hit: &Hit) -> Option<PeerRecord> {
        let peer = self.peers.remove(hit)?;
        self.mac_index.retain(|_, owner| owner != hit);
        Some(peer)
    }

    pub fn resolve_by_hit(&self, hit: &Hit) -> Option<&PeerRecord> {
        self.peers.get(hit)
    }

    pub fn resolve_by_hit_mut(&mut self, hit: &Hit) -> Option<&mut PeerRecord> {
        self.peers.get_mut(hit)
    }

    pub fn resolve_by_mac(&self, mac: &MacAddr) -> Option<&PeerRecord> {
        self.mac_index.get(mac).and_then(|hit| self.peers.get(hit))
    }

    /// Records that `mac` was last seen arriving from behind `hit`,
    /// learning the source-MAC-to-peer binding the way an Ethernet
    /// bridge learns a forwarding table entry.
    pub fn learn_mac(&mut self, hit: &Hit, mac: MacAddr) {
        if let Some(peer) = self.peers.get_mut(hit) {
            if !peer.macs.contains(&mac) {
                peer.macs.push(mac);
            }
        }
        self.mac_index.insert(mac, *hit);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn gen_peer(locator: &str) -> PeerRecord {
        let signing_key = SigningKey::generate(&mut OsRng);
        PeerRecord::new(
            signing_key.verifying_key(),
            locator.parse().unwrap(),
            TrustState::Configured,
        )
    }

    #[test]
    fn hit_derivation_is_deterministic() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let a = Hit::from_public_key(&signing_key.verifying_key());
        let b = Hit::from_public_key(&signing_key.verifying_key());
        assert_eq!(a, b);
    }

    #[test]
    fn hit_carries_the_fixed_prefix() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let hit = Hit::from_public_key(&signing_key.verifying_key());
        assert_eq!(&hit.as_bytes()[0..4], &HIT_PREFIX);
    }

    #[test]
    fn store_resolves_by_hit_and_by_learned_mac() {
        let mut store = IdentityStore::new();
        let peer = gen_peer("192.0.2.1");
        let hit = peer.hit;
        store.insert(peer);

        assert!(store.resolve_by_hit(&hit).is_some());

        let mac = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
        store.learn_mac(&hit, mac);
        assert_eq!(store.resolve_by_mac(&mac).unwrap().hit, hit);
    }

    #[test]
    fn remove_clears_mac_index_entries() {
        let mut store = IdentityStore::new();
        let peer = gen_peer("192.0.2.1");
        let hit = peer.hit;
        store.insert(peer);
        let mac = MacAddr::new([0x02, 0, 0, 0, 0, 2]);
        store.learn_mac(&hit, mac);

        store.remove(&hit);
        assert!(store.resolve_by_mac(&mac).is_none());
    }
}
