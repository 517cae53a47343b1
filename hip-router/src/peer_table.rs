//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Loads the static peer table: one entry per Host Identity this router
//! is willing to run a Base Exchange with, plus the backbone locator it
//! is reached at.
//!
//! There is no peer discovery or northbound provisioning in scope for
//! this daemon, so the table is read once at startup from a TOML file
//! and never updated short of a restart.

use std::net::IpAddr;

use ed25519_dalek::VerifyingKey;
use hip_core::error::ConfigError;
use hip_core::identity::{IdentityStore, PeerRecord, TrustState};
use hip_utils::mac_addr::MacAddr;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PeerTableFile {
    #[serde(rename = "peer", default)]
    peers: Vec<PeerEntry>,
}

#[derive(Debug, Deserialize)]
struct PeerEntry {
    /// Human-readable label, for logging only; the HIT is derived from
    /// `public_key` and is what the router actually keys on.
    name: String,
    /// Colon-separated hex encoding of the peer's Ed25519 public key.
    public_key: String,
    /// Backbone address this peer's control and AH traffic is sent to.
    locator: IpAddr,
    /// Bridge-side MAC addresses already known to sit behind this peer,
    /// learned entries aside.
    #[serde(default)]
    macs: Vec<String>,
}

/// Reads and parses the peer table file at `path`, returning an
/// [`IdentityStore`] populated with one [`PeerRecord`] per entry.
pub fn load(path: &str) -> Result<IdentityStore, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let file: PeerTableFile =
        toml::from_str(&raw).map_err(|error| ConfigError::Parse(error.to_string()))?;

    let mut store = IdentityStore::new();
    for entry in file.peers {
        let key_bytes = hip_utils::bytes::parse_hex_colon(&entry.public_key)
            .ok()
            .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
            .ok_or_else(|| ConfigError::Parse(format!("peer '{}': invalid public key", entry.name)))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| ConfigError::Parse(format!("peer '{}': invalid public key", entry.name)))?;

        let mut peer = PeerRecord::new(verifying_key, entry.locator, TrustState::Configured);
        for mac in &entry.macs {
            let parsed: MacAddr = mac.parse().map_err(|_| {
                ConfigError::Parse(format!("peer '{}': invalid MAC address '{mac}'", entry.name))
            })?;
            peer.macs.push(parsed);
        }

        tracing::info!(name = %entry.name, hit = %peer.hit, "loaded peer");
        store.insert(peer);
    }
    Ok(store)
}
