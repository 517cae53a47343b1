//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Loads (or, on first run, generates and persists) the local Host
//! Identity keypair.

use ed25519_dalek::SigningKey;
use hip_core::error::ConfigError;
use hip_core::identity::HostIdentity;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    /// Colon-separated hex encoding of the Ed25519 signing key seed.
    private_key: String,
}

/// Loads the Host Identity from `path`, generating and persisting a
/// fresh one the first time the daemon is started against this path.
pub fn load_or_generate(path: &str) -> Result<HostIdentity, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let file: IdentityFile =
                toml::from_str(&raw).map_err(|error| ConfigError::Parse(error.to_string()))?;
            let seed = hip_utils::bytes::parse_hex_colon(&file.private_key)
                .ok()
                .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
                .ok_or_else(|| ConfigError::Parse("malformed signing key seed".to_owned()))?;
            Ok(HostIdentity::new(SigningKey::from_bytes(&seed)))
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            let signing_key = SigningKey::generate(&mut OsRng);
            let file = IdentityFile {
                private_key: hip_utils::bytes::format_hex_colon(&signing_key.to_bytes()),
            };
            let raw = toml::to_string_pretty(&file).expect("identity file always serializes");
            std::fs::write(path, raw)?;
            Ok(HostIdentity::new(signing_key))
        }
        Err(error) => Err(error.into()),
    }
}
