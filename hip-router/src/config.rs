//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Startup configuration: the TOML file naming the HI keypair, the peer
//! table, the bridge/backbone interfaces, and logging.
//!
//! Grounded on `holo-daemon/src/config.rs`'s `Config::load` (parse, fall
//! back to defaults on error, `deny_unknown_fields` everywhere) and its
//! `Logging`/`LoggingFmt` shape, simplified per the ambient-stack design
//! note: journald and the gRPC/gNMI northbound are genuinely unused by a
//! single-purpose router with no management-plane surface, so only the
//! file and stdout layers are carried forward.

use std::net::Ipv4Addr;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the local Host Identity keypair file.
    pub identity_key_path: String,
    /// Path to the static peer table file.
    pub peer_table_path: String,
    pub bridge: Bridge,
    pub backbone: Backbone,
    pub logging: Logging,
    /// Bound on each peer's pre-BEX frame queue.
    pub queue_bound: usize,
    /// HIP puzzle difficulty, in bits of required work.
    pub puzzle_k: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bridge {
    /// Path to the already-attached bridge-side device node (a TAP
    /// device or packet socket opened and configured by the external
    /// supervisor; attaching it is out of this daemon's scope).
    pub device_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Backbone {
    /// Local IPv4 address the HIP/AH raw sockets bind to.
    pub local_addr: Ipv4Addr,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/hipd/hipd.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => {
                toml::from_str(&config_str).expect("failed to parse configuration file")
            }
            Err(err) => {
                eprintln!("failed to load configuration file: {err}");
                eprintln!("falling back to default configuration...");
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            identity_key_path: "/etc/hipd/identity.toml".to_owned(),
            peer_table_path: "/etc/hipd/peers.toml".to_owned(),
            bridge: Default::default(),
            backbone: Default::default(),
            logging: Default::default(),
            queue_bound: hip_core::router::DEFAULT_QUEUE_BOUND,
            puzzle_k: hip_core::fsm::DEFAULT_PUZZLE_K,
        }
    }
}

impl Default for Bridge {
    fn default() -> Bridge {
        Bridge { device_path: "/dev/hip-vpls/bridge0".to_owned() }
    }
}

impl Default for Backbone {
    fn default() -> Backbone {
        Backbone { local_addr: Ipv4Addr::UNSPECIFIED }
    }
}

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: true,
            dir: "/var/log".to_owned(),
            name: "hipd.log".to_owned(),
        }
    }
}

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout { enabled: false }
    }
}
