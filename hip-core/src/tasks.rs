//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Background tasks feeding the protocol worker: the bridge reader, the
//! backbone reader, and per-peer BEX retransmit timers.
//!
//! Topology (compare `holo-bfd/src/tasks.rs`'s diagram):
//!
//! ```text
//!                                +--------------+
//!                bridge_rx (1x) -> |              |
//!             backbone_rx (1x) -> |    router    | -> (1x) bridge_tx
//!     retransmit_timer (Nx) -> |              | -> (1x) backbone_tx
//!                                +--------------+
//! ```
//!
//! The worker never blocks on I/O; these tasks own every suspension
//! point and hand finished events to the worker over an mpsc channel.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hip_utils::task::{Task, TimeoutTask};
use hip_utils::Sender;
use tracing::Instrument;

use crate::identity::Hit;
use crate::network::{BackboneDuplex, BridgeDuplex};

pub mod messages {
    use std::net::IpAddr;

    use super::*;

    pub type ProtocolInputMsg = input::ProtocolMsg;

    pub mod input {
        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            BridgeFrame(Bytes),
            BackboneDatagram { from: IpAddr, protocol: u8, datagram: Bytes },
            RetransmitTimer { peer_hit: Hit },
        }
    }
}

/// Reads whole Ethernet frames off the bridge side and forwards them to
/// the worker. Supervised: a panic while handling a malformed frame must
/// never bring down the one bridge reader this router has.
pub(crate) fn bridge_rx(
    bridge: Arc<dyn BridgeDuplex>,
    input_txp: &Sender<messages::input::ProtocolMsg>,
) -> Task<()> {
    let input_txp = input_txp.clone();
    Task::spawn_supervised(move || {
        let bridge = bridge.clone();
        let input_txp = input_txp.clone();
        async move {
            loop {
                match bridge.recv().await {
                    Ok(frame) => {
                        let msg = messages::input::ProtocolMsg::BridgeFrame(frame);
                        if input_txp.send(msg).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "bridge read failed");
                        return;
                    }
                }
            }
        }
        .in_current_span()
    })
}

/// Reads IP datagrams off the backbone side and forwards them to the
/// worker. Supervised for the same reason as [`bridge_rx`].
pub(crate) fn backbone_rx(
    backbone: Arc<dyn BackboneDuplex>,
    input_txp: &Sender<messages::input::ProtocolMsg>,
) -> Task<()> {
    let input_txp = input_txp.clone();
    Task::spawn_supervised(move || {
        let backbone = backbone.clone();
        let input_txp = input_txp.clone();
        async move {
            loop {
                match backbone.recv().await {
                    Ok((from, protocol, datagram)) => {
                        let msg = messages::input::ProtocolMsg::BackboneDatagram {
                            from,
                            protocol,
                            datagram,
                        };
                        if input_txp.send(msg).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "backbone read failed");
                        return;
                    }
                }
            }
        }
        .in_current_span()
    })
}

/// Arms a one-shot retransmit timer for `peer_hit`'s in-flight BEX
/// packet. Reset (rather than dropped and recreated) on every
/// retransmission by the caller via `TimeoutTask::reset`.
pub(crate) fn retransmit_timer(
    peer_hit: Hit,
    timeout: Duration,
    input_txp: &Sender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let input_txp = input_txp.clone();
    TimeoutTask::new(timeout, move || {
        let input_txp = input_txp.clone();
        async move {
            let msg = messages::input::ProtocolMsg::RetransmitTimer { peer_hit };
            let _ = input_txp.send(msg).await;
        }
    })
}
