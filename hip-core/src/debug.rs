//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::fsm::State;
use crate::identity::Hit;

/// HIP-VPLS debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    PeerCreate(&'a Hit),
    PeerDelete(&'a Hit),
    FsmTransition(&'a Hit, State, State),
    BexTrigger(&'a Hit),
    BexEstablished(&'a Hit),
    BexFailed(&'a Hit),
    SaPairCreated(&'a Hit),
    SaPairTorndown(&'a Hit),
    FrameQueued(&'a Hit, usize),
    FrameQueueDrained(&'a Hit, usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    pub(crate) fn log(&self) {
        match self {
            Debug::PeerCreate(hit) | Debug::PeerDelete(hit) => {
                debug_span!("peer", %hit).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FsmTransition(hit, old_state, new_state) => {
                debug_span!("peer", %hit).in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                });
            }
            Debug::BexTrigger(hit)
            | Debug::BexEstablished(hit)
            | Debug::BexFailed(hit)
            | Debug::SaPairCreated(hit)
            | Debug::SaPairTorndown(hit) => {
                debug_span!("peer", %hit).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FrameQueued(hit, depth)
            | Debug::FrameQueueDrained(hit, depth) => {
                debug_span!("peer", %hit).in_scope(|| {
                    debug!(%depth, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PeerCreate(..) => write!(f, "peer record created"),
            Debug::PeerDelete(..) => write!(f, "peer record deleted"),
            Debug::FsmTransition(..) => write!(f, "BEX state transition"),
            Debug::BexTrigger(..) => write!(f, "base exchange triggered"),
            Debug::BexEstablished(..) => write!(f, "base exchange established"),
            Debug::BexFailed(..) => write!(f, "base exchange failed"),
            Debug::SaPairCreated(..) => write!(f, "SA pair created"),
            Debug::SaPairTorndown(..) => write!(f, "SA pair torn down"),
            Debug::FrameQueued(..) => write!(f, "frame enqueued pending BEX"),
            Debug::FrameQueueDrained(..) => write!(f, "frame queue drained"),
        }
    }
}
