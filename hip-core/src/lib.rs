//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! The HIP Base Exchange state machine, the IPsec-AH data plane, and the
//! Security Association Database / Host Identity store that binds them
//! together: the packet-plane engine of a HIP-based VPLS router.
//!
//! Module map, leaves first (mirrors the component table of the
//! protocol this crate implements):
//!
//! - [`crypto`] (C1): HMAC/hash, Curve25519 DH, Ed25519 signatures, the
//!   per-direction KDF, and the HIP puzzle solver/verifier.
//! - [`packet`] (C2): control-packet and AH wire codecs.
//! - [`identity`] (C3): the local Host Identity and the peer table keyed
//!   by Host Identity Tag.
//! - [`sadb`] (C4): the Security Association Database and anti-replay
//!   window.
//! - [`fsm`] (C5): the per-peer Base Exchange state machine and the
//!   stateless R1 responder.
//! - [`dataplane`] (C6): AH encapsulation/decapsulation.
//! - [`router`] (C7): the single-owner protocol worker tying the above
//!   together, plus [`tasks`] for the I/O and timer tasks that feed it.
//!
//! [`network`] defines the narrow bridge/backbone duplex traits at
//! which everything out of scope (TAP plumbing, topology harness,
//! process supervision) is kept out of this crate. [`error`] is the
//! taxonomy every component above reports through.

pub mod crypto;
mod debug;
pub mod error;
pub mod dataplane;
pub mod fsm;
pub mod identity;
pub mod network;
pub mod packet;
pub mod router;
pub mod sadb;
pub mod tasks;
