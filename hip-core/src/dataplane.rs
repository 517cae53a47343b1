//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! AH data plane (component C6): encapsulates outgoing Ethernet frames
//! into authenticated AH datagrams and verifies/strips incoming ones.
//!
//! Grounded on the keyed-digest dispatch in `holo-ospf/src/packet/auth.rs`
//! (compute over header-with-digest-zeroed, then compare), generalized
//! from OSPF's single flooding checksum to a per-packet SPI-keyed ICV.
//! The ICV comparison deliberately does not use the teacher's plain
//! `==`: a per-packet AH verification result is attacker-observable
//! timing surface in a way OSPF's digest check is not, so this one
//! comparison runs through `subtle::ConstantTimeEq` instead.

use bytes::Bytes;
use subtle::ConstantTimeEq;

use crate::crypto;
use crate::error::Error;
use crate::packet::ah::{AhDatagram, NEXT_HEADER_ETHERNET};
use crate::sadb::{Sa, Sadb, Spi};

/// Truncated ICV length, in bytes, for the one HMAC transform this core
/// negotiates (HMAC-SHA-256-128, the common AH truncation of a 32-byte
/// digest).
pub const ICV_LEN: usize = 16;

/// Encapsulates an inner Ethernet frame under the given outbound SA,
/// producing the AH datagram to hand to the backbone side. Mirrors
/// §4.6 step-for-step: reserve `seq`, build the header with a zeroed
/// ICV, compute the ICV over header-plus-payload, splice it in.
pub fn encapsulate(out_sa: &mut Sa, frame: &Bytes) -> Result<AhDatagram, Error> {
    let seq = Sadb::next_seq(out_sa).ok_or(Error::SaExhausted)?;

    let mut header =
        AhDatagram::header_with_icv_zeroed(NEXT_HEADER_ETHERNET, out_sa.spi, seq, ICV_LEN);
    header.extend_from_slice(frame);
    let icv = crypto::hmac(&out_sa.hmac_key, &header)[..ICV_LEN].to_vec();

    Ok(AhDatagram::new(out_sa.spi, seq, icv, frame.clone()))
}

/// Decapsulates a backbone datagram. Performs, in the mandatory order:
/// SPI lookup, tentative replay check, ICV verification, replay commit.
/// Returns the inner Ethernet frame on success.
pub fn decapsulate(sadb: &mut Sadb, data: &[u8]) -> Result<Bytes, Error> {
    let datagram = AhDatagram::decode(data, ICV_LEN)?;

    let spi = datagram.spi;
    // Step (b): SPI lookup.
    let sa = sadb.lookup_in(spi).ok_or(Error::UnknownSpi(spi))?;
    let hmac_key = sa.hmac_key;

    // Step (c): tentative replay pre-check. Side-effect-free: nothing is
    // marked as seen until the ICV verifies below.
    if !Sadb::would_accept_replay(sa, datagram.seq) {
        return Err(Error::ReplayDetected { spi, seq: datagram.seq });
    }

    // Step (d): ICV verification, constant time.
    let zeroed = AhDatagram::header_with_icv_zeroed(
        datagram.next_header,
        datagram.spi,
        datagram.seq,
        ICV_LEN,
    );
    let mut expected_input = zeroed;
    expected_input.extend_from_slice(&datagram.payload);
    let expected = crypto::hmac(&hmac_key, &expected_input);

    if expected[..ICV_LEN].ct_eq(&datagram.icv[..]).unwrap_u8() == 0 {
        // Authentication failed: the replay window is untouched, since
        // step (c) above never mutates it. A second presentation of
        // this same seq still goes through the full check again.
        return Err(Error::AuthFailure);
    }

    // Step (e): replay commit, now that authentication succeeded.
    let sa = sadb.lookup_in_mut(spi).ok_or(Error::UnknownSpi(spi))?;
    Sadb::commit_replay(sa, datagram.seq);

    // Step (f): deliver.
    Ok(datagram.payload)
}
