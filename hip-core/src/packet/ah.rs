//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! IPsec Authentication Header framing, laid out exactly per RFC 4302:
//! `next_header(1), payload_len(1), reserved(2)=0, spi(4), seq(4),
//! icv(variable, multiple of 4 bytes)`, followed by the inner payload.
//!
//! This module only knows the wire shape. ICV computation, SPI lookup,
//! and replay handling belong to [`crate::dataplane`]; keeping them
//! apart mirrors how the teacher's BFD codec never touches session
//! state.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::DecodeError;
use crate::sadb::Spi;
use hip_utils::bytes::TLS_BUF;

/// Next-header value identifying the AH payload as a raw Ethernet
/// frame. Chosen from the IANA "experimentation" range (RFC 3692) since
/// carrying bridged Ethernet frames over AH has no assigned protocol
/// number of its own.
pub const NEXT_HEADER_ETHERNET: u8 = 0xFD;

const FIXED_PREFIX_LEN: usize = 12;

/// A parsed AH datagram: header fields, the ICV (length implied by the
/// negotiated HMAC transform), and the inner payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AhDatagram {
    pub next_header: u8,
    pub spi: Spi,
    pub seq: u32,
    pub icv: Vec<u8>,
    pub payload: Bytes,
}

impl AhDatagram {
    pub fn new(spi: Spi, seq: u32, icv: Vec<u8>, payload: Bytes) -> AhDatagram {
        AhDatagram { next_header: NEXT_HEADER_ETHERNET, spi, seq, icv, payload }
    }

    /// `payload_len` field per RFC 4302: the AH header's length in
    /// 32-bit words, minus 2.
    fn payload_len_field(icv_len: usize) -> u8 {
        ((FIXED_PREFIX_LEN + icv_len) / 4 - 2) as u8
    }

    pub fn encode(&self) -> BytesMut {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            buf.put_u8(self.next_header);
            buf.put_u8(Self::payload_len_field(self.icv.len()));
            buf.put_u16(0);
            buf.put_u32(self.spi.0);
            buf.put_u32(self.seq);
            buf.put_slice(&self.icv);
            buf.put_slice(&self.payload);
            buf.clone()
        })
    }

    /// Builds the header-with-ICV-zeroed bytes over which the ICV
    /// itself is computed (encapsulation) or recomputed (decapsulation
    /// verification). Does not include the payload.
    pub fn header_with_icv_zeroed(
        next_header: u8,
        spi: Spi,
        seq: u32,
        icv_len: usize,
    ) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FIXED_PREFIX_LEN + icv_len);
        buf.put_u8(next_header);
        buf.put_u8(Self::payload_len_field(icv_len));
        buf.put_u16(0);
        buf.put_u32(spi.0);
        buf.put_u32(seq);
        buf.put_bytes(0, icv_len);
        buf
    }

    /// Decodes an AH datagram given the ICV length implied by the
    /// inbound SA's transform (the wire format carries no explicit ICV
    /// length field; RFC 4302 leaves it to the negotiated transform).
    pub fn decode(data: &[u8], icv_len: usize) -> Result<AhDatagram, DecodeError> {
        if data.len() < FIXED_PREFIX_LEN + icv_len {
            return Err(DecodeError::IncompletePacket);
        }
        let mut buf = Bytes::copy_from_slice(data);

        let next_header = buf.try_get_u8()?;
        let payload_len = buf.try_get_u8()?;
        if payload_len != Self::payload_len_field(icv_len) {
            return Err(DecodeError::InvalidHeaderLength(payload_len));
        }
        let _reserved = buf.try_get_u16()?;
        let spi = Spi(buf.try_get_u32()?);
        let seq = buf.try_get_u32()?;
        let icv = buf.copy_to_bytes(icv_len).to_vec();
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(AhDatagram { next_header, spi, seq, icv, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_datagram() {
        let datagram = AhDatagram::new(
            Spi(0xdead_beef),
            1,
            vec![0xaa; 16],
            Bytes::from_static(b"an ethernet frame"),
        );
        let encoded = datagram.encode();
        let decoded = AhDatagram::decode(&encoded, 16).unwrap();
        assert_eq!(decoded, datagram);
    }

    #[test]
    fn rejects_truncated_header() {
        let result = AhDatagram::decode(&[0u8; 8], 16);
        assert_eq!(result, Err(DecodeError::IncompletePacket));
    }

    #[test]
    fn header_with_icv_zeroed_matches_encoded_prefix() {
        let datagram =
            AhDatagram::new(Spi(1), 2, vec![0u8; 16], Bytes::from_static(b"x"));
        let encoded = datagram.encode();
        let zeroed =
            AhDatagram::header_with_icv_zeroed(datagram.next_header, datagram.spi, datagram.seq, 16);
        assert_eq!(&encoded[0..12], &zeroed[0..12]);
        assert!(zeroed[12..28].iter().all(|&b| b == 0));
    }
}
