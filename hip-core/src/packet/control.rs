//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! HIP control packet framing: the fixed header plus the TLV parameter
//! area carrying the Base Exchange's puzzle, key material, and
//! authenticators.
//!
//! Parse/serialize follow the same shape as the BFD packet codec: a
//! `TLS_BUF`-backed `encode`, a `decode` that validates before
//! constructing anything, and a dedicated `DecodeError` (here shared
//! with [`super::ah`]). TLV ordering is the caller's responsibility —
//! [`ControlPacket::encode_upto`] exists precisely so the HMAC and
//! SIGNATURE parameters can be computed over every parameter that
//! precedes them on the wire.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{padded_len, DecodeError};
use crate::identity::{Hit, HIT_LEN};
use hip_utils::bytes::TLS_BUF;

bitflags! {
    /// The header's 2-byte `controls` bitfield (RFC 7401 §5.1). This
    /// core only carries the anonymous-HI bit through the wire
    /// unexamined: a BEX never needs to branch on it, since every Host
    /// Identity this router speaks with is configured, not anonymous.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Controls: u16 {
        const ANONYMOUS_HI = 0x0001;
    }
}

/// Fixed portion of the control header, before the TLV area: next
/// header (1), header length in 8-byte words minus one (1), packet
/// type (1), version (1), checksum (2), controls (2), sender HIT (16),
/// receiver HIT (16).
const FIXED_HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, Eq, FromPrimitive, PartialEq)]
pub enum PacketType {
    I1 = 1,
    R1 = 2,
    I2 = 3,
    R2 = 4,
    Update = 16,
    Close = 18,
    CloseAck = 19,
}

#[derive(Debug, Clone, Copy, Eq, FromPrimitive, PartialEq)]
pub enum DhGroup {
    Curve25519 = 1,
}

#[derive(Debug, Clone, Copy, Eq, FromPrimitive, PartialEq)]
pub enum TransformId {
    HmacSha256 = 1,
}

/// ESP transform id, carried on the wire for compatibility per the
/// reserved-field design note; never read by the data plane.
#[derive(Debug, Clone, Copy, Eq, FromPrimitive, PartialEq)]
pub enum EspTransformId {
    None = 0,
}

#[derive(Debug, Clone, Copy, Eq, FromPrimitive, PartialEq)]
pub(crate) enum ParamType {
    R1Counter = 128,
    Puzzle = 257,
    Solution = 321,
    DiffieHellman = 513,
    HipTransform = 577,
    EspTransform = 639,
    HostId = 705,
    Hmac = 769,
    HipSignature = 833,
}

/// One TLV parameter of a control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    R1Counter { counter: u64 },
    Puzzle { i: [u8; 8], k: u8 },
    Solution { j: u64 },
    DiffieHellman { group: DhGroup, public_value: Vec<u8> },
    HipTransform { selected: TransformId },
    EspTransform { selected: EspTransformId },
    HostId { public_key: Vec<u8> },
    Hmac { digest: Vec<u8> },
    HipSignature { signature: Vec<u8> },
}

impl Parameter {
    fn param_type(&self) -> ParamType {
        match self {
            Parameter::R1Counter { .. } => ParamType::R1Counter,
            Parameter::Puzzle { .. } => ParamType::Puzzle,
            Parameter::Solution { .. } => ParamType::Solution,
            Parameter::DiffieHellman { .. } => ParamType::DiffieHellman,
            Parameter::HipTransform { .. } => ParamType::HipTransform,
            Parameter::EspTransform { .. } => ParamType::EspTransform,
            Parameter::HostId { .. } => ParamType::HostId,
            Parameter::Hmac { .. } => ParamType::Hmac,
            Parameter::HipSignature { .. } => ParamType::HipSignature,
        }
    }

    fn encode_value(&self, buf: &mut BytesMut) {
        match self {
            Parameter::R1Counter { counter } => buf.put_u64(*counter),
            Parameter::Puzzle { i, k } => {
                buf.put_u8(*k);
                buf.put_bytes(0, 3);
                buf.put_slice(i);
            }
            Parameter::Solution { j } => buf.put_u64(*j),
            Parameter::DiffieHellman { group, public_value } => {
                buf.put_u8(*group as u8);
                buf.put_u16(public_value.len() as u16);
                buf.put_slice(public_value);
            }
            Parameter::HipTransform { selected } => buf.put_u16(*selected as u16),
            Parameter::EspTransform { selected } => buf.put_u16(*selected as u16),
            Parameter::HostId { public_key } => buf.put_slice(public_key),
            Parameter::Hmac { digest } => buf.put_slice(digest),
            Parameter::HipSignature { signature } => buf.put_slice(signature),
        }
    }

    // Encodes this parameter's TLV (type, length, value, padding) into
    // `buf`.
    fn encode(&self, buf: &mut BytesMut) {
        let param_type = self.param_type();
        let value_start_marker = buf.len();
        buf.put_u16(param_type as u16);
        // Length placeholder, patched below.
        buf.put_u16(0);
        let value_start = buf.len();
        self.encode_value(buf);
        let value_len = buf.len() - value_start;
        buf[value_start_marker + 2..value_start_marker + 4]
            .copy_from_slice(&(value_len as u16).to_be_bytes());

        let padded = padded_len(value_len);
        if padded > value_len {
            buf.put_bytes(0, padded - value_len);
        }
    }

    fn decode(param_type_raw: u16, value: &[u8]) -> Result<Option<Parameter>, DecodeError> {
        let Some(param_type) = ParamType::from_u16(param_type_raw) else {
            if param_type_raw < 1024 {
                return Err(DecodeError::UnknownCriticalParam(param_type_raw));
            }
            return Ok(None);
        };

        let mut buf = Bytes::copy_from_slice(value);
        let param = match param_type {
            ParamType::R1Counter => {
                if value.len() != 8 {
                    return Err(invalid_len(param_type_raw, value));
                }
                Parameter::R1Counter { counter: buf.try_get_u64()? }
            }
            ParamType::Puzzle => {
                if value.len() != 12 {
                    return Err(invalid_len(param_type_raw, value));
                }
                let k = buf.try_get_u8()?;
                buf.advance(3);
                let mut i = [0u8; 8];
                buf.copy_to_slice(&mut i);
                Parameter::Puzzle { i, k }
            }
            ParamType::Solution => {
                if value.len() != 8 {
                    return Err(invalid_len(param_type_raw, value));
                }
                Parameter::Solution { j: buf.try_get_u64()? }
            }
            ParamType::DiffieHellman => {
                if value.len() < 3 {
                    return Err(invalid_len(param_type_raw, value));
                }
                let group_raw = buf.try_get_u8()?;
                let Some(group) = DhGroup::from_u8(group_raw) else {
                    return Err(DecodeError::InvalidDhGroup(group_raw));
                };
                let pub_len = buf.try_get_u16()? as usize;
                if buf.remaining() != pub_len {
                    return Err(invalid_len(param_type_raw, value));
                }
                let public_value = buf.copy_to_bytes(pub_len).to_vec();
                Parameter::DiffieHellman { group, public_value }
            }
            ParamType::HipTransform => {
                if value.len() != 2 {
                    return Err(invalid_len(param_type_raw, value));
                }
                let raw = buf.try_get_u16()?;
                let Some(selected) = TransformId::from_u16(raw) else {
                    return Err(DecodeError::InvalidTransform(raw));
                };
                Parameter::HipTransform { selected }
            }
            ParamType::EspTransform => {
                if value.len() != 2 {
                    return Err(invalid_len(param_type_raw, value));
                }
                let raw = buf.try_get_u16()?;
                let Some(selected) = EspTransformId::from_u16(raw) else {
                    return Err(DecodeError::InvalidTransform(raw));
                };
                Parameter::EspTransform { selected }
            }
            ParamType::HostId => Parameter::HostId { public_key: value.to_vec() },
            ParamType::Hmac => Parameter::Hmac { digest: value.to_vec() },
            ParamType::HipSignature => {
                Parameter::HipSignature { signature: value.to_vec() }
            }
        };
        Ok(Some(param))
    }
}

fn invalid_len(param_type: u16, value: &[u8]) -> DecodeError {
    DecodeError::InvalidParamLength { param_type, length: value.len() as u16 }
}

/// A HIP control packet: fixed header plus ordered TLV parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub packet_type: PacketType,
    pub controls: Controls,
    pub sender_hit: Hit,
    pub receiver_hit: Hit,
    pub params: Vec<Parameter>,
}

impl ControlPacket {
    pub const VERSION: u8 = 1;

    pub fn new(
        packet_type: PacketType,
        sender_hit: Hit,
        receiver_hit: Hit,
        params: Vec<Parameter>,
    ) -> ControlPacket {
        ControlPacket {
            packet_type,
            controls: Controls::empty(),
            sender_hit,
            receiver_hit,
            params,
        }
    }

    /// Builds a packet carrying non-default `controls` bits (e.g. the
    /// anonymous-HI bit), in place of the all-zero default [`Self::new`]
    /// produces.
    pub fn with_controls(
        packet_type: PacketType,
        controls: Controls,
        sender_hit: Hit,
        receiver_hit: Hit,
        params: Vec<Parameter>,
    ) -> ControlPacket {
        ControlPacket { packet_type, controls, sender_hit, receiver_hit, params }
    }

    /// Encodes the full packet.
    pub fn encode(&self) -> BytesMut {
        self.encode_upto(self.params.len())
    }

    /// Encodes the header plus the first `param_count` parameters. Used
    /// to compute the HMAC and SIGNATURE TLVs, which must cover exactly
    /// the parameters preceding them on the wire.
    pub fn encode_upto(&self, param_count: usize) -> BytesMut {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            buf.put_u8(0); // next_header, unused on the control path
            let hdr_len_marker = buf.len();
            buf.put_u8(0); // header length placeholder
            buf.put_u8(self.packet_type as u8);
            buf.put_u8(Self::VERSION);
            buf.put_u16(0); // checksum, left unset: integrity is TLV-covered
            buf.put_u16(self.controls.bits());
            buf.put_slice(self.sender_hit.as_bytes());
            buf.put_slice(self.receiver_hit.as_bytes());

            for param in self.params.iter().take(param_count) {
                param.encode(&mut buf);
            }

            let hdr_len_words = (buf.len() - 8) / 8;
            buf[hdr_len_marker] = hdr_len_words as u8;
            buf.clone()
        })
    }

    pub fn decode(data: &[u8]) -> Result<ControlPacket, DecodeError> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(DecodeError::IncompletePacket);
        }
        let mut buf = Bytes::copy_from_slice(data);

        let _next_header = buf.try_get_u8()?;
        let hdr_len = buf.try_get_u8()?;
        let packet_type_raw = buf.try_get_u8()?;
        let Some(packet_type) = PacketType::from_u8(packet_type_raw) else {
            return Err(DecodeError::InvalidPacketType(packet_type_raw));
        };
        let version = buf.try_get_u8()?;
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let _checksum = buf.try_get_u16()?;
        let controls_raw = buf.try_get_u16()?;
        let controls = Controls::from_bits_truncate(controls_raw);

        let total_len = 8 + (hdr_len as usize) * 8;
        if total_len > data.len() {
            return Err(DecodeError::InvalidHeaderLength(hdr_len));
        }

        let mut sender_hit = [0u8; HIT_LEN];
        buf.copy_to_slice(&mut sender_hit);
        let mut receiver_hit = [0u8; HIT_LEN];
        buf.copy_to_slice(&mut receiver_hit);

        let mut params = Vec::new();
        let mut remaining = &data[FIXED_HEADER_LEN..total_len];
        while !remaining.is_empty() {
            if remaining.len() < 4 {
                return Err(DecodeError::IncompletePacket);
            }
            let param_type = u16::from_be_bytes([remaining[0], remaining[1]]);
            let length = u16::from_be_bytes([remaining[2], remaining[3]]) as usize;
            let padded = padded_len(length);
            if remaining.len() < 4 + padded {
                return Err(DecodeError::TruncatedParam(param_type));
            }
            let value = &remaining[4..4 + length];
            if let Some(param) = Parameter::decode(param_type, value)? {
                params.push(param);
            }
            remaining = &remaining[4 + padded..];
        }

        Ok(ControlPacket {
            packet_type,
            controls,
            sender_hit: Hit::from_bytes(sender_hit),
            receiver_hit: Hit::from_bytes(receiver_hit),
            params,
        })
    }

    pub fn param(&self, predicate: impl Fn(&Parameter) -> bool) -> Option<&Parameter> {
        self.params.iter().find(|p| predicate(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hit(byte: u8) -> Hit {
        Hit::from_bytes([byte; HIT_LEN])
    }

    #[test]
    fn round_trips_an_i1_with_no_parameters() {
        let packet = ControlPacket::new(
            PacketType::I1,
            sample_hit(0xaa),
            sample_hit(0xbb),
            vec![],
        );
        let encoded = packet.encode();
        let decoded = ControlPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trips_the_anonymous_hi_controls_bit() {
        let packet = ControlPacket::with_controls(
            PacketType::I1,
            Controls::ANONYMOUS_HI,
            sample_hit(0xaa),
            sample_hit(0xbb),
            vec![],
        );
        let encoded = packet.encode();
        let decoded = ControlPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.controls.contains(Controls::ANONYMOUS_HI));
    }

    #[test]
    fn round_trips_an_r1_with_puzzle_and_dh_and_hostid() {
        let params = vec![
            Parameter::R1Counter { counter: 7 },
            Parameter::Puzzle { i: [1, 2, 3, 4, 5, 6, 7, 8], k: 10 },
            Parameter::DiffieHellman {
                group: DhGroup::Curve25519,
                public_value: vec![0x11; 32],
            },
            Parameter::HipTransform { selected: TransformId::HmacSha256 },
            Parameter::EspTransform { selected: EspTransformId::None },
            Parameter::HostId { public_key: vec![0x22; 32] },
            Parameter::HipSignature { signature: vec![0x33; 64] },
        ];
        let packet = ControlPacket::new(
            PacketType::R1,
            sample_hit(1),
            sample_hit(2),
            params,
        );
        let encoded = packet.encode();
        let decoded = ControlPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn unknown_critical_parameter_is_rejected() {
        let packet = ControlPacket::new(
            PacketType::I2,
            sample_hit(1),
            sample_hit(2),
            vec![Parameter::Solution { j: 42 }],
        );
        let mut encoded = packet.encode();
        // Corrupt the Solution parameter's type to an unassigned
        // critical value (< 1024) not present in ParamType.
        encoded[40] = 0x03;
        encoded[41] = 0x00;

        let result = ControlPacket::decode(&encoded);
        assert!(matches!(result, Err(DecodeError::UnknownCriticalParam(_))));
    }

    #[test]
    fn unknown_non_critical_parameter_is_skipped() {
        let packet = ControlPacket::new(
            PacketType::I2,
            sample_hit(1),
            sample_hit(2),
            vec![Parameter::Solution { j: 42 }],
        );
        let mut encoded = packet.encode();
        // Append a well-formed but unrecognized non-critical (>= 1024)
        // parameter after the existing ones.
        encoded.put_u16(2000);
        encoded.put_u16(4);
        encoded.put_u32(0xdead_beef);
        let hdr_len_words = (encoded.len() - 8) / 8;
        encoded[1] = hdr_len_words as u8;

        let decoded = ControlPacket::decode(&encoded).unwrap();
        assert_eq!(decoded.params.len(), 1);
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let result = ControlPacket::decode(&[0u8; 10]);
        assert_eq!(result, Err(DecodeError::IncompletePacket));
    }

    #[test]
    fn encode_upto_excludes_trailing_parameters() {
        let params = vec![
            Parameter::Solution { j: 1 },
            Parameter::Hmac { digest: vec![0; 32] },
            Parameter::HipSignature { signature: vec![0; 64] },
        ];
        let packet =
            ControlPacket::new(PacketType::I2, sample_hit(1), sample_hit(2), params);
        let hmac_covered = packet.encode_upto(1);
        let decoded = ControlPacket::decode(&hmac_covered).unwrap();
        assert_eq!(decoded.params, vec![Parameter::Solution { j: 1 }]);
    }
}
