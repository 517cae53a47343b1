//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! Wire codec (component C2): parsing and serialization for HIP control
//! packets and IPsec-AH datagrams.
//!
//! Split the way the teacher splits BFD's single mandatory section from
//! its optional authentication section: [`control`] owns the HIP header
//! and TLV parameter area, [`ah`] owns the much smaller AH header. Both
//! share one [`DecodeError`] taxonomy and lean on the same
//! [`hip_utils::bytes::TLS_BUF`] scratch buffer for encoding.

pub mod ah;
pub mod control;

use bytes::TryGetError;

/// IP protocol number carrying HIP control packets on the backbone.
pub const IPPROTO_HIP: u8 = 139;
/// IP protocol number carrying AH datagrams on the backbone (RFC 4302).
pub const IPPROTO_AH: u8 = 51;

/// Wire codec decode errors, shared by the control and AH parsers.
/// Every variant maps to the `MalformedPacket` taxonomy entry; none of
/// them indicate a cryptographic failure.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    IncompletePacket,
    InvalidVersion(u8),
    InvalidPacketType(u8),
    InvalidHeaderLength(u8),
    InvalidParamLength { param_type: u16, length: u16 },
    TruncatedParam(u16),
    UnknownCriticalParam(u16),
    InvalidDhGroup(u8),
    InvalidTransform(u16),
    ReadOutOfBounds,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => write!(f, "incomplete packet"),
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid HIP version: {version}")
            }
            DecodeError::InvalidPacketType(packet_type) => {
                write!(f, "invalid HIP packet type: {packet_type}")
            }
            DecodeError::InvalidHeaderLength(len) => {
                write!(f, "invalid header length: {len}")
            }
            DecodeError::InvalidParamLength { param_type, length } => {
                write!(
                    f,
                    "invalid length {length} for parameter type {param_type}"
                )
            }
            DecodeError::TruncatedParam(param_type) => {
                write!(f, "truncated parameter, type {param_type}")
            }
            DecodeError::UnknownCriticalParam(param_type) => {
                write!(f, "unknown critical parameter, type {param_type}")
            }
            DecodeError::InvalidDhGroup(group) => {
                write!(f, "unsupported DH group: {group}")
            }
            DecodeError::InvalidTransform(transform) => {
                write!(f, "unsupported transform id: {transform}")
            }
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

/// Rounds `len` up to the next 8-byte boundary, the TLV padding
/// alignment mandated for the HIP parameter area.
pub(crate) fn padded_len(len: usize) -> usize {
    hip_utils::bytes::padded_len(len, 8)
}
