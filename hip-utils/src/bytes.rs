//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;

use bytes::BytesMut;

thread_local! {
    // Reusable encode buffer, avoiding an allocation on every packet sent.
    pub static TLS_BUF: RefCell<BytesMut> = RefCell::new(BytesMut::with_capacity(2048));
}

/// Rounds `len` up to the next multiple of `align`, as required by the HIP
/// TLV parameter padding rule (8-byte alignment) and the AH ICV padding
/// rule (4-byte alignment).
pub fn padded_len(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}

/// Parses the colon-separated hex notation used by the daemon's identity
/// and peer table configuration files (e.g. `"de:ad:be:ef"`), the same
/// notation the teacher accepts for a keychain's hexadecimal key string.
pub fn parse_hex_colon(s: &str) -> Result<Vec<u8>, std::num::ParseIntError> {
    s.split(':').map(|group| u8::from_str_radix(group, 16)).collect()
}

/// Formats `bytes` as colon-separated hex, the inverse of
/// [`parse_hex_colon`].
pub fn format_hex_colon(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_up_to_alignment() {
        assert_eq!(padded_len(0, 8), 0);
        assert_eq!(padded_len(1, 8), 8);
        assert_eq!(padded_len(8, 8), 8);
        assert_eq!(padded_len(9, 8), 16);
        assert_eq!(padded_len(3, 4), 4);
    }

    #[test]
    fn hex_colon_round_trips() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        let formatted = format_hex_colon(&bytes);
        assert_eq!(formatted, "de:ad:be:ef");
        assert_eq!(parse_hex_colon(&formatted).unwrap(), bytes);
    }

    #[test]
    fn hex_colon_rejects_non_hex() {
        assert!(parse_hex_colon("zz:00").is_err());
    }
}
