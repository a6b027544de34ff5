// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexCrypt.
//
// PlexCrypt is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexCrypt is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexCrypt. If not, see <https://www.gnu.org/licenses/>.

//! 256-bit sysfs mask encoding
//!
//! The AP bus renders adapter/domain masks as `0x` followed by 64 hex digits
//! and a newline. Bit `i` lives in byte `i / 8` at position `0x80 >> (i % 8)`,
//! i.e. bit 0 is the most significant bit of the first byte.

/// Encode a mask with the given fill byte and the listed bit indices flipped.
///
/// With `fill == 0x00` the indices are set; with `fill == 0xff` they are
/// cleared.
pub fn encode_256bit_mask(fill: u8, mods: &[u16]) -> String {
    let mut mask = [fill; 32];
    for &m in mods {
        let m = m as usize % 256;
        let b: u8 = 0x80 >> (m % 8);
        if fill == 0 {
            mask[m / 8] |= b;
        } else {
            mask[m / 8] &= !b;
        }
    }
    let mut out = String::with_capacity(2 + 64 + 1);
    out.push_str("0x");
    for byte in mask {
        out.push_str(&format!("{:02x}", byte));
    }
    out.push('\n');
    out
}

/// Decode a mask file body back into the list of set bit indices.
pub fn decode_256bit_mask(s: &str) -> Option<Vec<u16>> {
    let hex = s.trim().strip_prefix("0x")?;
    if hex.len() != 64 {
        return None;
    }
    let mut bits = Vec::new();
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let byte = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
        for j in 0..8 {
            if byte & (0x80 >> j) != 0 {
                bits.push((i * 8 + j) as u16);
            }
        }
    }
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mask() {
        let s = encode_256bit_mask(0x00, &[]);
        assert_eq!(s.len(), 2 + 64 + 1);
        assert_eq!(s, format!("0x{}\n", "0".repeat(64)));
        assert_eq!(decode_256bit_mask(&s).unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn test_full_mask() {
        let s = encode_256bit_mask(0xff, &[]);
        assert_eq!(s, format!("0x{}\n", "f".repeat(64)));
        assert_eq!(decode_256bit_mask(&s).unwrap().len(), 256);
    }

    #[test]
    fn test_single_bit_positions() {
        // bit 0 is the MSB of the first byte
        assert!(encode_256bit_mask(0x00, &[0]).starts_with("0x80"));
        assert!(encode_256bit_mask(0x00, &[3]).starts_with("0x10"));
        assert!(encode_256bit_mask(0x00, &[8]).starts_with("0x0080"));
    }

    #[test]
    fn test_roundtrip_is_exact() {
        let want = vec![0u16, 3, 64, 130, 255];
        let s = encode_256bit_mask(0x00, &want);
        assert_eq!(decode_256bit_mask(&s).unwrap(), want);
    }

    #[test]
    fn test_fill_with_cleared_bits() {
        let s = encode_256bit_mask(0xff, &[0]);
        assert!(s.starts_with("0x7f"));
        assert_eq!(decode_256bit_mask(&s).unwrap().len(), 255);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_256bit_mask("0x1234").is_none());
        assert!(decode_256bit_mask("deadbeef").is_none());
    }
}
