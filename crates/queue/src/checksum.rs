// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Payload checksum stored in the footer frame.
//!
//! The checksum is the additive byte sum modulo 256. It catches truncation
//! and most single-byte corruption but many payloads collide, so it is not
//! an integrity guarantee against deliberate tampering. The on-disk format
//! depends on it; do not swap it for a stronger hash.

/// Calculates the additive mod-256 checksum of `data`.
#[inline]
pub(crate) fn calculate_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Verifies `data` against a stored checksum byte.
#[inline]
pub(crate) fn verify_checksum(data: &[u8], expected: u8) -> bool {
    calculate_checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_checksum() {
        assert_eq!(calculate_checksum(b""), 0);
        assert_eq!(calculate_checksum(&[1, 2, 3]), 6);
        // 200 + 100 = 300 wraps to 44
        assert_eq!(calculate_checksum(&[200, 100]), 44);
    }

    #[test]
    fn test_verify_checksum() {
        let data = b"checksum me";
        let sum = calculate_checksum(data);

        assert!(verify_checksum(data, sum));
        assert!(!verify_checksum(data, sum.wrapping_add(1)));
        assert!(!verify_checksum(b"checksum mf", sum));
    }
}
