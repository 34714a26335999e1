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

//! Block codec: payload ⇄ fixed-size frames.
//!
//! ## On-Disk Frame Format
//!
//! Every item is stored as one or more 512-byte frames:
//!
//! ```text
//! ┌──────────┬──────────────┬─────────────────┬──────────────────┬──────────┐
//! │ Type(1B) │ Checksum(1B) │ Length(4B) LE   │ Payload(Length)  │ Padding  │
//! └──────────┴──────────────┴─────────────────┴──────────────────┴──────────┘
//! ```
//!
//! - **Type**: `b'D'` for a DATA frame, `b'F'` for the FOOTER frame
//! - **Checksum**: footer only, additive mod-256 sum of the whole payload;
//!   DATA frames repeat the type byte here
//! - **Length**: payload bytes carried by this frame, at most 506
//! - **Padding**: zeroes, footer only (DATA frames are always full)
//!
//! An item is zero or more DATA frames followed by exactly one FOOTER, so a
//! reader knows an item is complete as soon as it sees a footer without
//! decoding anything.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    Result,
    checksum::{calculate_checksum, verify_checksum},
    error::ParseFailureSnafu,
};

/// Size of one frame on disk.
pub const FRAME_SIZE: usize = 512;

/// Type, checksum and length fields.
pub const FRAME_HEADER_SIZE: usize = 6;

/// Payload bytes a single frame can carry.
pub const FRAME_CAPACITY: usize = FRAME_SIZE - FRAME_HEADER_SIZE;

const DATA: u8 = b'D';
const FOOTER: u8 = b'F';

/// Number of frames needed for a payload of `len` bytes (at least one).
#[inline]
#[must_use]
pub const fn frame_count(len: usize) -> usize {
    if len == 0 { 1 } else { len.div_ceil(FRAME_CAPACITY) }
}

/// Encodes a payload into queue-data.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    let count = frame_count(payload.len());
    let checksum = calculate_checksum(payload);
    let mut out = BytesMut::with_capacity(count * FRAME_SIZE);

    let mut chunks = payload.chunks(FRAME_CAPACITY);
    for i in 0..count {
        let chunk = chunks.next().unwrap_or_default();
        let is_last = i + 1 == count;

        out.put_u8(if is_last { FOOTER } else { DATA });
        out.put_u8(if is_last { checksum } else { DATA });
        #[allow(clippy::cast_possible_truncation)]
        out.put_u32_le(chunk.len() as u32);
        out.put_slice(chunk);
        if is_last {
            out.put_bytes(0, FRAME_CAPACITY - chunk.len());
        }
    }

    out.freeze()
}

/// Decodes queue-data back into the payload.
///
/// Fails with `ParseFailure` (carrying the raw input) on a length that is not
/// a whole number of frames, an unknown frame type, an oversized length
/// field, a missing footer, frames after the footer, or a checksum mismatch.
pub fn decode(queue_data: &[u8]) -> Result<Bytes> {
    let fail = |reason: String| {
        ParseFailureSnafu {
            reason,
            queue_data: Bytes::copy_from_slice(queue_data),
        }
        .fail()
    };

    if queue_data.is_empty() || queue_data.len() % FRAME_SIZE != 0 {
        return fail(format!(
            "length {} is not a positive multiple of {FRAME_SIZE}",
            queue_data.len()
        ));
    }

    let frame_total = queue_data.len() / FRAME_SIZE;
    let mut payload = BytesMut::with_capacity(frame_total * FRAME_CAPACITY);

    for (i, frame) in queue_data.chunks_exact(FRAME_SIZE).enumerate() {
        let kind = frame[0];
        if kind != DATA && kind != FOOTER {
            return fail(format!("frame {i} has unknown type {kind:#04x}"));
        }

        let mut length_buf = [0u8; 4];
        length_buf.copy_from_slice(&frame[2..FRAME_HEADER_SIZE]);
        let length = u32::from_le_bytes(length_buf) as usize;
        if length > FRAME_CAPACITY {
            return fail(format!(
                "frame {i} declares {length} bytes, capacity is {FRAME_CAPACITY}"
            ));
        }
        payload.put_slice(&frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length]);

        if kind == FOOTER {
            if i + 1 != frame_total {
                return fail(format!(
                    "footer at frame {i} is followed by {} more frames",
                    frame_total - i - 1
                ));
            }
            if !verify_checksum(&payload, frame[1]) {
                return fail(format!(
                    "checksum mismatch: stored={:#04x}, computed={:#04x}",
                    frame[1],
                    calculate_checksum(&payload)
                ));
            }
            return Ok(payload.freeze());
        }
    }

    fail("no footer frame".to_string())
}

/// Returns `true` if `frame` is the terminal frame of an item.
#[inline]
#[must_use]
pub fn is_footer_frame(frame: &[u8]) -> bool { frame.first() == Some(&FOOTER) }

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::QueueError;

    fn payload(len: usize) -> Vec<u8> { (0..len).map(|i| (i * 7 + 3) as u8).collect() }

    #[test_case(0 ; "empty")]
    #[test_case(1 ; "single byte")]
    #[test_case(FRAME_CAPACITY - 1 ; "capacity minus one")]
    #[test_case(FRAME_CAPACITY ; "exactly capacity")]
    #[test_case(FRAME_CAPACITY + 1 ; "capacity plus one")]
    #[test_case(FRAME_CAPACITY * 3 ; "three frames exact")]
    #[test_case(FRAME_CAPACITY * 8 + 100 ; "nine frames")]
    fn test_roundtrip(len: usize) {
        let data = payload(len);
        let encoded = encode(&data);

        assert_eq!(encoded.len(), frame_count(len) * FRAME_SIZE);
        assert_eq!(decode(&encoded).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_frame_layout() {
        let data = payload(FRAME_CAPACITY + 10);
        let encoded = encode(&data);
        assert_eq!(encoded.len(), 2 * FRAME_SIZE);

        let (first, footer) = encoded.split_at(FRAME_SIZE);
        assert_eq!(first[0], DATA);
        assert_eq!(first[1], DATA);
        assert_eq!(&first[2..6], &(FRAME_CAPACITY as u32).to_le_bytes());
        assert!(!is_footer_frame(first));

        assert!(is_footer_frame(footer));
        assert_eq!(footer[1], calculate_checksum(&data));
        assert_eq!(&footer[2..6], &10u32.to_le_bytes());
        assert!(footer[FRAME_HEADER_SIZE + 10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_payload_is_single_footer() {
        let encoded = encode(b"");
        assert_eq!(encoded.len(), FRAME_SIZE);
        assert!(is_footer_frame(&encoded));
        assert!(decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_large_digit_string() {
        let text: String = (0..FRAME_CAPACITY * 2 + 23)
            .map(|i| char::from(b'0' + (i % 10) as u8))
            .collect();
        let decoded = decode(&encode(text.as_bytes())).unwrap();
        assert_eq!(std::str::from_utf8(&decoded).unwrap(), text);
    }

    #[test]
    fn test_any_payload_byte_change_is_detected() {
        let data = payload(FRAME_CAPACITY + 40);
        let encoded = encode(&data);

        let payload_positions = (0..FRAME_CAPACITY)
            .map(|i| FRAME_HEADER_SIZE + i)
            .chain((0..40).map(|i| FRAME_SIZE + FRAME_HEADER_SIZE + i));
        for pos in payload_positions {
            let mut corrupted = encoded.to_vec();
            corrupted[pos] = corrupted[pos].wrapping_add(1);
            assert!(
                matches!(decode(&corrupted), Err(QueueError::ParseFailure { .. })),
                "corruption at {pos} went unnoticed"
            );
        }
    }

    #[test]
    fn test_padding_change_is_ignored() {
        let data = payload(10);
        let mut encoded = encode(&data).to_vec();
        encoded[FRAME_SIZE - 1] = 0xAA;
        assert_eq!(decode(&encoded).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_invalid_type_fails() {
        let mut encoded = encode(b"hello").to_vec();
        encoded[0] = b'X';
        let err = decode(&encoded).unwrap_err();
        assert_eq!(err.raw_data().map(Bytes::len), Some(FRAME_SIZE));
    }

    #[test_case(0 ; "empty input")]
    #[test_case(FRAME_SIZE - 1 ; "short frame")]
    #[test_case(FRAME_SIZE + 17 ; "trailing bytes")]
    fn test_bad_length_fails(len: usize) {
        assert!(matches!(
            decode(&vec![FOOTER; len]),
            Err(QueueError::ParseFailure { .. })
        ));
    }

    #[test]
    fn test_missing_footer_fails() {
        let encoded = encode(&payload(FRAME_CAPACITY * 2));
        assert!(decode(&encoded[..FRAME_SIZE]).is_err());
    }

    #[test]
    fn test_frames_after_footer_fail() {
        let mut twice = encode(b"one").to_vec();
        twice.extend_from_slice(&encode(b"two"));
        assert!(decode(&twice).is_err());
    }

    #[test]
    fn test_oversized_length_fails() {
        let mut encoded = encode(b"abc").to_vec();
        encoded[2..6].copy_from_slice(&(FRAME_SIZE as u32).to_le_bytes());
        assert!(decode(&encoded).is_err());
    }
}
