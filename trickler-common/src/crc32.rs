// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CRC-32 (reflected IEEE 802.3 polynomial) used to validate firmware images
//! and metadata records.
//!
//! Built on the same `crc` crate and `CRC_32_ISO_HDLC` catalog entry that the
//! bootloader's flash driver uses, so wire-level CRCs match bit-for-bit.

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

const ALGORITHM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One-shot CRC-32 over a complete buffer.
pub fn crc32(data: &[u8]) -> u32 {
    ALGORITHM.checksum(data)
}

/// Streaming CRC-32 context for data that arrives in chunks (e.g. firmware
/// bytes read a page at a time from flash, or bytes delivered as they are
/// downloaded over the network).
pub struct Crc32 {
    digest: Digest<'static, u32>,
}

impl Crc32 {
    pub fn new() -> Self {
        Self {
            digest: ALGORITHM.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Consumes the context and returns the final CRC-32 value.
    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector_matches_reference() {
        // "123456789" is the standard CRC catalog check value for CRC-32/ISO-HDLC.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn streaming_matches_one_shot_for_any_chunking() {
        let data: heapless::Vec<u8, 256> = (0u8..=255).collect();
        let one_shot = crc32(&data);

        for split in [0usize, 1, 37, 128, 255, 256] {
            let (a, b) = data.split_at(split.min(data.len()));
            let mut ctx = Crc32::new();
            ctx.update(a);
            ctx.update(b);
            assert_eq!(ctx.finalize(), one_shot, "mismatch at split {split}");
        }
    }
}
