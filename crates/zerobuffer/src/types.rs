// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer configuration and the on-wire frame header.

use crate::error::{Result, ZeroBufferError};

/// Size of the frame header prefixing every payload slot
pub const FRAME_HEADER_SIZE: usize = 16;

/// Sizing for a buffer created by a [`crate::Reader`].
///
/// The shared memory segment is laid out as
/// `[OIEB 128B][metadata metadata_size B][payload payload_size B]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Size of the metadata region in bytes
    pub metadata_size: usize,
    /// Size of the payload ring in bytes
    pub payload_size: usize,
}

impl BufferConfig {
    /// Create a new buffer configuration
    #[must_use]
    pub const fn new(metadata_size: usize, payload_size: usize) -> Self {
        Self {
            metadata_size,
            payload_size,
        }
    }

    /// Total shared memory segment size for this configuration
    #[must_use]
    pub const fn total_size(&self) -> usize {
        crate::oieb::OIEB_SIZE + self.metadata_size + self.payload_size
    }
}

impl Default for BufferConfig {
    /// 4 KiB metadata, 256 MiB payload. Pages are committed lazily, so the
    /// large default costs nothing until frames are written.
    fn default() -> Self {
        Self {
            metadata_size: 4096,
            payload_size: 256 * 1024 * 1024,
        }
    }
}

/// 16-byte header prefixing every frame in the payload ring.
///
/// `payload_size == 0` marks a wrap: the remainder of the ring is unusable
/// and both sides jump back to offset 0. Wrap markers carry sequence 0.
///
/// Headers land at arbitrary byte offsets (slot sizes are not rounded), so
/// all access goes through explicit little-endian byte copies rather than a
/// struct overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame body length in bytes; 0 is the wrap marker
    pub payload_size: u64,
    /// Monotonic sequence starting at 1; 0 for wrap markers
    pub sequence_number: u64,
}

impl FrameHeader {
    /// The wrap marker header
    pub const WRAP_MARKER: Self = Self {
        payload_size: 0,
        sequence_number: 0,
    };

    /// Decode a header from exactly 16 bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[0..8]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&bytes[8..16]);
        Self {
            payload_size: u64::from_le_bytes(size),
            sequence_number: u64::from_le_bytes(seq),
        }
    }

    /// Decode a header from the first 16 bytes of `src`.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if `src` is shorter than a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let bytes: &[u8; FRAME_HEADER_SIZE] = src
            .get(..FRAME_HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                ZeroBufferError::Corruption(format!("frame header truncated: {} bytes", src.len()))
            })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Encode this header into the first 16 bytes of `dst`
    pub fn encode(&self, dst: &mut [u8]) {
        dst[0..8].copy_from_slice(&self.payload_size.to_le_bytes());
        dst[8..16].copy_from_slice(&self.sequence_number.to_le_bytes());
    }

    /// Total slot size occupied by this frame (header + body)
    #[must_use]
    pub const fn slot_size(&self) -> u64 {
        FRAME_HEADER_SIZE as u64 + self.payload_size
    }

    /// Whether this header is a wrap marker
    #[must_use]
    pub const fn is_wrap_marker(&self) -> bool {
        self.payload_size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader {
            payload_size: 1024,
            sequence_number: 42,
        };
        let mut buf = [0u8; 16];
        header.encode(&mut buf);
        let decoded = FrameHeader::decode(&buf).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(decoded.slot_size(), 1040);
    }

    #[test]
    fn header_is_little_endian() {
        let header = FrameHeader {
            payload_size: 0x0102_0304,
            sequence_number: 1,
        };
        let mut buf = [0u8; 16];
        header.encode(&mut buf);
        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn wrap_marker_detection() {
        assert!(FrameHeader::WRAP_MARKER.is_wrap_marker());
        let mut buf = [0u8; 16];
        FrameHeader::WRAP_MARKER.encode(&mut buf);
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn decode_truncated() {
        assert!(FrameHeader::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn config_total_size() {
        let config = BufferConfig::new(4096, 10240);
        assert_eq!(config.total_size(), 128 + 4096 + 10240);
    }

    #[test]
    fn config_default_matches_reference() {
        let config = BufferConfig::default();
        assert_eq!(config.metadata_size, 4096);
        assert_eq!(config.payload_size, 256 * 1024 * 1024);
    }
}
