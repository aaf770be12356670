// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Zero-copy frame handle over the consumer's mapped payload region.
//!
//! A [`Frame`] borrows the reader's mapping: while it is alive the slot is
//! pinned - `payload_free_bytes` is not credited and the producer cannot
//! reclaim the bytes. Dropping the frame releases the slot: the free-byte
//! counter is credited with the full slot size (header + body) and the
//! "space available" semaphore is posted once.
//!
//! Release-on-drop makes double release unrepresentable: ownership moves
//! into `drop` exactly once.

use crate::oieb::Oieb;
use crate::platform::NamedSemaphore;

/// A sequence-numbered frame borrowed from the payload ring.
pub struct Frame<'a> {
    data: *mut u8,
    len: usize,
    sequence: u64,
    /// Full slot size (header + body) credited back on release
    slot_size: u64,
    oieb: &'a Oieb,
    sem_space: &'a NamedSemaphore,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        data: *mut u8,
        len: usize,
        sequence: u64,
        slot_size: u64,
        oieb: &'a Oieb,
        sem_space: &'a NamedSemaphore,
    ) -> Self {
        Self {
            data,
            len,
            sequence,
            slot_size,
            oieb,
            sem_space,
        }
    }

    /// Sequence number assigned by the writer
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Frame body length in bytes
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.len
    }

    /// Direct view of the frame body inside the shared mapping
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        // SAFETY: data/len describe a committed slot inside the mapping;
        // the producer cannot reuse it until this frame is dropped, and the
        // single-consumer rule means nobody else writes it either.
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    /// Mutable view for in-place request transformation (duplex mutable
    /// mode). Sound for the same reason as `data()`: the slot is exclusively
    /// ours until release.
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: see data(); &mut self additionally guarantees no
        // outstanding shared view from this handle.
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }

    /// Release the frame, crediting its slot back to the producer.
    ///
    /// Equivalent to dropping the frame; provided for call sites where the
    /// release is a deliberate protocol step rather than scope exit.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.oieb.add_free_bytes(self.slot_size);
        if let Err(e) = self.sem_space.post() {
            log::warn!("[ZB] failed to post space-available on release: {e}");
        }
    }
}

impl std::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("size", &self.len)
            .finish()
    }
}
