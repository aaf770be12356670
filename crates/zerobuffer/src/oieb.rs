// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operation Info Exchange Block: the 128-byte control block at offset 0
//! of the shared memory segment.
//!
//! # Memory Layout (little-endian)
//!
//! ```text
//! Offset  Size  Field
//! 0       4     oieb_size (128)
//! 4       4     version {major, minor, patch, reserved}
//! 8       8     metadata_size
//! 16      8     metadata_free_bytes
//! 24      8     metadata_written_bytes
//! 32      8     payload_size
//! 40      8     payload_free_bytes      <- only true concurrent RMW field
//! 48      8     payload_write_pos       (writer-owned)
//! 56      8     payload_read_pos        (reader-owned)
//! 64      8     payload_written_count   (writer-owned)
//! 72      8     payload_read_count      (reader-owned)
//! 80      8     writer_pid              (0 = unattached)
//! 88      8     reader_pid              (0 = unattached)
//! 96      32    reserved (zero)
//! ```
//!
//! # Memory Ordering Strategy
//!
//! Every field other than `payload_free_bytes` has exactly one writing
//! side, so plain atomic loads/stores with Acquire/Release suffice.
//!
//! `payload_free_bytes` is subtracted by the producer and added by the
//! consumer concurrently; it MUST use hardware fetch-add/fetch-sub. A plain
//! read-modify-write loses updates and permanently drifts the free count,
//! which ends in a deadlocked writer or a corrupted ring.
//!
//! The Release on `add_written_count` doubles as the publish barrier: all
//! header and body bytes stored before it are visible to a reader that
//! Acquire-loads the count.

use std::sync::atomic::{AtomicU64, Ordering};

/// Size of the OIEB control block
pub const OIEB_SIZE: usize = 128;

/// Protocol version bytes `{major, minor, patch, reserved}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub reserved: u8,
}

impl ProtocolVersion {
    /// Current protocol version (1.0.0)
    pub const CURRENT: Self = Self {
        major: 1,
        minor: 0,
        patch: 0,
        reserved: 0,
    };
}

/// Typed overlay over the first 128 bytes of the mapping.
///
/// Fields fixed at creation (`oieb_size`, `version`, `metadata_size`,
/// `payload_size`) are plain: the creating process stores them before any
/// peer can open the segment, so the OS-level open itself orders them.
/// Everything mutated after attach is an `AtomicU64`.
#[repr(C)]
pub struct Oieb {
    oieb_size: u32,
    version: [u8; 4],
    metadata_size: u64,
    metadata_free_bytes: AtomicU64,
    metadata_written_bytes: AtomicU64,
    payload_size: u64,
    payload_free_bytes: AtomicU64,
    payload_write_pos: AtomicU64,
    payload_read_pos: AtomicU64,
    payload_written_count: AtomicU64,
    payload_read_count: AtomicU64,
    writer_pid: AtomicU64,
    reader_pid: AtomicU64,
    _reserved: [u64; 4],
}

impl Oieb {
    /// Build the initial OIEB for a freshly created buffer.
    #[must_use]
    pub fn new(metadata_size: u64, payload_size: u64, reader_pid: u64) -> Self {
        let v = ProtocolVersion::CURRENT;
        Self {
            oieb_size: OIEB_SIZE as u32,
            version: [v.major, v.minor, v.patch, v.reserved],
            metadata_size,
            metadata_free_bytes: AtomicU64::new(metadata_size),
            metadata_written_bytes: AtomicU64::new(0),
            payload_size,
            payload_free_bytes: AtomicU64::new(payload_size),
            payload_write_pos: AtomicU64::new(0),
            payload_read_pos: AtomicU64::new(0),
            payload_written_count: AtomicU64::new(0),
            payload_read_count: AtomicU64::new(0),
            writer_pid: AtomicU64::new(0),
            reader_pid: AtomicU64::new(reader_pid),
            _reserved: [0; 4],
        }
    }

    /// Validate the creation-time fields of an attached segment
    #[must_use]
    pub fn validate(&self) -> bool {
        self.oieb_size == OIEB_SIZE as u32 && self.version[0] == ProtocolVersion::CURRENT.major
    }

    /// Protocol version of this buffer
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        ProtocolVersion {
            major: self.version[0],
            minor: self.version[1],
            patch: self.version[2],
            reserved: self.version[3],
        }
    }

    /// Size of the metadata region
    #[inline]
    #[must_use]
    pub fn metadata_size(&self) -> u64 {
        self.metadata_size
    }

    /// Size of the payload ring
    #[inline]
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    // --- metadata region ---

    #[inline]
    pub fn metadata_free_bytes(&self) -> u64 {
        self.metadata_free_bytes.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_metadata_free_bytes(&self, value: u64) {
        self.metadata_free_bytes.store(value, Ordering::Release);
    }

    #[inline]
    pub fn metadata_written_bytes(&self) -> u64 {
        // Acquire: pairs with the Release in set_metadata_written_bytes so
        // the metadata bytes themselves are visible before the length.
        self.metadata_written_bytes.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_metadata_written_bytes(&self, value: u64) {
        // Release: publishes the metadata content written before this store.
        self.metadata_written_bytes.store(value, Ordering::Release);
    }

    // --- payload_free_bytes: the one true concurrent RMW field ---

    /// Atomically credit freed payload bytes (consumer side).
    #[inline]
    pub fn add_free_bytes(&self, delta: u64) {
        // Release: the slot must be fully consumed before its space is
        // offered back to the producer.
        self.payload_free_bytes.fetch_add(delta, Ordering::Release);
    }

    /// Atomically reserve payload bytes (producer side).
    #[inline]
    pub fn sub_free_bytes(&self, delta: u64) {
        // Release: header/body stores issued before this fetch-sub are
        // visible to a consumer that Acquire-loads the field.
        self.payload_free_bytes.fetch_sub(delta, Ordering::Release);
    }

    #[inline]
    pub fn free_bytes(&self) -> u64 {
        // Acquire: pairs with the Release fetch-add/sub on the other side.
        self.payload_free_bytes.load(Ordering::Acquire)
    }

    // --- positions (single-writer each) ---

    #[inline]
    pub fn write_pos(&self) -> u64 {
        self.payload_write_pos.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_write_pos(&self, value: u64) {
        self.payload_write_pos.store(value, Ordering::Release);
    }

    #[inline]
    pub fn read_pos(&self) -> u64 {
        self.payload_read_pos.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_read_pos(&self, value: u64) {
        self.payload_read_pos.store(value, Ordering::Release);
    }

    // --- frame counters (single-writer each) ---

    #[inline]
    pub fn written_count(&self) -> u64 {
        // Acquire: a count observed here guarantees the corresponding
        // header/body bytes are visible (pairs with add_written_count).
        self.payload_written_count.load(Ordering::Acquire)
    }

    /// Publish one written slot. This is the producer's publish barrier.
    #[inline]
    pub fn add_written_count(&self) {
        self.payload_written_count.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn read_count(&self) -> u64 {
        self.payload_read_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn add_read_count(&self) {
        self.payload_read_count.fetch_add(1, Ordering::Release);
    }

    // --- attachment pids ---

    #[inline]
    pub fn writer_pid(&self) -> u64 {
        self.writer_pid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_writer_pid(&self, pid: u64) {
        self.writer_pid.store(pid, Ordering::Release);
    }

    /// Claim the writer slot if currently unattached.
    ///
    /// Returns the previous holder pid on failure.
    pub fn claim_writer_pid(&self, pid: u64, expected_old: u64) -> std::result::Result<(), u64> {
        self.writer_pid
            .compare_exchange(expected_old, pid, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    #[inline]
    pub fn reader_pid(&self) -> u64 {
        self.reader_pid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_reader_pid(&self, pid: u64) {
        self.reader_pid.store(pid, Ordering::Release);
    }

    /// Bytes currently occupied in the payload ring, derived from the
    /// free-byte counter so wrap slack is accounted for.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.payload_size.saturating_sub(self.free_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn oieb_is_exactly_128_bytes() {
        assert_eq!(size_of::<Oieb>(), OIEB_SIZE);
        assert_eq!(align_of::<Oieb>(), 8);
    }

    #[test]
    fn field_offsets_match_wire_layout() {
        assert_eq!(offset_of!(Oieb, oieb_size), 0);
        assert_eq!(offset_of!(Oieb, version), 4);
        assert_eq!(offset_of!(Oieb, metadata_size), 8);
        assert_eq!(offset_of!(Oieb, metadata_free_bytes), 16);
        assert_eq!(offset_of!(Oieb, metadata_written_bytes), 24);
        assert_eq!(offset_of!(Oieb, payload_size), 32);
        assert_eq!(offset_of!(Oieb, payload_free_bytes), 40);
        assert_eq!(offset_of!(Oieb, payload_write_pos), 48);
        assert_eq!(offset_of!(Oieb, payload_read_pos), 56);
        assert_eq!(offset_of!(Oieb, payload_written_count), 64);
        assert_eq!(offset_of!(Oieb, payload_read_count), 72);
        assert_eq!(offset_of!(Oieb, writer_pid), 80);
        assert_eq!(offset_of!(Oieb, reader_pid), 88);
        assert_eq!(offset_of!(Oieb, _reserved), 96);
    }

    #[test]
    fn new_initializes_counters() {
        let oieb = Oieb::new(4096, 10240, 777);
        assert!(oieb.validate());
        assert_eq!(oieb.metadata_size(), 4096);
        assert_eq!(oieb.metadata_free_bytes(), 4096);
        assert_eq!(oieb.metadata_written_bytes(), 0);
        assert_eq!(oieb.payload_size(), 10240);
        assert_eq!(oieb.free_bytes(), 10240);
        assert_eq!(oieb.write_pos(), 0);
        assert_eq!(oieb.read_pos(), 0);
        assert_eq!(oieb.written_count(), 0);
        assert_eq!(oieb.read_count(), 0);
        assert_eq!(oieb.writer_pid(), 0);
        assert_eq!(oieb.reader_pid(), 777);
    }

    #[test]
    fn free_bytes_add_sub() {
        let oieb = Oieb::new(0, 1000, 1);
        oieb.sub_free_bytes(272);
        assert_eq!(oieb.free_bytes(), 728);
        assert_eq!(oieb.used_bytes(), 272);
        oieb.add_free_bytes(272);
        assert_eq!(oieb.free_bytes(), 1000);
    }

    #[test]
    fn free_bytes_concurrent_rmw() {
        use std::sync::Arc;
        use std::thread;

        let oieb = Arc::new(Oieb::new(0, 1 << 40, 1));
        let iterations = 100_000u64;

        let producer = {
            let oieb = Arc::clone(&oieb);
            thread::spawn(move || {
                for _ in 0..iterations {
                    oieb.sub_free_bytes(3);
                }
            })
        };
        let consumer = {
            let oieb = Arc::clone(&oieb);
            thread::spawn(move || {
                for _ in 0..iterations {
                    oieb.add_free_bytes(3);
                }
            })
        };

        producer.join().expect("producer");
        consumer.join().expect("consumer");
        assert_eq!(oieb.free_bytes(), 1 << 40);
    }

    #[test]
    fn claim_writer_pid_exclusive() {
        let oieb = Oieb::new(0, 1024, 1);
        assert!(oieb.claim_writer_pid(42, 0).is_ok());
        assert_eq!(oieb.claim_writer_pid(43, 0), Err(42));
        assert_eq!(oieb.writer_pid(), 42);
    }

    #[test]
    fn validate_rejects_wrong_size() {
        let mut oieb = Oieb::new(0, 1024, 1);
        oieb.oieb_size = 64;
        assert!(!oieb.validate());
    }
}
