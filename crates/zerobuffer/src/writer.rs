// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attaching producer side of the ring.
//!
//! The Writer opens an existing buffer, claims the `writer_pid` slot, and
//! appends sequence-numbered frames. It never unlinks resources; closing
//! only clears the pid and wakes the reader.
//!
//! # Write Protocol
//!
//! For a body of `L` bytes the slot is `16 + L`. Capacity is re-evaluated
//! after every wait because the wrap decision depends on the reader's
//! position:
//!
//! - Tail fits the slot: need `slot` free bytes.
//! - Tail too small and the reader has left offset 0: wrap. The tail slack
//!   becomes a wrap slot (an explicit 16-byte marker when it fits, an
//!   implicit one otherwise) and the total need is `tail + slot`.
//! - Tail too small but the reader still sits at offset 0: wrapping would
//!   collide with unread data, so wait for the reader to move.
//!
//! Each published slot - wrap slots included - posts the data semaphore
//! exactly once.

use crate::error::{Result, ZeroBufferError};
use crate::oieb::{Oieb, OIEB_SIZE};
use crate::platform::{current_pid, process_exists, NamedSemaphore, SharedMemory};
use crate::resources::BufferResources;
use crate::types::{FrameHeader, FRAME_HEADER_SIZE};
use std::time::Duration;

/// Capacity waits are sliced so a vanished reader is noticed within this
/// interval even without a wakeup.
const CAPACITY_WAIT: Duration = Duration::from_secs(5);

/// A zero-copy frame reservation between `get_frame_buffer` and
/// `commit_frame`.
struct PendingFrame {
    /// Slot offset in the payload ring (header position)
    offset: u64,
    /// Body length
    len: u64,
}

/// Single-producer endpoint attached to an existing buffer.
pub struct Writer {
    resources: BufferResources,
    shm: SharedMemory,
    /// "Data available": posted by us per published slot
    sem_data: NamedSemaphore,
    /// "Space available": posted by the reader, waited on by us
    sem_space: NamedSemaphore,
    /// Next sequence number to assign (starts at 1, never skips)
    sequence_number: u64,
    frames_written: u64,
    pending: Option<PendingFrame>,
    closed: bool,
}

impl Writer {
    /// Attach to an existing buffer by name.
    ///
    /// Fails with `BufferNotFound` if no reader created the buffer, and
    /// `WriterAlreadyConnected` while another live writer holds it. The
    /// pid slot of a dead writer is claimed over.
    pub fn connect(name: &str) -> Result<Self> {
        let resources = BufferResources::for_buffer(name)?;

        let shm = SharedMemory::open(resources.shm_name())?;
        if shm.size() < OIEB_SIZE {
            return Err(ZeroBufferError::Corruption(format!(
                "segment too small for control block: {} bytes",
                shm.size()
            )));
        }

        // SAFETY: the segment begins with the Oieb the reader initialized;
        // validate() below rejects foreign segments.
        let oieb = unsafe { &*(shm.as_ptr().cast::<Oieb>()) };
        if !oieb.validate() {
            return Err(ZeroBufferError::Corruption(
                "invalid OIEB (wrong size or protocol version)".to_string(),
            ));
        }
        let expected =
            OIEB_SIZE as u64 + oieb.metadata_size() + oieb.payload_size();
        if (shm.size() as u64) < expected {
            return Err(ZeroBufferError::Corruption(format!(
                "segment truncated: {} < {expected}",
                shm.size()
            )));
        }

        let pid = current_pid();
        let held = oieb.writer_pid();
        if held != 0 && process_exists(held) {
            return Err(ZeroBufferError::WriterAlreadyConnected);
        }
        // CAS so two writers racing for a free (or dead) slot cannot both
        // win.
        if oieb.claim_writer_pid(pid, held).is_err() {
            return Err(ZeroBufferError::WriterAlreadyConnected);
        }

        let sem_data = NamedSemaphore::open(resources.sem_write_name())?;
        let sem_space = NamedSemaphore::open(resources.sem_read_name())?;

        log::debug!("[ZB] writer attached to buffer '{name}' (pid {pid})");

        Ok(Self {
            resources,
            shm,
            sem_data,
            sem_space,
            sequence_number: 1,
            frames_written: 0,
            pending: None,
            closed: false,
        })
    }

    #[inline]
    fn oieb(&self) -> &Oieb {
        // SAFETY: validated in connect(); all cross-process fields are
        // atomics, and the mapping outlives self.
        unsafe { &*(self.shm.as_ptr().cast::<Oieb>()) }
    }

    #[inline]
    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: segment size covers OIEB + metadata + payload (checked in
        // connect).
        unsafe {
            self.shm
                .as_ptr()
                .add(OIEB_SIZE + self.oieb().metadata_size() as usize)
        }
    }

    /// Logical buffer name
    #[must_use]
    pub fn buffer_name(&self) -> &str {
        self.resources.name()
    }

    /// Number of data frames written so far (wrap slots excluded)
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Sequence number the next frame will carry
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.sequence_number
    }

    /// Whether a live reader is attached
    #[must_use]
    pub fn is_reader_connected(&self) -> bool {
        let pid = self.oieb().reader_pid();
        pid != 0 && process_exists(pid)
    }

    /// Write the buffer metadata. Allowed once per buffer.
    pub fn set_metadata(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.pending.is_some() {
            return Err(ZeroBufferError::InvalidState(
                "frame reservation pending; commit or abandon it first",
            ));
        }

        let oieb = self.oieb();
        if oieb.metadata_written_bytes() != 0 {
            return Err(ZeroBufferError::MetadataAlreadyWritten);
        }
        let capacity = oieb.metadata_size();
        if data.len() as u64 > capacity {
            return Err(ZeroBufferError::MetadataTooLarge {
                size: data.len(),
                capacity: capacity as usize,
            });
        }

        // SAFETY: the metadata region follows the OIEB and holds `capacity`
        // bytes; data.len() <= capacity was checked above. Only the writer
        // touches this region, and the length store below publishes it.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.shm.as_ptr().add(OIEB_SIZE),
                data.len(),
            );
        }
        oieb.set_metadata_written_bytes(data.len() as u64);
        oieb.set_metadata_free_bytes(capacity - data.len() as u64);
        Ok(())
    }

    /// Copy-write a frame.
    pub fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.pending.is_some() {
            return Err(ZeroBufferError::InvalidState(
                "frame reservation pending; commit or abandon it first",
            ));
        }
        let sequence = self.sequence_number;
        self.write_frame_inner(data, sequence)?;
        self.sequence_number += 1;
        Ok(())
    }

    /// Write a frame carrying an explicit sequence number, leaving the
    /// internal counter untouched. Duplex servers use this to echo the
    /// request sequence on the response ring.
    pub(crate) fn write_frame_with_sequence(&mut self, data: &[u8], sequence: u64) -> Result<()> {
        self.check_open()?;
        if self.pending.is_some() {
            return Err(ZeroBufferError::InvalidState(
                "frame reservation pending; commit or abandon it first",
            ));
        }
        self.write_frame_inner(data, sequence)
    }

    fn write_frame_inner(&mut self, data: &[u8], sequence: u64) -> Result<()> {
        let offset = self.reserve_slot(data.len())?;

        let header = FrameHeader {
            payload_size: data.len() as u64,
            sequence_number: sequence,
        };
        header.encode(self.slot_bytes(offset, FRAME_HEADER_SIZE));
        self.slot_bytes(offset + FRAME_HEADER_SIZE as u64, data.len())
            .copy_from_slice(data);

        self.publish_slot(offset, data.len() as u64)
    }

    /// Reserve a writable slot for a zero-copy frame of `len` bytes.
    ///
    /// The returned slice is the frame body inside the shared mapping;
    /// fill it and call [`Writer::commit_frame`]. No other write operation
    /// is permitted until then.
    pub fn get_frame_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
        self.check_open()?;
        if self.pending.is_some() {
            return Err(ZeroBufferError::InvalidState(
                "frame reservation already pending",
            ));
        }

        let offset = self.reserve_slot(len)?;
        self.pending = Some(PendingFrame {
            offset,
            len: len as u64,
        });
        Ok(self.slot_bytes(offset + FRAME_HEADER_SIZE as u64, len))
    }

    /// Publish the frame reserved by [`Writer::get_frame_buffer`].
    pub fn commit_frame(&mut self) -> Result<()> {
        self.check_open()?;
        let Some(pending) = self.pending.take() else {
            return Err(ZeroBufferError::InvalidState("no pending frame to commit"));
        };

        let header = FrameHeader {
            payload_size: pending.len,
            sequence_number: self.sequence_number,
        };
        header.encode(self.slot_bytes(pending.offset, FRAME_HEADER_SIZE));

        self.publish_slot(pending.offset, pending.len)?;
        self.sequence_number += 1;
        Ok(())
    }

    /// Run the capacity/wrap loop and return the offset of a reserved slot.
    fn reserve_slot(&mut self, len: usize) -> Result<u64> {
        if len == 0 {
            return Err(ZeroBufferError::InvalidFrameSize);
        }

        let payload_size = self.oieb().payload_size();
        let slot = FRAME_HEADER_SIZE as u64 + len as u64;
        if slot > payload_size {
            return Err(ZeroBufferError::FrameTooLarge {
                size: len,
                capacity: payload_size as usize,
            });
        }

        loop {
            if !self.is_reader_connected() {
                return Err(ZeroBufferError::ReaderDead);
            }

            let write_pos = self.oieb().write_pos();
            let space_to_end = payload_size - write_pos;

            if space_to_end >= slot {
                if self.oieb().free_bytes() >= slot {
                    return Ok(write_pos);
                }
            } else if self.oieb().read_pos() > 0 {
                // Wrap: the tail slack is consumed as its own slot, so the
                // budget covers both it and the frame.
                if self.oieb().free_bytes() >= space_to_end + slot {
                    self.publish_wrap(write_pos, space_to_end)?;
                    return Ok(0);
                }
            }
            // else: reader still at offset 0 - wrapping would collide with
            // unread frames; wait for it to move.

            if !self.sem_space.wait(CAPACITY_WAIT)? {
                let pid = self.oieb().reader_pid();
                if !process_exists(pid) {
                    return Err(ZeroBufferError::ReaderDead);
                }
            }
        }
    }

    /// Publish a wrap slot covering the tail slack `[write_pos, end)`.
    fn publish_wrap(&mut self, write_pos: u64, space_to_end: u64) -> Result<()> {
        if space_to_end >= FRAME_HEADER_SIZE as u64 {
            FrameHeader::WRAP_MARKER.encode(self.slot_bytes(write_pos, FRAME_HEADER_SIZE));
        }
        // A sub-header tail gets no marker; the reader recognizes the
        // position itself as an implicit wrap.

        let oieb = self.oieb();
        oieb.set_write_pos(0);
        oieb.sub_free_bytes(space_to_end);
        oieb.add_written_count();
        self.sem_data.post()
    }

    /// Publish a data slot: advance the write position, debit the budget,
    /// bump the counter (the release barrier), and post one token.
    fn publish_slot(&mut self, offset: u64, len: u64) -> Result<()> {
        let slot = FRAME_HEADER_SIZE as u64 + len;
        let oieb = self.oieb();
        oieb.set_write_pos((offset + slot) % oieb.payload_size());
        oieb.sub_free_bytes(slot);
        oieb.add_written_count();
        self.frames_written += 1;
        self.sem_data.post()
    }

    /// Mutable view of `len` payload bytes at `offset`.
    fn slot_bytes(&mut self, offset: u64, len: usize) -> &mut [u8] {
        debug_assert!(offset + len as u64 <= self.oieb().payload_size());
        // SAFETY: offset/len are within the payload ring (asserted above,
        // guaranteed by reserve_slot's capacity accounting), and the
        // single-producer rule gives us exclusive write access to
        // unpublished slots.
        unsafe { std::slice::from_raw_parts_mut(self.payload_ptr().add(offset as usize), len) }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZeroBufferError::InvalidState("writer is closed"));
        }
        Ok(())
    }

    /// Detach from the buffer.
    ///
    /// Clears `writer_pid` and wakes the reader so it observes the detach.
    /// Never unlinks resources - that is the reader's job.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending = None;

        self.oieb().set_writer_pid(0);
        self.sem_data.post().ok();
        self.sem_space.post().ok();

        log::debug!("[ZB] writer detached from '{}'", self.resources.name());
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.close();
    }
}
