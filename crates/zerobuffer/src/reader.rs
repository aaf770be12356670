// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer-owning consumer side of the ring.
//!
//! The Reader creates the shared memory segment, both semaphores, and the
//! lock file; it is the only side that ever unlinks them. Frames are
//! consumed strictly in sequence order and handed out as zero-copy
//! [`Frame`] handles whose drop credits the slot back to the writer.
//!
//! # Read Protocol
//!
//! 1. While `written_count == read_count`, wait on the data semaphore
//!    (bounded by the caller's timeout; a timeout with a dead writer is
//!    `WriterDead`, otherwise a soft `None`).
//! 2. If fewer than 16 bytes remain before the end of the ring, the
//!    producer wrapped without room for a marker header: consume the slack
//!    as an implicit wrap slot.
//! 3. A header with `payload_size == 0` is an explicit wrap marker: credit
//!    the wasted tail, jump to offset 0, and signal the freed space.
//! 4. Otherwise validate the sequence, hand out the frame, and advance the
//!    read position. The slot's bytes stay debited until the frame drops.

use crate::error::{Result, ZeroBufferError};
use crate::frame::Frame;
use crate::oieb::{Oieb, OIEB_SIZE};
use crate::platform::{current_pid, process_exists, LockFile, NamedSemaphore, SharedMemory};
use crate::resources::BufferResources;
use crate::types::{BufferConfig, FrameHeader, FRAME_HEADER_SIZE};
use std::time::{Duration, Instant};

/// Poll interval for [`Reader::is_writer_connected`]
const CONNECT_POLL: Duration = Duration::from_millis(10);

/// Single-consumer endpoint that owns a named buffer.
pub struct Reader {
    resources: BufferResources,
    shm: SharedMemory,
    /// "Data available": posted by the writer per published slot
    sem_data: NamedSemaphore,
    /// "Space available": posted by us per released slot
    sem_space: NamedSemaphore,
    /// Next sequence number we expect from the writer
    expected_sequence: u64,
    frames_read: u64,
    /// Duplex response readers accept arbitrary sequences (replies carry
    /// the request's sequence, which is not monotonic under reordering)
    verify_sequence: bool,
    closed: bool,
}

impl Reader {
    /// Create a new buffer and take ownership of its resources.
    ///
    /// If the name is already in use, the previous owner's lock file
    /// decides: a dead holder means the resources are stale debris and are
    /// unlinked before retrying; a live holder fails with
    /// `BufferAlreadyExists`.
    pub fn create(name: &str, config: BufferConfig) -> Result<Self> {
        Self::create_internal(name, config, true)
    }

    pub(crate) fn create_internal(
        name: &str,
        config: BufferConfig,
        verify_sequence: bool,
    ) -> Result<Self> {
        if config.payload_size <= FRAME_HEADER_SIZE {
            return Err(ZeroBufferError::InvalidState(
                "payload region too small for a frame slot",
            ));
        }

        let resources = BufferResources::for_buffer(name)?;
        let total = config.total_size();

        let shm = match SharedMemory::create(resources.shm_name(), total) {
            Ok(shm) => shm,
            Err(ZeroBufferError::BufferAlreadyExists(_)) => {
                if !resources.is_stale() {
                    return Err(ZeroBufferError::BufferAlreadyExists(name.to_string()));
                }
                log::info!("[ZB] recovering stale buffer: {name}");
                resources.unlink_all();
                SharedMemory::create(resources.shm_name(), total)?
            }
            Err(e) => return Err(e),
        };

        // Initialize the control block before the semaphores exist, so no
        // writer can observe a half-built buffer.
        // SAFETY: the mapping is at least OIEB_SIZE bytes, page-aligned,
        // freshly created, and exclusively ours until the semaphores appear.
        unsafe {
            std::ptr::write(
                shm.as_ptr().cast::<Oieb>(),
                Oieb::new(
                    config.metadata_size as u64,
                    config.payload_size as u64,
                    current_pid(),
                ),
            );
        }

        let created = (|| -> Result<(NamedSemaphore, NamedSemaphore, LockFile)> {
            let sem_data = NamedSemaphore::create(resources.sem_write_name(), 0)?;
            let sem_space = NamedSemaphore::create(resources.sem_read_name(), 0)?;
            let lock = LockFile::create(name, current_pid())?;
            Ok((sem_data, sem_space, lock))
        })();

        let (sem_data, sem_space, lock) = match created {
            Ok(parts) => parts,
            Err(e) => {
                resources.unlink_all();
                return Err(e);
            }
        };
        // The lock file outlives this handle on purpose: crashes must leave
        // it behind as stale-detection evidence.
        let _ = lock;

        log::debug!(
            "[ZB] reader created buffer '{name}' (metadata {}, payload {})",
            config.metadata_size,
            config.payload_size
        );

        Ok(Self {
            resources,
            shm,
            sem_data,
            sem_space,
            expected_sequence: 1,
            frames_read: 0,
            verify_sequence,
            closed: false,
        })
    }

    #[inline]
    fn oieb(&self) -> &Oieb {
        // SAFETY: the mapping starts with a properly initialized Oieb (we
        // wrote it in create); alignment comes from the page-aligned mmap,
        // and all cross-process fields inside are atomics.
        unsafe { &*(self.shm.as_ptr().cast::<Oieb>()) }
    }

    #[inline]
    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: the segment was created as OIEB + metadata + payload, so
        // this offset is in bounds.
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

    /// Number of data frames consumed so far (wrap markers excluded)
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Sequence number the next frame is expected to carry
    #[must_use]
    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    /// Wait until a writer attaches, up to `timeout`.
    pub fn is_writer_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.oieb().writer_pid() != 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(CONNECT_POLL);
        }
    }

    /// View of the metadata written by the writer; empty if none yet.
    #[must_use]
    pub fn get_metadata(&self) -> &[u8] {
        let len = self.oieb().metadata_written_bytes() as usize;
        if len == 0 {
            return &[];
        }
        // SAFETY: the metadata region directly follows the OIEB and is
        // metadata_size bytes long; written_bytes <= metadata_size is
        // enforced by the writer, and the Acquire load above ordered the
        // content before the length.
        unsafe { std::slice::from_raw_parts(self.shm.as_ptr().add(OIEB_SIZE), len) }
    }

    /// Read the next frame, blocking up to `timeout`.
    ///
    /// Returns `Ok(None)` on a soft timeout (writer alive but idle). Fails
    /// with `WriterDead` if the timeout elapses after a writer attached and
    /// its process is gone, and `SequenceError` on a sequence gap.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame<'_>>> {
        if self.closed {
            return Err(ZeroBufferError::InvalidState("reader is closed"));
        }

        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        loop {
            if self.oieb().written_count() == self.oieb().read_count() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !self.sem_data.wait(remaining)? {
                    return self.timeout_outcome();
                }
                // Woken: re-check the counters (the token may be surplus).
                continue;
            }

            let payload_size = self.oieb().payload_size();
            let read_pos = self.oieb().read_pos();

            // Implicit wrap: the tail cannot hold a header, so the slot the
            // producer published here is a wrap without a marker.
            if payload_size - read_pos < FRAME_HEADER_SIZE as u64 {
                self.consume_wrap(read_pos);
                continue;
            }

            let header = self.header_at(read_pos);
            if header.is_wrap_marker() {
                self.consume_wrap(read_pos);
                continue;
            }

            if self.verify_sequence && header.sequence_number != self.expected_sequence {
                return Err(ZeroBufferError::SequenceError {
                    expected: self.expected_sequence,
                    got: header.sequence_number,
                });
            }

            let slot_size = header.slot_size();
            if read_pos + slot_size > payload_size {
                // The producer wraps before this can happen.
                return Err(ZeroBufferError::Corruption(format!(
                    "frame slot at {read_pos} ({slot_size} bytes) overruns payload ring"
                )));
            }

            let data_offset = read_pos + FRAME_HEADER_SIZE as u64;
            self.oieb().set_read_pos((read_pos + slot_size) % payload_size);
            self.oieb().add_read_count();
            self.expected_sequence = header.sequence_number + 1;
            self.frames_read += 1;

            // SAFETY: data_offset + payload_size <= ring size was checked
            // above; the slot stays ours until the Frame drops.
            let data = unsafe { self.payload_ptr().add(data_offset as usize) };
            return Ok(Some(Frame::new(
                data,
                header.payload_size as usize,
                header.sequence_number,
                slot_size,
                self.oieb(),
                &self.sem_space,
            )));
        }
    }

    fn timeout_outcome(&self) -> Result<Option<Frame<'_>>> {
        let writer_pid = self.oieb().writer_pid();
        if writer_pid != 0 && !process_exists(writer_pid) {
            return Err(ZeroBufferError::WriterDead);
        }
        Ok(None)
    }

    fn header_at(&self, read_pos: u64) -> FrameHeader {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        // SAFETY: read_pos + 16 <= payload_size was established by the
        // implicit-wrap check; the header bytes were published before the
        // written_count we Acquire-loaded.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.payload_ptr().add(read_pos as usize),
                bytes.as_mut_ptr(),
                FRAME_HEADER_SIZE,
            );
        }
        FrameHeader::from_bytes(&bytes)
    }

    /// Consume a wrap slot (explicit marker or implicit tail) at `read_pos`:
    /// credit the wasted tail and return to offset 0.
    fn consume_wrap(&mut self, read_pos: u64) {
        let wasted = self.oieb().payload_size() - read_pos;
        self.oieb().set_read_pos(0);
        self.oieb().add_read_count();
        self.oieb().add_free_bytes(wasted);
        if let Err(e) = self.sem_space.post() {
            log::warn!("[ZB] failed to post space-available after wrap: {e}");
        }
    }

    /// Detach and destroy the buffer.
    ///
    /// Clears `reader_pid`, wakes any blocked writer, and unlinks the
    /// shared memory, both semaphores, and the lock file. The mapping
    /// itself lives until the Reader is dropped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.oieb().set_reader_pid(0);
        // Wake both directions so any blocked peer re-checks and observes
        // the detach.
        self.sem_space.post().ok();
        self.sem_data.post().ok();

        self.resources.unlink_all();
        log::debug!("[ZB] reader closed buffer '{}'", self.resources.name());
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("zb_{tag}_{}_{ts}", std::process::id())
    }

    #[test]
    fn create_initializes_buffer() {
        let name = unique_name("rd_create");
        let reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("create");

        assert_eq!(reader.buffer_name(), name);
        assert_eq!(reader.expected_sequence(), 1);
        assert_eq!(reader.frames_read(), 0);
        assert!(reader.get_metadata().is_empty());
        assert_eq!(reader.oieb().payload_size(), 2048);
        assert_eq!(reader.oieb().free_bytes(), 2048);
        assert_eq!(reader.oieb().reader_pid(), current_pid());
    }

    #[test]
    fn duplicate_name_with_live_owner_fails() {
        let name = unique_name("rd_dup");
        let _reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("create");

        let second = Reader::create(&name, BufferConfig::new(256, 2048));
        assert!(matches!(
            second,
            Err(ZeroBufferError::BufferAlreadyExists(_))
        ));
    }

    #[test]
    fn stale_buffer_is_recovered() {
        let name = unique_name("rd_stale");
        let config = BufferConfig::new(256, 2048);

        // Simulate a crashed reader: resources exist, lock holder is dead.
        let resources = BufferResources::for_buffer(&name).expect("resolve");
        let _stale_shm =
            SharedMemory::create(resources.shm_name(), config.total_size()).expect("shm");
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        let dead_pid = u64::from(child.id());
        child.wait().expect("wait");
        LockFile::create(&name, dead_pid).expect("lock");

        let reader = Reader::create(&name, config).expect("recover stale buffer");
        assert_eq!(reader.oieb().reader_pid(), current_pid());
    }

    #[test]
    fn read_frame_times_out_without_writer() {
        let name = unique_name("rd_timeout");
        let mut reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("create");

        let start = Instant::now();
        let result = reader.read_frame(Duration::from_millis(50)).expect("read");
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn is_writer_connected_times_out() {
        let name = unique_name("rd_conn");
        let reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("create");

        assert!(!reader.is_writer_connected(Duration::from_millis(50)));
    }

    #[test]
    fn close_unlinks_resources() {
        let name = unique_name("rd_close");
        let mut reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("create");

        let resources = BufferResources::for_buffer(&name).expect("resolve");
        assert!(SharedMemory::exists(resources.shm_name()));

        reader.close();
        assert!(!SharedMemory::exists(resources.shm_name()));
        assert!(!resources.lock_path().exists());
    }

    #[test]
    fn read_after_close_fails() {
        let name = unique_name("rd_after_close");
        let mut reader = Reader::create(&name, BufferConfig::new(256, 2048)).expect("create");
        reader.close();

        let result = reader.read_frame(Duration::from_millis(10));
        assert!(matches!(result, Err(ZeroBufferError::InvalidState(_))));
    }
}
