// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment management.
//!
//! Safe wrappers around `shm_open`, `ftruncate`, and `mmap` for creating
//! and mapping the buffer segment.
//!
//! # Segment Lifecycle
//!
//! 1. The buffer owner (Reader) creates the segment with
//!    [`SharedMemory::create`] - exclusive, so a name collision is reported
//!    rather than silently replaced (the caller decides whether the existing
//!    segment is stale).
//! 2. The Writer attaches with [`SharedMemory::open`], which sizes the
//!    mapping from the segment itself.
//! 3. The mapping is unmapped on drop; only the owner calls
//!    [`SharedMemory::unlink`].
//!
//! Freshly created segments are zero-filled by the kernel when extended
//! with `ftruncate`, so no explicit zeroing pass is needed (and none is
//! wanted: touching every page would commit the whole ring up front).

use super::validate_ipc_name;
use crate::error::{Result, ZeroBufferError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped POSIX shared memory segment.
///
/// Automatically unmaps the memory region on drop.
/// Does NOT automatically unlink the segment (owner's responsibility).
pub struct SharedMemory {
    /// Pointer to mapped memory region
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Segment name (for unlink)
    name: String,
}

// SAFETY: the pointer refers to process-shared memory; all concurrently
// mutated fields inside it are accessed through atomics by the OIEB view.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create a new shared memory segment of exactly `size` bytes.
    ///
    /// Fails with `BufferAlreadyExists` if a segment with this name exists;
    /// stale-segment recovery is the caller's decision.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        validate_ipc_name(name)?;

        let c_name =
            CString::new(name).map_err(|_| ZeroBufferError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; O_EXCL makes the
        // create exclusive so an existing segment surfaces as EEXIST.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Err(ZeroBufferError::BufferAlreadyExists(name.to_string()));
            }
            return Err(ZeroBufferError::Io(err));
        }

        // SAFETY: fd is valid from the successful shm_open above.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid and not used after this error path.
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ZeroBufferError::Io(err));
        }

        let ptr = Self::map(fd, size);

        // SAFETY: fd is valid; the mapping (if any) holds its own reference.
        unsafe { libc::close(fd) };

        let ptr = match ptr {
            Ok(p) => p,
            Err(e) => {
                // SAFETY: unlinking our own just-created name is safe.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Open an existing shared memory segment, sized from the segment itself.
    pub fn open(name: &str) -> Result<Self> {
        validate_ipc_name(name)?;

        let c_name =
            CString::new(name).map_err(|_| ZeroBufferError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; mode is ignored
        // without O_CREAT.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ZeroBufferError::BufferNotFound(name.to_string()));
            }
            return Err(ZeroBufferError::Io(err));
        }

        // Size the mapping from the object, not from caller expectations.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid and stat points to writable memory of the
        // correct size.
        let ret = unsafe { libc::fstat(fd, &mut stat) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; error path, fd not reused.
            unsafe { libc::close(fd) };
            return Err(ZeroBufferError::Io(err));
        }
        let size = stat.st_size as usize;

        let ptr = Self::map(fd, size);

        // SAFETY: fd is valid; the mapping (if any) holds its own reference.
        unsafe { libc::close(fd) };

        Ok(Self {
            ptr: ptr?,
            size,
            name: name.to_string(),
        })
    }

    fn map(fd: libc::c_int, size: usize) -> Result<*mut u8> {
        // SAFETY:
        // - Null hint lets the kernel pick the address
        // - PROT_READ|PROT_WRITE with MAP_SHARED gives a cross-process
        //   read-write view of the object referenced by fd
        // - mmap returns MAP_FAILED on error (checked below)
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(ZeroBufferError::Io(io::Error::last_os_error()));
        }
        Ok(ptr.cast::<u8>())
    }

    /// Unlink (delete) a shared memory segment by name.
    ///
    /// The segment disappears once every process unmaps it. Not-found is
    /// treated as success (idempotent cleanup).
    pub fn unlink(name: &str) -> Result<()> {
        let c_name =
            CString::new(name).map_err(|_| ZeroBufferError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is valid; shm_unlink only touches the namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ZeroBufferError::Io(err));
            }
        }

        Ok(())
    }

    /// Check whether a segment with the given name exists
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };

        // SAFETY: c_name is valid; read-only probe, fd closed immediately.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };

        if fd >= 0 {
            // SAFETY: fd is valid and not used after close.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Get raw pointer to the mapped memory
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Get the size of the mapping
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the segment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from a successful mmap and Drop runs once.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
        // The owner unlinks explicitly; attachers must never unlink.
    }
}
