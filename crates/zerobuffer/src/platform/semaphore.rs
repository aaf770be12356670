// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named POSIX counting semaphores for cross-process wakeup.
//!
//! One semaphore signals "data available" (posted by the writer, waited on
//! by the reader), the other "space available" (posted by the reader,
//! waited on by the writer). Counts can run ahead of actual state - both
//! wait loops re-check the shared counters after every wakeup, so surplus
//! tokens only cost a spurious loop iteration.
//!
//! Timed waits use `sem_timedwait` on Linux. Other Unixes (notably macOS)
//! lack it, so the fallback polls `sem_trywait` with a short sleep.

use super::validate_ipc_name;
use crate::error::{Result, ZeroBufferError};
use std::ffi::CString;
use std::io;
use std::time::Duration;

/// A named, process-shared counting semaphore.
///
/// Closed on drop; unlinking the name is the buffer owner's job.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: sem_t handles may be used from any thread; the kernel object is
// process-shared by construction (sem_open).
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a semaphore with the given initial count.
    ///
    /// Any leftover semaphore under this name is unlinked first: creation
    /// only happens while holding buffer ownership, so a same-name object
    /// can only be debris from a dead owner.
    pub fn create(name: &str, initial: u32) -> Result<Self> {
        validate_ipc_name(name)?;

        let c_name =
            CString::new(name).map_err(|_| ZeroBufferError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; unlink of a
        // missing name just returns ENOENT, which we ignore.
        unsafe { libc::sem_unlink(c_name.as_ptr()) };

        // SAFETY: O_CREAT|O_EXCL after the unlink above creates a fresh
        // semaphore with the requested initial count.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(ZeroBufferError::Io(io::Error::last_os_error()));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Open an existing semaphore by name.
    pub fn open(name: &str) -> Result<Self> {
        validate_ipc_name(name)?;

        let c_name =
            CString::new(name).map_err(|_| ZeroBufferError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is valid; no O_CREAT, so this attaches or fails.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ZeroBufferError::BufferNotFound(name.to_string()));
            }
            return Err(ZeroBufferError::Io(err));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Increment the count, waking one waiter if any.
    pub fn post(&self) -> Result<()> {
        // SAFETY: self.sem is a valid handle from sem_open.
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret < 0 {
            return Err(ZeroBufferError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Decrement the count, blocking up to `timeout`.
    ///
    /// Returns `true` if a token was consumed, `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        self.wait_impl(timeout)
    }

    /// Decrement the count without blocking.
    ///
    /// Returns `true` if a token was consumed.
    pub fn try_wait(&self) -> Result<bool> {
        // SAFETY: self.sem is a valid handle from sem_open.
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(false);
        }
        Err(ZeroBufferError::Io(err))
    }

    #[cfg(target_os = "linux")]
    fn wait_impl(&self, timeout: Duration) -> Result<bool> {
        // sem_timedwait takes an absolute CLOCK_REALTIME deadline.
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: now points to writable memory of the correct type.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } < 0 {
            return Err(ZeroBufferError::Io(io::Error::last_os_error()));
        }

        let mut deadline = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t,
            tv_nsec: now.tv_nsec + timeout.subsec_nanos() as libc::c_long,
        };
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }

        loop {
            // SAFETY: self.sem is a valid handle; deadline is a valid
            // timespec for the whole call.
            let ret = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if ret == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(ZeroBufferError::Io(err)),
            }
        }
    }

    // Poll fallback for platforms without sem_timedwait (macOS).
    #[cfg(not(target_os = "linux"))]
    fn wait_impl(&self, timeout: Duration) -> Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Get the semaphore name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unlink a semaphore by name. Not-found is success.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name =
            CString::new(name).map_err(|_| ZeroBufferError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is valid; sem_unlink only touches the namespace.
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ZeroBufferError::Io(err));
            }
        }

        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: self.sem is a valid handle and Drop runs once. Open
        // handles in other processes are unaffected by this close.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}
