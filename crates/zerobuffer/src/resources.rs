// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonical resource naming and stale-resource recovery.
//!
//! A logical buffer `name` maps to four OS resources:
//!
//! - shared memory object `/{name}`
//! - "data available" semaphore `/sem-w-{name}`
//! - "space available" semaphore `/sem-r-{name}`
//! - lock file `{runtime_dir}/zerobuffer/{name}.lock`
//!
//! The lock file holds the creating reader's pid. On a creation collision,
//! a dead (or absent) lock holder means the previous owner crashed without
//! cleanup: all four resources are unlinked and creation retried. A live
//! holder fails the creation with `BufferAlreadyExists`.

use crate::error::{Result, ZeroBufferError};
use crate::platform::{self, LockFile, NamedSemaphore, SharedMemory};
use std::path::PathBuf;

/// Resolved resource names for one logical buffer.
#[derive(Debug, Clone)]
pub struct BufferResources {
    name: String,
    shm_name: String,
    sem_write_name: String,
    sem_read_name: String,
    lock_path: PathBuf,
}

impl BufferResources {
    /// Resolve the canonical resource names for `name`.
    ///
    /// Buffer names must be plain identifiers: no `/` (they are embedded in
    /// POSIX IPC names) and non-empty.
    pub fn for_buffer(name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') || name.len() > 200 {
            return Err(ZeroBufferError::InvalidName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            shm_name: format!("/{name}"),
            sem_write_name: format!("/sem-w-{name}"),
            sem_read_name: format!("/sem-r-{name}"),
            lock_path: platform::lock_file::runtime_dir().join(format!("{name}.lock")),
        })
    }

    /// Logical buffer name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared memory object name
    #[must_use]
    pub fn shm_name(&self) -> &str {
        &self.shm_name
    }

    /// "Data available" semaphore name (posted per published slot)
    #[must_use]
    pub fn sem_write_name(&self) -> &str {
        &self.sem_write_name
    }

    /// "Space available" semaphore name (posted per released slot)
    #[must_use]
    pub fn sem_read_name(&self) -> &str {
        &self.sem_read_name
    }

    /// Lock file path
    #[must_use]
    pub fn lock_path(&self) -> &PathBuf {
        &self.lock_path
    }

    /// Whether the previous owner of these resources is gone.
    ///
    /// A lock file with a live pid is the only evidence of a live owner.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        LockFile::is_stale(&self.lock_path)
    }

    /// Unlink every OS resource of this buffer. Idempotent; individual
    /// failures are logged and the sweep continues.
    pub fn unlink_all(&self) {
        if let Err(e) = SharedMemory::unlink(&self.shm_name) {
            log::warn!("[ZB] failed to unlink shm {}: {e}", self.shm_name);
        }
        if let Err(e) = NamedSemaphore::unlink(&self.sem_write_name) {
            log::warn!("[ZB] failed to unlink sem {}: {e}", self.sem_write_name);
        }
        if let Err(e) = NamedSemaphore::unlink(&self.sem_read_name) {
            log::warn!("[ZB] failed to unlink sem {}: {e}", self.sem_read_name);
        }
        if let Err(e) = platform::lock_file::remove_at(&self.lock_path) {
            log::warn!(
                "[ZB] failed to remove lock {}: {e}",
                self.lock_path.display()
            );
        }
    }
}

/// Sweep the runtime directory for buffers whose lock holder died and
/// unlink their resources.
///
/// Useful at application startup to reclaim debris from crashed readers.
/// Returns the number of buffers cleaned.
pub fn cleanup_stale_resources() -> usize {
    let dir = platform::lock_file::runtime_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return 0;
    };

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(buffer_name) = file_name.strip_suffix(".lock") else {
            continue;
        };

        let Ok(resources) = BufferResources::for_buffer(buffer_name) else {
            continue;
        };
        if resources.is_stale() {
            log::info!("[ZB] cleaning stale buffer: {buffer_name}");
            resources.unlink_all();
            cleaned += 1;
        }
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        let res = BufferResources::for_buffer("cam0").expect("resolve");
        assert_eq!(res.shm_name(), "/cam0");
        assert_eq!(res.sem_write_name(), "/sem-w-cam0");
        assert_eq!(res.sem_read_name(), "/sem-r-cam0");
        assert!(res.lock_path().ends_with("zerobuffer/cam0.lock"));
    }

    #[test]
    fn rejects_bad_names() {
        assert!(BufferResources::for_buffer("").is_err());
        assert!(BufferResources::for_buffer("a/b").is_err());
        assert!(BufferResources::for_buffer(&"x".repeat(300)).is_err());
    }

    #[test]
    fn missing_lock_is_stale() {
        let res = BufferResources::for_buffer("zb_never_created_0192").expect("resolve");
        assert!(res.is_stale());
    }

    #[test]
    fn unlink_all_is_idempotent() {
        let res = BufferResources::for_buffer("zb_unlink_test_0192").expect("resolve");
        res.unlink_all();
        res.unlink_all();
    }
}
