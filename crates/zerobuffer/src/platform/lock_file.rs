// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PID lock files for stale-buffer detection.
//!
//! Each buffer has one lock file under the per-user runtime directory,
//! containing the creator's pid as decimal text. A lock file whose pid no
//! longer exists marks the buffer's resources as stale and safe to unlink.
//!
//! The runtime directory resolves `XDG_RUNTIME_DIR`, then `TMPDIR`, then
//! `/tmp`, each suffixed with `zerobuffer/`.

use super::process::process_exists;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// The per-user runtime directory holding all zerobuffer lock files.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .or_else(|| std::env::var_os("TMPDIR"))
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    base.join("zerobuffer")
}

/// A held buffer lock. Removing the file is explicit ([`LockFile::remove`]),
/// not tied to drop: the file must outlive the creating process so that
/// crashes leave evidence behind for stale detection.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Write a lock file for `name` in `dir`, recording `pid`.
    pub fn create_in(dir: &Path, name: &str, pid: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.lock"));
        fs::write(&path, format!("{pid}\n"))?;
        log::debug!("[ZB] lock file created: {} (pid {pid})", path.display());
        Ok(Self { path })
    }

    /// Write a lock file for `name` in the runtime directory.
    pub fn create(name: &str, pid: u64) -> Result<Self> {
        Self::create_in(&runtime_dir(), name, pid)
    }

    /// Path of this lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Not-found is success.
    pub fn remove(self) -> Result<()> {
        remove_at(&self.path)
    }

    /// Read the holder pid recorded in a lock file, if parseable.
    #[must_use]
    pub fn holder_pid(path: &Path) -> Option<u64> {
        let content = fs::read_to_string(path).ok()?;
        content.trim().parse().ok()
    }

    /// Check whether the lock at `path` is held by a live process.
    ///
    /// A missing or unparseable lock file counts as stale: there is no
    /// evidence of a live owner.
    #[must_use]
    pub fn is_stale(path: &Path) -> bool {
        match Self::holder_pid(path) {
            Some(pid) => !process_exists(pid),
            None => true,
        }
    }
}

/// Remove a lock file by path. Not-found is success.
pub fn remove_at(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
