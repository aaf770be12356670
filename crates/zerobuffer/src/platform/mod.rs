// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX platform primitives: named shared memory, named counting
//! semaphores, PID liveness probes, and PID lock files.
//!
//! Everything here is process-shared: the resources survive the creating
//! process and must be explicitly unlinked (the buffer owner's job).

pub(crate) mod lock_file;
mod process;
mod semaphore;
mod shm;

pub use lock_file::LockFile;
pub use process::{current_pid, process_exists};
pub use semaphore::NamedSemaphore;
pub use shm::SharedMemory;

use crate::error::{Result, ZeroBufferError};

/// Validate a POSIX IPC object name: leading `/`, no other `/`, max 255.
pub(crate) fn validate_ipc_name(name: &str) -> Result<()> {
    if !name.starts_with('/') {
        return Err(ZeroBufferError::InvalidName(format!(
            "IPC name must start with '/': {name}"
        )));
    }
    if name.len() > 1 && name[1..].contains('/') {
        return Err(ZeroBufferError::InvalidName(format!(
            "IPC name cannot contain '/' after prefix: {name}"
        )));
    }
    if name.len() > 255 {
        return Err(ZeroBufferError::InvalidName(format!(
            "IPC name too long (max 255): {name}"
        )));
    }
    Ok(())
}
