// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PID liveness probes.
//!
//! Dead-peer detection rests on `kill(pid, 0)`: signal 0 performs the
//! permission check without delivering anything. ESRCH means the process is
//! gone; EPERM means it exists but belongs to someone else, which still
//! counts as alive.

/// Get the current process id
#[must_use]
pub fn current_pid() -> u64 {
    std::process::id().into()
}

/// Check whether a process with the given pid exists.
///
/// A pid of 0 (the "unattached" sentinel in the OIEB) is never alive.
#[must_use]
pub fn process_exists(pid: u64) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: kill with signal 0 only performs existence/permission checks.
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_exists() {
        assert!(process_exists(current_pid()));
    }

    #[test]
    fn pid_zero_is_unattached() {
        assert!(!process_exists(0));
    }

    #[test]
    fn reaped_child_does_not_exist() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        let pid = u64::from(child.id());
        child.wait().expect("wait");
        assert!(!process_exists(pid));
    }

    #[test]
    fn out_of_range_pid_does_not_exist() {
        assert!(!process_exists(u64::MAX));
    }
}
