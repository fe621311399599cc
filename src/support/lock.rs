//-
// Copyright (c) 2026, the mboxfile authors
//
// This file is part of mboxfile.
//
// mboxfile is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// mboxfile is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along
// with mboxfile. If not, see <http://www.gnu.org/licenses/>.

//! The exclusive-lock collaborator.
//!
//! The storage engine itself performs no locking. Callers are required to
//! hold an exclusive lock on the mailbox's storage location for the full
//! duration of any mutating operation (append, flag flush, expunge). This
//! module supplies the interface the engine documents against, plus a
//! `flock`-based implementation for callers that do not bring their own.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::support::error::Error;

/// Tunables for lock acquisition.
#[derive(Clone, Copy, Debug)]
pub struct LockParams {
    /// Number of additional acquisition attempts after the first fails.
    pub retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Age after which a held guard is considered expired and should no
    /// longer be relied upon by its holder.
    pub expiry: Duration,
}

impl Default for LockParams {
    fn default() -> Self {
        LockParams {
            retries: 5,
            retry_delay: Duration::from_millis(500),
            expiry: Duration::from_secs(300),
        }
    }
}

/// An exclusive-lock primitive keyed by the mailbox's storage location.
pub trait MailboxLocker {
    fn lock_exclusive(&self, path: &Path) -> Result<LockGuard, Error>;
}

/// Holds an exclusive lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: fs::File,
    acquired: Instant,
    expiry: Duration,
}

impl LockGuard {
    /// Whether the guard has outlived its configured expiry.
    pub fn expired(&self) -> bool {
        self.acquired.elapsed() >= self.expiry
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = nix::fcntl::flock(
            self.file.as_raw_fd(),
            nix::fcntl::FlockArg::Unlock,
        );
    }
}

/// `flock(2)`-based locker. The lock is taken on a `<mailbox>.lock` sibling
/// so the mailbox file itself can be replaced while locked.
#[derive(Clone, Copy, Debug, Default)]
pub struct FcntlLocker {
    pub params: LockParams,
}

impl MailboxLocker for FcntlLocker {
    fn lock_exclusive(&self, path: &Path) -> Result<LockGuard, Error> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        let mut attempt = 0u32;
        loop {
            match nix::fcntl::flock(
                file.as_raw_fd(),
                nix::fcntl::FlockArg::LockExclusiveNonblock,
            ) {
                Ok(()) => {
                    return Ok(LockGuard {
                        file,
                        acquired: Instant::now(),
                        expiry: self.params.expiry,
                    });
                },
                Err(_) if attempt < self.params.retries => {
                    attempt += 1;
                    debug!(
                        "Lock on {:?} busy, retry {}/{}",
                        path, attempt, self.params.retries
                    );
                    thread::sleep(self.params.retry_delay);
                },
                Err(_) => return Err(Error::LockBusy),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");

        let locker = FcntlLocker {
            params: LockParams {
                retries: 0,
                retry_delay: Duration::from_millis(1),
                expiry: Duration::from_secs(60),
            },
        };

        let guard = locker.lock_exclusive(&path).unwrap();
        assert!(!guard.expired());
        drop(guard);

        // Releasable and re-acquirable within one process.
        let _guard = locker.lock_exclusive(&path).unwrap();
    }
}
