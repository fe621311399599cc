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

//! Shared-open bookkeeping for file-backed mailboxes.
//!
//! Two independent `Mailbox` values over the same file would each believe
//! their own scanned offsets; the registry hands out one shared instance
//! per canonical path instead. Like the rest of the engine this is
//! single-threaded, hence `Rc` rather than any locking.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::mbox::format::Flavor;
use crate::mbox::Mailbox;
use crate::support::error::Error;

pub type SharedMailbox = Rc<RefCell<Mailbox<fs::File>>>;

#[derive(Default)]
pub struct MailboxRegistry {
    open: HashMap<PathBuf, SharedMailbox>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        MailboxRegistry::default()
    }

    /// Returns the shared mailbox for `path`, opening (and creating) it on
    /// first use. Later calls for the same file return the same instance,
    /// whatever `flavor` they pass.
    pub fn open(
        &mut self,
        path: impl AsRef<Path>,
        flavor: Flavor,
    ) -> Result<SharedMailbox, Error> {
        let canonical = match fs::canonicalize(&path) {
            Ok(canonical) => canonical,
            Err(_) => {
                // First open creates the file; canonicalization needs it
                // on disk.
                fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)?;
                fs::canonicalize(&path)?
            },
        };

        if let Some(existing) = self.open.get(&canonical) {
            return Ok(Rc::clone(existing));
        }

        let shared = Rc::new(RefCell::new(Mailbox::open(&canonical, flavor)?));
        self.open.insert(canonical, Rc::clone(&shared));
        Ok(shared)
    }

    /// Forgets the registered instance for `path`. Existing holders keep
    /// theirs; the next `open` rescans the file.
    pub fn close(&mut self, path: impl AsRef<Path>) {
        if let Ok(canonical) = fs::canonicalize(path) {
            self.open.remove(&canonical);
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_path_shares_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        let mut registry = MailboxRegistry::new();

        let a = registry.open(&path, Flavor::FromDelimited).unwrap();
        let b = registry.open(&path, Flavor::FromDelimited).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(1, registry.open_count());

        let other = registry
            .open(dir.path().join("archive"), Flavor::FromDelimited)
            .unwrap();
        assert!(!Rc::ptr_eq(&a, &other));
        assert_eq!(2, registry.open_count());
    }

    #[test]
    fn repeat_open_does_not_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        let mut registry = MailboxRegistry::new();

        let a = registry.open(&path, Flavor::FromDelimited).unwrap();
        a.borrow_mut()
            .append(b"Subject: x\r\n\r\nbody\r\n")
            .unwrap();

        // Content another writer left behind does not matter while the
        // shared instance is registered; the file is not scanned again.
        fs::write(&path, b"not a marker\n").unwrap();
        let b = registry.open(&path, Flavor::FromDelimited).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn close_detaches_without_breaking_holders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        let mut registry = MailboxRegistry::new();

        let a = registry.open(&path, Flavor::FromDelimited).unwrap();
        a.borrow_mut()
            .append(b"Subject: x\r\n\r\nbody\r\n")
            .unwrap();
        registry.close(&path);
        assert_eq!(0, registry.open_count());

        // The old holder still works; a fresh open rescans the file.
        assert_eq!(1, a.borrow().message_count());
        let b = registry.open(&path, Flavor::FromDelimited).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(1, b.borrow().message_count());
    }
}
