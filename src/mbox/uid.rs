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

//! Per-message identity and the per-mailbox validity stamp.
//!
//! The contract is the classic one: `(uid_validity, uid)` pairs are globally
//! unique for the whole lifetime of a mailbox. UIDs are stable across
//! close/reopen because they are embedded in the message text itself; if the
//! embedded values are ever found inconsistent, stability cannot be
//! guaranteed, so the validity stamp is bumped and every UID reassigned.

use std::fmt;
use std::num::NonZeroU32;

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase strictly in message order. They are never
/// reused within one validity epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// The mailbox-level UID bookkeeping.
#[derive(Clone, Copy, Debug)]
pub struct UidState {
    /// The validity stamp. 0 until scanned or minted.
    pub validity: u32,
    /// The next UID to hand out. Always exceeds every assigned UID.
    pub next: u32,
    /// Whether the first message's validity marker has been consulted.
    pub validity_scanned: bool,
    /// Whether the validity changed this session (fresh mailbox or
    /// consistency bump); forces the marker header to be rewritten.
    pub validity_changed: bool,
    /// Whether `validity`/`next` differ from what the marker header says.
    pub modified: bool,
}

impl UidState {
    pub fn new() -> Self {
        UidState {
            validity: 0,
            next: 1,
            validity_scanned: false,
            validity_changed: false,
            modified: false,
        }
    }

    /// Takes the next UID, advancing the counter.
    pub fn allocate(&mut self) -> Uid {
        let uid = Uid::of(self.next).unwrap_or(Uid::MIN);
        self.next = self.next.saturating_add(1);
        self.modified = true;
        uid
    }
}

impl Default for UidState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the `X-IMAPbase` marker value: `uid_validity` and `uid_next` as
/// decimal integers.
pub fn parse_base(value: &[u8]) -> Option<(u32, u32)> {
    let value = std::str::from_utf8(value).ok()?;
    let mut parts = value.split_whitespace();
    let validity = parts.next()?.parse().ok()?;
    let next = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((validity, next))
}

/// Parses the `X-UID` value.
pub fn parse_uid(value: &[u8]) -> Option<Uid> {
    std::str::from_utf8(value)
        .ok()?
        .trim()
        .parse()
        .ok()
        .and_then(Uid::of)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocate_advances() {
        let mut state = UidState::new();
        state.next = 5;
        assert_eq!(Uid::u(5), state.allocate());
        assert_eq!(Uid::u(6), state.allocate());
        assert_eq!(7, state.next);
        assert!(state.modified);
    }

    #[test]
    fn parse_base_values() {
        assert_eq!(Some((1234, 7)), parse_base(b" 1234 7"));
        assert_eq!(None, parse_base(b"1234"));
        assert_eq!(None, parse_base(b"1234 7 9"));
        assert_eq!(None, parse_base(b"x y"));
    }

    #[test]
    fn parse_uid_values() {
        assert_eq!(Some(Uid::u(42)), parse_uid(b" 42 "));
        assert_eq!(None, parse_uid(b"0"));
        assert_eq!(None, parse_uid(b"nope"));
    }
}
