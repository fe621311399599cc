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

//! The in-memory representation of one physical message.

use bitflags::bitflags;

use crate::mbox::uid::Uid;

bitflags! {
    /// The per-message attribute flags packed into the textual status
    /// header.
    ///
    /// `OLD` is persisted rather than its more familiar inverse, "recent",
    /// because absence-of-a-letter is the only way the letter scheme can
    /// express recency.
    pub struct AttrFlags: u8 {
        const SEEN = 1 << 0;
        const OLD = 1 << 1;
        const DELETED = 1 << 2;
        const FLAGGED = 1 << 3;
        const ANSWERED = 1 << 4;
        const DRAFT = 1 << 5;
    }
}

impl AttrFlags {
    pub fn is_recent(self) -> bool {
        !self.contains(AttrFlags::OLD)
    }
}

/// A lazily-computed value.
///
/// The scanner records only byte offsets; everything that requires reading
/// or transcoding message content is computed the first time a consumer asks
/// and cached here. A structural rescan replaces the whole entry array, so a
/// cached value can never outlive the scan that justified it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lazy<T> {
    Unknown,
    Known(T),
}

impl<T: Copy> Lazy<T> {
    pub fn get(&self) -> Option<T> {
        match *self {
            Lazy::Unknown => None,
            Lazy::Known(v) => Some(v),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(*self, Lazy::Known(..))
    }
}

/// One physical message in the backing stream.
///
/// Offsets always satisfy
/// `message_start <= body_start <= message_end <= mailbox size`.
#[derive(Clone, Debug)]
pub struct MessageEntry {
    /// Offset of the first byte of the message (the `From_` line for that
    /// flavor, the first header otherwise).
    pub message_start: u64,
    /// Offset of the first body byte, just past the blank line that
    /// terminates the header block.
    pub body_start: u64,
    /// Offset just past the last byte of the message, including the
    /// terminator line for the dot flavor.
    pub message_end: u64,
    /// Whether the message carries its format's terminator. Only meaningful
    /// for the dot flavor; false means the final message was truncated and
    /// its end synthesized at end of stream.
    pub terminated: bool,
    /// Whether the header block was parseable. Accessors on a malformed
    /// entry fail without disturbing its neighbours.
    pub malformed: bool,
    /// Whether the stored body carries boundary escaping.
    pub body_escaped: bool,

    /// Flags from the status header, once pulled.
    pub attrs: Lazy<AttrFlags>,
    /// The embedded UID, once pulled. `Known(None)` means the header was
    /// scanned and carried no identity; the UID tracker then assigns one.
    pub uid: Lazy<Option<Uid>>,
    /// Decoded body size in bytes.
    pub body_size: Lazy<u64>,
    /// Decoded body line count.
    pub body_lines: Lazy<u64>,

    /// The in-memory flags differ from the persisted status header.
    pub attrs_modified: bool,
    /// The UID (or its very existence in the header block) must be flushed.
    pub uid_modified: bool,
}

impl MessageEntry {
    pub fn new(message_start: u64) -> Self {
        MessageEntry {
            message_start,
            body_start: message_start,
            message_end: message_start,
            terminated: false,
            malformed: false,
            body_escaped: true,
            attrs: Lazy::Unknown,
            uid: Lazy::Unknown,
            body_size: Lazy::Unknown,
            body_lines: Lazy::Unknown,
            attrs_modified: false,
            uid_modified: false,
        }
    }

    /// The raw (still escaped) body region within the backing stream,
    /// excluding any terminator line.
    pub fn raw_body_range(&self, terminator_len: u64) -> (u64, u64) {
        let end = if self.terminated {
            self.message_end - terminator_len
        } else {
            self.message_end
        };
        (self.body_start, end.max(self.body_start))
    }

    pub fn dirty(&self) -> bool {
        self.attrs_modified || self.uid_modified
    }
}

/// A caller-facing reference to a message.
///
/// This is deliberately not an owning or borrowing edge into the entry
/// array: it is the entry's index plus the generation of the index it was
/// created under. The mailbox bumps its generation on every rescan and
/// expunge, so a stale handle is detected and rejected instead of silently
/// addressing the wrong message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub(super) generation: u64,
    pub(super) index: usize,
}

impl MessageHandle {
    /// The 1-based sequence number this handle was created under.
    pub fn seqnum(&self) -> u32 {
        (self.index + 1) as u32
    }
}
