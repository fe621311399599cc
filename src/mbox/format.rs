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

//! Static description of the two supported wire formats.

use crate::codec::boundary::BoundaryDef;
use crate::mbox::entry::AttrFlags;

/// The status header, holding the attribute flags as letter codes.
pub const HDR_STATUS: &str = "Status:";
/// The per-message identity header, holding the message's UID.
pub const HDR_UID: &str = "X-UID:";
/// The per-mailbox validity marker, present on the first message only,
/// holding `uid_validity` and `uid_next` as decimal integers.
pub const HDR_BASE: &str = "X-IMAPbase:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Each message begins with a `From <sender> <date>` line; body lines
    /// that could be mistaken for one are escaped with `>`.
    FromDelimited,
    /// Each message ends with a line consisting of a single `.`; body lines
    /// beginning with `.` have the leading `.` doubled.
    DotTerminated,
}

impl Flavor {
    pub fn boundary(self) -> BoundaryDef {
        match self {
            Flavor::FromDelimited => BoundaryDef::FROM,
            Flavor::DotTerminated => BoundaryDef::DOT,
        }
    }

    /// Whether messages open with a start-of-message marker line.
    pub fn has_start_marker(self) -> bool {
        match self {
            Flavor::FromDelimited => true,
            Flavor::DotTerminated => false,
        }
    }

    /// The line terminating each message, empty when the format instead
    /// recognises the next start marker.
    pub fn terminator(self) -> &'static [u8] {
        match self {
            Flavor::FromDelimited => b"",
            Flavor::DotTerminated => b".\n",
        }
    }

    /// Whether stored bodies carry boundary escaping. True for both current
    /// flavors, but the writer keeps the general transcoding paths so a
    /// future unescaped format only needs a new arm here.
    pub fn requires_escaping(self) -> bool {
        true
    }

    /// Whether `line` (including its trailing LF, if any) starts a new
    /// message when found at beginning-of-line outside a header block.
    pub fn is_start_marker(self, line: &[u8]) -> bool {
        match self {
            Flavor::FromDelimited => line.starts_with(b"From "),
            Flavor::DotTerminated => false,
        }
    }

    /// Whether `line` terminates the current message body.
    pub fn is_terminator(self, line: &[u8]) -> bool {
        match self {
            Flavor::FromDelimited => false,
            Flavor::DotTerminated => {
                b"." == line || b".\n" == line
            },
        }
    }
}

/// The mapping between status-header letter codes and attribute flags.
///
/// The letter set is an external convention, not something this engine gets
/// to define, so it is data rather than hard-coded match arms. The default
/// is the classic mailx/c-client set. Whatever the table says, encoding then
/// decoding must reproduce the same flag set.
#[derive(Clone, Debug)]
pub struct StatusCodes {
    pub letters: Vec<(u8, AttrFlags)>,
}

impl Default for StatusCodes {
    fn default() -> Self {
        StatusCodes {
            letters: vec![
                (b'R', AttrFlags::SEEN),
                (b'O', AttrFlags::OLD),
                (b'D', AttrFlags::DELETED),
                (b'F', AttrFlags::FLAGGED),
                (b'A', AttrFlags::ANSWERED),
                (b'T', AttrFlags::DRAFT),
            ],
        }
    }
}

impl StatusCodes {
    /// Renders `flags` as the status header's letter string.
    pub fn encode(&self, flags: AttrFlags) -> String {
        let mut out = String::new();
        for &(letter, flag) in &self.letters {
            if flags.contains(flag) {
                out.push(letter as char);
            }
        }
        out
    }

    /// Parses a status header value. Unknown letters are ignored.
    pub fn decode(&self, value: &[u8]) -> AttrFlags {
        let mut flags = AttrFlags::empty();
        for &byte in value {
            for &(letter, flag) in &self.letters {
                if byte == letter {
                    flags |= flag;
                }
            }
        }
        flags
    }
}
