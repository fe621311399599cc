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

use std::fmt;
use std::io;

use thiserror::Error;

/// The phase of message reconstruction in which an error occurred.
///
/// Carried by `Error::Rewrite` so that callers can log precisely where
/// compaction or reconstruction stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    HeaderCopy,
    BodyTranscode,
    OffsetRecord,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Phase::HeaderCopy => write!(f, "header-copy"),
            Phase::BodyTranscode => write!(f, "body-transcode"),
            Phase::OffsetRecord => write!(f, "offset-record"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// A boundary token or header block could not be located where the wire
    /// format requires one. The offset is the position the scanner had
    /// reached when the failure was detected.
    #[error("Mailbox malformed near offset {0}")]
    Malformed(u64),
    /// The UID ordering or offset ordering invariant was found violated.
    /// Recoverable by bumping the UID validity and rescanning.
    #[error("Mailbox index inconsistent; rescan required")]
    InconsistentState,
    /// A working buffer could not be allocated. The backing stream is left
    /// wherever the operation had reached and must be considered
    /// untrustworthy until rescanned.
    #[error("Buffer allocation failed")]
    Capacity,
    /// The message handle refers to a generation of the index that has been
    /// invalidated by a rescan or expunge.
    #[error("Stale message handle")]
    StaleHandle,
    #[error("Mailbox lock busy")]
    LockBusy,
    /// A transcoder still held buffered bytes when the session was closed.
    /// The formats involved are stateless at arbitrary chunk boundaries, so
    /// this indicates a defective transcoder, not bad input.
    #[error("Transcoder retained undrained state at end of stream")]
    TranscoderResidue,
    #[error("Invalid shift range {a}..{b} for stream of size {size}")]
    BadShiftRange { a: u64, b: u64, size: u64 },
    #[error("Rewrite of message {index} failed during {phase}")]
    Rewrite {
        index: usize,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps this error with the index and phase of the message rewrite that
    /// produced it.
    pub fn during(self, index: usize, phase: Phase) -> Self {
        Error::Rewrite {
            index,
            phase,
            source: Box::new(self),
        }
    }
}
