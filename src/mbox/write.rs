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

//! Serializes one complete, self-consistent message to a destination
//! stream: the original header block minus the engine's own headers, a
//! fresh status header, fresh identity headers, then the body, transcoded
//! if the destination format and the body's current escaping state differ.
//!
//! The source and destination may be different regions of the same stream.
//! The caller must then stage the source bytes through a buffer
//! ([`crate::support::buffer`]) rather than handing this function a reader
//! over the overlapping region.

use std::io::{self, Read, Seek, SeekFrom, Write};

use chrono::prelude::*;
use memchr::memchr;

use crate::codec::{boundary, pump};
use crate::mbox::entry::AttrFlags;
use crate::mbox::format::{Flavor, StatusCodes, HDR_BASE, HDR_STATUS, HDR_UID};
use crate::mbox::uid::Uid;
use crate::support::error::{Error, Phase};
use crate::support::stream::MailStream;

/// The offsets a written message ended up with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteResult {
    pub body_start: u64,
    pub message_end: u64,
}

/// Everything the writer needs besides the body bytes.
pub struct MessageSpec<'a> {
    /// Index of the message being written, for error context only.
    pub index: usize,
    /// The raw header region, `message_start..body_start` of the source:
    /// the start-marker line if the source format has one, the header
    /// lines, and the terminating blank line.
    pub headers: &'a [u8],
    /// Current in-memory attribute flags.
    pub flags: AttrFlags,
    pub uid: Uid,
    /// `(uid_validity, uid_next)`; present only when writing message 1.
    pub base: Option<(u32, u32)>,
    /// Whether the body bytes offered to the writer already carry boundary
    /// escaping.
    pub body_escaped: bool,
}

/// Writes one message at offset `at` of `dest` and returns its new offsets.
///
/// The destination stream is left positioned at `message_end`.
pub fn write_message<S: MailStream>(
    dest: &mut S,
    at: u64,
    flavor: Flavor,
    codes: &StatusCodes,
    spec: &MessageSpec<'_>,
    body: &mut impl Read,
) -> Result<WriteResult, Error> {
    let index = spec.index;
    let head = render_headers(flavor, codes, spec);

    dest.seek(SeekFrom::Start(at))
        .map_err(|e| Error::from(e).during(index, Phase::HeaderCopy))?;
    dest.write_all(&head)
        .map_err(|e| Error::from(e).during(index, Phase::HeaderCopy))?;

    let body_start = at + head.len() as u64;

    let mut tail = TailTracker::new(dest);
    let body_len = match (flavor.requires_escaping(), spec.body_escaped) {
        (true, true) | (false, false) => io::copy(body, &mut tail)
            .map_err(|e| Error::from(e).during(index, Phase::BodyTranscode))?,
        (true, false) => {
            let mut encoder = boundary::Encoder::new(flavor.boundary());
            pump(&mut encoder, body, &mut tail, 0)
                .map_err(|e| e.during(index, Phase::BodyTranscode))?
        },
        (false, true) => {
            let mut decoder = boundary::Decoder::new(flavor.boundary());
            pump(&mut decoder, body, &mut tail, 0)
                .map_err(|e| e.during(index, Phase::BodyTranscode))?
        },
    };
    let ends_with_nl = tail.ends_with_nl();

    let mut message_end = body_start + body_len;

    // The message must end at beginning-of-line: a terminator sits on its
    // own line, and whatever is written next must be recognizable as a
    // start marker.
    if body_len > 0 && !ends_with_nl {
        dest.write_all(b"\n").map_err(|e| {
            Error::from(e).during(index, Phase::BodyTranscode)
        })?;
        message_end += 1;
    }

    let terminator = flavor.terminator();
    if !terminator.is_empty() {
        dest.write_all(terminator).map_err(|e| {
            Error::from(e).during(index, Phase::BodyTranscode)
        })?;
        message_end += terminator.len() as u64;
    }

    // The offsets we report must describe what actually landed on the
    // stream; a position drift here would corrupt every later message.
    let pos = dest
        .seek(SeekFrom::Current(0))
        .map_err(|e| Error::from(e).during(index, Phase::OffsetRecord))?;
    if pos != message_end {
        return Err(Error::InconsistentState.during(index, Phase::OffsetRecord));
    }

    Ok(WriteResult {
        body_start,
        message_end,
    })
}

/// Builds the new header block: copied headers minus the engine's own, then
/// the freshly serialized status/identity headers and the blank line.
pub(super) fn render_headers(
    flavor: Flavor,
    codes: &StatusCodes,
    spec: &MessageSpec<'_>,
) -> Vec<u8> {
    let mut head = Vec::with_capacity(spec.headers.len() + 64);
    let mut first = true;
    let mut skipping_continuation = false;

    for line in HeaderLines::new(spec.headers) {
        if first {
            first = false;
            if flavor.has_start_marker() {
                if flavor.is_start_marker(line) {
                    head.extend_from_slice(line);
                    continue;
                }
                // Source had no marker line (e.g. a raw append in the other
                // flavor); synthesize one.
                synthesize_start_marker(&mut head);
            }
        }

        if line == b"\n" {
            // The blank terminator; ours is written below.
            continue;
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            if !skipping_continuation {
                head.extend_from_slice(line);
            }
            continue;
        }

        let skip = is_header(line, HDR_STATUS)
            || is_header(line, HDR_UID)
            || is_header(line, HDR_BASE);
        skipping_continuation = skip;
        if !skip {
            head.extend_from_slice(line);
        }
    }

    if first && flavor.has_start_marker() {
        // Source had no header lines at all.
        synthesize_start_marker(&mut head);
    }

    if !head.is_empty() && b'\n' != *head.last().unwrap() {
        head.push(b'\n');
    }

    let letters = codes.encode(spec.flags);
    if letters.is_empty() {
        head.extend_from_slice(format!("{}\n", HDR_STATUS).as_bytes());
    } else {
        head.extend_from_slice(
            format!("{} {}\n", HDR_STATUS, letters).as_bytes(),
        );
    }
    if let Some((validity, next)) = spec.base {
        head.extend_from_slice(
            format!("{} {} {}\n", HDR_BASE, validity, next).as_bytes(),
        );
    }
    head.extend_from_slice(format!("{} {}\n", HDR_UID, spec.uid).as_bytes());
    head.push(b'\n');

    head
}

fn synthesize_start_marker(head: &mut Vec<u8>) {
    head.extend_from_slice(
        format!(
            "From MAILER-DAEMON {}\n",
            Utc::now().format("%a %b %e %H:%M:%S %Y"),
        )
        .as_bytes(),
    );
}

/// Whether `line` is the named header, ASCII-case-insensitively.
pub(super) fn is_header(line: &[u8], name: &str) -> bool {
    let name = name.as_bytes();
    line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name)
}

/// Iterator over the lines of a header region, each including its trailing
/// LF (except possibly the last).
pub(super) struct HeaderLines<'a> {
    rest: &'a [u8],
}

impl<'a> HeaderLines<'a> {
    pub(super) fn new(region: &'a [u8]) -> Self {
        HeaderLines { rest: region }
    }
}

impl<'a> Iterator for HeaderLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        let end = memchr(b'\n', self.rest)
            .map(|ix| ix + 1)
            .unwrap_or(self.rest.len());
        let (line, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(line)
    }
}

/// Write adapter remembering the last byte written through it.
struct TailTracker<'a, W> {
    inner: &'a mut W,
    last: Option<u8>,
}

impl<'a, W> TailTracker<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        TailTracker { inner, last: None }
    }

    fn ends_with_nl(&self) -> bool {
        Some(b'\n') == self.last
    }
}

impl<'a, W: Write> Write for TailTracker<'a, W> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(src)?;
        if 0 != n {
            self.last = Some(src[n - 1]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
