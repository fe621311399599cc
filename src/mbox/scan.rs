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

//! The lazy scanner: builds the ordered message descriptor array by a
//! single forward pass over the backing stream.
//!
//! The pass records byte offsets only. It does not parse headers beyond
//! recognising the blank line that ends a header block, and it never runs
//! the boundary decoder; everything that would require either is computed
//! on first access by [`load_headers`] and [`body_stats`].

use std::io::{Read, Seek, SeekFrom, Write};

use log::warn;
use memchr::memchr;

use crate::codec::{boundary, pump};
use crate::mbox::entry::{AttrFlags, MessageEntry};
use crate::mbox::format::{Flavor, StatusCodes, HDR_BASE, HDR_STATUS, HDR_UID};
use crate::mbox::uid::{parse_base, parse_uid, Uid};
use crate::mbox::write::{is_header, HeaderLines};
use crate::support::error::Error;
use crate::support::stream::MailStream;

const READ_CHUNK: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    /// Before the first message, or after a dot-flavor terminator.
    Start,
    /// Inside a header block.
    Headers,
    /// Inside a body, watching for the next boundary.
    Body,
}

/// Scans `stream` forward from `from`, appending one entry per message
/// found, and returns the offset scanning stopped at (the end of stream).
///
/// Existing entries are never modified, which is what makes the incremental
/// form (`from` = previously known size) safe for append detection.
pub(super) fn scan<S: MailStream>(
    stream: &mut S,
    flavor: Flavor,
    from: u64,
    entries: &mut Vec<MessageEntry>,
) -> Result<u64, Error> {
    let mut lines = LineReader::new(stream, from)?;
    let mut state = ScanState::Start;

    while let Some((off, line)) = lines.next_line()? {
        // A start marker is a boundary from any state; losing the header
        // terminator of the previous message must not cascade.
        if flavor.is_start_marker(&line) && ScanState::Start != state {
            {
                let cur = entries.last_mut().unwrap();
                cur.message_end = off;
                if ScanState::Headers == state {
                    warn!(
                        "Message at {} has unterminated headers; \
                         resynchronized at {}",
                        cur.message_start, off,
                    );
                    cur.malformed = true;
                    cur.body_start = off;
                }
            }
            entries.push(MessageEntry::new(off));
            state = ScanState::Headers;
            continue;
        }

        match state {
            ScanState::Start => {
                if flavor.has_start_marker() {
                    if !flavor.is_start_marker(&line) {
                        // Content where only a start marker can be is not
                        // recoverable at message granularity.
                        return Err(Error::Malformed(off));
                    }
                    entries.push(MessageEntry::new(off));
                    state = ScanState::Headers;
                } else {
                    entries.push(MessageEntry::new(off));
                    state = if b"\n" == &*line {
                        // Empty header block.
                        let cur = entries.last_mut().unwrap();
                        cur.body_start = off + 1;
                        ScanState::Body
                    } else if flavor.is_terminator(&line) {
                        let cur = entries.last_mut().unwrap();
                        warn!(
                            "Message at {} is a bare terminator",
                            cur.message_start,
                        );
                        cur.malformed = true;
                        cur.body_start = off;
                        cur.message_end = off + line.len() as u64;
                        cur.terminated = true;
                        ScanState::Start
                    } else {
                        ScanState::Headers
                    };
                }
            },
            ScanState::Headers => {
                if b"\n" == &*line {
                    let cur = entries.last_mut().unwrap();
                    cur.body_start = off + 1;
                    state = ScanState::Body;
                } else if flavor.is_terminator(&line) {
                    let cur = entries.last_mut().unwrap();
                    warn!(
                        "Message at {} has unterminated headers; \
                         resynchronized after terminator at {}",
                        cur.message_start, off,
                    );
                    cur.malformed = true;
                    cur.body_start = off;
                    cur.message_end = off + line.len() as u64;
                    cur.terminated = true;
                    state = ScanState::Start;
                }
            },
            ScanState::Body => {
                if flavor.is_terminator(&line) {
                    let cur = entries.last_mut().unwrap();
                    cur.message_end = off + line.len() as u64;
                    cur.terminated = true;
                    state = ScanState::Start;
                }
            },
        }
    }

    let size = lines.offset();

    // End of stream. A message still open here gets a synthesized end; a
    // header block still open is additionally a per-entry parse error.
    match state {
        ScanState::Start => (),
        ScanState::Headers => {
            let cur = entries.last_mut().unwrap();
            warn!(
                "Message at {} truncated inside its header block",
                cur.message_start,
            );
            cur.malformed = true;
            cur.body_start = size;
            cur.message_end = size;
        },
        ScanState::Body => {
            let cur = entries.last_mut().unwrap();
            cur.message_end = size;
            cur.terminated = false;
        },
    }

    Ok(size)
}

/// The engine-relevant headers of one message.
#[derive(Clone, Copy, Debug)]
pub(super) struct ScannedHeaders {
    pub flags: AttrFlags,
    pub uid: Option<Uid>,
    pub base: Option<(u32, u32)>,
}

impl Default for ScannedHeaders {
    fn default() -> Self {
        ScannedHeaders {
            flags: AttrFlags::empty(),
            uid: None,
            base: None,
        }
    }
}

/// Pulls the status/identity/validity headers of one entry.
pub(super) fn load_headers<S: MailStream>(
    stream: &mut S,
    entry: &MessageEntry,
    codes: &StatusCodes,
) -> Result<ScannedHeaders, Error> {
    if entry.malformed {
        return Err(Error::Malformed(entry.message_start));
    }

    let region = read_region(stream, entry.message_start, entry.body_start)?;
    let mut scanned = ScannedHeaders::default();

    for line in HeaderLines::new(&region) {
        if is_header(line, HDR_STATUS) {
            scanned.flags = codes.decode(value_of(line, HDR_STATUS));
        } else if is_header(line, HDR_UID) {
            scanned.uid = parse_uid(value_of(line, HDR_UID));
        } else if is_header(line, HDR_BASE) {
            scanned.base = parse_base(value_of(line, HDR_BASE));
        }
    }

    Ok(scanned)
}

/// Computes the decoded body size and line count of one entry by running
/// the boundary decoder over its raw body region.
pub(super) fn body_stats<S: MailStream>(
    stream: &mut S,
    entry: &MessageEntry,
    flavor: Flavor,
) -> Result<(u64, u64), Error> {
    if entry.malformed {
        return Err(Error::Malformed(entry.message_start));
    }

    let (start, end) =
        entry.raw_body_range(flavor.terminator().len() as u64);
    let mut region = RegionReader::new(stream, start, end);
    let mut counter = LineCounter::default();

    if entry.body_escaped {
        let mut decoder = boundary::Decoder::new(flavor.boundary());
        pump(&mut decoder, &mut region, &mut counter, 0)?;
    } else {
        std::io::copy(&mut region, &mut counter)?;
    }

    Ok((counter.bytes, counter.lines()))
}

fn value_of<'a>(line: &'a [u8], name: &str) -> &'a [u8] {
    let mut value = &line[name.len()..];
    while let Some((&b'\n', rest)) = value.split_last() {
        value = rest;
    }
    value
}

pub(super) fn read_region<S: MailStream>(
    stream: &mut S,
    start: u64,
    end: u64,
) -> Result<Vec<u8>, Error> {
    let len = (end - start) as usize;
    let mut region = Vec::new();
    region.try_reserve(len).map_err(|_| Error::Capacity)?;
    region.resize(len, 0);
    stream.seek(SeekFrom::Start(start))?;
    stream.read_exact(&mut region)?;
    Ok(region)
}

/// A `Read` view of one byte range of the backing stream.
///
/// Seeks before every read, so interleaving with other stream use is safe
/// as long as nothing writes the region meanwhile.
pub(super) struct RegionReader<'a, S> {
    stream: &'a mut S,
    pos: u64,
    end: u64,
}

impl<'a, S: MailStream> RegionReader<'a, S> {
    pub(super) fn new(stream: &'a mut S, start: u64, end: u64) -> Self {
        RegionReader {
            stream,
            pos: start,
            end,
        }
    }
}

impl<'a, S: MailStream> Read for RegionReader<'a, S> {
    fn read(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
        let remaining = (self.end - self.pos) as usize;
        if 0 == remaining {
            return Ok(0);
        }
        let n = dst.len().min(remaining);
        self.stream.seek(SeekFrom::Start(self.pos))?;
        let nread = self.stream.read(&mut dst[..n])?;
        self.pos += nread as u64;
        Ok(nread)
    }
}

#[derive(Default)]
struct LineCounter {
    bytes: u64,
    newlines: u64,
    last: Option<u8>,
}

impl LineCounter {
    fn lines(&self) -> u64 {
        match self.last {
            None => 0,
            Some(b'\n') => self.newlines,
            Some(_) => self.newlines + 1,
        }
    }
}

impl Write for LineCounter {
    fn write(&mut self, src: &[u8]) -> std::io::Result<usize> {
        self.bytes += src.len() as u64;
        self.newlines += memchr::memchr_iter(b'\n', src).count() as u64;
        if let Some(&last) = src.last() {
            self.last = Some(last);
        }
        Ok(src.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Incremental line reader over a `MailStream`, yielding each line with the
/// offset it starts at. The final line is yielded even without a trailing
/// LF.
struct LineReader<'a, S> {
    stream: &'a mut S,
    buf: Vec<u8>,
    start: usize,
    len: usize,
    offset: u64,
    eof: bool,
}

impl<'a, S: MailStream> LineReader<'a, S> {
    fn new(stream: &'a mut S, from: u64) -> Result<Self, Error> {
        stream.seek(SeekFrom::Start(from))?;
        Ok(LineReader {
            stream,
            buf: vec![0; READ_CHUNK],
            start: 0,
            len: 0,
            offset: from,
            eof: false,
        })
    }

    /// The offset just past the last yielded line.
    fn offset(&self) -> u64 {
        self.offset
    }

    fn next_line(&mut self) -> Result<Option<(u64, Vec<u8>)>, Error> {
        loop {
            if let Some(ix) = memchr(b'\n', &self.buf[self.start..self.len]) {
                let line = self.buf[self.start..self.start + ix + 1].to_vec();
                let off = self.offset;
                self.start += ix + 1;
                self.offset += line.len() as u64;
                return Ok(Some((off, line)));
            }

            if self.eof {
                if self.start == self.len {
                    return Ok(None);
                }
                let line = self.buf[self.start..self.len].to_vec();
                let off = self.offset;
                self.start = self.len;
                self.offset += line.len() as u64;
                return Ok(Some((off, line)));
            }

            // Compact, grow if a line exceeds the whole buffer, refill.
            self.buf.copy_within(self.start..self.len, 0);
            self.len -= self.start;
            self.start = 0;
            if self.len == self.buf.len() {
                let new_len = self.buf.len() * 2;
                self.buf
                    .try_reserve(self.buf.len())
                    .map_err(|_| Error::Capacity)?;
                self.buf.resize(new_len, 0);
            }

            let nread = self.stream.read(&mut self.buf[self.len..])?;
            if 0 == nread {
                self.eof = true;
            }
            self.len += nread;
        }
    }
}
