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

//! The flat-file mailbox engine.
//!
//! A [`Mailbox`] wraps a single [`MailStream`] holding every message of the
//! mailbox back to back in one of two wire [`Flavor`]s, and maintains an
//! in-memory descriptor per message. Descriptors carry byte offsets plus
//! lazily materialized attributes; the stream is the single source of truth
//! and nothing is cached that cannot be reconstructed from it.
//!
//! Mutations follow the mbox discipline: appends go to the end of the
//! stream, flag and UID changes are buffered in memory until [`sync`]
//! rewrites the affected header blocks, and [`expunge`] compacts the stream
//! in place, never through a temporary copy of the whole mailbox.
//!
//! The engine itself is single-threaded and does no file locking; callers
//! coordinating with other mail software are expected to hold an exclusive
//! lock (see [`crate::support::lock`]) around any open mailbox.
//!
//! [`sync`]: Mailbox::sync
//! [`expunge`]: Mailbox::expunge

use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use log::{info, warn};

use crate::codec::{boundary, crlf, transcode_slice, pump};
use crate::support::buffer::BufferWriter;
use crate::support::clock::{ValiditySource, WallClock};
use crate::support::error::Error;
use crate::support::stream::MailStream;

pub mod entry;
pub mod format;
pub mod registry;
mod scan;
pub mod shift;
pub mod uid;
mod write;

pub use self::entry::{AttrFlags, Lazy, MessageHandle};
pub use self::format::{Flavor, StatusCodes};
pub use self::shift::ShiftParams;
pub use self::uid::Uid;

use self::entry::MessageEntry;
use self::scan::RegionReader;
use self::shift::shift;
use self::uid::UidState;
use self::write::{write_message, MessageSpec};

/// An open mailbox over a seekable stream.
pub struct Mailbox<S> {
    stream: S,
    flavor: Flavor,
    codes: StatusCodes,
    shift_params: ShiftParams,
    validity_source: Box<dyn ValiditySource>,
    /// Stream size as of the last scan. The scanned offsets are only
    /// meaningful relative to this.
    size: u64,
    /// Bumped whenever message indices are reassigned; handles from older
    /// generations are refused.
    generation: u64,
    uids_ensured: bool,
    entries: Vec<MessageEntry>,
    uid_state: UidState,
}

impl Mailbox<fs::File> {
    /// Opens (creating if necessary) the mailbox file at `path`.
    pub fn open(path: impl AsRef<Path>, flavor: Flavor) -> Result<Self, Error> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Self::from_stream(file, flavor)
    }
}

impl<S: MailStream> Mailbox<S> {
    /// Opens a mailbox over an arbitrary stream, scanning it immediately.
    pub fn from_stream(mut stream: S, flavor: Flavor) -> Result<Self, Error> {
        let mut entries = Vec::new();
        let size = scan::scan(&mut stream, flavor, 0, &mut entries)?;
        Ok(Mailbox {
            stream,
            flavor,
            codes: StatusCodes::default(),
            shift_params: ShiftParams::default(),
            validity_source: Box::new(WallClock),
            size,
            generation: 0,
            uids_ensured: false,
            entries,
            uid_state: UidState::new(),
        })
    }

    pub fn with_status_codes(mut self, codes: StatusCodes) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_shift_params(mut self, params: ShiftParams) -> Self {
        self.shift_params = params;
        self
    }

    pub fn with_validity_source(
        mut self,
        source: Box<dyn ValiditySource>,
    ) -> Self {
        self.validity_source = source;
        self
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn message_count(&self) -> usize {
        self.entries.len()
    }

    /// Consumes the mailbox, returning the backing stream.
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Direct access to the backing stream. Writing through this makes
    /// every scanned offset meaningless; it exists for inspection.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// The handle for 1-based sequence number `seqnum`, if it exists.
    pub fn handle(&self, seqnum: u32) -> Option<MessageHandle> {
        if 0 == seqnum || seqnum as usize > self.entries.len() {
            None
        } else {
            Some(MessageHandle {
                generation: self.generation,
                index: seqnum as usize - 1,
            })
        }
    }

    /// Detects messages appended to the stream by other software.
    ///
    /// Returns whether anything new was found. Shrinkage of the stream
    /// under the scanned offsets is unrecoverable and reported as
    /// [`Error::InconsistentState`].
    pub fn poll(&mut self) -> Result<bool, Error> {
        let actual = self.stream.stream_len()?;
        if actual < self.size {
            return Err(Error::InconsistentState);
        }
        if actual == self.size {
            return Ok(false);
        }

        // An unterminated final message absorbs appended bytes, so it has
        // to be rescanned from its own start. Anything cached or pending
        // on it is discarded; the stream has already moved under us.
        let from = match self.entries.last() {
            Some(e)
                if Flavor::DotTerminated == self.flavor && !e.terminated =>
            {
                let start = e.message_start;
                self.entries.pop();
                start
            },
            _ => self.size,
        };

        self.size = scan::scan(&mut self.stream, self.flavor, from, &mut self.entries)?;
        self.uids_ensured = false;
        Ok(true)
    }

    fn index_of(&self, handle: MessageHandle) -> Result<usize, Error> {
        if handle.generation != self.generation
            || handle.index >= self.entries.len()
        {
            Err(Error::StaleHandle)
        } else {
            Ok(handle.index)
        }
    }

    /// Loads the status/identity headers of entry `ix` if not yet known.
    fn load_entry(&mut self, ix: usize) -> Result<(), Error> {
        let loaded = self.entries[ix].attrs.is_known()
            && self.entries[ix].uid.is_known();
        if loaded && (0 != ix || self.uid_state.validity_scanned) {
            return Ok(());
        }

        let scanned =
            scan::load_headers(&mut self.stream, &self.entries[ix], &self.codes)?;

        let e = &mut self.entries[ix];
        if !e.attrs.is_known() {
            e.attrs = Lazy::Known(scanned.flags);
        }
        if !e.uid.is_known() {
            e.uid = Lazy::Known(scanned.uid);
        }

        if 0 == ix && !self.uid_state.validity_scanned {
            self.uid_state.validity_scanned = true;
            if let Some((validity, next)) = scanned.base {
                if 0 != validity {
                    self.uid_state.validity = validity;
                    self.uid_state.next = next.max(1);
                }
            }
        }

        Ok(())
    }

    pub fn flags(&mut self, handle: MessageHandle) -> Result<AttrFlags, Error> {
        let ix = self.index_of(handle)?;
        self.load_entry(ix)?;
        Ok(self.entries[ix].attrs.get().unwrap_or(AttrFlags::empty()))
    }

    /// Replaces the attribute flags of one message. The change is held in
    /// memory until the next [`sync`](Self::sync).
    pub fn set_flags(
        &mut self,
        handle: MessageHandle,
        flags: AttrFlags,
    ) -> Result<(), Error> {
        let ix = self.index_of(handle)?;
        self.load_entry(ix)?;

        let e = &mut self.entries[ix];
        if Some(flags) != e.attrs.get() {
            e.attrs = Lazy::Known(flags);
            e.attrs_modified = true;
        }
        Ok(())
    }

    pub fn uid(&mut self, handle: MessageHandle) -> Result<Uid, Error> {
        let ix = self.index_of(handle)?;
        self.ensure_uids()?;
        match self.entries[ix].uid.get() {
            Some(Some(uid)) => Ok(uid),
            _ => Err(Error::Malformed(self.entries[ix].message_start)),
        }
    }

    pub fn uid_validity(&mut self) -> Result<u32, Error> {
        self.ensure_uids()?;
        Ok(self.uid_state.validity)
    }

    pub fn uid_next(&mut self) -> Result<u32, Error> {
        self.ensure_uids()?;
        Ok(self.uid_state.next)
    }

    pub fn body_size(&mut self, handle: MessageHandle) -> Result<u64, Error> {
        self.body_stats(handle).map(|(size, _)| size)
    }

    pub fn body_lines(&mut self, handle: MessageHandle) -> Result<u64, Error> {
        self.body_stats(handle).map(|(_, lines)| lines)
    }

    fn body_stats(
        &mut self,
        handle: MessageHandle,
    ) -> Result<(u64, u64), Error> {
        let ix = self.index_of(handle)?;
        if let (Some(size), Some(lines)) = (
            self.entries[ix].body_size.get(),
            self.entries[ix].body_lines.get(),
        ) {
            return Ok((size, lines));
        }

        let (size, lines) =
            scan::body_stats(&mut self.stream, &self.entries[ix], self.flavor)?;
        let e = &mut self.entries[ix];
        e.body_size = Lazy::Known(size);
        e.body_lines = Lazy::Known(lines);
        Ok((size, lines))
    }

    /// Writes the decoded (unescaped, LF-terminated) body of one message to
    /// `dst` and returns the number of bytes written.
    pub fn read_body(
        &mut self,
        handle: MessageHandle,
        dst: &mut impl Write,
    ) -> Result<u64, Error> {
        let ix = self.index_of(handle)?;
        let e = &self.entries[ix];
        if e.malformed {
            return Err(Error::Malformed(e.message_start));
        }
        let (start, end) =
            e.raw_body_range(self.flavor.terminator().len() as u64);
        let mut region = RegionReader::new(&mut self.stream, start, end);

        if e.body_escaped {
            let mut decoder = boundary::Decoder::new(self.flavor.boundary());
            pump(&mut decoder, &mut region, dst, 0)
        } else {
            Ok(io::copy(&mut region, dst)?)
        }
    }

    /// Appends one message, given in RFC 5322 wire form (CRLF or LF line
    /// endings), and returns its handle.
    ///
    /// A `Status` header in the incoming message seeds the initial flags,
    /// except that the message is always considered recent; `X-UID` and
    /// `X-IMAPbase` headers are discarded and replaced with freshly
    /// allocated values. Existing messages are not moved, so handles stay
    /// valid across appends.
    pub fn append(&mut self, raw: &[u8]) -> Result<MessageHandle, Error> {
        self.ensure_uids()?;
        self.complete_trailing_entry()?;

        let mut decoder = crlf::Decoder::new();
        let raw = transcode_slice(&mut decoder, raw)?;
        let (headers, body) = split_wire_message(&raw);

        let mut flags = AttrFlags::empty();
        for line in write::HeaderLines::new(headers) {
            if write::is_header(line, format::HDR_STATUS) {
                flags = self
                    .codes
                    .decode(&line[format::HDR_STATUS.len()..]);
            }
        }
        flags.remove(AttrFlags::OLD);

        let uid = self.uid_state.allocate();
        let base = if self.entries.is_empty() {
            Some((self.uid_state.validity, self.uid_state.next))
        } else {
            None
        };

        let index = self.entries.len();
        let spec = MessageSpec {
            index,
            headers,
            flags,
            uid,
            base,
            body_escaped: false,
        };
        let mut body_src = body;
        let result = write_message(
            &mut self.stream,
            self.size,
            self.flavor,
            &self.codes,
            &spec,
            &mut body_src,
        )?;
        self.stream.flush()?;

        // The writer completes a body lacking a final newline, and that
        // newline reads back as part of the body.
        let mut body_size = body.len() as u64;
        if !body.is_empty() && Some(&b'\n') != body.last() {
            body_size += 1;
        }

        let mut e = MessageEntry::new(self.size);
        e.body_start = result.body_start;
        e.message_end = result.message_end;
        e.terminated = !self.flavor.terminator().is_empty();
        e.body_escaped = true;
        e.attrs = Lazy::Known(flags);
        e.uid = Lazy::Known(Some(uid));
        e.body_size = Lazy::Known(body_size);
        e.body_lines = Lazy::Known(count_lines(body));
        self.entries.push(e);
        self.size = result.message_end;

        if base.is_some() {
            // The marker we just wrote is current.
            self.uid_state.modified = false;
            self.uid_state.validity_changed = false;
        }

        Ok(MessageHandle {
            generation: self.generation,
            index,
        })
    }

    /// Closes off a final message left without its terminator or final
    /// newline, so that the message written next starts at a recognizable
    /// boundary instead of being absorbed by its predecessor on the next
    /// scan.
    fn complete_trailing_entry(&mut self) -> Result<(), Error> {
        let last = match self.entries.len() {
            0 => return Ok(()),
            n => n - 1,
        };

        let term = self.flavor.terminator();
        let needs_term = !term.is_empty() && !self.entries[last].terminated;
        let needs_newline = self.size > self.entries[last].message_start && {
            let tail =
                scan::read_region(&mut self.stream, self.size - 1, self.size)?;
            b'\n' != tail[0]
        };
        if !needs_term && !needs_newline {
            return Ok(());
        }

        info!(
            "Re-terminating truncated final message at {}",
            self.entries[last].message_start,
        );
        self.stream.seek(SeekFrom::Start(self.size))?;
        if needs_newline {
            self.stream.write_all(b"\n")?;
            let e = &mut self.entries[last];
            e.message_end += 1;
            if let Some(size) = e.body_size.get() {
                e.body_size = Lazy::Known(size + 1);
            }
            self.size += 1;
        }
        if needs_term {
            self.stream.write_all(term)?;
            let e = &mut self.entries[last];
            e.message_end += term.len() as u64;
            e.terminated = true;
            self.size += term.len() as u64;
        }
        Ok(())
    }

    /// Flushes pending flag and UID changes to the stream by rewriting the
    /// affected header blocks, shifting each message's tail when a block
    /// changes size. A sync with nothing pending performs no writes at all.
    pub fn sync(&mut self) -> Result<(), Error> {
        let base_stale = !self.entries.is_empty()
            && (self.uid_state.modified || self.uid_state.validity_changed);
        if !base_stale && !self.entries.iter().any(MessageEntry::dirty) {
            return Ok(());
        }

        // Rewriting a header block requires the message's identity, so
        // lingering UID inconsistencies get resolved first. This can add
        // more dirty entries.
        self.ensure_uids()?;
        let base_stale = self.uid_state.modified
            || self.uid_state.validity_changed;

        let mut delta = 0i64;
        for ix in 0..self.entries.len() {
            if 0 != delta {
                let e = &mut self.entries[ix];
                e.message_start = offset(e.message_start, delta);
                e.body_start = offset(e.body_start, delta);
                e.message_end = offset(e.message_end, delta);
            }

            let e = &self.entries[ix];
            if e.malformed || !(e.dirty() || (0 == ix && base_stale)) {
                continue;
            }

            let region = scan::read_region(
                &mut self.stream,
                e.message_start,
                e.body_start,
            )?;
            let e = &self.entries[ix];
            let spec = MessageSpec {
                index: ix,
                headers: &region,
                flags: e.attrs.get().unwrap_or(AttrFlags::empty()),
                uid: match e.uid.get() {
                    Some(Some(uid)) => uid,
                    _ => return Err(Error::InconsistentState),
                },
                base: if 0 == ix {
                    Some((self.uid_state.validity, self.uid_state.next))
                } else {
                    None
                },
                body_escaped: true,
            };
            let head = write::render_headers(self.flavor, &self.codes, &spec);

            let old_len = e.body_start - e.message_start;
            let new_len = head.len() as u64;
            if new_len != old_len {
                let change = new_len as i64 - old_len as i64;
                let new_body_start = offset(e.body_start, change);
                self.size = shift(
                    &mut self.stream,
                    new_body_start,
                    self.entries[ix].body_start,
                    &self.shift_params,
                )?;
                delta += change;
                let e = &mut self.entries[ix];
                e.body_start = new_body_start;
                e.message_end = offset(e.message_end, change);
            }

            let start = self.entries[ix].message_start;
            self.stream.seek(SeekFrom::Start(start))?;
            self.stream.write_all(&head)?;

            let e = &mut self.entries[ix];
            e.attrs_modified = false;
            e.uid_modified = false;
        }

        self.uid_state.modified = false;
        self.uid_state.validity_changed = false;
        self.stream.flush()?;
        Ok(())
    }

    /// Removes every message the predicate rejects and compacts the stream
    /// in place, also flushing pending changes on the rewritten tail.
    ///
    /// The predicate receives `(seqnum, uid, flags)`; malformed messages
    /// are offered with no UID and empty flags. Messages before the first
    /// removed or dirty one are left byte-identical. All outstanding
    /// handles are invalidated. Returns the number of messages removed.
    pub fn expunge(
        &mut self,
        mut keep: impl FnMut(u32, Option<Uid>, AttrFlags) -> bool,
    ) -> Result<usize, Error> {
        self.ensure_uids()?;

        let keeps = {
            let entries = &self.entries;
            entries
                .iter()
                .enumerate()
                .map(|(ix, e)| {
                    keep(
                        ix as u32 + 1,
                        e.uid.get().and_then(|uid| uid),
                        e.attrs.get().unwrap_or(AttrFlags::empty()),
                    )
                })
                .collect::<Vec<bool>>()
        };

        let base_stale = self.uid_state.modified
            || self.uid_state.validity_changed;
        let first = self.entries.iter().enumerate().position(|(ix, e)| {
            !keeps[ix] || e.dirty() || (0 == ix && base_stale)
        });
        let first = match first {
            Some(first) => first,
            // Nothing to remove, nothing to flush.
            None => return Ok(0),
        };

        let term_len = self.flavor.terminator().len() as u64;
        let mut src = self.entries.clone();
        let mut new_entries = self.entries[..first].to_vec();
        let mut write_pos = src[first].message_start;
        let mut removed = 0usize;

        for ix in first..src.len() {
            if !keeps[ix] {
                removed += 1;
                continue;
            }

            if src[ix].malformed {
                // No headers we can interpret; preserved verbatim.
                let raw = scan::read_region(
                    &mut self.stream,
                    src[ix].message_start,
                    src[ix].message_end,
                )?;
                self.stream.seek(SeekFrom::Start(write_pos))?;
                self.stream.write_all(&raw)?;

                let mut e = src[ix].clone();
                let change =
                    write_pos as i64 - src[ix].message_start as i64;
                e.message_start = write_pos;
                e.body_start = offset(e.body_start, change);
                e.message_end = offset(e.message_end, change);
                write_pos = e.message_end;
                new_entries.push(e);
                continue;
            }

            let region = scan::read_region(
                &mut self.stream,
                src[ix].message_start,
                src[ix].body_start,
            )?;
            let (bstart, bend) = src[ix].raw_body_range(term_len);

            // The body is staged through a spill buffer before any write,
            // so the rewrite may safely slide over its own source bytes.
            let mut staged = BufferWriter::new();
            io::copy(
                &mut RegionReader::new(&mut self.stream, bstart, bend),
                &mut staged,
            )?;
            let body_len = staged.len();
            let ends_with_nl = bend > bstart && {
                let tail =
                    scan::read_region(&mut self.stream, bend - 1, bend)?;
                b'\n' == tail[0]
            };
            let mut staged = staged.flip()?;

            let new_index = new_entries.len();
            let spec = MessageSpec {
                index: ix,
                headers: &region,
                flags: src[ix].attrs.get().unwrap_or(AttrFlags::empty()),
                uid: match src[ix].uid.get() {
                    Some(Some(uid)) => uid,
                    _ => return Err(Error::InconsistentState),
                },
                base: if 0 == new_index {
                    Some((self.uid_state.validity, self.uid_state.next))
                } else {
                    None
                },
                body_escaped: true,
            };
            let head = write::render_headers(self.flavor, &self.codes, &spec);

            // Exact size of the rewritten message, mirroring the writer's
            // completion and terminator logic.
            let mut new_end = write_pos + head.len() as u64 + body_len;
            if body_len > 0 && !ends_with_nl {
                new_end += 1;
            }
            new_end += term_len;

            // A growing rewrite must not slide over unread source bytes;
            // push the remaining source down first.
            let next_src = if ix + 1 < src.len() {
                src[ix + 1].message_start
            } else {
                self.size
            };
            if new_end > next_src {
                let change = new_end - next_src;
                self.size = shift(
                    &mut self.stream,
                    next_src + change,
                    next_src,
                    &self.shift_params,
                )?;
                for later in src.iter_mut().skip(ix + 1) {
                    later.message_start += change;
                    later.body_start += change;
                    later.message_end += change;
                }
            }

            let result = write_message(
                &mut self.stream,
                write_pos,
                self.flavor,
                &self.codes,
                &spec,
                &mut staged,
            )?;

            let mut e = MessageEntry::new(write_pos);
            e.body_start = result.body_start;
            e.message_end = result.message_end;
            e.terminated = 0 != term_len;
            e.body_escaped = true;
            e.attrs = src[ix].attrs;
            e.uid = src[ix].uid;
            // A completed final newline reads back as body content.
            e.body_size = match src[ix].body_size.get() {
                Some(size) if body_len > 0 && !ends_with_nl => {
                    Lazy::Known(size + 1)
                },
                _ => src[ix].body_size,
            };
            e.body_lines = src[ix].body_lines;
            new_entries.push(e);
            write_pos = result.message_end;
        }

        self.stream.truncate(write_pos)?;
        self.stream.flush()?;
        self.size = write_pos;
        self.entries = new_entries;
        self.generation += 1;
        self.uid_state.modified = false;
        self.uid_state.validity_changed = false;

        #[cfg(test)]
        self.assert_invariants();

        Ok(removed)
    }

    /// Makes the UID assignment of the whole mailbox consistent: loads
    /// every message's identity headers, adopts the validity marker from
    /// message 1 (minting one if absent), assigns UIDs to messages lacking
    /// them, and renumbers the entire mailbox under a fresh validity when
    /// the stored UIDs are duplicated or out of order.
    ///
    /// Assignments are held in memory until the next flush, like flag
    /// changes.
    pub fn ensure_uids(&mut self) -> Result<(), Error> {
        if self.uids_ensured {
            return Ok(());
        }

        for ix in 0..self.entries.len() {
            if !self.entries[ix].malformed {
                self.load_entry(ix)?;
            }
        }
        self.uid_state.validity_scanned = true;

        if 0 == self.uid_state.validity {
            self.uid_state.validity = self.validity_source.mint(0);
            self.uid_state.validity_changed = true;
            self.uid_state.modified = !self.entries.is_empty();
        }

        // Stage an assignment that keeps every existing UID; bail out to a
        // full renumbering the moment the stored sequence contradicts
        // itself.
        let mut staged: Vec<Option<u32>> =
            Vec::with_capacity(self.entries.len());
        let mut prev = 0u32;
        let mut assigned = false;
        let mut valid = true;
        for e in &self.entries {
            if e.malformed {
                staged.push(None);
                continue;
            }
            let uid = match e.uid.get() {
                Some(Some(uid)) => u32::from(uid),
                _ => {
                    assigned = true;
                    prev.saturating_add(1)
                },
            };
            if uid <= prev {
                valid = false;
                break;
            }
            prev = uid;
            staged.push(Some(uid));
        }

        if valid {
            for (e, uid) in self.entries.iter_mut().zip(staged) {
                let uid = match uid {
                    Some(uid) => uid,
                    None => continue,
                };
                if Some(Some(uid)) != e.uid.get().map(|u| u.map(u32::from)) {
                    e.uid = Lazy::Known(uid::Uid::of(uid));
                    e.uid_modified = true;
                }
            }
            let next = self.uid_state.next.max(prev.saturating_add(1));
            if assigned || next != self.uid_state.next {
                self.uid_state.next = next;
                self.uid_state.modified = true;
            }
        } else {
            // The stored UIDs lie; everything gets renumbered and the
            // validity changes so cached references elsewhere die with it.
            warn!(
                "Stored UIDs are duplicated or out of order; \
                 renumbering under a fresh validity",
            );
            self.uid_state.validity =
                self.validity_source.mint(self.uid_state.validity);
            self.uid_state.validity_changed = true;
            self.uid_state.modified = true;
            let mut next = 1u32;
            for e in &mut self.entries {
                if e.malformed {
                    continue;
                }
                e.uid = Lazy::Known(uid::Uid::of(next));
                e.uid_modified = true;
                next += 1;
            }
            self.uid_state.next = next;
        }

        self.uids_ensured = true;
        Ok(())
    }

    /// Structural invariants of the descriptor array.
    #[cfg(test)]
    fn assert_invariants(&self) {
        let mut prev_end = 0u64;
        let mut prev_uid = 0u32;
        for (ix, e) in self.entries.iter().enumerate() {
            assert!(
                e.message_start >= prev_end,
                "entry {} overlaps its predecessor",
                ix,
            );
            assert!(e.message_start <= e.body_start);
            assert!(e.body_start <= e.message_end);
            assert!(e.message_end <= self.size);
            prev_end = e.message_end;

            if let Some(Some(uid)) = e.uid.get() {
                let uid = u32::from(uid);
                assert!(uid > prev_uid, "entry {} breaks UID order", ix);
                assert!(uid < self.uid_state.next);
                prev_uid = uid;
            }
        }
    }
}

/// Splits a decoded wire message into its header region (including the
/// start-marker line if any, excluding the blank separator) and body.
fn split_wire_message(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while let Some(nl) = memchr::memchr(b'\n', &raw[pos..]) {
        let nl = pos + nl;
        if raw.get(nl + 1) == Some(&b'\n') {
            return (&raw[..nl + 1], &raw[nl + 2..]);
        }
        pos = nl + 1;
    }
    (raw, &[])
}

fn count_lines(body: &[u8]) -> u64 {
    let newlines = memchr::memchr_iter(b'\n', body).count() as u64;
    match body.last() {
        None => 0,
        Some(&b'\n') => newlines,
        Some(_) => newlines + 1,
    }
}

fn offset(base: u64, delta: i64) -> u64 {
    (base as i64 + delta) as u64
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::support::clock::FixedClock;
    use crate::support::stream::WriteCounter;

    fn fresh(flavor: Flavor) -> Mailbox<Cursor<Vec<u8>>> {
        Mailbox::from_stream(Cursor::new(Vec::new()), flavor)
            .unwrap()
            .with_validity_source(Box::new(FixedClock(1000)))
    }

    fn text(mb: &mut Mailbox<Cursor<Vec<u8>>>) -> String {
        String::from_utf8(mb.stream_mut().get_ref().clone()).unwrap()
    }

    const WIRE_ONE: &[u8] = b"From: alice@example.com\r\n\
          Subject: first\r\n\
          \r\n\
          hello\r\nworld\r\n";

    #[test]
    fn append_normalizes_and_identifies() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h1 = mb.append(WIRE_ONE).unwrap();
        let h2 = mb
            .append(b"From: bob@example.com\r\nSubject: second\r\n\r\nbye\r\n")
            .unwrap();

        assert_eq!(2, mb.message_count());
        assert_eq!(Uid::u(1), mb.uid(h1).unwrap());
        assert_eq!(Uid::u(2), mb.uid(h2).unwrap());
        assert_eq!(1000, mb.uid_validity().unwrap());
        assert_eq!(3, mb.uid_next().unwrap());

        let stored = text(&mut mb);
        // No CR anywhere, marker on message 1 only.
        assert!(!stored.contains('\r'));
        assert!(stored.starts_with("From MAILER-DAEMON "));
        assert_eq!(1, stored.matches("X-IMAPbase:").count());
        assert!(stored.contains("X-IMAPbase: 1000 2\n"));
        assert_eq!(2, stored.matches("X-UID:").count());

        // Appended messages are recent.
        assert!(mb.flags(h1).unwrap().is_recent());

        let mut body = Vec::new();
        assert_eq!(12, mb.read_body(h1, &mut body).unwrap());
        assert_eq!(b"hello\nworld\n".to_vec(), body);
        assert_eq!(12, mb.body_size(h1).unwrap());
        assert_eq!(2, mb.body_lines(h1).unwrap());
    }

    #[test]
    fn append_escapes_bodies() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h = mb
            .append(b"Subject: x\r\n\r\nFrom here it looks fine\r\n")
            .unwrap();

        assert!(text(&mut mb).contains("\n>From here it looks fine\n"));
        let mut body = Vec::new();
        mb.read_body(h, &mut body).unwrap();
        assert_eq!(b"From here it looks fine\n".to_vec(), body);
    }

    #[test]
    fn dot_flavor_append_terminates() {
        let mut mb = fresh(Flavor::DotTerminated);
        let h = mb.append(b"Subject: x\r\n\r\n.hidden\r\nplain").unwrap();

        let stored = text(&mut mb);
        assert!(stored.ends_with("\n..hidden\nplain\n.\n"));
        assert!(!stored.starts_with("From "));

        let mut body = Vec::new();
        mb.read_body(h, &mut body).unwrap();
        assert_eq!(b".hidden\nplain\n".to_vec(), body);
        assert_eq!(14, mb.body_size(h).unwrap());
    }

    #[test]
    fn append_without_final_newline_keeps_boundaries() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h1 = mb.append(b"Subject: a\r\n\r\nno trailing newline").unwrap();
        mb.append(b"Subject: b\r\n\r\nsecond\r\n").unwrap();

        // The completed newline keeps the next marker at beginning-of-line
        // and reads back as part of the first body.
        let stored = text(&mut mb);
        assert!(stored.contains("no trailing newline\nFrom MAILER-DAEMON"));
        let mut body = Vec::new();
        mb.read_body(h1, &mut body).unwrap();
        assert_eq!(b"no trailing newline\n".to_vec(), body);
        assert_eq!(20, mb.body_size(h1).unwrap());

        let mut reopened =
            Mailbox::from_stream(mb.into_stream(), Flavor::FromDelimited)
                .unwrap();
        assert_eq!(2, reopened.message_count());
        let h2 = reopened.handle(2).unwrap();
        let mut body = Vec::new();
        reopened.read_body(h2, &mut body).unwrap();
        assert_eq!(b"second\n".to_vec(), body);
    }

    #[test]
    fn append_reterminates_truncated_predecessor() {
        let truncated = b"Subject: old\n\ntruncated body\n";
        let mut mb = Mailbox::from_stream(
            Cursor::new(truncated.to_vec()),
            Flavor::DotTerminated,
        )
        .unwrap()
        .with_validity_source(Box::new(FixedClock(1000)));
        mb.append(b"Subject: new\r\n\r\nfresh\r\n").unwrap();

        let stored = text(&mut mb);
        assert!(stored.starts_with("Subject: old\n\ntruncated body\n.\n"));

        let mut reopened =
            Mailbox::from_stream(mb.into_stream(), Flavor::DotTerminated)
                .unwrap();
        assert_eq!(2, reopened.message_count());
        let h1 = reopened.handle(1).unwrap();
        let mut body = Vec::new();
        reopened.read_body(h1, &mut body).unwrap();
        assert_eq!(b"truncated body\n".to_vec(), body);
        let h2 = reopened.handle(2).unwrap();
        body.clear();
        reopened.read_body(h2, &mut body).unwrap();
        assert_eq!(b"fresh\n".to_vec(), body);
    }

    #[test]
    fn read_body_rejects_malformed_entries() {
        let mut mb = Mailbox::from_stream(
            Cursor::new(b"Subject: x\nnever a blank line".to_vec()),
            Flavor::DotTerminated,
        )
        .unwrap();
        assert_eq!(1, mb.message_count());
        let h = mb.handle(1).unwrap();
        let mut body = Vec::new();
        assert_matches!(
            Err(Error::Malformed(0)),
            mb.read_body(h, &mut body)
        );
    }

    #[test]
    fn sync_persists_flags_across_reopen() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h1 = mb.append(WIRE_ONE).unwrap();
        let h2 = mb.append(b"Subject: y\r\n\r\nsecond body\r\n").unwrap();

        mb.set_flags(h2, AttrFlags::SEEN | AttrFlags::FLAGGED | AttrFlags::OLD)
            .unwrap();
        mb.sync().unwrap();

        let mut reopened =
            Mailbox::from_stream(mb.into_stream(), Flavor::FromDelimited)
                .unwrap();
        assert_eq!(2, reopened.message_count());
        let h1 = reopened.handle(1).unwrap();
        let h2 = reopened.handle(2).unwrap();
        assert!(reopened.flags(h1).unwrap().is_empty());
        assert_eq!(
            AttrFlags::SEEN | AttrFlags::FLAGGED | AttrFlags::OLD,
            reopened.flags(h2).unwrap(),
        );
        assert_eq!(Uid::u(2), reopened.uid(h2).unwrap());
        assert_eq!(1000, reopened.uid_validity().unwrap());

        // The grown Status header shifted message 2's tail, not broken it.
        let mut body = Vec::new();
        reopened.read_body(h2, &mut body).unwrap();
        assert_eq!(b"second body\n".to_vec(), body);
    }

    #[test]
    fn sync_without_changes_writes_nothing() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h = mb.append(WIRE_ONE).unwrap();
        mb.set_flags(h, AttrFlags::SEEN).unwrap();
        mb.sync().unwrap();

        let mut counted = Mailbox::from_stream(
            WriteCounter::new(mb.into_stream()),
            Flavor::FromDelimited,
        )
        .unwrap();
        counted.sync().unwrap();
        counted.sync().unwrap();
        assert_eq!(0, counted.stream_mut().writes);
        assert_eq!(0, counted.stream_mut().truncates);
    }

    #[test]
    fn sync_flag_change_is_idempotent() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h = mb.append(WIRE_ONE).unwrap();
        mb.set_flags(h, AttrFlags::SEEN | AttrFlags::OLD).unwrap();
        mb.sync().unwrap();
        let after_first = text(&mut mb);

        // Setting the same flags again leaves nothing dirty.
        mb.set_flags(h, AttrFlags::SEEN | AttrFlags::OLD).unwrap();
        mb.sync().unwrap();
        assert_eq!(after_first, text(&mut mb));
    }

    #[test]
    fn expunge_drops_deleted_and_preserves_neighbors() {
        let mut mb = fresh(Flavor::FromDelimited);
        let _h1 = mb.append(WIRE_ONE).unwrap();
        let h2 = mb.append(b"Subject: two\r\n\r\nsecond\r\n").unwrap();
        let h3 = mb.append(b"Subject: three\r\n\r\nthird\r\n").unwrap();
        mb.set_flags(h2, AttrFlags::DELETED).unwrap();
        mb.sync().unwrap();

        let before = text(&mut mb);
        let msg2_start = before.find("\nFrom MAILER-DAEMON").unwrap() + 1;

        let removed = mb
            .expunge(|_, _, flags| !flags.contains(AttrFlags::DELETED))
            .unwrap();
        assert_eq!(1, removed);
        assert_eq!(2, mb.message_count());

        // Message 1 was not touched at all.
        let after = text(&mut mb);
        assert_eq!(&before[..msg2_start], &after[..msg2_start]);

        // Old handles are dead; the survivor kept its UID.
        assert_matches!(Err(Error::StaleHandle), mb.flags(h3));
        let h2 = mb.handle(2).unwrap();
        assert_eq!(Uid::u(3), mb.uid(h2).unwrap());
        let mut body = Vec::new();
        mb.read_body(h2, &mut body).unwrap();
        assert_eq!(b"third\n".to_vec(), body);

        assert!(mb.handle(3).is_none());
        assert!(!after.contains("Subject: two"));
    }

    #[test]
    fn expunge_without_changes_is_a_no_op() {
        let mut mb = fresh(Flavor::FromDelimited);
        mb.append(WIRE_ONE).unwrap();
        let before = text(&mut mb);
        assert_eq!(0, mb.expunge(|_, _, _| true).unwrap());
        assert_eq!(before, text(&mut mb));
    }

    #[test]
    fn dot_flavor_expunge_keeps_terminators() {
        let mut mb = fresh(Flavor::DotTerminated);
        mb.append(b"Subject: one\r\n\r\nfirst\r\n").unwrap();
        let h2 = mb.append(b"Subject: two\r\n\r\nsecond\r\n").unwrap();
        let h3 = mb.append(b"Subject: three\r\n\r\nthird\r\n").unwrap();
        let uid3 = mb.uid(h3).unwrap();
        mb.set_flags(h2, AttrFlags::DELETED).unwrap();
        mb.sync().unwrap();

        let before = text(&mut mb);
        let msg1_end =
            before.find("first\n.\n").unwrap() + "first\n.\n".len();

        mb.expunge(|_, _, flags| !flags.contains(AttrFlags::DELETED))
            .unwrap();

        // Message 1 was not touched at all.
        let after = text(&mut mb);
        assert_eq!(&before[..msg1_end], &after[..msg1_end]);
        assert!(after.ends_with(".\n"));

        let mut reopened =
            Mailbox::from_stream(mb.into_stream(), Flavor::DotTerminated)
                .unwrap();
        assert_eq!(2, reopened.message_count());
        let h2 = reopened.handle(2).unwrap();
        assert_eq!(uid3, reopened.uid(h2).unwrap());
        let mut body = Vec::new();
        reopened.read_body(h2, &mut body).unwrap();
        assert_eq!(b"third\n".to_vec(), body);
    }

    #[test]
    fn legacy_mailbox_gets_uids_assigned() {
        let legacy = b"From alice Thu Jan  1 00:00:00 2026\n\
              Subject: old one\n\
              Status: RO\n\
              \n\
              body one\n\
              From bob Thu Jan  1 00:00:01 2026\n\
              Subject: old two\n\
              \n\
              body two\n";
        let mut mb =
            Mailbox::from_stream(Cursor::new(legacy.to_vec()), Flavor::FromDelimited)
                .unwrap()
                .with_validity_source(Box::new(FixedClock(2000)));

        let h1 = mb.handle(1).unwrap();
        let h2 = mb.handle(2).unwrap();
        assert_eq!(Uid::u(1), mb.uid(h1).unwrap());
        assert_eq!(Uid::u(2), mb.uid(h2).unwrap());
        assert_eq!(2000, mb.uid_validity().unwrap());
        assert_eq!(
            AttrFlags::SEEN | AttrFlags::OLD,
            mb.flags(h1).unwrap(),
        );

        mb.sync().unwrap();
        let stored = text(&mut mb);
        assert!(stored.contains("X-IMAPbase: 2000 3\n"));
        assert!(stored.contains("X-UID: 1\n"));
        assert!(stored.contains("X-UID: 2\n"));

        // Reopening adopts the now-persistent identities.
        let mut reopened =
            Mailbox::from_stream(mb.into_stream(), Flavor::FromDelimited)
                .unwrap()
                .with_validity_source(Box::new(FixedClock(3000)));
        assert_eq!(2000, reopened.uid_validity().unwrap());
        let h2 = reopened.handle(2).unwrap();
        assert_eq!(Uid::u(2), reopened.uid(h2).unwrap());
    }

    #[test]
    fn disordered_uids_force_renumbering() {
        crate::init_test_log();
        let broken = b"From a x\n\
              X-IMAPbase: 500 10\n\
              X-UID: 5\n\
              \n\
              one\n\
              From b y\n\
              X-UID: 3\n\
              \n\
              two\n";
        let mut mb =
            Mailbox::from_stream(Cursor::new(broken.to_vec()), Flavor::FromDelimited)
                .unwrap()
                .with_validity_source(Box::new(FixedClock(100)));

        let h1 = mb.handle(1).unwrap();
        let h2 = mb.handle(2).unwrap();
        assert_eq!(Uid::u(1), mb.uid(h1).unwrap());
        assert_eq!(Uid::u(2), mb.uid(h2).unwrap());
        // The previous validity wins the tie against the fixed clock, so
        // the mint lands just above it.
        assert_eq!(501, mb.uid_validity().unwrap());
        assert_eq!(3, mb.uid_next().unwrap());
    }

    #[test]
    fn poll_sees_external_appends() {
        let mut mb = fresh(Flavor::FromDelimited);
        mb.append(WIRE_ONE).unwrap();
        assert!(!mb.poll().unwrap());

        // Another writer appends a message directly.
        mb.stream_mut().get_mut().extend_from_slice(
            b"From carol Thu Jan  1 00:00:02 2026\nSubject: ext\n\nnew\n",
        );

        assert!(mb.poll().unwrap());
        assert_eq!(2, mb.message_count());
        let h2 = mb.handle(2).unwrap();
        let mut body = Vec::new();
        mb.read_body(h2, &mut body).unwrap();
        assert_eq!(b"new\n".to_vec(), body);
    }

    #[test]
    fn truncated_stream_is_inconsistent() {
        let mut mb = fresh(Flavor::FromDelimited);
        mb.append(WIRE_ONE).unwrap();
        mb.stream_mut().get_mut().truncate(10);
        assert_matches!(Err(Error::InconsistentState), mb.poll());
    }

    #[test]
    fn handles_survive_append_and_sync() {
        let mut mb = fresh(Flavor::FromDelimited);
        let h1 = mb.append(WIRE_ONE).unwrap();
        mb.set_flags(h1, AttrFlags::SEEN).unwrap();
        mb.append(b"Subject: z\r\n\r\nzzz\r\n").unwrap();
        mb.sync().unwrap();

        assert_eq!(AttrFlags::SEEN, mb.flags(h1).unwrap());
        assert_eq!(Uid::u(1), mb.uid(h1).unwrap());
    }

    #[test]
    fn invariants_hold_across_mixed_operations() {
        for flavor in &[Flavor::FromDelimited, Flavor::DotTerminated] {
            let mut mb = fresh(*flavor);

            for i in 0..6 {
                let wire = format!("Subject: m{}\r\n\r\nbody {}\r\n", i, i);
                mb.append(wire.as_bytes()).unwrap();
                mb.assert_invariants();
            }

            let h3 = mb.handle(3).unwrap();
            mb.set_flags(h3, AttrFlags::SEEN | AttrFlags::DELETED).unwrap();
            mb.assert_invariants();

            mb.sync().unwrap();
            mb.assert_invariants();

            mb.expunge(|_, _, flags| !flags.contains(AttrFlags::DELETED))
                .unwrap();
            mb.assert_invariants();
            assert_eq!(5, mb.message_count());

            let h = mb.append(b"Subject: late\r\n\r\nfin\r\n").unwrap();
            mb.set_flags(h, AttrFlags::FLAGGED).unwrap();
            mb.sync().unwrap();
            mb.assert_invariants();
            assert_eq!(Uid::u(7), mb.uid(h).unwrap());
        }
    }
}
