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

//! The chunked, restartable byte-stream transform contract shared by every
//! codec in the engine.
//!
//! A transcoder is a pure function from `(state, input slice)` to
//! `(state', output slice, outcome)`. It never performs I/O itself, which is
//! what makes it safely restartable at arbitrary chunk boundaries and
//! chainable. Driving a transcoder from a `Read` to a `Write` is the job of
//! [`pump`].

use std::io::{Read, Write};

use crate::support::error::Error;

pub mod boundary;
pub mod crlf;

/// The result of one successful `transcode` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Progress was made. At least one of the two counts is non-zero except
    /// at end of data. A non-zero `consumed` with a zero `produced` means
    /// bytes were tentatively absorbed into codec state.
    Ok { consumed: usize, produced: usize },
    /// No input was consumed; the caller must re-offer a larger output
    /// buffer at the same input position.
    NeedOutput,
}

pub trait Transcoder {
    /// Transcodes bytes from `input` into `output`.
    ///
    /// An empty `input` signals end of data and drains any bytes the codec
    /// still holds, verbatim. Callers should repeat the empty-input call
    /// until it reports zero bytes produced.
    fn transcode(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Outcome, Error>;

    /// Releases the transcoding session.
    ///
    /// The formats handled here are stateless at arbitrary chunk boundaries,
    /// so a codec that still holds undrained bytes after the end-of-data
    /// calls is defective and reports `Error::TranscoderResidue`.
    fn finish(&self) -> Result<(), Error>;
}

/// Chunk size used by [`pump`] when the caller passes 0.
const DEFAULT_CHUNK: usize = 8192;

/// Drives `transcoder` over the whole of `src`, writing transcoded bytes to
/// `dst`, and returns the number of bytes written.
///
/// `chunk` bounds the input read size; 0 selects a default. The output offer
/// starts at the same size and grows on `NeedOutput`; a failed growth is
/// reported as `Error::Capacity` with the streams left where they are.
pub fn pump(
    transcoder: &mut impl Transcoder,
    src: &mut impl Read,
    dst: &mut impl Write,
    chunk: usize,
) -> Result<u64, Error> {
    let chunk = if 0 == chunk { DEFAULT_CHUNK } else { chunk };
    let mut in_buf = vec![0u8; chunk];
    let mut out_buf = vec![0u8; chunk.max(64)];
    let mut written = 0u64;

    loop {
        let nread = src.read(&mut in_buf)?;
        let mut off = 0;

        // The inner loop also runs once with an empty slice after EOF, which
        // is the end-of-data signal that drains the codec.
        loop {
            match transcoder.transcode(&in_buf[off..nread], &mut out_buf)? {
                Outcome::Ok { consumed, produced } => {
                    dst.write_all(&out_buf[..produced])?;
                    written += produced as u64;
                    off += consumed;
                    if 0 == nread && 0 == produced {
                        break;
                    }
                    if off >= nread && 0 != nread {
                        break;
                    }
                },
                Outcome::NeedOutput => {
                    let grow = out_buf.len();
                    out_buf
                        .try_reserve(grow)
                        .map_err(|_| Error::Capacity)?;
                    out_buf.resize(grow * 2, 0);
                },
            }
        }

        if 0 == nread {
            break;
        }
    }

    transcoder.finish()?;
    Ok(written)
}

/// Transcodes a complete in-memory slice. Convenience over [`pump`].
pub fn transcode_slice(
    transcoder: &mut impl Transcoder,
    input: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut src = input;
    let mut out = Vec::new();
    pump(transcoder, &mut src, &mut out, 0)?;
    Ok(out)
}

/// Bytes which have been tentatively consumed but not yet committed to the
/// output, plus bytes scheduled for emission.
///
/// This replaces the seek-and-replay technique the on-disk formats were
/// originally manipulated with: on a falsified boundary match the held run is
/// flushed to the output verbatim, and on a confirmed match it is rewritten.
/// Escape runs are stored as a count (the bytes are all identical), so the
/// structure itself stays a fixed size no matter how long the run is. Drain
/// order is escapes, then the literal slice, then the tail byte.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Replay {
    escape: u8,
    escapes: usize,
    lit: &'static [u8],
    lit_pos: usize,
    tail: Option<u8>,
}

impl Replay {
    pub(crate) fn new(escape: u8) -> Self {
        Replay {
            escape,
            escapes: 0,
            lit: b"",
            lit_pos: 0,
            tail: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        0 == self.escapes && self.lit_pos >= self.lit.len() && self.tail.is_none()
    }

    pub(crate) fn push_escapes(&mut self, n: usize) {
        debug_assert!(self.is_empty() || 0 != self.escapes);
        self.escapes += n;
    }

    pub(crate) fn push_lit(&mut self, lit: &'static [u8]) {
        debug_assert!(self.lit_pos >= self.lit.len());
        self.lit = lit;
        self.lit_pos = 0;
    }

    pub(crate) fn push_tail(&mut self, byte: u8) {
        debug_assert!(self.tail.is_none());
        self.tail = Some(byte);
    }

    /// Writes as much of the held run as fits into `output`, returning the
    /// byte count written.
    pub(crate) fn drain(&mut self, output: &mut [u8]) -> usize {
        let mut n = 0;

        while 0 != self.escapes && n < output.len() {
            output[n] = self.escape;
            n += 1;
            self.escapes -= 1;
        }

        while self.lit_pos < self.lit.len() && n < output.len() {
            output[n] = self.lit[self.lit_pos];
            n += 1;
            self.lit_pos += 1;
        }

        if n < output.len() {
            if let Some(byte) = self.tail.take() {
                output[n] = byte;
                n += 1;
            }
        }

        n
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::{Outcome, Transcoder};

    /// Drives a transcoder over `input` in `in_chunk`-sized pieces with an
    /// `out_chunk`-sized output offer, exercising partial drains and
    /// `NeedOutput` handling, and returns the full output.
    pub(crate) fn run_chunked(
        transcoder: &mut impl Transcoder,
        input: &[u8],
        in_chunk: usize,
        out_chunk: usize,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        let mut out_buf = vec![0u8; out_chunk];

        let mut pos = 0;
        while pos < input.len() {
            let end = (pos + in_chunk).min(input.len());
            while pos < end {
                match transcoder
                    .transcode(&input[pos..end], &mut out_buf)
                    .unwrap()
                {
                    Outcome::Ok { consumed, produced } => {
                        out.extend_from_slice(&out_buf[..produced]);
                        pos += consumed;
                    },
                    Outcome::NeedOutput => {
                        let n = out_buf.len() * 2;
                        out_buf.resize(n, 0);
                    },
                }
            }
        }

        loop {
            match transcoder.transcode(&[], &mut out_buf).unwrap() {
                Outcome::Ok { produced, .. } => {
                    if 0 == produced {
                        break;
                    }
                    out.extend_from_slice(&out_buf[..produced]);
                },
                Outcome::NeedOutput => {
                    let n = out_buf.len() * 2;
                    out_buf.resize(n, 0);
                },
            }
        }

        transcoder.finish().unwrap();
        out
    }
}
