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

//! The in-place compactor: relocates `[min(a,b), size)` within one stream so
//! that the byte at `b` ends up at `a`, i.e. deletes or inserts `|a-b|`
//! bytes at the smaller offset, then adjusts the stream length.
//!
//! Shifting up (`b > a`) copies forward from the low end; shifting down
//! (`b < a`) must copy the highest chunk first so destination writes never
//! clobber unread source bytes, the mirror image of `memmove` semantics for
//! overlapping ranges.

use std::convert::TryInto;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::support::error::Error;
use crate::support::stream::MailStream;

/// Tunables for the compactor.
#[derive(Clone, Copy, Debug)]
pub struct ShiftParams {
    /// Copy chunk size; 0 means "as large as possible in one pass".
    pub buffer_size: usize,
}

impl Default for ShiftParams {
    fn default() -> Self {
        ShiftParams { buffer_size: 65536 }
    }
}

/// Moves `[min(a,b), size)` so the byte at `b` lands at `a` and returns the
/// new stream size.
///
/// Degenerate inputs (`a == b`, either offset beyond the current size) are
/// rejected without touching the stream. The caller's pre-operation cursor
/// is restored afterward, clamped to the new end of stream if it the shift
/// left it out of bounds.
pub fn shift<S: MailStream>(
    stream: &mut S,
    a: u64,
    b: u64,
    params: &ShiftParams,
) -> Result<u64, Error> {
    let size = stream.stream_len()?;
    if a == b || a > size || b > size {
        return Err(Error::BadShiftRange { a, b, size });
    }

    let orig_pos = stream.seek(SeekFrom::Current(0))?;
    let run = size - b;

    let chunk_size = if 0 == params.buffer_size {
        run.try_into().map_err(|_| Error::Capacity)?
    } else {
        params.buffer_size.min(run.try_into().unwrap_or(usize::MAX))
    };
    let mut buf = Vec::new();
    buf.try_reserve(chunk_size.max(1)).map_err(|_| Error::Capacity)?;
    buf.resize(chunk_size.max(1), 0);

    let new_size = if b > a {
        // Shift up: forward copy, then truncate the now-dead tail.
        let mut done = 0u64;
        while done < run {
            let n = buf.len().min((run - done).try_into().unwrap_or(usize::MAX));
            stream.seek(SeekFrom::Start(b + done))?;
            stream.read_exact(&mut buf[..n])?;
            stream.seek(SeekFrom::Start(a + done))?;
            stream.write_all(&buf[..n])?;
            done += n as u64;
        }
        let new_size = a + run;
        stream.truncate(new_size)?;
        new_size
    } else {
        // Shift down: backward copy, highest chunk first.
        let mut remaining = run;
        while remaining > 0 {
            let n = buf.len().min(remaining.try_into().unwrap_or(usize::MAX));
            let src = b + remaining - n as u64;
            let dst = a + remaining - n as u64;
            stream.seek(SeekFrom::Start(src))?;
            stream.read_exact(&mut buf[..n])?;
            stream.seek(SeekFrom::Start(dst))?;
            stream.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        a + run
    };

    stream.seek(SeekFrom::Start(orig_pos.min(new_size)))?;
    Ok(new_size)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    fn numbered(n: u8) -> Vec<u8> {
        (0..n).collect()
    }

    #[test]
    fn shift_up_closes_gap() {
        let mut stream = Cursor::new(numbered(100));
        let new_size =
            shift(&mut stream, 10, 30, &ShiftParams { buffer_size: 7 })
                .unwrap();
        assert_eq!(80, new_size);

        let mut expected = numbered(100);
        expected.drain(10..30);
        assert_eq!(expected, *stream.get_ref());
    }

    #[test]
    fn shift_up_buffer_sizes_agree() {
        // Buffer size 7 is deliberately not a divisor of the 70-byte run.
        let mut chunked = Cursor::new(numbered(100));
        shift(&mut chunked, 10, 30, &ShiftParams { buffer_size: 7 }).unwrap();

        let mut single = Cursor::new(numbered(100));
        shift(&mut single, 10, 30, &ShiftParams { buffer_size: 0 }).unwrap();

        assert_eq!(80, chunked.get_ref().len());
        assert_eq!(chunked.get_ref(), single.get_ref());
    }

    #[test]
    fn shift_down_opens_gap() {
        let mut stream = Cursor::new(numbered(100));
        let new_size =
            shift(&mut stream, 30, 10, &ShiftParams { buffer_size: 7 })
                .unwrap();
        assert_eq!(120, new_size);
        assert_eq!(120, stream.get_ref().len());
        // Bytes before the gap untouched; the shifted run intact after it.
        assert_eq!(&numbered(100)[..10], &stream.get_ref()[..10]);
        assert_eq!(&numbered(100)[10..], &stream.get_ref()[30..]);
    }

    #[test]
    fn degenerate_inputs_rejected_untouched() {
        let mut stream = Cursor::new(numbered(50));
        stream.set_position(25);

        assert_matches!(
            Err(Error::BadShiftRange { .. }),
            shift(&mut stream, 10, 10, &ShiftParams::default())
        );
        assert_matches!(
            Err(Error::BadShiftRange { .. }),
            shift(&mut stream, 10, 51, &ShiftParams::default())
        );
        assert_matches!(
            Err(Error::BadShiftRange { .. }),
            shift(&mut stream, 51, 10, &ShiftParams::default())
        );

        assert_eq!(numbered(50), *stream.get_ref());
        assert_eq!(25, stream.position());
    }

    #[test]
    fn cursor_restored_or_clamped() {
        let mut stream = Cursor::new(numbered(100));
        stream.set_position(5);
        shift(&mut stream, 10, 30, &ShiftParams { buffer_size: 16 }).unwrap();
        assert_eq!(5, stream.position());

        let mut stream = Cursor::new(numbered(100));
        stream.set_position(95);
        shift(&mut stream, 10, 90, &ShiftParams { buffer_size: 16 }).unwrap();
        // New size is 20; the old position no longer exists.
        assert_eq!(20, stream.position());
    }

    proptest! {
        #[test]
        fn up_then_down_restores_tail(
            len in 2u8..120,
            a in 0u64..40,
            b in 0u64..40,
            buffer_size in 0usize..17,
        ) {
            let (a, b) = (a.min(b), a.max(b));
            prop_assume!(a != b && b < len as u64);

            let original = numbered(len);
            let mut stream = Cursor::new(original.clone());
            let params = ShiftParams { buffer_size };

            shift(&mut stream, a, b, &params).unwrap();
            shift(&mut stream, b, a, &params).unwrap();

            // The tail is back at its old offsets; the reopened gap holds
            // stale bytes, which is all the caller may assume.
            prop_assert_eq!(len as usize, stream.get_ref().len());
            prop_assert_eq!(
                &original[b as usize..],
                &stream.get_ref()[b as usize..]
            );
            prop_assert_eq!(
                &original[..a as usize],
                &stream.get_ref()[..a as usize]
            );
        }
    }
}
