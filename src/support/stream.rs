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

//! The seekable byte stream abstraction backing a mailbox.
//!
//! The engine needs a little more than `Read + Write + Seek`: it must be able
//! to ask for the current stream length and to truncate the stream after
//! compaction. `MailStream` adds those two operations. `std::fs::File` is
//! the production implementation; `Cursor<Vec<u8>>` backs the tests.

use std::convert::TryInto;
use std::fs;
use std::io::{self, Cursor, Read, Seek, Write};

pub trait MailStream: Read + Write + Seek {
    /// Returns the current length of the stream in bytes.
    fn stream_len(&mut self) -> io::Result<u64>;

    /// Truncates the stream to `len` bytes.
    ///
    /// The stream position is left unchanged; callers are responsible for
    /// clamping it back into bounds (`shift` does this itself).
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl MailStream for fs::File {
    fn stream_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl MailStream for Cursor<Vec<u8>> {
    fn stream_len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len: usize = len
            .try_into()
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        self.get_mut().truncate(len);
        Ok(())
    }
}

/// Wraps a `MailStream` and counts the write and truncate calls that reach
/// it.
///
/// Mainly used for testing (e.g. that a second `sync` performs no writes).
#[derive(Debug)]
pub struct WriteCounter<S> {
    inner: S,
    pub writes: u64,
    pub truncates: u64,
}

impl<S> WriteCounter<S> {
    pub fn new(inner: S) -> Self {
        WriteCounter {
            inner,
            writes: 0,
            truncates: 0,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for WriteCounter<S> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.inner.read(dst)
    }
}

impl<S: Write> Write for WriteCounter<S> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        self.inner.write(src)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for WriteCounter<S> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl<S: MailStream> MailStream for WriteCounter<S> {
    fn stream_len(&mut self) -> io::Result<u64> {
        self.inner.stream_len()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.truncates += 1;
        self.inner.truncate(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursor_truncate_and_len() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        assert_eq!(11, cursor.stream_len().unwrap());
        cursor.truncate(5).unwrap();
        assert_eq!(5, cursor.stream_len().unwrap());
        assert_eq!(b"hello", &cursor.get_ref()[..]);
    }

    #[test]
    fn write_counter_counts() {
        let mut stream = WriteCounter::new(Cursor::new(Vec::new()));
        stream.write_all(b"abc").unwrap();
        stream.write_all(b"def").unwrap();
        stream.truncate(3).unwrap();
        assert_eq!(2, stream.writes);
        assert_eq!(1, stream.truncates);
    }
}
