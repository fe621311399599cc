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

//! Support for "buffers", which are write-once-read-once values that spill to
//! an anonymous temporary file if they exceed a maximum size.
//!
//! The compaction path stages each message being rewritten through one of
//! these, since the writer must never read and write overlapping regions of
//! the mailbox stream directly.

use std::fs;
use std::io::{self, Read, Seek, Write};

const MAX_BUFFER: usize = 65536;

pub struct BufferWriter {
    buf: Vec<u8>,
    len: u64,
    on_disk: Option<fs::File>,
}

pub struct BufferReader {
    buf: Vec<u8>,
    off: usize,
    len: u64,
    on_disk: Option<fs::File>,
}

impl BufferWriter {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        BufferWriter {
            buf: Vec::new(),
            len: 0,
            on_disk: None,
        }
    }

    /// Returns the length, in bytes, of the buffer.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// "Flips" the buffer, making it usable for rereading.
    pub fn flip(mut self) -> io::Result<BufferReader> {
        if let Some(file) = self.on_disk.as_mut() {
            file.seek(io::SeekFrom::Start(0))?;
        }

        Ok(BufferReader {
            buf: self.buf,
            off: 0,
            len: self.len,
            on_disk: self.on_disk,
        })
    }
}

impl Default for BufferWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for BufferWriter {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if self.on_disk.is_none() && src.len() + self.buf.len() > MAX_BUFFER {
            let spill = std::mem::replace(&mut self.buf, Vec::new());
            let mut file = tempfile::tempfile()?;
            file.write_all(&spill)?;
            self.on_disk = Some(file);
        }

        if let Some(file) = self.on_disk.as_mut() {
            file.write_all(src)?;
        } else {
            self.buf.extend_from_slice(src);
        }

        self.len += src.len() as u64;

        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BufferReader {
    /// Directly create a `BufferReader` from the given data.
    ///
    /// Mainly used for testing.
    pub fn new(data: Vec<u8>) -> Self {
        BufferReader {
            len: data.len() as u64,
            buf: data,
            off: 0,
            on_disk: None,
        }
    }

    /// Returns the length, in bytes, of the buffer.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Rewind to position 0.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.off = 0;
        if let Some(ref mut file) = self.on_disk {
            file.seek(io::SeekFrom::Start(0))?;
        }

        Ok(())
    }
}

impl Read for BufferReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if let Some(file) = self.on_disk.as_mut() {
            file.read(dst)
        } else {
            let len = dst.len().min(self.buf.len() - self.off);
            dst[..len].copy_from_slice(&self.buf[self.off..self.off + len]);
            self.off += len;
            Ok(len)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_read_and_write(copy_buf: &mut [u8], expected: &[u8]) {
        let mut writer = BufferWriter::new();

        let mut in_reader = expected;
        loop {
            let nread = in_reader.read(copy_buf).unwrap();
            if 0 == nread {
                break;
            }

            writer.write_all(&copy_buf[..nread]).unwrap();
        }

        assert_eq!(expected.len() as u64, writer.len());
        let mut reader = writer.flip().unwrap();
        assert_eq!(expected.len() as u64, reader.len());

        let mut actual = Vec::new();
        loop {
            let nread = reader.read(copy_buf).unwrap();
            if 0 == nread {
                break;
            }

            actual.extend_from_slice(&copy_buf[..nread]);
        }

        assert_eq!(expected.len(), actual.len());
        for i in 0..expected.len() {
            assert_eq!(expected[i], actual[i], "Difference at index {}", i);
        }
    }

    #[test]
    fn small() {
        test_read_and_write(&mut [0; 4], b"hello world");
    }

    #[test]
    fn large_with_small_ops() {
        test_read_and_write(
            &mut [0; 17],
            "hello world".repeat(10000).as_bytes(),
        );
    }

    #[test]
    fn large_with_large_ops() {
        test_read_and_write(
            &mut [0; 70000],
            "hello world".repeat(10000).as_bytes(),
        );
    }
}
