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

//! The line-ending normalizer.
//!
//! Messages arrive from the wire with CRLF line endings but are stored with
//! bare LF. `Decoder` maps every CRLF pair to LF on the way in; `Encoder`
//! maps every LF back to CRLF on the way out. A lone CR or a lone LF in an
//! unexpected position passes through unmodified, so the pair round-trips
//! any byte sequence whose LFs are all CRLF-paired.

use super::{Outcome, Replay, Transcoder};
use crate::support::error::Error;

/// CRLF -> LF.
#[derive(Clone, Debug)]
pub struct Decoder {
    saw_cr: bool,
    replay: Replay,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            saw_cr: false,
            replay: Replay::new(0),
        }
    }

    fn step(&mut self, byte: u8) {
        if self.saw_cr {
            match byte {
                b'\n' => {
                    self.replay.push_tail(b'\n');
                    self.saw_cr = false;
                },
                b'\r' => {
                    // The earlier CR is now known to be lone.
                    self.replay.push_tail(b'\r');
                },
                _ => {
                    self.replay.push_lit(b"\r");
                    self.replay.push_tail(byte);
                    self.saw_cr = false;
                },
            }
        } else if b'\r' == byte {
            self.saw_cr = true;
        } else {
            self.replay.push_tail(byte);
        }
    }

    fn end_of_data(&mut self) {
        if self.saw_cr {
            self.replay.push_lit(b"\r");
            self.saw_cr = false;
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for Decoder {
    fn transcode(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Outcome, Error> {
        let mut consumed = 0;
        let mut produced = self.replay.drain(output);

        if input.is_empty() {
            self.end_of_data();
            produced += self.replay.drain(&mut output[produced..]);
            if 0 == produced && !self.replay.is_empty() {
                return Ok(Outcome::NeedOutput);
            }
            return Ok(Outcome::Ok { consumed: 0, produced });
        }

        while consumed < input.len() && self.replay.is_empty() {
            if produced >= output.len() {
                break;
            }
            self.step(input[consumed]);
            consumed += 1;
            produced += self.replay.drain(&mut output[produced..]);
        }

        if 0 == consumed && 0 == produced {
            return Ok(Outcome::NeedOutput);
        }

        Ok(Outcome::Ok { consumed, produced })
    }

    fn finish(&self) -> Result<(), Error> {
        if self.replay.is_empty() && !self.saw_cr {
            Ok(())
        } else {
            Err(Error::TranscoderResidue)
        }
    }
}

/// LF -> CRLF.
#[derive(Clone, Debug)]
pub struct Encoder {
    /// In this mode, an LF whose preceding input byte was CR passes through
    /// unmodified, so already-correct input is not double-stuffed.
    assume_normalized: bool,
    prev_was_cr: bool,
    replay: Replay,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            assume_normalized: false,
            prev_was_cr: false,
            replay: Replay::new(0),
        }
    }

    pub fn assume_normalized() -> Self {
        Encoder {
            assume_normalized: true,
            ..Self::new()
        }
    }

    fn step(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                if self.assume_normalized && self.prev_was_cr {
                    self.replay.push_tail(b'\n');
                } else {
                    self.replay.push_lit(b"\r\n");
                }
                self.prev_was_cr = false;
            },
            b'\r' => {
                self.replay.push_tail(b'\r');
                self.prev_was_cr = true;
            },
            _ => {
                self.replay.push_tail(byte);
                self.prev_was_cr = false;
            },
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder for Encoder {
    fn transcode(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<Outcome, Error> {
        let mut consumed = 0;
        let mut produced = self.replay.drain(output);

        if input.is_empty() {
            if 0 == produced && !self.replay.is_empty() {
                return Ok(Outcome::NeedOutput);
            }
            return Ok(Outcome::Ok { consumed: 0, produced });
        }

        while consumed < input.len() && self.replay.is_empty() {
            if produced >= output.len() {
                break;
            }
            self.step(input[consumed]);
            consumed += 1;
            produced += self.replay.drain(&mut output[produced..]);
        }

        if 0 == consumed && 0 == produced {
            return Ok(Outcome::NeedOutput);
        }

        Ok(Outcome::Ok { consumed, produced })
    }

    fn finish(&self) -> Result<(), Error> {
        if self.replay.is_empty() {
            Ok(())
        } else {
            Err(Error::TranscoderResidue)
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::super::test_util::run_chunked;
    use super::*;

    #[test]
    fn decode_basics() {
        let mut decoder = Decoder::new();
        assert_eq!(
            b"foo\nbar\n".to_vec(),
            run_chunked(&mut decoder, b"foo\r\nbar\r\n", 3, 2),
        );
    }

    #[test]
    fn decode_lone_cr_and_lf_pass_through() {
        let mut decoder = Decoder::new();
        assert_eq!(
            b"a\rb\nc\r".to_vec(),
            run_chunked(&mut decoder, b"a\rb\nc\r", 1, 1),
        );
    }

    #[test]
    fn decode_cr_run_before_lf() {
        // Only the CR immediately preceding the LF forms a pair.
        let mut decoder = Decoder::new();
        assert_eq!(
            b"\r\r\n".to_vec(),
            run_chunked(&mut decoder, b"\r\r\r\n", 2, 1),
        );
    }

    #[test]
    fn encode_basics() {
        let mut encoder = Encoder::new();
        assert_eq!(
            b"foo\r\nbar\r\n".to_vec(),
            run_chunked(&mut encoder, b"foo\nbar\n", 3, 2),
        );
    }

    #[test]
    fn encode_assume_normalized_passes_existing_crlf() {
        let mut encoder = Encoder::assume_normalized();
        assert_eq!(
            b"a\r\nb\r\n".to_vec(),
            run_chunked(&mut encoder, b"a\r\nb\n", 1, 1),
        );
    }

    #[test]
    fn encode_strict_doubles_cr_of_existing_crlf() {
        let mut encoder = Encoder::new();
        assert_eq!(
            b"a\r\r\n".to_vec(),
            run_chunked(&mut encoder, b"a\r\n", 4, 4),
        );
    }

    #[test]
    fn finish_reports_residue_before_end_of_data() {
        let mut decoder = Decoder::new();
        let mut out = [0u8; 8];
        decoder.transcode(b"x\r", &mut out).unwrap();
        assert_matches!(Err(Error::TranscoderResidue), decoder.finish());
    }

    proptest! {
        #[test]
        fn round_trip(
            lines in prop::collection::vec("[a-z\r]{0,5}", 0..8),
            in_chunk in 1usize..7,
            out_chunk in 1usize..5,
        ) {
            // Input whose LFs are all CRLF-paired.
            let mut input = Vec::new();
            for line in &lines {
                input.extend_from_slice(line.as_bytes());
                input.extend_from_slice(b"\r\n");
            }

            let decoded = run_chunked(
                &mut Decoder::new(), &input, in_chunk, out_chunk);
            let encoded = run_chunked(
                &mut Encoder::new(), &decoded, in_chunk, out_chunk);
            prop_assert_eq!(&input, &encoded);

            let unchanged = run_chunked(
                &mut Encoder::assume_normalized(), &input,
                in_chunk, out_chunk);
            prop_assert_eq!(&input, &unchanged);
        }
    }
}
