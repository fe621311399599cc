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

//! The boundary-escaping codec.
//!
//! A wire format that recognises messages by a literal boundary token must
//! alter any body line that would otherwise be mistaken for that token.
//! `Encoder` inserts exactly one additional escape character before any line
//! beginning with the token or with one-or-more escapes followed by the
//! token; `Decoder` removes one leading escape under the same condition.
//! `decode(encode(x)) == x` for every `x`. Encode is not idempotent, so
//! callers must track whether stored bytes already carry the escaping.
//!
//! Both directions operate only at beginning-of-line. Bytes consumed toward
//! a possible boundary match are held tentatively; when the match is
//! falsified mid-stream every held byte is re-emitted verbatim and scanning
//! resumes at the first non-matching byte, not at the start of the line.

use super::{Outcome, Replay, Transcoder};
use crate::support::error::Error;

/// A wire format's boundary-escaping parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundaryDef {
    pub escape: u8,
    pub token: &'static [u8],
}

impl BoundaryDef {
    /// The `From_`-delimited flavor: lines starting `From ` are message
    /// boundaries and are escaped with `>`.
    pub const FROM: Self = BoundaryDef {
        escape: b'>',
        token: b"From ",
    };

    /// The dot-stuffed flavor: a lone `.` line terminates a message, so any
    /// line beginning with `.` has its leading `.` doubled. The token
    /// proper is empty; the escape character carries the whole scheme.
    pub const DOT: Self = BoundaryDef {
        escape: b'.',
        token: b"",
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// At the beginning of a line; boundary matching may begin.
    Bol,
    /// Within a line; bytes pass through until the next LF.
    Mid,
    /// Collecting a run of escape characters at beginning-of-line.
    Escapes(usize),
    /// Matching the boundary token after `escapes` escape characters;
    /// `matched` token bytes have been tentatively consumed.
    Token { escapes: usize, matched: usize },
}

/// Strips one level of boundary escaping.
#[derive(Clone, Debug)]
pub struct Decoder {
    def: BoundaryDef,
    state: State,
    replay: Replay,
}

impl Decoder {
    pub fn new(def: BoundaryDef) -> Self {
        Decoder {
            def,
            state: State::Bol,
            replay: Replay::new(def.escape),
        }
    }

    fn emit_plain(&mut self, byte: u8) {
        self.replay.push_tail(byte);
        self.state = if b'\n' == byte { State::Bol } else { State::Mid };
    }

    fn step(&mut self, byte: u8) {
        match self.state {
            State::Bol => {
                if byte == self.def.escape {
                    if self.def.token.is_empty() {
                        // Zero further escapes followed by the empty token:
                        // satisfied immediately, so the escape is dropped.
                        self.state = State::Mid;
                    } else {
                        self.state = State::Escapes(1);
                    }
                } else {
                    self.emit_plain(byte);
                }
            },
            State::Mid => self.emit_plain(byte),
            State::Escapes(count) => {
                if byte == self.def.escape {
                    self.state = State::Escapes(count + 1);
                } else if Some(&byte) == self.def.token.first() {
                    if 1 == self.def.token.len() {
                        self.confirm(count);
                    } else {
                        self.state = State::Token { escapes: count, matched: 1 };
                    }
                } else {
                    self.replay.push_escapes(count);
                    self.emit_plain(byte);
                }
            },
            State::Token { escapes, matched } => {
                if byte == self.def.token[matched] {
                    if matched + 1 == self.def.token.len() {
                        self.confirm(escapes);
                    } else {
                        self.state = State::Token {
                            escapes,
                            matched: matched + 1,
                        };
                    }
                } else {
                    self.replay.push_escapes(escapes);
                    self.replay.push_lit(&self.def.token[..matched]);
                    self.emit_plain(byte);
                }
            },
        }
    }

    /// The full escape+token sequence was seen: re-emit it minus one escape.
    fn confirm(&mut self, escapes: usize) {
        self.replay.push_escapes(escapes - 1);
        self.replay.push_lit(self.def.token);
        self.state = State::Mid;
    }

    fn end_of_data(&mut self) {
        match self.state {
            State::Escapes(count) => {
                self.replay.push_escapes(count);
            },
            State::Token { escapes, matched } => {
                self.replay.push_escapes(escapes);
                self.replay.push_lit(&self.def.token[..matched]);
            },
            State::Bol | State::Mid => (),
        }
        self.state = State::Mid;
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
        match self.state {
            _ if !self.replay.is_empty() => Err(Error::TranscoderResidue),
            State::Escapes(..) | State::Token { .. } => {
                Err(Error::TranscoderResidue)
            },
            State::Bol | State::Mid => Ok(()),
        }
    }
}

/// Adds one level of boundary escaping.
#[derive(Clone, Debug)]
pub struct Encoder {
    def: BoundaryDef,
    state: State,
    replay: Replay,
}

impl Encoder {
    pub fn new(def: BoundaryDef) -> Self {
        Encoder {
            def,
            state: State::Bol,
            replay: Replay::new(def.escape),
        }
    }

    fn emit_plain(&mut self, byte: u8) {
        self.replay.push_tail(byte);
        self.state = if b'\n' == byte { State::Bol } else { State::Mid };
    }

    fn step(&mut self, byte: u8) {
        match self.state {
            State::Bol => {
                if byte == self.def.escape {
                    if self.def.token.is_empty() {
                        // One escape followed by the empty token: confirmed.
                        // Emit the inserted escape plus the one just seen.
                        self.replay.push_escapes(2);
                        self.state = State::Mid;
                    } else {
                        self.state = State::Escapes(1);
                    }
                } else if Some(&byte) == self.def.token.first() {
                    if 1 == self.def.token.len() {
                        self.confirm(0);
                    } else {
                        self.state = State::Token { escapes: 0, matched: 1 };
                    }
                } else {
                    self.emit_plain(byte);
                }
            },
            State::Mid => self.emit_plain(byte),
            State::Escapes(count) => {
                if byte == self.def.escape {
                    self.state = State::Escapes(count + 1);
                } else if Some(&byte) == self.def.token.first() {
                    if 1 == self.def.token.len() {
                        self.confirm(count);
                    } else {
                        self.state = State::Token { escapes: count, matched: 1 };
                    }
                } else {
                    self.replay.push_escapes(count);
                    self.emit_plain(byte);
                }
            },
            State::Token { escapes, matched } => {
                if byte == self.def.token[matched] {
                    if matched + 1 == self.def.token.len() {
                        self.confirm(escapes);
                    } else {
                        self.state = State::Token {
                            escapes,
                            matched: matched + 1,
                        };
                    }
                } else {
                    self.replay.push_escapes(escapes);
                    self.replay.push_lit(&self.def.token[..matched]);
                    self.emit_plain(byte);
                }
            },
        }
    }

    /// The line is a boundary (or an already-escaped one): re-emit it with
    /// exactly one additional escape in front.
    fn confirm(&mut self, escapes: usize) {
        self.replay.push_escapes(escapes + 1);
        self.replay.push_lit(self.def.token);
        self.state = State::Mid;
    }

    fn end_of_data(&mut self) {
        match self.state {
            State::Escapes(count) => {
                self.replay.push_escapes(count);
            },
            State::Token { escapes, matched } => {
                self.replay.push_escapes(escapes);
                self.replay.push_lit(&self.def.token[..matched]);
            },
            State::Bol | State::Mid => (),
        }
        self.state = State::Mid;
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
        match self.state {
            _ if !self.replay.is_empty() => Err(Error::TranscoderResidue),
            State::Escapes(..) | State::Token { .. } => {
                Err(Error::TranscoderResidue)
            },
            State::Bol | State::Mid => Ok(()),
        }
    }
}
