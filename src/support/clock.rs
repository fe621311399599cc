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

//! Source of fresh UID validity values.
//!
//! A mailbox which has never carried identity headers, or whose embedded
//! identity turned out to be inconsistent, needs a new validity stamp that
//! differs from anything handed out before. The traditional choice is the
//! Unix timestamp, which is stable across processes and machines.

use chrono::prelude::*;

pub trait ValiditySource {
    /// Produces a validity stamp strictly greater than `prev` (0 when there
    /// was no previous value).
    fn mint(&self, prev: u32) -> u32;
}

/// Mints validity stamps from the wall clock.
///
/// Rapid destroy-and-recreate cycles within one second still get distinct
/// stamps because the previous value wins a tie.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl ValiditySource for WallClock {
    fn mint(&self, prev: u32) -> u32 {
        let now = Utc::now().timestamp();
        let now = if now < 0 || now > u32::MAX as i64 {
            // A clock this wrong can't mint anything meaningful; fall back to
            // simple succession.
            0
        } else {
            now as u32
        };
        now.max(prev.wrapping_add(1).max(1))
    }
}

/// Deterministic source for tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub u32);

impl ValiditySource for FixedClock {
    fn mint(&self, prev: u32) -> u32 {
        self.0.max(prev.wrapping_add(1).max(1))
    }
}
