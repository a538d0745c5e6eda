// Copyright 2021 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bup-style rolling checksum used to split a byte stream into content
//! chunks at stable boundaries, independent of surrounding edits.
//!
//! There is no ecosystem crate for this (it's a small, self-contained
//! numeric routine, not a served concern), so it's hand-rolled in the style
//! of the teacher's small algorithm modules.

pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;
pub const BITS_PER_LEVEL: u32 = 4;
/// Number of identifiers an index object can hold while staying under
/// [`MAX_CHUNK_SIZE`] once serialized (61 bytes is the worst-case per-child
/// overhead of a `FileIndexChild`: a 32-byte digest id plus a varint size
/// plus one prefix byte, rounded up).
pub const MAX_CHILDREN_PER_INDEX: usize = MAX_CHUNK_SIZE / 61;

const WINDOW_SIZE: usize = 64;
const CHAR_OFFSET: u32 = 31;

/// Rolling checksum over a fixed-size trailing window, modeled on bup's
/// `bupsplit`: two accumulators (`s1`, `s2`) updated incrementally as bytes
/// enter and leave the window.
pub struct RollingHash {
    window: [u8; WINDOW_SIZE],
    pos: usize,
    filled: usize,
    s1: u32,
    s2: u32,
    bytes_since_cut: usize,
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingHash {
    pub fn new() -> Self {
        RollingHash {
            window: [0u8; WINDOW_SIZE],
            pos: 0,
            filled: 0,
            s1: (WINDOW_SIZE as u32) * CHAR_OFFSET,
            s2: (WINDOW_SIZE as u32) * (WINDOW_SIZE as u32 - 1) * CHAR_OFFSET,
            bytes_since_cut: 0,
        }
    }

    /// Feeds one byte through the rolling window. Returns `Some(level)` if
    /// this byte is a cut point, where `level` is how many trailing
    /// `BITS_PER_LEVEL`-sized groups of the checksum are all zero (at least
    /// one, since that's what makes it a cut).
    pub fn roll(&mut self, byte: u8) -> Option<u32> {
        let drop = self.window[self.pos];
        self.window[self.pos] = byte;
        self.pos = (self.pos + 1) % WINDOW_SIZE;
        self.filled = (self.filled + 1).min(WINDOW_SIZE);
        self.bytes_since_cut += 1;

        self.s1 = self
            .s1
            .wrapping_add(u32::from(byte))
            .wrapping_sub(u32::from(drop));
        self.s2 = self
            .s2
            .wrapping_add(self.s1)
            .wrapping_sub((WINDOW_SIZE as u32).wrapping_mul(u32::from(drop) + CHAR_OFFSET));

        if self.filled < WINDOW_SIZE || self.bytes_since_cut < MIN_CHUNK_SIZE {
            return None;
        }
        if self.bytes_since_cut >= MAX_CHUNK_SIZE {
            self.bytes_since_cut = 0;
            return Some(0);
        }

        let sum = self.s2;
        let level = trailing_zero_groups(sum);
        if level > 0 {
            self.bytes_since_cut = 0;
            Some(level)
        } else {
            None
        }
    }
}

/// Number of complete `BITS_PER_LEVEL`-wide zero groups at the bottom of
/// `value`, i.e. the chunk level a cut at this checksum value produces.
fn trailing_zero_groups(value: u32) -> u32 {
    let zeros = value.trailing_zeros();
    zeros / BITS_PER_LEVEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_cuts_before_min_chunk_size() {
        let mut roller = RollingHash::new();
        let mut cuts = 0;
        for (i, byte) in (0u8..=255).cycle().take(MIN_CHUNK_SIZE - 1).enumerate() {
            if roller.roll(byte).is_some() {
                cuts += 1;
            }
            let _ = i;
        }
        assert_eq!(cuts, 0);
    }

    #[test]
    fn always_cuts_by_max_chunk_size() {
        let mut roller = RollingHash::new();
        let mut last_cut_distance = 0usize;
        let mut since = 0usize;
        for byte in (0u8..=255).cycle().take(MAX_CHUNK_SIZE * 3) {
            since += 1;
            if roller.roll(byte).is_some() {
                last_cut_distance = since;
                since = 0;
            }
        }
        assert!(last_cut_distance <= MAX_CHUNK_SIZE);
    }

    #[test]
    fn deterministic_for_same_input() {
        let data: Vec<u8> = (0u8..=255).cycle().take(200_000).collect();
        let cuts_of = |data: &[u8]| {
            let mut roller = RollingHash::new();
            data.iter()
                .enumerate()
                .filter_map(|(i, &b)| roller.roll(b).map(|level| (i, level)))
                .collect::<Vec<_>>()
        };
        assert_eq!(cuts_of(&data), cuts_of(&data));
    }
}
