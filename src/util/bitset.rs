//! A packed bit vector of page occupancy.
//!
//! One bit per member, 64 members per word, bit `i` of word `w` is member `w * 64 + i`.
//! A set bit means "used". The bitset does no synchronisation at all: the allocator only
//! touches it while it holds its guard.

use crate::util::constants::*;
use crate::util::conversions;

type Word = u64;

/// Bytes needed to store a bitset with `number_of_members` bits.
pub const fn bitset_size(number_of_members: u32) -> usize {
    conversions::bitset_bytes(number_of_members as usize)
}

/// Number of words needed to store a bitset with `number_of_members` bits.
pub const fn bitset_words(number_of_members: u32) -> usize {
    bitset_size(number_of_members) / BYTES_IN_WORD
}

/// A view of a bitset stored somewhere else, usually inside an arena's maintenance pages.
pub struct Bitset<'a> {
    words: &'a mut [Word],
    number_of_members: u32,
}

impl<'a> Bitset<'a> {
    pub fn new(words: &'a mut [Word], number_of_members: u32) -> Self {
        assert!(words.len() >= bitset_words(number_of_members));
        Bitset {
            words,
            number_of_members,
        }
    }

    /// # Safety
    /// `ptr` must point to at least `bitset_size(number_of_members)` bytes that are valid for
    /// reads and writes and not aliased for `'a`.
    pub unsafe fn from_raw(ptr: *mut Word, number_of_members: u32) -> Self {
        let words = std::slice::from_raw_parts_mut(ptr, bitset_words(number_of_members));
        Bitset {
            words,
            number_of_members,
        }
    }

    pub fn number_of_members(&self) -> u32 {
        self.number_of_members
    }

    fn word_and_bit(pos: u32) -> (usize, Word) {
        let pos = pos as usize;
        (pos / BITS_IN_WORD, 1 << (pos % BITS_IN_WORD))
    }

    /// Set the padding bits after the last member, so they never look free.
    pub fn mark_invalid(&mut self) {
        let last_bit = self.number_of_members as usize % BITS_IN_WORD;
        if last_bit == 0 {
            return;
        }
        let last_word = self.number_of_members as usize / BITS_IN_WORD;
        self.words[last_word] = ((1 as Word) << last_bit).wrapping_neg();
    }

    pub fn is_set(&self, pos: u32) -> bool {
        assert!(pos < self.number_of_members);
        let (word, bit) = Self::word_and_bit(pos);
        self.words[word] & bit != 0
    }

    pub fn set(&mut self, pos: u32) {
        trace!("  set   {} out of [0, {}]", pos, self.number_of_members - 1);
        assert!(pos < self.number_of_members);
        let (word, bit) = Self::word_and_bit(pos);
        debug_assert!(self.words[word] & bit == 0, "bit {} already set", pos);
        self.words[word] |= bit;
    }

    pub fn clear(&mut self, pos: u32) {
        trace!("clear   {} out of [0, {}]", pos, self.number_of_members - 1);
        assert!(pos < self.number_of_members);
        let (word, bit) = Self::word_and_bit(pos);
        debug_assert!(self.words[word] & bit != 0, "bit {} already clear", pos);
        self.words[word] &= !bit;
    }

    /// Visit the words covered by `[offset, offset + length)` with the mask of covered bits.
    fn for_each_masked_word(&mut self, offset: u32, length: u32, mut f: impl FnMut(&mut Word, Word)) {
        assert!(offset < self.number_of_members);
        assert!(length > 0);
        assert!(length <= self.number_of_members);
        assert!(offset + length <= self.number_of_members);

        let first = offset as usize;
        let end = (offset + length) as usize;
        let first_word = first / BITS_IN_WORD;
        let last_word = (end - 1) / BITS_IN_WORD;
        for w in first_word..=last_word {
            let lo = if w == first_word { first % BITS_IN_WORD } else { 0 };
            let hi = if w == last_word {
                end - w * BITS_IN_WORD
            } else {
                BITS_IN_WORD
            };
            let upper: Word = if hi == BITS_IN_WORD {
                !0
            } else {
                (1 << hi) - 1
            };
            let mask = upper & !((1 << lo) - 1);
            f(&mut self.words[w], mask);
        }
    }

    pub fn set_range(&mut self, offset: u32, length: u32) {
        trace!(
            "  set   [{}, {}] out of [0, {}]",
            offset,
            offset + length - 1,
            self.number_of_members - 1
        );
        self.for_each_masked_word(offset, length, |word, mask| {
            assert!(*word & mask == 0, "range overlaps used bits");
            *word |= mask;
        });
    }

    pub fn clear_range(&mut self, offset: u32, length: u32) {
        trace!(
            "clear   [{}, {}] out of [0, {}]",
            offset,
            offset + length - 1,
            self.number_of_members - 1
        );
        self.for_each_masked_word(offset, length, |word, mask| {
            assert!(*word & mask == mask, "range overlaps free bits");
            *word &= !mask;
        });
    }

    /// Shared scan of `next_free` and `next_used`. `invert` turns "find a zero" into
    /// "find a one".
    fn next_matching(&self, offset: u32, invert: Word) -> Option<u32> {
        if offset >= self.number_of_members {
            return None;
        }
        let n_words = bitset_words(self.number_of_members);
        let mut i = offset as usize / BITS_IN_WORD;
        let first_bit_pos = offset as usize % BITS_IN_WORD;

        // Bits before `offset` in the first word count as not matching.
        let mut word = (self.words[i] ^ invert) | ((1 << first_bit_pos) - 1);
        loop {
            if word != !0 {
                let pos = i * BITS_IN_WORD + (!word).trailing_zeros() as usize;
                return if pos < self.number_of_members as usize {
                    Some(pos as u32)
                } else {
                    None
                };
            }
            i += 1;
            if i == n_words {
                return None;
            }
            word = self.words[i] ^ invert;
        }
    }

    /// The first free member at or after `offset`.
    pub fn next_free(&self, offset: u32) -> Option<u32> {
        self.next_matching(offset, 0)
    }

    /// The first used member at or after `offset`.
    pub fn next_used(&self, offset: u32) -> Option<u32> {
        self.next_matching(offset, !0)
    }

    /// Find the first free member and mark it used.
    pub fn find_and_set(&mut self) -> Option<u32> {
        let bit = self.next_free(0)?;
        self.set(bit);
        Some(bit)
    }

    /// Find the first run of `range_length` free members and mark it used.
    ///
    /// This walks the free runs from the start (not a buddy split), which is linear in the
    /// number of members.
    pub fn find_and_set_range(&mut self, range_length: u32) -> Option<u32> {
        let mut next = self.next_free(0);
        while let Some(pos) = next {
            let run_end = self.next_used(pos).unwrap_or(self.number_of_members);
            if run_end - pos >= range_length {
                self.set_range(pos, range_length);
                return Some(pos);
            }
            next = self.next_free(run_end);
        }
        None
    }

    /// Number of used members, padding excluded.
    pub fn count_used(&self) -> u32 {
        (0..self.number_of_members).filter(|&i| self.is_set(i)).count() as u32
    }
}
