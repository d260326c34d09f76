// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Growable bit-vector integer set
//!
//! Backs the rows of communication graphs and the reader layers collected
//! while walking call stacks. Not synchronized: mutation happens during
//! single-threaded module compilation, rows are read-only afterwards.

use std::fmt;

const WORD_BITS: usize = 64;

/// Storage grows in whole slots of this many words
const SLOT_WORDS: usize = 2;

#[derive(Clone, Default)]
pub struct IntSet {
    words: Vec<u64>,
}

impl IntSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Create a set able to hold `0..bits` without growing
    pub fn with_capacity(bits: usize) -> Self {
        Self { words: vec![0; Self::words_for(bits)] }
    }

    fn words_for(bits: usize) -> usize {
        let words = bits.div_ceil(WORD_BITS);
        words.div_ceil(SLOT_WORDS) * SLOT_WORDS
    }

    /// Add `i`, growing storage to cover it. Idempotent.
    pub fn add(&mut self, i: u32) {
        let word = i as usize / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(Self::words_for(i as usize + 1), 0);
        }
        self.words[word] |= 1 << (i as usize % WORD_BITS);
    }

    pub fn add_all(&mut self, other: &IntSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine |= *theirs;
        }
    }

    #[inline]
    pub fn contains(&self, i: u32) -> bool {
        let word = i as usize / WORD_BITS;
        match self.words.get(word) {
            Some(&bits) => bits & (1u64 << (i as usize % WORD_BITS)) != 0,
            None => false,
        }
    }

    /// True iff every member of `other` is a member of `self`. Words past
    /// the end of either set count as zero.
    pub fn contains_all(&self, other: &IntSet) -> bool {
        other.words.iter().enumerate().all(|(i, theirs)| {
            let mine = self.words.get(i).copied().unwrap_or(0);
            theirs & !mine == 0
        })
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Ascending iteration. Each call starts from the lowest member.
    pub fn iter(&self) -> Iter<'_> {
        Iter { words: &self.words, word: 0, current: self.words.first().copied().unwrap_or(0) }
    }
}

pub struct Iter<'a> {
    words: &'a [u64],
    word: usize,
    current: u64,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some((self.word * WORD_BITS + bit) as u32);
            }
            self.word += 1;
            if self.word >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word];
        }
    }
}

impl<'a> IntoIterator for &'a IntSet {
    type Item = u32;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

impl FromIterator<u32> for IntSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = IntSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<u32> for IntSet {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        for i in iter {
            self.add(i);
        }
    }
}

impl fmt::Debug for IntSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_add_and_contains() {
        let mut set = IntSet::new();
        assert!(set.is_empty());
        set.add(0);
        set.add(63);
        set.add(64);
        set.add(1000);
        set.add(64);
        assert!(set.contains(0) && set.contains(63) && set.contains(64) && set.contains(1000));
        assert!(!set.contains(1) && !set.contains(999) && !set.contains(5000));
        assert_eq!(set.len(), 4);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_growth_rounds_to_slot_boundary() {
        let mut set = IntSet::new();
        set.add(1);
        assert_eq!(set.words.len(), SLOT_WORDS);
        set.add(200);
        assert_eq!(set.words.len() % SLOT_WORDS, 0);
        assert!(set.contains(1), "old words must survive growth");
    }

    #[test]
    fn test_contains_all_with_uneven_lengths() {
        let small: IntSet = [1, 2].into_iter().collect();
        let large: IntSet = [1, 2, 500].into_iter().collect();
        assert!(large.contains_all(&small));
        assert!(!small.contains_all(&large));

        // Trailing empty words on the other side must not matter.
        let mut padded = IntSet::with_capacity(1024);
        padded.add(2);
        assert!(small.contains_all(&padded));
        assert!(small.contains_all(&IntSet::new()));
        assert!(IntSet::new().contains_all(&IntSet::with_capacity(512)));
    }

    #[test]
    fn test_iteration_is_ascending_and_restartable() {
        let set: IntSet = [130, 5, 64, 0].into_iter().collect();
        let first: Vec<u32> = set.iter().collect();
        let second: Vec<u32> = set.iter().collect();
        assert_eq!(first, vec![0, 5, 64, 130]);
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_matches_btreeset(values in proptest::collection::vec(0u32..4096, 0..64)) {
            let set: IntSet = values.iter().copied().collect();
            let model: BTreeSet<u32> = values.iter().copied().collect();
            prop_assert_eq!(set.len(), model.len());
            prop_assert_eq!(set.iter().collect::<Vec<_>>(), model.iter().copied().collect::<Vec<_>>());
        }

        #[test]
        fn prop_contains_all_is_subset(a in proptest::collection::vec(0u32..512, 0..32),
                                       b in proptest::collection::vec(0u32..512, 0..32)) {
            let sa: IntSet = a.iter().copied().collect();
            let sb: IntSet = b.iter().copied().collect();
            let ma: BTreeSet<u32> = a.into_iter().collect();
            let mb: BTreeSet<u32> = b.into_iter().collect();
            prop_assert_eq!(sa.contains_all(&sb), mb.is_subset(&ma));
        }
    }
}
