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

//! Weak identity-keyed shadow store
//!
//! Maps heap objects, by address, to shadow metadata without keeping the
//! objects alive. Each entry holds a `Weak` to its key: the weak count pins
//! the allocation so the address cannot be reused by another object while
//! the entry exists, and a zero strong count marks the entry dead. Dead
//! entries are ignored by lookups and dropped by sweeps.
//!
//! Entries are spread over power-of-two segments by the high bits of the
//! identity hash. Each segment is a lock-free skip list: lookups never
//! block, inserts and sweeps are serialized per segment by a writer lock
//! that also holds the segment's growth threshold.

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::{Arc, Weak};
use tracing::debug;

pub type WeakKey = Weak<dyn Any + Send + Sync>;

/// Initial per-segment entry threshold before a sweep or growth
const INITIAL_THRESHOLD: usize = 16;

/// Address of the object behind `obj`
#[inline]
pub fn identity<T: ?Sized>(obj: &Arc<T>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// Fibonacci hash of an address. Low bits index caches, high bits pick
/// store segments.
#[inline]
pub fn identity_hash(addr: usize) -> u32 {
    (((addr as u64) >> 3).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as u32
}

#[inline]
pub(crate) fn downgrade<T: Any + Send + Sync>(obj: &Arc<T>) -> WeakKey {
    let weak: Weak<T> = Arc::downgrade(obj);
    weak
}

struct Record<V> {
    key: WeakKey,
    value: V,
}

impl<V> Record<V> {
    #[inline]
    fn is_live(&self) -> bool {
        self.key.strong_count() > 0
    }
}

struct Segment<V> {
    map: SkipMap<usize, Record<V>>,
    /// Writer lock. Holds the entry count allowed before the next sweep or
    /// growth.
    writer: Mutex<usize>,
}

impl<V: Send + 'static> Segment<V> {
    fn new() -> Self {
        Self { map: SkipMap::new(), writer: Mutex::new(INITIAL_THRESHOLD) }
    }

    /// Caller holds `writer`.
    fn sweep_locked(&self) -> usize {
        let mut removed = 0;
        for entry in self.map.iter() {
            if !entry.value().is_live() && entry.remove() {
                removed += 1;
            }
        }
        removed
    }
}

pub struct ShadowStore<V> {
    segments: Box<[Segment<V>]>,
    shift: u32,
    sweep_before_grow: bool,
}

impl<V: Clone + Send + Sync + 'static> ShadowStore<V> {
    /// `segments` must be a power of two.
    pub fn new(segments: usize, sweep_before_grow: bool) -> Self {
        let segments = segments.max(1);
        debug_assert!(segments.is_power_of_two());
        Self {
            segments: (0..segments).map(|_| Segment::new()).collect(),
            shift: 64 - segments.trailing_zeros(),
            sweep_before_grow,
        }
    }

    #[inline]
    fn segment(&self, addr: usize) -> &Segment<V> {
        let hash = (identity_hash(addr) as u64) << 32;
        let index = hash.checked_shr(self.shift).unwrap_or(0) as usize;
        &self.segments[index & (self.segments.len() - 1)]
    }

    /// Look up a live entry by address without blocking. Returns the
    /// entry's weak key so callers can cache it.
    #[inline]
    pub fn get_by_addr(&self, addr: usize) -> Option<(WeakKey, V)> {
        let entry = self.segment(addr).map.get(&addr)?;
        let record = entry.value();
        record.is_live().then(|| (record.key.clone(), record.value.clone()))
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &Arc<T>) -> Option<V> {
        self.get_by_addr(identity(key)).map(|(_, value)| value)
    }

    pub fn contains<T: Any + Send + Sync>(&self, key: &Arc<T>) -> bool {
        self.get_by_addr(identity(key)).is_some()
    }

    /// Return the value for `key`, inserting `create()` if there is none.
    /// When two threads race, the first insert wins and both observe it.
    pub fn get_or_insert_with<T, F>(&self, key: &Arc<T>, create: F) -> (WeakKey, V)
    where
        T: Any + Send + Sync,
        F: FnOnce() -> V,
    {
        let addr = identity(key);
        if let Some(found) = self.get_by_addr(addr) {
            return found;
        }

        let segment = self.segment(addr);
        let mut threshold = segment.writer.lock();
        if let Some(found) = self.get_by_addr(addr) {
            return found;
        }

        if segment.map.len() >= *threshold {
            let swept = if self.sweep_before_grow { segment.sweep_locked() } else { 0 };
            let entries = segment.map.len();
            // Grow unless the sweep freed at least a quarter of the threshold.
            if entries > *threshold - *threshold / 4 {
                *threshold *= 2;
                debug!(swept, entries, threshold = *threshold, "Grew shadow store segment");
            } else {
                debug!(swept, entries, "Swept shadow store segment");
            }
        }

        let weak = downgrade(key);
        let value = create();
        segment.map.insert(addr, Record { key: weak.clone(), value: value.clone() });
        (weak, value)
    }

    /// Drop all dead entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for segment in self.segments.iter() {
            let _writer = segment.writer.lock();
            removed += segment.sweep_locked();
        }
        if removed > 0 {
            debug!(removed, "Swept shadow store");
        }
        removed
    }

    /// Entries currently held, dead ones included until swept
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_identity_not_equality() {
        let store: ShadowStore<u32> = ShadowStore::new(4, true);
        let a = Arc::new(String::from("same"));
        let b = Arc::new(String::from("same"));

        store.get_or_insert_with(&a, || 1);
        assert_eq!(store.get(&a), Some(1));
        assert_eq!(store.get(&b), None, "equal contents, different object");
        assert_eq!(store.get_or_insert_with(&b, || 2).1, 2);
        assert_eq!(store.get_or_insert_with(&a, || 99).1, 1, "existing entry wins");
    }

    #[test]
    fn test_entries_do_not_retain_keys() {
        let store: ShadowStore<u32> = ShadowStore::new(2, true);
        let key = Arc::new(vec![0u8; 32]);
        let weak = Arc::downgrade(&key);
        store.get_or_insert_with(&key, || 7);
        assert_eq!(store.len(), 1);

        drop(key);
        assert!(weak.upgrade().is_none(), "the store must not keep the object alive");
        assert!(store.get_by_addr(weak.as_ptr() as *const () as usize).is_none());
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_before_grow() {
        let store: ShadowStore<usize> = ShadowStore::new(1, true);
        for i in 0..(INITIAL_THRESHOLD * 4) {
            let temp = Arc::new(i);
            store.get_or_insert_with(&temp, || i);
        }
        // All keys died immediately, so sweeping kept the segment small.
        assert!(store.len() <= INITIAL_THRESHOLD + 1);

        let keep: Vec<Arc<usize>> = (0..INITIAL_THRESHOLD * 4).map(Arc::new).collect();
        for (i, key) in keep.iter().enumerate() {
            store.get_or_insert_with(key, || i);
        }
        for (i, key) in keep.iter().enumerate() {
            assert_eq!(store.get(key), Some(i));
        }
    }

    #[test]
    fn test_concurrent_insert_single_winner() {
        let store: Arc<ShadowStore<usize>> = Arc::new(ShadowStore::new(8, true));
        let key = Arc::new(42u64);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                let key = Arc::clone(&key);
                thread::spawn(move || store.get_or_insert_with(&key, || t).1)
            })
            .collect();
        let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.get(&key), Some(seen[0]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lookups_proceed_while_segment_is_written() {
        let store: ShadowStore<u32> = ShadowStore::new(1, true);
        let key = Arc::new(5u8);
        store.get_or_insert_with(&key, || 5);

        let _writer = store.segments[0].writer.lock();
        let found = thread::scope(|scope| scope.spawn(|| store.get(&key)).join().unwrap());
        assert_eq!(found, Some(5));
    }

    #[test]
    fn test_downgrade_keeps_identity() {
        let key = Arc::new(String::from("k"));
        let weak = downgrade(&key);
        assert_eq!(weak.as_ptr() as *const () as usize, identity(&key));
        drop(key);
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn test_hash_spreads_aligned_addresses() {
        let hashes: std::collections::HashSet<u32> = (0..1024usize).map(|i| identity_hash(0x1000 + i * 16) & 0xF).collect();
        assert_eq!(hashes.len(), 16);
    }
}
