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

//! Per-thread direct-mapped front for the shadow store
//!
//! One slot per `identity_hash & mask`, no associativity and no LRU. A miss
//! that finds an entry in the store replaces whatever the slot held.

use super::store::{ShadowStore, WeakKey, identity_hash};

struct CacheSlot<V> {
    addr: usize,
    key: WeakKey,
    value: V,
}

pub struct DirectMappedCache<V> {
    slots: Box<[Option<CacheSlot<V>>]>,
    mask: usize,
}

impl<V: Clone + Send + Sync + 'static> DirectMappedCache<V> {
    /// `size` must be a power of two.
    pub fn new(size: usize) -> Self {
        let size = size.max(1).next_power_of_two();
        Self { slots: (0..size).map(|_| None).collect(), mask: size - 1 }
    }

    #[inline]
    fn index(&self, addr: usize) -> usize {
        identity_hash(addr) as usize & self.mask
    }

    /// Hit only if the slot holds this address and its object is alive.
    #[inline]
    pub fn get(&self, addr: usize) -> Option<&V> {
        match &self.slots[self.index(addr)] {
            Some(slot) if slot.addr == addr && slot.key.strong_count() > 0 => Some(&slot.value),
            _ => None,
        }
    }

    #[inline]
    pub fn put(&mut self, addr: usize, key: WeakKey, value: V) {
        let index = self.index(addr);
        self.slots[index] = Some(CacheSlot { addr, key, value });
    }

    /// Cache lookup falling back to the store. Returns the value and
    /// whether it was a cache hit.
    pub fn lookup(&mut self, addr: usize, store: &ShadowStore<V>) -> (Option<V>, bool) {
        if let Some(value) = self.get(addr) {
            return (Some(value.clone()), true);
        }
        match store.get_by_addr(addr) {
            Some((key, value)) => {
                self.put(addr, key, value.clone());
                (Some(value), false)
            }
            None => (None, false),
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::store::identity;
    use std::sync::Arc;

    #[test]
    fn test_hit_after_miss() {
        let store: ShadowStore<u32> = ShadowStore::new(4, true);
        let mut cache = DirectMappedCache::new(8);
        let obj = Arc::new(1u64);
        store.get_or_insert_with(&obj, || 5);

        assert_eq!(cache.lookup(identity(&obj), &store), (Some(5), false));
        assert_eq!(cache.lookup(identity(&obj), &store), (Some(5), true));
    }

    #[test]
    fn test_absent_entries_leave_slot_alone() {
        let store: ShadowStore<u32> = ShadowStore::new(4, true);
        let mut cache = DirectMappedCache::new(1);
        let cached = Arc::new(1u64);
        let absent = Arc::new(2u64);
        let (key, value) = store.get_or_insert_with(&cached, || 3);
        cache.put(identity(&cached), key, value);

        assert_eq!(cache.lookup(identity(&absent), &store), (None, false));
        assert_eq!(cache.get(identity(&cached)), Some(&3));
    }

    #[test]
    fn test_collision_overwrites() {
        let store: ShadowStore<u32> = ShadowStore::new(1, true);
        let mut cache = DirectMappedCache::new(1);
        let a = Arc::new(1u64);
        let b = Arc::new(2u64);
        store.get_or_insert_with(&a, || 10);
        store.get_or_insert_with(&b, || 20);

        cache.lookup(identity(&a), &store);
        cache.lookup(identity(&b), &store);
        assert_eq!(cache.get(identity(&a)), None);
        assert_eq!(cache.get(identity(&b)), Some(&20));
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_dead_object_is_a_miss() {
        let store: ShadowStore<u32> = ShadowStore::new(1, true);
        let mut cache = DirectMappedCache::new(4);
        let obj = Arc::new(1u64);
        let addr = identity(&obj);
        store.get_or_insert_with(&obj, || 1);
        assert_eq!(cache.lookup(addr, &store), (Some(1), false));
        drop(obj);
        assert_eq!(cache.get(addr), None);
    }
}
