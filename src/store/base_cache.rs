//! Delta base cache
//!
//! Reconstructing a long delta chain re-inflates every base on the way
//! down; a small per-pack cache of reconstructed objects keyed by pack
//! offset bounds that cost. Eviction is least-recently-used under a
//! byte budget, tracked with a monotonic access tick.

use crate::objects::ObjectType;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// Default byte budget: 64 MiB per pack.
pub const DEFAULT_BUDGET: usize = 64 << 20;

#[derive(Debug)]
struct CacheSlot {
    kind: ObjectType,
    data: Bytes,
    tick: u64,
}

/// Byte-budgeted LRU of reconstructed delta bases.
#[derive(Debug)]
pub struct BaseCache {
    budget: usize,
    used: usize,
    next_tick: u64,
    slots: HashMap<u64, CacheSlot>,
    /// tick -> offset, oldest first.
    recency: BTreeMap<u64, u64>,
}

impl BaseCache {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            next_tick: 0,
            slots: HashMap::new(),
            recency: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, offset: u64) -> Option<(ObjectType, Bytes)> {
        let tick = self.bump();
        let slot = self.slots.get_mut(&offset)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, offset);
        Some((slot.kind, slot.data.clone()))
    }

    pub fn insert(&mut self, offset: u64, kind: ObjectType, data: Bytes) {
        if data.len() > self.budget {
            return;
        }
        if let Some(old) = self.slots.remove(&offset) {
            self.recency.remove(&old.tick);
            self.used -= old.data.len();
        }

        self.used += data.len();
        while self.used > self.budget {
            let Some((&oldest_tick, &oldest_offset)) = self.recency.iter().next() else {
                break;
            };
            self.recency.remove(&oldest_tick);
            if let Some(evicted) = self.slots.remove(&oldest_offset) {
                self.used -= evicted.data.len();
            }
        }

        let tick = self.bump();
        self.recency.insert(tick, offset);
        self.slots.insert(offset, CacheSlot { kind, data, tick });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    #[test]
    fn hit_returns_inserted_value() {
        let mut cache = BaseCache::new(1024);
        cache.insert(7, ObjectType::Blob, bytes(10, 1));
        let (kind, data) = cache.get(7).unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(data.len(), 10);
        assert!(cache.get(8).is_none());
    }

    #[test]
    fn evicts_least_recently_used_under_budget() {
        let mut cache = BaseCache::new(100);
        cache.insert(1, ObjectType::Blob, bytes(40, 1));
        cache.insert(2, ObjectType::Blob, bytes(40, 2));
        // Touch 1 so that 2 is the eviction candidate.
        cache.get(1).unwrap();
        cache.insert(3, ObjectType::Blob, bytes(40, 3));

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn oversized_entries_are_not_cached() {
        let mut cache = BaseCache::new(10);
        cache.insert(1, ObjectType::Blob, bytes(11, 1));
        assert!(cache.is_empty());
    }

    #[test]
    fn reinsert_replaces_and_reaccounts() {
        let mut cache = BaseCache::new(100);
        cache.insert(1, ObjectType::Blob, bytes(90, 1));
        cache.insert(1, ObjectType::Blob, bytes(50, 2));
        cache.insert(2, ObjectType::Blob, bytes(50, 3));
        assert_eq!(cache.len(), 2);
    }
}
