//! Parking lot for recently evicted chunk buffers.
//!
//! A chunk leaving the active set deep-copies its voxel data here so a
//! returning player skips disk and regeneration entirely. Entries are
//! bounded FIFO; a spawn hit removes the entry, and persisted deltas
//! invalidate it because the disk state is newer.

use std::collections::{HashMap, VecDeque};

use crate::world::{ChunkCoord, ChunkMeta, VoxelBuffer};

pub struct CachedChunkData {
    pub buffer: VoxelBuffer,
    pub meta: ChunkMeta,
}

pub struct DataCache {
    entries: HashMap<ChunkCoord, CachedChunkData>,
    order: VecDeque<ChunkCoord>,
    max_entries: usize,
}

impl DataCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.entries.contains_key(&coord)
    }

    /// Parks a buffer. The oldest entry makes room when the cache is full;
    /// re-inserting an existing coord refreshes its data without growing.
    pub fn insert(&mut self, coord: ChunkCoord, buffer: VoxelBuffer, meta: ChunkMeta) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.insert(coord, CachedChunkData { buffer, meta }).is_some() {
            return;
        }
        self.order.push_back(coord);
        while self.entries.len() > self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// A hit consumes the entry.
    pub fn take(&mut self, coord: ChunkCoord) -> Option<CachedChunkData> {
        let data = self.entries.remove(&coord)?;
        self.order.retain(|c| *c != coord);
        Some(data)
    }

    pub fn invalidate(&mut self, coord: ChunkCoord) {
        if self.entries.remove(&coord).is_some() {
            self.order.retain(|c| *c != coord);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(first: u16) -> VoxelBuffer {
        let mut b = VoxelBuffer::new(2);
        b.set(0, 0, 0, first);
        b
    }

    #[test]
    fn take_consumes_the_entry() {
        let mut cache = DataCache::new(4);
        let coord = ChunkCoord::new(1, 0, 1);
        cache.insert(coord, buffer_with(5), ChunkMeta::generated(1));

        let hit = cache.take(coord).unwrap();
        assert_eq!(hit.buffer.get(0, 0, 0), 5);
        assert!(cache.take(coord).is_none());
    }

    #[test]
    fn fifo_eviction_drops_oldest() {
        let mut cache = DataCache::new(2);
        for i in 0..3 {
            cache.insert(
                ChunkCoord::new(i, 0, 0),
                buffer_with(i as u16),
                ChunkMeta::generated(1),
            );
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(ChunkCoord::new(0, 0, 0)));
        assert!(cache.contains(ChunkCoord::new(1, 0, 0)));
        assert!(cache.contains(ChunkCoord::new(2, 0, 0)));
    }

    #[test]
    fn reinsert_refreshes_without_duplicating_order() {
        let mut cache = DataCache::new(2);
        let coord = ChunkCoord::new(0, 0, 0);
        cache.insert(coord, buffer_with(1), ChunkMeta::generated(1));
        cache.insert(coord, buffer_with(2), ChunkMeta::generated(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take(coord).unwrap().buffer.get(0, 0, 0), 2);
    }

    #[test]
    fn zero_capacity_accepts_nothing() {
        let mut cache = DataCache::new(0);
        cache.insert(ChunkCoord::ZERO, buffer_with(1), ChunkMeta::generated(1));
        assert!(cache.is_empty());
    }
}
