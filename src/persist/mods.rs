//! Tracks player voxel edits per chunk.
//!
//! Live edit maps mirror what the delta store holds on disk plus any
//! unsaved edits. The latest write to an index wins; replaying a map onto
//! a freshly generated buffer reproduces the edited chunk exactly.

use std::collections::{HashMap, HashSet};

use crate::persist::store::{DeltaStore, LoadOutcome};
use crate::world::{apply_delta, ChunkCoord, ChunkMeta, MaterialId, VoxelBuffer};

pub struct ModTracker {
    store: DeltaStore,
    live: HashMap<ChunkCoord, HashMap<i32, MaterialId>>,
    unsaved: HashSet<ChunkCoord>,
}

impl ModTracker {
    pub fn new(store: DeltaStore) -> Self {
        Self {
            store,
            live: HashMap::new(),
            unsaved: HashSet::new(),
        }
    }

    pub fn store(&self) -> &DeltaStore {
        &self.store
    }

    /// Records one edit. Returns the number of deltas now held for the
    /// chunk.
    pub fn record_edit(&mut self, coord: ChunkCoord, index: i32, material: MaterialId) -> usize {
        let map = self.live.entry(coord).or_default();
        map.insert(index, material);
        self.unsaved.insert(coord);
        map.len()
    }

    /// Count of live deltas for a chunk; zero when none are loaded.
    pub fn delta_count(&self, coord: ChunkCoord) -> usize {
        self.live.get(&coord).map_or(0, |m| m.len())
    }

    /// True when edits exist for the chunk, live or persisted. The data
    /// cache consults this on spawn: a chunk with deltas must reload from
    /// disk rather than reuse a parked buffer.
    pub fn has_deltas(&self, coord: ChunkCoord) -> bool {
        self.delta_count(coord) > 0 || self.store.exists(coord)
    }

    /// Loads the persisted delta map for a chunk (if any) into the live
    /// set and replays it onto the buffer. Returns the number of voxels
    /// changed.
    pub fn replay_onto(&mut self, coord: ChunkCoord, buffer: &mut VoxelBuffer) -> usize {
        if !self.live.contains_key(&coord) {
            if let LoadOutcome::Loaded((mapping, _meta)) = self.store.load(coord) {
                self.live.insert(coord, mapping);
            }
        }
        match self.live.get(&coord) {
            Some(mapping) if !mapping.is_empty() => apply_delta(buffer, mapping),
            _ => 0,
        }
    }

    /// Writes the chunk's delta file if it has unsaved edits.
    pub fn save(&mut self, coord: ChunkCoord, meta: &ChunkMeta) {
        if !self.unsaved.remove(&coord) {
            return;
        }
        if let Some(mapping) = self.live.get(&coord) {
            let entries: Vec<(i32, MaterialId)> = {
                let mut entries: Vec<_> = mapping.iter().map(|(&i, &m)| (i, m)).collect();
                // Stable file contents for identical edit sets.
                entries.sort_unstable_by_key(|&(i, _)| i);
                entries
            };
            let mut meta = meta.clone();
            meta.delta_count = entries.len() as i32;
            self.store.save(coord, &entries, &meta);
        }
    }

    /// Drops all record of the chunk's edits, on disk and live.
    pub fn discard(&mut self, coord: ChunkCoord) {
        self.live.remove(&coord);
        self.unsaved.remove(&coord);
        self.store.delete(coord);
    }

    /// Forgets the live map without touching disk; used when an unedited
    /// chunk leaves the active set.
    pub fn forget_live(&mut self, coord: ChunkCoord) {
        if !self.unsaved.contains(&coord) {
            self.live.remove(&coord);
        }
    }

    pub fn shutdown(&mut self, join_timeout_ms: u64) {
        self.store.shutdown(join_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryFilesystem;
    use crate::persist::paths::WorldPaths;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn tracker() -> ModTracker {
        let fs = Arc::new(MemoryFilesystem::new());
        let paths = WorldPaths::new(Path::new("saves"), "w", 32);
        ModTracker::new(DeltaStore::new(fs, paths, 4, false).unwrap())
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(cond(), "condition not reached in time");
    }

    #[test]
    fn edits_accumulate_with_last_write_wins() {
        let mut t = tracker();
        let coord = ChunkCoord::new(0, 0, 0);
        t.record_edit(coord, 5, 7);
        t.record_edit(coord, 5, 9);
        t.record_edit(coord, 2, 3);
        assert_eq!(t.delta_count(coord), 2);

        let mut buffer = VoxelBuffer::new(4);
        assert_eq!(t.replay_onto(coord, &mut buffer), 2);
        assert_eq!(buffer.get_linear(5), Some(9));
        assert_eq!(buffer.get_linear(2), Some(3));
    }

    #[test]
    fn saved_edits_replay_after_forget() {
        let mut t = tracker();
        let coord = ChunkCoord::new(1, 0, 0);
        t.record_edit(coord, 10, 4);
        t.save(coord, &ChunkMeta::generated(1));
        wait_for(|| t.store().exists(coord));

        t.live.remove(&coord);
        let mut buffer = VoxelBuffer::new(4);
        assert_eq!(t.replay_onto(coord, &mut buffer), 1);
        assert_eq!(buffer.get_linear(10), Some(4));
        t.shutdown(500);
    }

    #[test]
    fn discard_removes_disk_record() {
        let mut t = tracker();
        let coord = ChunkCoord::new(2, 0, 0);
        t.record_edit(coord, 1, 1);
        t.save(coord, &ChunkMeta::generated(1));
        wait_for(|| t.store().exists(coord));

        t.discard(coord);
        wait_for(|| !t.store().exists(coord));
        assert_eq!(t.delta_count(coord), 0);
        t.shutdown(500);
    }

    #[test]
    fn has_deltas_checks_live_and_disk() {
        let mut t = tracker();
        let coord = ChunkCoord::new(3, 0, 0);
        assert!(!t.has_deltas(coord));
        t.record_edit(coord, 0, 2);
        assert!(t.has_deltas(coord));
    }
}
