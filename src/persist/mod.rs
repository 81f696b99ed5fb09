pub mod mods;
pub mod paths;
pub mod store;

pub use mods::ModTracker;
pub use paths::{sanitize_world_id, WorldPaths};
pub use store::{DeltaStore, LoadOutcome, SnapshotStore};

use crate::world::{ChunkCoord, ChunkMeta, SaveMode, VoxelBuffer};

/// Owns both stores and applies the hybrid snapshot/delta promotion policy
/// when chunks unload.
pub struct PersistenceManager {
    pub snapshots: SnapshotStore,
    pub mods: ModTracker,
    always_snapshot: bool,
    delta_promote_threshold: f32,
    generator_version: i32,
}

impl PersistenceManager {
    pub fn new(
        snapshots: SnapshotStore,
        mods: ModTracker,
        always_snapshot: bool,
        delta_promote_threshold: f32,
        generator_version: i32,
    ) -> Self {
        Self {
            snapshots,
            mods,
            always_snapshot,
            delta_promote_threshold,
            generator_version,
        }
    }

    /// Persists a chunk leaving the active set and returns the metadata it
    /// was persisted with.
    ///
    /// Small edit sets stay as cheap delta files; a chunk is promoted to a
    /// full snapshot once its deltas outgrow the configured fraction of
    /// the chunk volume, or when its content can no longer be reproduced
    /// by generate-plus-replay (generator upgraded, simulation touched it,
    /// or it is structurally invalid).
    pub fn on_unload(&mut self, coord: ChunkCoord, buffer: &VoxelBuffer, meta: &ChunkMeta) -> ChunkMeta {
        let mut meta = meta.clone();
        let delta_count = self.mods.delta_count(coord);
        meta.delta_count = delta_count as i32;

        if self.always_snapshot {
            meta.save_mode = SaveMode::SnapshotBacked;
            self.snapshots.save(coord, buffer, &meta);
            self.mods.discard(coord);
            return meta;
        }

        if meta.save_mode == SaveMode::SnapshotBacked {
            self.snapshots.save(coord, buffer, &meta);
            self.mods.forget_live(coord);
            return meta;
        }

        if delta_count == 0 {
            self.mods.discard(coord);
            meta.save_mode = SaveMode::GeneratedOnly;
            return meta;
        }

        let volume = buffer.volume();
        let promote_at = (volume as f32 * self.delta_promote_threshold).floor() as usize;
        let promote = meta.generator_version != self.generator_version
            || meta.has_simulated_data()
            || meta.is_structurally_invalid()
            || delta_count > promote_at;

        if promote {
            meta.save_mode = SaveMode::SnapshotBacked;
            meta.generator_version = self.generator_version;
            self.snapshots.save(coord, buffer, &meta);
            self.mods.discard(coord);
        } else {
            meta.save_mode = SaveMode::DeltaBacked;
            self.mods.save(coord, &meta);
            self.mods.forget_live(coord);
        }
        meta
    }

    pub fn shutdown(&mut self, join_timeout_ms: u64) {
        self.snapshots.shutdown(join_timeout_ms);
        self.mods.shutdown(join_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryFilesystem;
    use crate::world::MetaFlags;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn manager(always_snapshot: bool, threshold: f32) -> PersistenceManager {
        let fs = Arc::new(MemoryFilesystem::new());
        let paths = WorldPaths::new(Path::new("saves"), "w", 32);
        let snapshots = SnapshotStore::new(fs.clone(), paths.clone(), 4, true).unwrap();
        let mods = ModTracker::new(DeltaStore::new(fs, paths, 4, true).unwrap());
        PersistenceManager::new(snapshots, mods, always_snapshot, threshold, 1)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(cond(), "condition not reached in time");
    }

    #[test]
    fn unedited_chunk_persists_nothing() {
        let mut m = manager(false, 0.2);
        let coord = ChunkCoord::new(0, 0, 0);
        let buffer = VoxelBuffer::new(4);
        let meta = m.on_unload(coord, &buffer, &ChunkMeta::generated(1));
        assert_eq!(meta.save_mode, SaveMode::GeneratedOnly);
        m.shutdown(1000);
        assert!(!m.snapshots.exists(coord));
        assert!(!m.mods.store().exists(coord));
    }

    #[test]
    fn small_edit_set_stays_delta_backed() {
        let mut m = manager(false, 0.5);
        let coord = ChunkCoord::new(1, 0, 0);
        let buffer = VoxelBuffer::new(4);
        m.mods.record_edit(coord, 3, 7);

        let meta = m.on_unload(coord, &buffer, &ChunkMeta::generated(1));
        assert_eq!(meta.save_mode, SaveMode::DeltaBacked);
        m.shutdown(1000);
        assert!(m.mods.store().exists(coord));
        assert!(!m.snapshots.exists(coord));
    }

    #[test]
    fn heavy_edit_set_promotes_to_snapshot() {
        let mut m = manager(false, 0.05);
        let coord = ChunkCoord::new(2, 0, 0);
        let buffer = VoxelBuffer::new(4);
        // 4³ = 64 voxels; threshold 0.05 → promote past 3 deltas.
        for i in 0..8 {
            m.mods.record_edit(coord, i, 2);
        }

        let meta = m.on_unload(coord, &buffer, &ChunkMeta::generated(1));
        assert_eq!(meta.save_mode, SaveMode::SnapshotBacked);
        m.shutdown(1000);
        assert!(m.snapshots.exists(coord));
        assert!(!m.mods.store().exists(coord));
    }

    #[test]
    fn generator_upgrade_promotes_edited_chunks() {
        let mut m = manager(false, 0.9);
        let coord = ChunkCoord::new(3, 0, 0);
        let buffer = VoxelBuffer::new(4);
        m.mods.record_edit(coord, 0, 1);

        let mut old = ChunkMeta::generated(0);
        old.flags = MetaFlags::empty();
        let meta = m.on_unload(coord, &buffer, &old);
        assert_eq!(meta.save_mode, SaveMode::SnapshotBacked);
        assert_eq!(meta.generator_version, 1);
        m.shutdown(1000);
    }

    #[test]
    fn always_snapshot_writes_and_clears_deltas() {
        let mut m = manager(true, 0.9);
        let coord = ChunkCoord::new(4, 0, 0);
        let buffer = VoxelBuffer::new(4);
        m.mods.record_edit(coord, 0, 1);

        let meta = m.on_unload(coord, &buffer, &ChunkMeta::generated(1));
        assert_eq!(meta.save_mode, SaveMode::SnapshotBacked);
        m.shutdown(1000);
        assert!(m.snapshots.exists(coord));
        assert!(!m.mods.store().exists(coord));
    }

    #[test]
    fn snapshot_backed_chunks_rewrite_their_snapshot() {
        let mut m = manager(false, 0.5);
        let coord = ChunkCoord::new(5, 0, 0);
        let buffer = VoxelBuffer::new(4);
        let mut meta = ChunkMeta::generated(1);
        meta.save_mode = SaveMode::SnapshotBacked;

        let meta = m.on_unload(coord, &buffer, &meta);
        assert_eq!(meta.save_mode, SaveMode::SnapshotBacked);
        wait_for(|| m.snapshots.exists(coord));
        m.shutdown(1000);
    }
}
