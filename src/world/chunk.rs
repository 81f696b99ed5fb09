use std::collections::HashMap;

use bitflags::bitflags;

use crate::host::{ColliderId, MeshHandle};
use crate::stream::lod::LodLevel;
use crate::world::chunk_coord::ChunkCoord;
use crate::world::voxel::{MaterialId, VoxelBuffer};

/// How a chunk is backed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Pure generator output, nothing persisted.
    GeneratedOnly = 0,
    /// Generator output plus a sparse delta file of player edits.
    DeltaBacked = 1,
    /// Full snapshot on disk; the generator is no longer consulted.
    SnapshotBacked = 2,
}

impl SaveMode {
    pub fn from_u8(v: u8) -> Option<SaveMode> {
        match v {
            0 => Some(SaveMode::GeneratedOnly),
            1 => Some(SaveMode::DeltaBacked),
            2 => Some(SaveMode::SnapshotBacked),
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MetaFlags: u8 {
        const HAS_SIMULATED_DATA = 1;
        const STRUCTURALLY_INVALID = 2;
    }
}

/// Metadata that travels with every persisted chunk record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub save_mode: SaveMode,
    pub generator_version: i32,
    pub last_sim_tick: i32,
    pub delta_count: i32,
    pub flags: MetaFlags,
}

impl ChunkMeta {
    pub fn generated(generator_version: i32) -> Self {
        Self {
            save_mode: SaveMode::GeneratedOnly,
            generator_version,
            last_sim_tick: 0,
            delta_count: 0,
            flags: MetaFlags::empty(),
        }
    }

    pub fn has_simulated_data(&self) -> bool {
        self.flags.contains(MetaFlags::HAS_SIMULATED_DATA)
    }

    pub fn is_structurally_invalid(&self) -> bool {
        self.flags.contains(MetaFlags::STRUCTURALLY_INVALID)
    }
}

/// A single voxel override: linear index into the chunk plus the material
/// written there. The latest write to an index wins.
pub type DeltaEntry = (i32, MaterialId);

/// Applies a delta mapping to a buffer. Indices outside the buffer are
/// skipped. Returns the number of voxels whose value actually changed;
/// applying the same mapping twice returns zero the second time.
pub fn apply_delta(buffer: &mut VoxelBuffer, deltas: &HashMap<i32, MaterialId>) -> usize {
    let mut changed = 0;
    for (&index, &material) in deltas {
        if index < 0 {
            continue;
        }
        if buffer.set_linear(index as usize, material) {
            changed += 1;
        }
    }
    changed
}

/// An active chunk instance. Exactly one exists per coordinate; the
/// streaming scheduler creates it on spawn and destroys it on removal.
#[derive(Debug)]
pub struct Chunk {
    pub coord: ChunkCoord,
    pub buffer: VoxelBuffer,
    pub meta: ChunkMeta,
    pub mesh: Option<MeshHandle>,
    /// Set when `mesh` is shared out of the mesh cache; the cache owns the
    /// handle's lifetime in that case.
    pub mesh_cache_key: Option<u64>,
    pub collider: Option<ColliderId>,
    pub lod_step: u32,
    pub uses_svo: bool,
    pub is_low_lod: bool,
    pub lod_start_time: f64,
    /// Level the chunk last resolved to; feeds hysteresis next time.
    pub lod: Option<LodLevel>,
    pub integrated_once: bool,
    pub visible: bool,
    pub physics_enabled: bool,
}

impl Chunk {
    pub fn new(coord: ChunkCoord, buffer: VoxelBuffer, meta: ChunkMeta) -> Self {
        Self {
            coord,
            buffer,
            meta,
            mesh: None,
            mesh_cache_key: None,
            collider: None,
            lod_step: 1,
            uses_svo: false,
            is_low_lod: false,
            lod_start_time: 0.0,
            lod: None,
            integrated_once: false,
            visible: true,
            physics_enabled: false,
        }
    }

    pub fn material_at(&self, x: usize, y: usize, z: usize) -> MaterialId {
        self.buffer.get(x, y, z)
    }

    pub fn set_material(&mut self, x: usize, y: usize, z: usize, material: MaterialId) -> bool {
        let index = self.buffer.index(x, y, z);
        self.buffer.set_linear(index, material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_application_is_idempotent() {
        let mut buffer = VoxelBuffer::new(4);
        let deltas: HashMap<i32, MaterialId> = [(5, 9), (2, 3)].into_iter().collect();

        assert_eq!(apply_delta(&mut buffer, &deltas), 2);
        assert_eq!(apply_delta(&mut buffer, &deltas), 0);
        assert_eq!(buffer.get_linear(5), Some(9));
        assert_eq!(buffer.get_linear(2), Some(3));
    }

    #[test]
    fn delta_ignores_out_of_range_indices() {
        let mut buffer = VoxelBuffer::new(2);
        let deltas: HashMap<i32, MaterialId> = [(-1, 4), (1000, 4), (0, 4)].into_iter().collect();
        assert_eq!(apply_delta(&mut buffer, &deltas), 1);
    }

    #[test]
    fn save_mode_round_trips_through_u8() {
        for mode in [
            SaveMode::GeneratedOnly,
            SaveMode::DeltaBacked,
            SaveMode::SnapshotBacked,
        ] {
            assert_eq!(SaveMode::from_u8(mode as u8), Some(mode));
        }
        assert_eq!(SaveMode::from_u8(9), None);
    }
}
