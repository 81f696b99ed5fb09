//! Shared mesh cache keyed by voxel content.
//!
//! Chunks with identical materials, identical neighbor boundaries and the
//! same LOD step produce byte-identical meshes, so the mesh is built once
//! and the handle shared. Entries are reference counted; only orphaned
//! entries are evictable, biggest first.

use std::collections::HashMap;

use crate::host::{MeshAllocator, MeshHandle};
use crate::mesh::NeighborSlabs;
use crate::world::MaterialId;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(FNV_OFFSET)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_u16(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// 64-bit FNV-1a over everything that feeds the mesher: chunk materials,
/// each present neighbor boundary slab, the LOD step, the materials length
/// and the density channel when present.
pub fn compute_key(
    materials: &[MaterialId],
    neighbors: &NeighborSlabs,
    lod_step: u32,
    density: Option<&[f32]>,
) -> u64 {
    let mut hash = Fnv1a::new();
    for &m in materials {
        hash.write_u16(m);
    }
    for (face, slab) in neighbors.iter().enumerate() {
        if let Some(slab) = slab {
            hash.write(&[face as u8]);
            for &m in slab {
                hash.write_u16(m);
            }
        }
    }
    hash.write_u32(lod_step);
    hash.write_u64(materials.len() as u64);
    if let Some(density) = density {
        for &d in density {
            hash.write(&d.to_le_bytes());
        }
    }
    hash.finish()
}

#[derive(Debug)]
pub struct CachedMeshEntry {
    pub mesh: MeshHandle,
    pub ref_count: u32,
    pub vertex_count: usize,
    pub last_used_frame: u64,
}

pub struct MeshCache {
    entries: HashMap<u64, CachedMeshEntry>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn entry(&self, key: u64) -> Option<&CachedMeshEntry> {
        self.entries.get(&key)
    }

    /// Takes a shared reference to a cached mesh, bumping its ref count.
    pub fn acquire(&mut self, key: u64, frame: u64) -> Option<MeshHandle> {
        let entry = self.entries.get_mut(&key)?;
        entry.ref_count += 1;
        entry.last_used_frame = frame;
        Some(entry.mesh)
    }

    /// Registers a freshly built mesh under its content key with one
    /// owner. Returns false when the key was already present (a racing
    /// build lost; the caller keeps its own handle).
    pub fn insert(&mut self, key: u64, mesh: MeshHandle, vertex_count: usize, frame: u64) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            CachedMeshEntry {
                mesh,
                ref_count: 1,
                vertex_count,
                last_used_frame: frame,
            },
        );
        true
    }

    /// Drops one shared reference. The entry stays resident at ref 0
    /// until eviction reclaims it.
    pub fn release(&mut self, key: u64) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }

    /// Evicts up to `budget` orphaned entries, biggest vertex count first
    /// and least recently used among equals. Entries with live references
    /// are never touched. Returns the number evicted.
    pub fn evict(&mut self, budget: usize, allocator: &mut dyn MeshAllocator) -> usize {
        let mut evicted = 0;
        for _ in 0..budget {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| e.ref_count == 0)
                .max_by(|(_, a), (_, b)| {
                    a.vertex_count
                        .cmp(&b.vertex_count)
                        .then(b.last_used_frame.cmp(&a.last_used_frame))
                })
                .map(|(&k, _)| k);
            match victim {
                Some(key) => {
                    if let Some(entry) = self.entries.remove(&key) {
                        allocator.destroy(entry.mesh);
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        evicted
    }

    /// Releases every entry regardless of references; used at shutdown.
    pub fn drain_all(&mut self, allocator: &mut dyn MeshAllocator) {
        for (_, entry) in self.entries.drain() {
            allocator.destroy(entry.mesh);
        }
    }
}

impl Default for MeshCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullMeshAllocator;

    const NO_NEIGHBORS: NeighborSlabs = [None, None, None, None, None, None];

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let materials = vec![1u16, 0, 2, 0, 0, 0, 1, 1];
        let a = compute_key(&materials, &NO_NEIGHBORS, 1, None);
        let b = compute_key(&materials, &NO_NEIGHBORS, 1, None);
        assert_eq!(a, b);
    }

    #[test]
    fn key_depends_on_lod_step_and_neighbors() {
        let materials = vec![1u16; 8];
        let base = compute_key(&materials, &NO_NEIGHBORS, 1, None);
        assert_ne!(base, compute_key(&materials, &NO_NEIGHBORS, 2, None));

        let mut with_neighbor = NO_NEIGHBORS;
        with_neighbor[0] = Some(vec![0u16; 4]);
        assert_ne!(base, compute_key(&materials, &with_neighbor, 1, None));
    }

    #[test]
    fn acquire_bumps_and_release_drops_refs() {
        let mut alloc = NullMeshAllocator::default();
        let mut cache = MeshCache::new();
        let mesh = alloc.create();
        cache.insert(42, mesh, 100, 0);

        assert_eq!(cache.acquire(42, 1), Some(mesh));
        assert_eq!(cache.entry(42).unwrap().ref_count, 2);
        cache.release(42);
        cache.release(42);
        assert_eq!(cache.entry(42).unwrap().ref_count, 0);
    }

    #[test]
    fn eviction_spares_referenced_entries() {
        let mut alloc = NullMeshAllocator::default();
        let mut cache = MeshCache::new();
        let kept = alloc.create();
        let dropped = alloc.create();
        cache.insert(1, kept, 10, 0);
        cache.insert(2, dropped, 999, 0);
        cache.release(2);

        assert_eq!(cache.evict(8, &mut alloc), 1);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(alloc.live.contains(&kept.0));
        assert!(!alloc.live.contains(&dropped.0));
    }

    #[test]
    fn eviction_prefers_largest_then_lru() {
        let mut alloc = NullMeshAllocator::default();
        let mut cache = MeshCache::new();
        for (key, verts, frame) in [(1u64, 50usize, 5u64), (2, 500, 9), (3, 500, 3)] {
            let mesh = alloc.create();
            cache.insert(key, mesh, verts, frame);
            cache.release(key);
        }

        cache.evict(1, &mut alloc);
        // Key 3: same vertex count as 2 but older.
        assert!(!cache.contains(3));
        assert!(cache.contains(1));
        assert!(cache.contains(2));
    }
}
