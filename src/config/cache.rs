use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Share meshes between chunks with identical content.
    pub mesh_cache_enabled: bool,
    /// Orphaned mesh entries reclaimed per frame (doubled under memory
    /// pressure).
    pub mesh_cache_evict_per_frame: usize,
    /// Evicted chunk buffers parked for fast respawn.
    pub max_cached_chunks: usize,
    /// Data cache inserts per frame (halved under memory pressure).
    pub max_cache_ops_per_frame: usize,
    pub svo_cache_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mesh_cache_enabled: true,
            mesh_cache_evict_per_frame: 2,
            max_cached_chunks: 256,
            max_cache_ops_per_frame: 8,
            svo_cache_capacity: 128,
        }
    }
}
