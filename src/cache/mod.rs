pub mod data_cache;
pub mod mesh_cache;

pub use data_cache::{CachedChunkData, DataCache};
pub use mesh_cache::{compute_key, CachedMeshEntry, MeshCache};
