//! Streaming and meshing core for voxel worlds.
//!
//! The crate is organized around one [`StreamingScheduler`] that runs once
//! per frame on the control thread and owns the chunk lifecycle: radius
//! maintenance, prioritized generation, greedy meshing with cross-chunk
//! face culling, mesh and voxel-data caching, LOD transitions with
//! hysteresis, and durable persistence of player edits through async
//! writer threads. Rendering, physics, input and the host filesystem sit
//! behind the adapter traits in [`host`].

pub mod cache;
pub mod codec;
pub mod config;
pub mod host;
pub mod mesh;
pub mod persist;
pub mod stream;
pub mod world;

pub use config::EngineConfig;
pub use stream::{FrameReport, HostBackends, StreamingScheduler, StreamingStats};

/// Commonly used types.
pub mod prelude {
    pub use crate::config::{
        CacheConfig, EngineConfig, LodConfig, PersistenceConfig, StreamingConfig, WorldGenConfig,
    };
    pub use crate::host::{
        Clock, ColliderBackend, Filesystem, MemoryProbe, MeshAllocator, RendererBackend,
    };
    pub use crate::mesh::MeshData;
    pub use crate::stream::{
        FrameReport, HostBackends, LodLevel, LodMode, StreamingScheduler, StreamingStats,
    };
    pub use crate::world::{Chunk, ChunkCoord, ChunkMeta, SaveMode, VoxelBuffer};

    // Math types used across the public surface.
    pub use glam::{IVec3, Vec3};
}

/// Current crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
