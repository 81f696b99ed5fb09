pub mod chunk;
pub mod chunk_coord;
pub mod generator;
pub mod voxel;

pub use chunk::{apply_delta, Chunk, ChunkMeta, DeltaEntry, MetaFlags, SaveMode};
pub use chunk_coord::ChunkCoord;
pub use generator::{ChunkGenerator, GenSlice, HeightSampler, LayeredHeightSampler};
pub use voxel::{MaterialId, VoxelBuffer, AIR};
