pub mod cache;
pub mod core;
pub mod lod;
pub mod persistence;
pub mod streaming;
pub mod worldgen;

pub use cache::CacheConfig;
pub use core::EngineConfig;
pub use lod::LodConfig;
pub use persistence::PersistenceConfig;
pub use streaming::{PriorityConfig, StreamingConfig};
pub use worldgen::{HeightLayerConfig, WorldGenConfig};
