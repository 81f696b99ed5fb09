pub mod jobs;
pub mod lod;
pub mod priority;
pub mod queues;
pub mod scheduler;

pub use jobs::{GenJobResult, JobPool, MeshJobInput, MeshJobResult};
pub use lod::{validate_levels, LodLevel, LodMode, LodResolver, MAX_HYSTERESIS};
pub use priority::{in_view_cone, PriorityParams, ViewConeQueue};
pub use queues::CoordQueue;
pub use scheduler::{FrameReport, HostBackends, StreamingScheduler, StreamingStats};
