use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Save root; each world lives in `<root>/<world_id>/`.
    pub root: PathBuf,
    /// Overrides the `seed_<n>` world id when set (sanitized first).
    pub world_id: Option<String>,
    /// Chunks per region directory along each horizontal axis.
    pub region_size: i32,
    pub compress: bool,
    /// Write full snapshots for every unloading chunk instead of the
    /// hybrid delta policy.
    pub always_snapshot: bool,
    /// Delta file promotes to a snapshot once edits exceed this fraction
    /// of the chunk volume.
    pub delta_promote_threshold: f32,
    pub worker_join_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("saves"),
            world_id: None,
            region_size: 32,
            compress: true,
            always_snapshot: false,
            delta_promote_threshold: 0.25,
            worker_join_timeout_ms: 2000,
        }
    }
}
