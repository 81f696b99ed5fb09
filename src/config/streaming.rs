use serde::{Deserialize, Serialize};

/// View-cone scoring weights for the pending queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityConfig {
    pub distance_weight: f32,
    pub dot_weight: f32,
    pub cone_half_angle_deg: f32,
    pub surface_bias: f32,
    pub above_bias: f32,
    pub below_penalty: f32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            distance_weight: 2.0,
            dot_weight: 1.0,
            cone_half_angle_deg: 60.0,
            surface_bias: 0.5,
            above_bias: 0.2,
            below_penalty: -0.3,
        }
    }
}

/// Everything that shapes the per-frame streaming state machine: radii,
/// per-phase caps, time budgets, work-drop triggers and the adaptive
/// throttle thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    // Radii, in chunks.
    pub load_radius: i32,
    pub preload_enabled: bool,
    pub preload_radius: i32,
    pub unload_radius: i32,
    /// World height in chunks; columns span 0..column_chunks vertically.
    pub column_chunks: i32,

    // Per-frame caps, each enforced independently.
    pub max_spawns_per_frame: usize,
    pub max_remesh_per_frame: usize,
    pub max_removals_per_frame: usize,
    pub max_gen_jobs_in_flight: usize,
    pub max_mesh_jobs_in_flight: usize,
    pub max_integrations_per_frame: usize,
    pub max_preloads_per_frame: usize,

    // Time budgets.
    pub removal_budget_ms: f64,
    pub streaming_budget_ms: f64,

    // Work dropping after view jumps.
    pub work_drop_distance: i32,
    pub work_drop_angle_deg: f32,
    pub work_drop_move_angle_deg: f32,
    pub work_drop_cooldown: f64,

    // Pending queue maintenance.
    pub pending_queue_cap: usize,
    pub pending_reset_distance: i32,
    pub use_view_cone_priority: bool,

    // Adaptive throttling.
    pub gen_slow_ms: f64,
    pub mesh_slow_ms: f64,
    pub integration_slow_ms: f64,
    pub memory_pressure_threshold_mb: f64,
    pub graphics_memory_threshold_mb: f64,
    pub adaptive_cooldown: f64,

    // Cross-chunk remesh bounds.
    pub remesh_neighbor_depth: u32,

    // Occlusion and physics rotation.
    pub occlusion_checks_per_frame: usize,
    pub occlusion_min_distance: i32,
    pub physics_checks_per_frame: usize,
    pub physics_radius: i32,

    // LOD transition scanning.
    pub lod_checks_per_frame: usize,

    // Safe spawn.
    pub safe_spawn_timeout_seconds: f64,

    /// Number of slices a chunk generation is split into; 1 disables
    /// slicing.
    pub gen_slices: usize,

    // View-cone scoring (kept last: nested table in the TOML form).
    pub priority: PriorityConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_radius: 5,
            preload_enabled: true,
            preload_radius: 7,
            unload_radius: 7,
            column_chunks: 4,

            max_spawns_per_frame: 8,
            max_remesh_per_frame: 4,
            max_removals_per_frame: 8,
            max_gen_jobs_in_flight: 8,
            max_mesh_jobs_in_flight: 8,
            max_integrations_per_frame: 6,
            max_preloads_per_frame: 2,

            removal_budget_ms: 2.0,
            streaming_budget_ms: 6.0,

            work_drop_distance: 4,
            work_drop_angle_deg: 60.0,
            work_drop_move_angle_deg: 120.0,
            work_drop_cooldown: 1.0,

            pending_queue_cap: 2048,
            pending_reset_distance: 3,
            use_view_cone_priority: true,
            priority: PriorityConfig::default(),

            gen_slow_ms: 8.0,
            mesh_slow_ms: 8.0,
            integration_slow_ms: 6.0,
            memory_pressure_threshold_mb: 3072.0,
            graphics_memory_threshold_mb: 2048.0,
            adaptive_cooldown: 2.0,

            remesh_neighbor_depth: 2,

            occlusion_checks_per_frame: 32,
            occlusion_min_distance: 3,
            physics_checks_per_frame: 32,
            physics_radius: 2,

            lod_checks_per_frame: 16,

            safe_spawn_timeout_seconds: 5.0,

            gen_slices: 1,
        }
    }
}

impl StreamingConfig {
    /// Radius inside which chunks are never evicted.
    pub fn keep_radius(&self) -> i32 {
        let mut keep = self.unload_radius.max(self.load_radius + 1);
        if self.preload_enabled {
            keep = keep.max(self.preload_radius);
        }
        keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_radius_covers_load_and_preload() {
        let mut cfg = StreamingConfig::default();
        cfg.load_radius = 10;
        cfg.unload_radius = 7;
        cfg.preload_radius = 12;
        assert_eq!(cfg.keep_radius(), 12);

        cfg.preload_enabled = false;
        assert_eq!(cfg.keep_radius(), 11);
    }
}
