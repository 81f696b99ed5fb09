use serde::{Deserialize, Serialize};

use crate::stream::lod::{LodLevel, LodMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodConfig {
    pub levels: Vec<LodLevel>,
    pub default_hysteresis: f32,
    /// Octree depth used when synthesizing distant SVO meshes.
    pub svo_depth: u32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            levels: vec![
                LodLevel {
                    min_dist: 0.0,
                    max_dist: 4.0,
                    lod_step: 1,
                    hysteresis: Some(1.0),
                    mode: LodMode::Mesh,
                },
                LodLevel {
                    min_dist: 5.0,
                    max_dist: 9.0,
                    lod_step: 2,
                    hysteresis: Some(1.0),
                    mode: LodMode::SteppedMesh,
                },
                LodLevel {
                    min_dist: 10.0,
                    max_dist: f32::INFINITY,
                    lod_step: 4,
                    hysteresis: Some(2.0),
                    mode: LodMode::Svo,
                },
            ],
            default_hysteresis: 1.0,
            svo_depth: 2,
        }
    }
}
