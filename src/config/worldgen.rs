use serde::{Deserialize, Serialize};

/// One noise layer of the terrain height stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightLayerConfig {
    pub frequency: f64,
    pub amplitude: f32,
    /// Non-negative mixing weight; a zero-weight stack falls back to a
    /// single raw sample.
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldGenConfig {
    pub seed: u32,
    /// Material written below the sampled surface.
    pub default_material: u16,
    pub base_height: f32,
    pub fallback_amplitude: f32,
    /// Bumped when terrain generation changes shape; edited chunks from
    /// older generators promote to snapshots on unload.
    pub generator_version: i32,
    pub layers: Vec<HeightLayerConfig>,
}

impl Default for WorldGenConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            default_material: 1,
            base_height: 64.0,
            fallback_amplitude: 12.0,
            layers: vec![
                HeightLayerConfig {
                    frequency: 0.004,
                    amplitude: 48.0,
                    weight: 1.0,
                },
                HeightLayerConfig {
                    frequency: 0.02,
                    amplitude: 12.0,
                    weight: 0.5,
                },
                HeightLayerConfig {
                    frequency: 0.09,
                    amplitude: 3.0,
                    weight: 0.25,
                },
            ],
            generator_version: 1,
        }
    }
}
