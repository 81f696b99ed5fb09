use std::sync::Arc;

use noise::{NoiseFn, Perlin};

use crate::config::WorldGenConfig;
use crate::world::chunk_coord::ChunkCoord;
use crate::world::voxel::{MaterialId, VoxelBuffer, AIR};

/// Pluggable terrain height source. Implementations must be pure: the same
/// (wx, wz) always yields the same height, so regenerated chunks are
/// identical across sessions.
pub trait HeightSampler: Send + Sync {
    fn height(&self, wx: f32, wz: f32) -> f32;
}

impl<F> HeightSampler for F
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    fn height(&self, wx: f32, wz: f32) -> f32 {
        self(wx, wz)
    }
}

/// Blends a stack of weighted Perlin layers into a single height value.
///
/// Each layer contributes its normalized sample scaled by amplitude; the
/// contributions are mixed by weight. A near-zero total weight collapses to
/// a single unbounded sample of the first noise so a misconfigured stack
/// still produces terrain instead of a flat plane.
pub struct LayeredHeightSampler {
    layers: Vec<NoiseLayer>,
    fallback: Perlin,
    fallback_amplitude: f32,
    base_height: f32,
}

struct NoiseLayer {
    noise: Perlin,
    frequency: f64,
    amplitude: f32,
    weight: f32,
}

const MIN_TOTAL_WEIGHT: f32 = 1e-6;

impl LayeredHeightSampler {
    pub fn from_config(config: &WorldGenConfig) -> Self {
        let layers = config
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| NoiseLayer {
                noise: Perlin::new(config.seed.wrapping_add(i as u32)),
                frequency: layer.frequency,
                amplitude: layer.amplitude,
                weight: layer.weight.max(0.0),
            })
            .collect();

        Self {
            layers,
            fallback: Perlin::new(config.seed),
            fallback_amplitude: config.fallback_amplitude,
            base_height: config.base_height,
        }
    }
}

impl HeightSampler for LayeredHeightSampler {
    fn height(&self, wx: f32, wz: f32) -> f32 {
        let total_weight: f32 = self.layers.iter().map(|l| l.weight).sum();
        if total_weight < MIN_TOTAL_WEIGHT {
            let raw = self.fallback.get([wx as f64 * 0.01, wz as f64 * 0.01]) as f32;
            return self.base_height + raw * self.fallback_amplitude;
        }

        let mut blended = 0.0;
        for layer in &self.layers {
            if layer.weight <= 0.0 {
                continue;
            }
            let raw = layer
                .noise
                .get([wx as f64 * layer.frequency, wz as f64 * layer.frequency])
                as f32;
            let normalized = (raw + 1.0) * 0.5;
            blended += layer.weight * normalized * layer.amplitude;
        }

        self.base_height + blended / total_weight
    }
}

/// A contiguous range of linear voxel indices to fill. Generation can be
/// sliced so a single chunk's fill spreads across several worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenSlice {
    pub start: usize,
    pub count: usize,
}

impl GenSlice {
    pub fn whole(volume: usize) -> Self {
        Self {
            start: 0,
            count: volume,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// Height-sampled chunk fill.
pub struct ChunkGenerator {
    sampler: Arc<dyn HeightSampler>,
    default_material: MaterialId,
    voxel_size: f32,
}

impl ChunkGenerator {
    pub fn new(sampler: Arc<dyn HeightSampler>, default_material: MaterialId, voxel_size: f32) -> Self {
        Self {
            sampler,
            default_material,
            voxel_size,
        }
    }

    pub fn sampler(&self) -> &Arc<dyn HeightSampler> {
        &self.sampler
    }

    /// Fills `buffer.materials[i]` for `i` in the slice: solid below the
    /// sampled surface, air above.
    pub fn generate_slice(&self, buffer: &mut VoxelBuffer, coord: ChunkCoord, slice: GenSlice) {
        let n = buffer.size();
        let end = slice.end().min(buffer.volume());
        let base_x = coord.x() * n as i32;
        let base_y = coord.y() * n as i32;
        let base_z = coord.z() * n as i32;

        let materials = buffer.materials_mut();
        let mut column_height = f32::NAN;
        let mut column_key = usize::MAX;

        for i in slice.start..end {
            let x = i % n;
            let y = (i / n) % n;
            let z = i / (n * n);

            // One height sample per (x, z) column; the linear order revisits
            // columns every row so the last sample is cached.
            let key = x + n * z;
            if key != column_key {
                let wx = (base_x + x as i32) as f32 * self.voxel_size;
                let wz = (base_z + z as i32) as f32 * self.voxel_size;
                column_height = self.sampler.height(wx, wz);
                column_key = key;
            }

            let wy = (base_y + y as i32) as f32 * self.voxel_size;
            materials[i] = if wy <= column_height.floor() {
                self.default_material
            } else {
                AIR
            };
        }
    }

    pub fn generate(&self, buffer: &mut VoxelBuffer, coord: ChunkCoord) {
        let slice = GenSlice::whole(buffer.volume());
        self.generate_slice(buffer, coord, slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(h: f32) -> Arc<dyn HeightSampler> {
        Arc::new(move |_wx: f32, _wz: f32| h)
    }

    #[test]
    fn fills_below_floor_of_height() {
        // Height 0.6 floors to 0: the y=0 layer is solid, y=1 is air.
        let gen = ChunkGenerator::new(flat(0.6), 1, 1.0);
        let mut buffer = VoxelBuffer::new(2);
        gen.generate(&mut buffer, ChunkCoord::ZERO);

        for x in 0..2 {
            for z in 0..2 {
                assert_eq!(buffer.get(x, 0, z), 1);
                assert_eq!(buffer.get(x, 1, z), AIR);
            }
        }
        assert_eq!(buffer.solid_count(), 4);
    }

    #[test]
    fn sliced_fill_matches_whole_fill() {
        let gen = ChunkGenerator::new(flat(5.0), 3, 1.0);
        let coord = ChunkCoord::new(1, 0, -2);

        let mut whole = VoxelBuffer::new(8);
        gen.generate(&mut whole, coord);

        let mut sliced = VoxelBuffer::new(8);
        let volume = sliced.volume();
        let step = volume / 3;
        let mut start = 0;
        while start < volume {
            let count = step.min(volume - start);
            gen.generate_slice(&mut sliced, coord, GenSlice { start, count });
            start += count;
        }

        assert_eq!(whole.materials(), sliced.materials());
    }

    #[test]
    fn chunks_above_surface_are_air() {
        let gen = ChunkGenerator::new(flat(3.0), 1, 1.0);
        let mut buffer = VoxelBuffer::new(4);
        gen.generate(&mut buffer, ChunkCoord::new(0, 2, 0));
        assert!(buffer.is_all_air());
    }

    #[test]
    fn zero_weight_stack_falls_back_to_unbounded_sample() {
        let config = WorldGenConfig {
            layers: vec![crate::config::HeightLayerConfig {
                frequency: 0.01,
                amplitude: 10.0,
                weight: 0.0,
            }],
            ..WorldGenConfig::default()
        };
        let sampler = LayeredHeightSampler::from_config(&config);
        // Must not divide by the zero total weight.
        let h = sampler.height(12.0, 34.0);
        assert!(h.is_finite());
    }
}
