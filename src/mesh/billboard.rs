//! Single-quad impostors for the farthest LOD band.

use crate::mesh::data::{MeshBuilder, MeshData};
use crate::world::voxel::{VoxelBuffer, AIR};

/// Collapses a chunk to one upward-facing quad at its mean surface
/// height, carrying the most common surface material. Empty chunks
/// produce an empty mesh.
pub fn billboard_quad(buffer: &VoxelBuffer, voxel_size: f32) -> MeshData {
    let n = buffer.size();
    let mut height_sum = 0usize;
    let mut columns = 0usize;
    let mut counts = std::collections::HashMap::new();

    for z in 0..n {
        for x in 0..n {
            for y in (0..n).rev() {
                let m = buffer.get(x, y, z);
                if m != AIR {
                    height_sum += y + 1;
                    columns += 1;
                    *counts.entry(m).or_insert(0usize) += 1;
                    break;
                }
            }
        }
    }

    if columns == 0 {
        return MeshData::empty();
    }

    let material = counts
        .into_iter()
        .max_by_key(|&(m, count)| (count, std::cmp::Reverse(m)))
        .map(|(m, _)| m)
        .unwrap_or(AIR);
    let surface = (height_sum as f32 / columns as f32) * voxel_size;
    let extent = n as f32 * voxel_size;

    let mut builder = MeshBuilder::new();
    builder.add_quad(
        [
            [0.0, surface, 0.0],
            [0.0, surface, extent],
            [extent, surface, extent],
            [extent, surface, 0.0],
        ],
        [0.0, 1.0, 0.0],
        [material as f32, 1.0, 1.0, 1.0],
    );
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_chunk_yields_one_quad_at_surface() {
        let mut buffer = VoxelBuffer::new(4);
        for z in 0..4 {
            for x in 0..4 {
                buffer.set(x, 0, z, 2);
                buffer.set(x, 1, z, 2);
            }
        }
        let mesh = billboard_quad(&buffer, 1.0);
        assert_eq!(mesh.vertex_count(), 4);
        assert!(mesh.positions.iter().all(|p| p[1] == 2.0));
        assert_eq!(mesh.colors[0][0], 2.0);
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        let buffer = VoxelBuffer::new(4);
        assert!(billboard_quad(&buffer, 1.0).is_empty());
    }
}
