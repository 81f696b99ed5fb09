//! Greedy chunk mesher.
//!
//! Sweeps boundary planes along each axis, building a per-plane mask of
//! face cells, then grows maximal rectangles over cells with equal
//! material and orientation. Neighbor boundary slabs cull faces that abut
//! solid voxels in adjacent chunks; a missing neighbor reads as all-air so
//! the face stays open until the neighbor integrates and triggers a
//! remesh.

use crate::mesh::data::{MeshBuilder, MeshData};
use crate::mesh::Face;
use crate::world::voxel::{MaterialId, VoxelBuffer, AIR};

/// Boundary slabs of the six neighbors, indexed by [`Face`]. Each present
/// slab is the neighbor's single voxel layer touching the shared boundary,
/// at the same (downsampled) resolution as the chunk being meshed, indexed
/// `u + size·v` where (u, v) are the face's tangent axes in (axis+1,
/// axis+2) order.
pub type NeighborSlabs = [Option<Vec<MaterialId>>; 6];

#[derive(Debug, Clone, Copy)]
pub struct MesherParams {
    pub voxel_size: f32,
    pub lod_step: u32,
    pub max_material_index: u16,
    pub fallback_material_index: u16,
}

impl Default for MesherParams {
    fn default() -> Self {
        Self {
            voxel_size: 1.0,
            lod_step: 1,
            max_material_index: 255,
            fallback_material_index: 0,
        }
    }
}

/// Collapses `step³` blocks into single voxels. The first non-air voxel in
/// z, y, x scan order wins; an entirely empty block stays air.
pub fn downsample(materials: &[MaterialId], size: usize, step: usize) -> Vec<MaterialId> {
    debug_assert_eq!(materials.len(), size * size * size);
    if step <= 1 {
        return materials.to_vec();
    }
    let out_size = size / step;
    let mut out = vec![AIR; out_size * out_size * out_size];

    for oz in 0..out_size {
        for oy in 0..out_size {
            for ox in 0..out_size {
                let mut winner = AIR;
                'block: for dz in 0..step {
                    for dy in 0..step {
                        for dx in 0..step {
                            let x = ox * step + dx;
                            let y = oy * step + dy;
                            let z = oz * step + dz;
                            let m = materials[x + size * (y + size * z)];
                            if m != AIR {
                                winner = m;
                                break 'block;
                            }
                        }
                    }
                }
                out[ox + out_size * (oy + out_size * oz)] = winner;
            }
        }
    }
    out
}

/// Extracts the neighbor's boundary layer facing the chunk being meshed,
/// downsampled to `size/step` resolution. `face` names the face of the
/// *target* chunk the neighbor sits on: for the -X neighbor that is the
/// neighbor's own +X extremity.
pub fn boundary_slab(neighbor: &VoxelBuffer, face: Face, step: usize) -> Vec<MaterialId> {
    let size = neighbor.size();
    let out_size = size / step.max(1);
    let axis = face.axis();
    let u_axis = (axis + 1) % 3;
    let v_axis = (axis + 2) % 3;

    // Layer of the neighbor adjacent to the shared boundary, in the
    // neighbor's downsampled space.
    let layer = if face.is_positive() { 0 } else { out_size - 1 };

    let step = step.max(1);
    let mut slab = vec![AIR; out_size * out_size];
    for v in 0..out_size {
        for u in 0..out_size {
            // First non-air voxel in the step³ block, z,y,x order, matching
            // `downsample`.
            let mut winner = AIR;
            'block: for dz in 0..step {
                for dy in 0..step {
                    for dx in 0..step {
                        let mut pos = [0usize; 3];
                        pos[axis] = layer * step;
                        pos[u_axis] = u * step;
                        pos[v_axis] = v * step;
                        pos[0] += dx;
                        pos[1] += dy;
                        pos[2] += dz;
                        if pos[0] >= size || pos[1] >= size || pos[2] >= size {
                            continue;
                        }
                        let m = neighbor.get(pos[0], pos[1], pos[2]);
                        if m != AIR {
                            winner = m;
                            break 'block;
                        }
                    }
                }
            }
            slab[u + out_size * v] = winner;
        }
    }
    slab
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct MaskCell {
    material: MaterialId,
    sign: i8,
}

impl MaskCell {
    const EMPTY: MaskCell = MaskCell {
        material: AIR,
        sign: 0,
    };

    fn same_as(&self, other: &MaskCell) -> bool {
        self.material == other.material && self.sign == other.sign
    }
}

/// Meshes one chunk's (already downsampled) materials. Pure and
/// bit-deterministic: equal inputs produce byte-identical streams.
pub fn mesh_chunk(
    materials: &[MaterialId],
    size: usize,
    neighbors: &NeighborSlabs,
    params: &MesherParams,
) -> MeshData {
    debug_assert_eq!(materials.len(), size * size * size);
    let scale = params.voxel_size * params.lod_step.max(1) as f32;
    let mut builder = MeshBuilder::new();
    let mut mask = vec![MaskCell::EMPTY; size * size];

    let sample = |pos: [usize; 3]| -> MaterialId { materials[pos[0] + size * (pos[1] + size * pos[2])] };

    for axis in 0..3usize {
        let u_axis = (axis + 1) % 3;
        let v_axis = (axis + 2) % 3;
        let neg_slab = neighbors[axis * 2].as_deref();
        let pos_slab = neighbors[axis * 2 + 1].as_deref();

        for plane in 0..=size {
            // Build the face mask for this boundary plane.
            for v in 0..size {
                for u in 0..size {
                    let slab_idx = u + size * v;

                    let below = if plane == 0 {
                        neg_slab.map_or(AIR, |s| s[slab_idx])
                    } else {
                        let mut pos = [0usize; 3];
                        pos[axis] = plane - 1;
                        pos[u_axis] = u;
                        pos[v_axis] = v;
                        sample(pos)
                    };
                    let above = if plane == size {
                        pos_slab.map_or(AIR, |s| s[slab_idx])
                    } else {
                        let mut pos = [0usize; 3];
                        pos[axis] = plane;
                        pos[u_axis] = u;
                        pos[v_axis] = v;
                        sample(pos)
                    };

                    mask[slab_idx] = match (below != AIR, above != AIR) {
                        (true, false) => MaskCell {
                            material: below,
                            sign: 1,
                        },
                        (false, true) => MaskCell {
                            material: above,
                            sign: -1,
                        },
                        _ => MaskCell::EMPTY,
                    };
                }
            }

            // Grow maximal rectangles over the mask.
            for v in 0..size {
                let mut u = 0;
                while u < size {
                    let start = mask[u + size * v];
                    if start.sign == 0 {
                        u += 1;
                        continue;
                    }

                    let mut width = 1;
                    while u + width < size && mask[u + width + size * v].same_as(&start) {
                        width += 1;
                    }

                    let mut height = 1;
                    'rows: while v + height < size {
                        for du in 0..width {
                            if !mask[u + du + size * (v + height)].same_as(&start) {
                                break 'rows;
                            }
                        }
                        height += 1;
                    }

                    emit_quad(
                        &mut builder,
                        axis,
                        plane,
                        u,
                        v,
                        width,
                        height,
                        start,
                        scale,
                        params,
                    );

                    for dv in 0..height {
                        for du in 0..width {
                            mask[u + du + size * (v + dv)] = MaskCell::EMPTY;
                        }
                    }
                    u += width;
                }
            }
        }
    }

    builder.finish()
}

#[allow(clippy::too_many_arguments)]
fn emit_quad(
    builder: &mut MeshBuilder,
    axis: usize,
    plane: usize,
    u: usize,
    v: usize,
    width: usize,
    height: usize,
    cell: MaskCell,
    scale: f32,
    params: &MesherParams,
) {
    let u_axis = (axis + 1) % 3;
    let v_axis = (axis + 2) % 3;

    let mut origin = [0f32; 3];
    origin[axis] = plane as f32;
    origin[u_axis] = u as f32;
    origin[v_axis] = v as f32;

    let mut du = [0f32; 3];
    du[u_axis] = width as f32;
    let mut dv = [0f32; 3];
    dv[v_axis] = height as f32;

    let corner = |a: f32, b: f32| -> [f32; 3] {
        [
            (origin[0] + du[0] * a + dv[0] * b) * scale,
            (origin[1] + du[1] * a + dv[1] * b) * scale,
            (origin[2] + du[2] * a + dv[2] * b) * scale,
        ]
    };
    let p0 = corner(0.0, 0.0);
    let p1 = corner(1.0, 0.0);
    let p2 = corner(1.0, 1.0);
    let p3 = corner(0.0, 1.0);

    let mut normal = [0f32; 3];
    normal[axis] = cell.sign as f32;

    let layer = if cell.material > params.max_material_index {
        params.fallback_material_index
    } else {
        cell.material
    };
    let color = [layer as f32, 1.0, 1.0, 1.0];

    if cell.sign > 0 {
        builder.add_quad([p0, p1, p2, p3], normal, color);
    } else {
        builder.add_quad([p3, p2, p1, p0], normal, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_NEIGHBORS: NeighborSlabs = [None, None, None, None, None, None];

    fn solid_floor(n: usize) -> Vec<MaterialId> {
        // y = 0 layer solid, everything above air.
        let mut m = vec![AIR; n * n * n];
        for z in 0..n {
            for x in 0..n {
                m[x + n * (0 + n * z)] = 1;
            }
        }
        m
    }

    #[test]
    fn single_slab_chunk_produces_six_quads() {
        let materials = solid_floor(2);
        let mesh = mesh_chunk(&materials, 2, &NO_NEIGHBORS, &MesherParams::default());
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
    }

    #[test]
    fn full_chunk_produces_one_quad_per_face() {
        let n = 4;
        let materials = vec![1u16; n * n * n];
        let mesh = mesh_chunk(&materials, n, &NO_NEIGHBORS, &MesherParams::default());
        // Greedy growth merges each face into a single n×n quad.
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
    }

    #[test]
    fn solid_neighbor_culls_the_shared_face() {
        let n = 2;
        let materials = vec![1u16; n * n * n];
        let mut neighbors = NO_NEIGHBORS;
        neighbors[Face::PosX as usize] = Some(vec![1; n * n]);
        let mesh = mesh_chunk(&materials, n, &neighbors, &MesherParams::default());
        // Five faces remain.
        assert_eq!(mesh.vertex_count(), 20);
        assert_eq!(mesh.index_count(), 30);
    }

    #[test]
    fn empty_chunk_produces_no_geometry() {
        let materials = vec![AIR; 8];
        let mesh = mesh_chunk(&materials, 2, &NO_NEIGHBORS, &MesherParams::default());
        assert!(mesh.is_empty());
    }

    #[test]
    fn output_is_deterministic() {
        let mut materials = vec![AIR; 4 * 4 * 4];
        for (i, m) in materials.iter_mut().enumerate() {
            if i % 3 == 0 {
                *m = (i % 5) as u16 + 1;
            }
        }
        let a = mesh_chunk(&materials, 4, &NO_NEIGHBORS, &MesherParams::default());
        let b = mesh_chunk(&materials, 4, &NO_NEIGHBORS, &MesherParams::default());
        assert_eq!(a, b);
    }

    #[test]
    fn material_layer_saturates_to_fallback() {
        let params = MesherParams {
            max_material_index: 4,
            fallback_material_index: 2,
            ..MesherParams::default()
        };
        let materials = vec![9u16; 8];
        let mesh = mesh_chunk(&materials, 2, &NO_NEIGHBORS, &params);
        assert!(mesh.colors.iter().all(|c| c[0] == 2.0));
    }

    #[test]
    fn downsample_prefers_first_non_air_in_scan_order() {
        let n = 4;
        let mut materials = vec![AIR; n * n * n];
        // Block (0,0,0)..(2,2,2): put 5 at (1,0,0) and 7 at (0,1,0). Scan
        // order z,y,x visits (1,0,0) before (0,1,0).
        materials[1 + n * (0 + n * 0)] = 5;
        materials[0 + n * (1 + n * 0)] = 7;
        let out = downsample(&materials, n, 2);
        assert_eq!(out.len(), 8);
        assert_eq!(out[0], 5);
    }

    #[test]
    fn lod_step_scales_vertices_to_full_extent() {
        let n = 4;
        let materials = vec![1u16; n * n * n];
        let down = downsample(&materials, n, 2);
        let params = MesherParams {
            lod_step: 2,
            ..MesherParams::default()
        };
        let mesh = mesh_chunk(&down, n / 2, &NO_NEIGHBORS, &params);
        let max = mesh
            .positions
            .iter()
            .flat_map(|p| p.iter())
            .fold(f32::MIN, |a, &b| a.max(b));
        // 2 output voxels × scale 2 = original extent of 4.
        assert_eq!(max, 4.0);
    }

    #[test]
    fn boundary_slab_takes_adjacent_layer() {
        let n = 2;
        let mut neighbor = VoxelBuffer::new(n);
        // Neighbor sits on our -X face; its x = n-1 layer touches us.
        neighbor.set(1, 0, 0, 3);
        let slab = boundary_slab(&neighbor, Face::NegX, 1);
        // (u, v) = (y, z) for X faces.
        assert_eq!(slab[0 + n * 0], 3);
        assert_eq!(slab[1 + n * 0], AIR);
    }
}
