//! Sparse voxel octree for distant-LOD chunks.
//!
//! Built bottom-up from a chunk buffer: uniform regions collapse into a
//! single leaf, so flat terrain costs a handful of nodes. Distant chunks
//! render a mesh synthesized from the octree at a shallow depth instead of
//! running the greedy mesher over full-resolution voxels.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::mesh::data::{MeshBuilder, MeshData};
use crate::world::voxel::{MaterialId, VoxelBuffer, AIR};
use crate::world::ChunkCoord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SvoNode {
    /// Uniform region; `Leaf(AIR)` is empty space.
    Leaf(MaterialId),
    /// Eight children ordered `x + 2y + 4z` over the low/high halves.
    Branch(Box<[SvoNode; 8]>),
}

impl SvoNode {
    /// Builds the octree for a buffer whose size must be a power of two.
    pub fn build(buffer: &VoxelBuffer) -> SvoNode {
        let size = buffer.size();
        debug_assert!(size.is_power_of_two());
        Self::build_region(buffer, [0, 0, 0], size)
    }

    fn build_region(buffer: &VoxelBuffer, origin: [usize; 3], size: usize) -> SvoNode {
        if size == 1 {
            return SvoNode::Leaf(buffer.get(origin[0], origin[1], origin[2]));
        }

        let half = size / 2;
        let children: Vec<SvoNode> = (0..8)
            .map(|i| {
                let child_origin = [
                    origin[0] + (i & 1) * half,
                    origin[1] + ((i >> 1) & 1) * half,
                    origin[2] + ((i >> 2) & 1) * half,
                ];
                Self::build_region(buffer, child_origin, half)
            })
            .collect();

        // Collapse when all eight children are the same leaf.
        if let SvoNode::Leaf(first) = children[0] {
            if children.iter().all(|c| matches!(c, SvoNode::Leaf(m) if *m == first)) {
                return SvoNode::Leaf(first);
            }
        }

        let children: Box<[SvoNode; 8]> = match <Box<[SvoNode; 8]>>::try_from(children.into_boxed_slice()) {
            Ok(array) => array,
            Err(_) => unreachable!("octree branch always has eight children"),
        };
        SvoNode::Branch(children)
    }

    pub fn node_count(&self) -> usize {
        match self {
            SvoNode::Leaf(_) => 1,
            SvoNode::Branch(children) => 1 + children.iter().map(SvoNode::node_count).sum::<usize>(),
        }
    }

    /// Material at a voxel position within the tree's extent.
    pub fn material_at(&self, size: usize, x: usize, y: usize, z: usize) -> MaterialId {
        match self {
            SvoNode::Leaf(m) => *m,
            SvoNode::Branch(children) => {
                let half = size / 2;
                let idx = (x >= half) as usize + 2 * ((y >= half) as usize) + 4 * ((z >= half) as usize);
                children[idx].material_at(half, x % half.max(1), y % half.max(1), z % half.max(1))
            }
        }
    }

    /// Emits cube faces for every occupied region at `depth` levels below
    /// the root (leaves shallower than that emit at their own size). No
    /// neighbor culling: distant impostors do not warrant it.
    pub fn synthesize_mesh(&self, chunk_size: usize, depth: u32, voxel_size: f32) -> MeshData {
        let mut builder = MeshBuilder::new();
        self.emit(&mut builder, [0.0; 3], chunk_size as f32 * voxel_size, depth);
        builder.finish()
    }

    fn emit(&self, builder: &mut MeshBuilder, origin: [f32; 3], size: f32, depth: u32) {
        match self {
            SvoNode::Leaf(m) => {
                if *m != AIR {
                    emit_cube(builder, origin, size, *m);
                }
            }
            SvoNode::Branch(children) => {
                if depth == 0 {
                    // Depth exhausted: treat any occupancy as a full cube
                    // with the dominant child material.
                    if let Some(material) = dominant_material(self) {
                        emit_cube(builder, origin, size, material);
                    }
                    return;
                }
                let half = size / 2.0;
                for (i, child) in children.iter().enumerate() {
                    let child_origin = [
                        origin[0] + (i & 1) as f32 * half,
                        origin[1] + ((i >> 1) & 1) as f32 * half,
                        origin[2] + ((i >> 2) & 1) as f32 * half,
                    ];
                    child.emit(builder, child_origin, half, depth - 1);
                }
            }
        }
    }
}

fn dominant_material(node: &SvoNode) -> Option<MaterialId> {
    match node {
        SvoNode::Leaf(AIR) => None,
        SvoNode::Leaf(m) => Some(*m),
        SvoNode::Branch(children) => children.iter().find_map(dominant_material),
    }
}

fn emit_cube(builder: &mut MeshBuilder, o: [f32; 3], s: f32, material: MaterialId) {
    let color = [material as f32, 1.0, 1.0, 1.0];
    let [x, y, z] = o;

    // -X / +X
    builder.add_quad(
        [[x, y, z], [x, y, z + s], [x, y + s, z + s], [x, y + s, z]],
        [-1.0, 0.0, 0.0],
        color,
    );
    builder.add_quad(
        [[x + s, y, z], [x + s, y + s, z], [x + s, y + s, z + s], [x + s, y, z + s]],
        [1.0, 0.0, 0.0],
        color,
    );
    // -Y / +Y
    builder.add_quad(
        [[x, y, z], [x + s, y, z], [x + s, y, z + s], [x, y, z + s]],
        [0.0, -1.0, 0.0],
        color,
    );
    builder.add_quad(
        [[x, y + s, z], [x, y + s, z + s], [x + s, y + s, z + s], [x + s, y + s, z]],
        [0.0, 1.0, 0.0],
        color,
    );
    // -Z / +Z
    builder.add_quad(
        [[x, y, z], [x, y + s, z], [x + s, y + s, z], [x + s, y, z]],
        [0.0, 0.0, -1.0],
        color,
    );
    builder.add_quad(
        [[x, y, z + s], [x + s, y, z + s], [x + s, y + s, z + s], [x, y + s, z + s]],
        [0.0, 0.0, 1.0],
        color,
    );
}

/// Keeps built octrees for distant chunks, bounded by entry count with
/// oldest-first eviction.
pub struct SvoCache {
    trees: HashMap<ChunkCoord, Arc<SvoNode>>,
    order: VecDeque<ChunkCoord>,
    capacity: usize,
}

impl SvoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            trees: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn get_or_build(&mut self, coord: ChunkCoord, buffer: &VoxelBuffer) -> Arc<SvoNode> {
        if let Some(tree) = self.trees.get(&coord) {
            return tree.clone();
        }
        let tree = Arc::new(SvoNode::build(buffer));
        if self.trees.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.trees.remove(&oldest);
            }
        }
        self.trees.insert(coord, tree.clone());
        self.order.push_back(coord);
        tree
    }

    pub fn invalidate(&mut self, coord: ChunkCoord) {
        if self.trees.remove(&coord).is_some() {
            self.order.retain(|c| *c != coord);
        }
    }

    pub fn clear(&mut self) {
        self.trees.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_buffer_collapses_to_single_leaf() {
        let mut buffer = VoxelBuffer::new(8);
        buffer.materials_mut().fill(3);
        let tree = SvoNode::build(&buffer);
        assert_eq!(tree, SvoNode::Leaf(3));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn single_leaf_synthesizes_one_cube() {
        let mut buffer = VoxelBuffer::new(4);
        buffer.materials_mut().fill(2);
        let tree = SvoNode::build(&buffer);
        let mesh = tree.synthesize_mesh(4, 0, 1.0);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
    }

    #[test]
    fn mixed_buffer_splits_and_queries() {
        let mut buffer = VoxelBuffer::new(4);
        buffer.set(0, 0, 0, 7);
        let tree = SvoNode::build(&buffer);
        assert!(matches!(tree, SvoNode::Branch(_)));
        assert_eq!(tree.material_at(4, 0, 0, 0), 7);
        assert_eq!(tree.material_at(4, 3, 3, 3), AIR);
    }

    #[test]
    fn cache_evicts_oldest_when_full() {
        let buffer = VoxelBuffer::new(2);
        let mut cache = SvoCache::new(2);
        cache.get_or_build(ChunkCoord::new(0, 0, 0), &buffer);
        cache.get_or_build(ChunkCoord::new(1, 0, 0), &buffer);
        cache.get_or_build(ChunkCoord::new(2, 0, 0), &buffer);
        assert_eq!(cache.len(), 2);
        // The first insert was evicted.
        cache.get_or_build(ChunkCoord::new(0, 0, 0), &buffer);
        assert_eq!(cache.len(), 2);
    }
}
