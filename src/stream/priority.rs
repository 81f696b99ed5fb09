//! View-cone-aware priority queue for pending chunk work.
//!
//! Scores combine closeness, alignment with the view direction, and a bias
//! toward the surface band where visible geometry actually lives. Scores
//! are computed once at insert; a moving player triggers a queue rebuild
//! rather than rescoring in place.

use std::collections::{BinaryHeap, HashSet};

use glam::Vec3;

use crate::world::ChunkCoord;

#[derive(Debug, Clone, Copy)]
pub struct PriorityParams {
    pub distance_weight: f32,
    pub dot_weight: f32,
    /// Cosine of the view-cone half angle.
    pub cone_cos: f32,
    /// Surface band center in chunk rows: `base_height / chunk_size`.
    pub surface_band_y: f32,
    pub surface_bias: f32,
    pub above_bias: f32,
    pub below_penalty: f32,
    pub chunk_world_size: f32,
}

impl Default for PriorityParams {
    fn default() -> Self {
        Self {
            distance_weight: 2.0,
            dot_weight: 1.0,
            cone_cos: 0.5,
            surface_band_y: 2.0,
            surface_bias: 0.5,
            above_bias: 0.2,
            below_penalty: -0.3,
            chunk_world_size: 32.0,
        }
    }
}

/// Whether a chunk center lies within the forward cone given by
/// `cone_cos`, the cosine of the half angle.
pub fn in_view_cone(
    coord: ChunkCoord,
    center: Vec3,
    view_forward: Vec3,
    cone_cos: f32,
    chunk_world_size: f32,
) -> bool {
    let toward = coord.world_center(chunk_world_size) - center;
    let len = toward.length();
    if len < f32::EPSILON {
        return true;
    }
    view_forward.normalize_or_zero().dot(toward / len) >= cone_cos
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    coord: ChunkCoord,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.coord == other.coord
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.coord.0.to_array().cmp(&other.coord.0.to_array()))
    }
}

/// Max-heap of chunk coordinates with a companion membership set.
pub struct ViewConeQueue {
    heap: BinaryHeap<Scored>,
    members: HashSet<ChunkCoord>,
    params: PriorityParams,
}

impl ViewConeQueue {
    pub fn new(params: PriorityParams) -> Self {
        Self {
            heap: BinaryHeap::new(),
            members: HashSet::new(),
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.members.contains(&coord)
    }

    /// Scores and inserts a coordinate. Duplicate inserts are ignored.
    pub fn enqueue(&mut self, coord: ChunkCoord, center: Vec3, view_forward: Vec3) {
        if !self.members.insert(coord) {
            return;
        }
        let score = self.score(coord, center, view_forward);
        self.heap.push(Scored { score, coord });
    }

    pub fn try_dequeue(&mut self) -> Option<ChunkCoord> {
        let top = self.heap.pop()?;
        self.members.remove(&top.coord);
        Some(top.coord)
    }

    /// Drops the worst-scored entry; O(n) and only used when the queue is
    /// capped.
    pub fn try_remove_lowest_priority(&mut self) -> Option<ChunkCoord> {
        let worst = self.heap.iter().min().copied()?;
        let remaining: Vec<Scored> = self
            .heap
            .drain()
            .filter(|s| s.coord != worst.coord)
            .collect();
        self.heap.extend(remaining);
        self.members.remove(&worst.coord);
        Some(worst.coord)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.members.clear();
    }

    pub fn in_view_cone(&self, coord: ChunkCoord, center: Vec3, view_forward: Vec3) -> bool {
        in_view_cone(
            coord,
            center,
            view_forward,
            self.params.cone_cos,
            self.params.chunk_world_size,
        )
    }

    fn score(&self, coord: ChunkCoord, center: Vec3, view_forward: Vec3) -> f32 {
        let p = &self.params;
        let chunk_center = coord.world_center(p.chunk_world_size);
        let toward = chunk_center - center;
        let dist = toward.length() / p.chunk_world_size;

        let distance_term = p.distance_weight * (1.0 / (1.0 + dist));

        let alignment = if toward.length() < f32::EPSILON {
            1.0
        } else {
            view_forward.normalize_or_zero().dot(toward.normalize())
        };
        let mut dot_term = (alignment + 1.0) * 0.5;
        if alignment >= p.cone_cos {
            dot_term = dot_term.max(0.5);
        }
        let dot_term = p.dot_weight * dot_term;

        let band = p.surface_band_y;
        let cy = coord.y() as f32;
        let visual_bias = if (cy - band).abs() <= 1.0 {
            p.surface_bias
        } else if cy > band {
            p.above_bias
        } else {
            p.below_penalty
        };

        distance_term + dot_term + visual_bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> ViewConeQueue {
        ViewConeQueue::new(PriorityParams {
            chunk_world_size: 1.0,
            surface_band_y: 0.0,
            ..PriorityParams::default()
        })
    }

    #[test]
    fn nearer_chunks_dequeue_first() {
        let mut q = queue();
        let center = Vec3::ZERO;
        let view = Vec3::X;
        q.enqueue(ChunkCoord::new(10, 0, 0), center, view);
        q.enqueue(ChunkCoord::new(1, 0, 0), center, view);
        q.enqueue(ChunkCoord::new(5, 0, 0), center, view);

        assert_eq!(q.try_dequeue(), Some(ChunkCoord::new(1, 0, 0)));
        assert_eq!(q.try_dequeue(), Some(ChunkCoord::new(5, 0, 0)));
        assert_eq!(q.try_dequeue(), Some(ChunkCoord::new(10, 0, 0)));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn chunks_ahead_beat_chunks_behind() {
        let mut q = queue();
        let center = Vec3::ZERO;
        let view = Vec3::X;
        q.enqueue(ChunkCoord::new(4, 0, 0), center, view);
        q.enqueue(ChunkCoord::new(-4, 0, 0), center, view);
        assert_eq!(q.try_dequeue(), Some(ChunkCoord::new(4, 0, 0)));
    }

    #[test]
    fn remove_lowest_drops_the_worst() {
        let mut q = queue();
        let center = Vec3::ZERO;
        let view = Vec3::X;
        q.enqueue(ChunkCoord::new(1, 0, 0), center, view);
        q.enqueue(ChunkCoord::new(30, 0, 0), center, view);
        q.enqueue(ChunkCoord::new(2, 0, 0), center, view);

        assert_eq!(
            q.try_remove_lowest_priority(),
            Some(ChunkCoord::new(30, 0, 0))
        );
        assert_eq!(q.len(), 2);
        assert!(!q.contains(ChunkCoord::new(30, 0, 0)));
    }

    #[test]
    fn duplicate_enqueue_is_ignored() {
        let mut q = queue();
        q.enqueue(ChunkCoord::new(1, 0, 0), Vec3::ZERO, Vec3::X);
        q.enqueue(ChunkCoord::new(1, 0, 0), Vec3::ZERO, Vec3::X);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn view_cone_test_uses_half_angle() {
        let q = queue();
        assert!(q.in_view_cone(ChunkCoord::new(5, 0, 0), Vec3::ZERO, Vec3::X));
        assert!(!q.in_view_cone(ChunkCoord::new(-5, 0, 0), Vec3::ZERO, Vec3::X));
    }
}
