use glam::{IVec3, Vec3};

/// Coordinate of a chunk in the infinite chunk grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkCoord(pub IVec3);

impl ChunkCoord {
    pub const ZERO: ChunkCoord = ChunkCoord(IVec3::ZERO);

    pub fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self(IVec3::new(cx, cy, cz))
    }

    pub fn x(&self) -> i32 {
        self.0.x
    }

    pub fn y(&self) -> i32 {
        self.0.y
    }

    pub fn z(&self) -> i32 {
        self.0.z
    }

    /// Chunk containing the given world position.
    pub fn from_world_pos(pos: Vec3, chunk_world_size: f32) -> Self {
        Self(IVec3::new(
            (pos.x / chunk_world_size).floor() as i32,
            (pos.y / chunk_world_size).floor() as i32,
            (pos.z / chunk_world_size).floor() as i32,
        ))
    }

    /// World-space minimum corner of this chunk.
    pub fn world_min(&self, chunk_world_size: f32) -> Vec3 {
        Vec3::new(
            self.0.x as f32 * chunk_world_size,
            self.0.y as f32 * chunk_world_size,
            self.0.z as f32 * chunk_world_size,
        )
    }

    /// World-space center of this chunk.
    pub fn world_center(&self, chunk_world_size: f32) -> Vec3 {
        self.world_min(chunk_world_size) + Vec3::splat(chunk_world_size * 0.5)
    }

    /// Region bucket this chunk falls into on disk.
    pub fn region(&self, region_size: i32) -> (i32, i32) {
        (
            self.0.x.div_euclid(region_size),
            self.0.z.div_euclid(region_size),
        )
    }

    /// Horizontal chebyshev distance to another chunk, in chunks.
    pub fn horizontal_chebyshev(&self, other: ChunkCoord) -> i32 {
        (self.0.x - other.0.x)
            .abs()
            .max((self.0.z - other.0.z).abs())
    }

    /// Squared euclidean distance to another chunk, in chunks.
    pub fn distance_squared(&self, other: ChunkCoord) -> i64 {
        let dx = (self.0.x - other.0.x) as i64;
        let dy = (self.0.y - other.0.y) as i64;
        let dz = (self.0.z - other.0.z) as i64;
        dx * dx + dy * dy + dz * dz
    }

    /// The six face-adjacent neighbors, ordered -X, +X, -Y, +Y, -Z, +Z to
    /// match [`Face`](crate::mesh::Face) indices.
    pub fn neighbors(&self) -> [ChunkCoord; 6] {
        let IVec3 { x, y, z } = self.0;
        [
            ChunkCoord::new(x - 1, y, z),
            ChunkCoord::new(x + 1, y, z),
            ChunkCoord::new(x, y - 1, z),
            ChunkCoord::new(x, y + 1, z),
            ChunkCoord::new(x, y, z - 1),
            ChunkCoord::new(x, y, z + 1),
        ]
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> ChunkCoord {
        ChunkCoord::new(self.0.x + dx, self.0.y + dy, self.0.z + dz)
    }
}

impl From<ChunkCoord> for IVec3 {
    fn from(coord: ChunkCoord) -> IVec3 {
        coord.0
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_world_pos_floors_negative() {
        let coord = ChunkCoord::from_world_pos(Vec3::new(-0.5, 10.0, 33.0), 32.0);
        assert_eq!(coord, ChunkCoord::new(-1, 0, 1));
    }

    #[test]
    fn region_buckets_use_floor_division() {
        assert_eq!(ChunkCoord::new(-1, 0, 31).region(32), (-1, 0));
        assert_eq!(ChunkCoord::new(32, 0, -33).region(32), (1, -2));
    }

    #[test]
    fn neighbors_are_face_adjacent() {
        let c = ChunkCoord::new(1, 2, 3);
        for n in c.neighbors() {
            assert_eq!(c.distance_squared(n), 1);
        }
    }
}
