/// Voxel material id. Zero is air; non-zero ids select a texture-array layer.
pub type MaterialId = u16;

pub const AIR: MaterialId = 0;

/// Dense voxel storage for a single chunk.
///
/// Materials are a flat `size³` array indexed `x + size·(y + size·z)`. An
/// optional density channel of the same length carries smooth-terrain data
/// when present. Ownership is exclusive; jobs that run off-thread take a
/// deep copy via `clone`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelBuffer {
    materials: Vec<MaterialId>,
    density: Option<Vec<f32>>,
    size: usize,
}

impl VoxelBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            materials: vec![AIR; size * size * size],
            density: None,
            size,
        }
    }

    pub fn from_parts(size: usize, materials: Vec<MaterialId>, density: Option<Vec<f32>>) -> Self {
        debug_assert_eq!(materials.len(), size * size * size);
        if let Some(d) = &density {
            debug_assert_eq!(d.len(), size * size * size);
        }
        Self {
            materials,
            density,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn volume(&self) -> usize {
        self.size * self.size * self.size
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.size * (y + self.size * z)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> MaterialId {
        self.materials[self.index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, material: MaterialId) {
        let idx = self.index(x, y, z);
        self.materials[idx] = material;
    }

    pub fn get_linear(&self, index: usize) -> Option<MaterialId> {
        self.materials.get(index).copied()
    }

    /// Writes a material by linear index, ignoring out-of-range indices.
    /// Returns true when the stored value changed.
    pub fn set_linear(&mut self, index: usize, material: MaterialId) -> bool {
        match self.materials.get_mut(index) {
            Some(slot) if *slot != material => {
                *slot = material;
                true
            }
            _ => false,
        }
    }

    pub fn materials(&self) -> &[MaterialId] {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut [MaterialId] {
        &mut self.materials
    }

    pub fn density(&self) -> Option<&[f32]> {
        self.density.as_deref()
    }

    pub fn set_density(&mut self, density: Option<Vec<f32>>) {
        if let Some(d) = &density {
            debug_assert_eq!(d.len(), self.volume());
        }
        self.density = density;
    }

    pub fn is_all_air(&self) -> bool {
        self.materials.iter().all(|&m| m == AIR)
    }

    pub fn solid_count(&self) -> usize {
        self.materials.iter().filter(|&&m| m != AIR).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_index_matches_xyz() {
        let mut buf = VoxelBuffer::new(4);
        buf.set(1, 2, 3, 7);
        assert_eq!(buf.get_linear(1 + 4 * (2 + 4 * 3)), Some(7));
    }

    #[test]
    fn set_linear_reports_changes() {
        let mut buf = VoxelBuffer::new(2);
        assert!(buf.set_linear(3, 5));
        assert!(!buf.set_linear(3, 5));
        assert!(!buf.set_linear(999, 5));
    }

    #[test]
    fn starts_all_air() {
        let buf = VoxelBuffer::new(8);
        assert!(buf.is_all_air());
        assert_eq!(buf.solid_count(), 0);
    }
}
