/// Index stream with the width chosen by vertex count: 16-bit while the
/// mesh stays within a u16 range, 32-bit beyond that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStream {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexStream {
    pub fn len(&self) -> usize {
        match self {
            IndexStream::U16(v) => v.len(),
            IndexStream::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_u32(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            IndexStream::U16(v) => Box::new(v.iter().map(|&i| i as u32)),
            IndexStream::U32(v) => Box::new(v.iter().copied()),
        }
    }
}

/// Geometry streams produced by the meshers. Triangles wind CCW when
/// viewed along their positive face normal.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub indices: IndexStream,
}

const U16_VERTEX_LIMIT: usize = 65535;

impl MeshData {
    pub fn empty() -> Self {
        Self {
            positions: Vec::new(),
            normals: Vec::new(),
            colors: Vec::new(),
            indices: IndexStream::U16(Vec::new()),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Approximate bytes held, used by size-aware cache eviction.
    pub fn byte_size(&self) -> usize {
        let index_bytes = match &self.indices {
            IndexStream::U16(v) => v.len() * 2,
            IndexStream::U32(v) => v.len() * 4,
        };
        self.positions.len() * 12 + self.normals.len() * 12 + self.colors.len() * 16 + index_bytes
    }
}

/// Accumulates quads and finalizes into [`MeshData`], narrowing indices
/// to 16 bits when the vertex count allows.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    colors: Vec<[f32; 4]>,
    indices: Vec<u32>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Appends one quad as four vertices and two CCW triangles
    /// (0,1,2) + (0,2,3) relative to the quad's base index.
    pub fn add_quad(&mut self, corners: [[f32; 3]; 4], normal: [f32; 3], color: [f32; 4]) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&corners);
        for _ in 0..4 {
            self.normals.push(normal);
            self.colors.push(color);
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    pub fn finish(self) -> MeshData {
        let indices = if self.positions.len() <= U16_VERTEX_LIMIT {
            IndexStream::U16(self.indices.into_iter().map(|i| i as u16).collect())
        } else {
            IndexStream::U32(self.indices)
        };
        MeshData {
            positions: self.positions,
            normals: self.normals,
            colors: self.colors,
            indices,
        }
    }
}
