// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::io::{
    self,
    Write,
};

use crate::{
    geometry::BoundingBox,
    scene::{
        Material,
        Primitive,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeKind {
    Position = 0,
    Normal   = 1,
    TexCoord = 2,
    Index    = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ElementType {
    F32 = 0,
    U32 = 1,
}

/// One attribute stream, payload stored little-endian
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buffer {
    pub kind:         AttributeKind,
    pub element_type: ElementType,
    pub components:   u8,
    /// Number of elements, each `components` values wide
    pub count:        u32,
    pub payload:      Vec<u8>,
}

fn le_bytes(words: impl Iterator<Item = u32>) -> Vec<u8> {
    let words: Vec<u32> = words.map(u32::to_le).collect();
    bytemuck::must_cast_slice::<u32, u8>(&words).to_vec()
}

impl Buffer {
    pub fn from_f32(
        kind: AttributeKind,
        components: u8,
        values: &[f32],
    ) -> Self {
        Self {
            kind,
            element_type: ElementType::F32,
            components,
            count: u32::try_from(values.len() / usize::from(components.max(1))).unwrap_or(u32::MAX),
            payload: le_bytes(values.iter().map(|v| v.to_bits())),
        }
    }

    pub fn from_u32(
        kind: AttributeKind,
        components: u8,
        values: &[u32],
    ) -> Self {
        Self {
            kind,
            element_type: ElementType::U32,
            components,
            count: u32::try_from(values.len() / usize::from(components.max(1))).unwrap_or(u32::MAX),
            payload: le_bytes(values.iter().copied()),
        }
    }

    fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.payload
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.words().map(f32::from_bits).collect()
    }

    pub fn to_u32(&self) -> Vec<u32> {
        self.words().collect()
    }

    /// components u8, element type u32, kind u32, count u32, payload length
    /// u32, payload
    pub fn write_to(
        &self,
        writer: &mut impl Write,
    ) -> io::Result<()> {
        let length = u32::try_from(self.payload.len()).map_err(|_| io::Error::other("buffer payload too large"))?;
        writer.write_all(&[self.components])?;
        writer.write_all(&(self.element_type as u32).to_le_bytes())?;
        writer.write_all(&(self.kind as u32).to_le_bytes())?;
        writer.write_all(&self.count.to_le_bytes())?;
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(&self.payload)
    }
}

/// Merged geometry of every primitive sharing one material
#[derive(Clone, Debug)]
pub struct BufferDataSet {
    pub material:       usize,
    pub buffers:        Vec<Buffer>,
    pub bounding_box:   BoundingBox,
    pub vertex_count:   usize,
    pub triangle_count: usize,
}

impl BufferDataSet {
    /// Concatenates the primitives. Normals and UVs are kept only when every
    /// primitive has them.
    #[allow(clippy::cast_possible_truncation)]
    pub fn merge(
        material: usize,
        primitives: &[Primitive],
    ) -> Self {
        let with_normals = primitives.iter().all(|p| p.normals.is_some());
        let with_uvs = primitives.iter().all(|p| p.uvs.is_some());

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        let mut indices = Vec::new();
        let mut bounding_box = BoundingBox::new();

        for primitive in primitives {
            let base = u32::try_from(positions.len() / 3).unwrap_or(u32::MAX);
            for position in &primitive.positions {
                bounding_box.grow_to_include_point(*position);
                positions.extend(position.to_array().map(|v| v as f32));
            }
            if let Some(values) = primitive.normals.as_ref().filter(|_| with_normals) {
                normals.extend(values.iter().flat_map(|n| n.to_array().map(|v| v as f32)));
            }
            if let Some(values) = primitive.uvs.as_ref().filter(|_| with_uvs) {
                uvs.extend(values.iter().flat_map(|uv| uv.to_array().map(|v| v as f32)));
            }
            indices.extend(primitive.indices.iter().map(|i| i + base));
        }

        let mut buffers = vec![Buffer::from_f32(AttributeKind::Position, 3, &positions)];
        if with_normals && !primitives.is_empty() {
            buffers.push(Buffer::from_f32(AttributeKind::Normal, 3, &normals));
        }
        if with_uvs && !primitives.is_empty() {
            buffers.push(Buffer::from_f32(AttributeKind::TexCoord, 2, &uvs));
        }
        buffers.push(Buffer::from_u32(AttributeKind::Index, 1, &indices));

        Self {
            material,
            buffers,
            bounding_box,
            vertex_count: positions.len() / 3,
            triangle_count: indices.len() / 3,
        }
    }

    pub fn buffer(
        &self,
        kind: AttributeKind,
    ) -> Option<&Buffer> {
        self.buffers.iter().find(|buffer| buffer.kind == kind)
    }
}

/// Everything one content file holds
#[derive(Clone, Debug, Default)]
pub struct BatchedSet {
    pub materials: Vec<Material>,
    pub data_sets: Vec<BufferDataSet>,
}

impl BatchedSet {
    pub fn triangle_count(&self) -> usize {
        self.data_sets.iter().map(|set| set.triangle_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.triangle_count() == 0
    }

    /// Data set count, then per data set its material, buffer count and
    /// buffers. A material table follows: count, then per material its id,
    /// RGBA diffuse as f32, texture count and per texture width, height and
    /// LOD scale. Everything little-endian.
    pub fn write_to(
        &self,
        writer: &mut impl Write,
    ) -> io::Result<()> {
        let count = |n: usize| u32::try_from(n).map_err(|_| io::Error::other("too many entries"));
        writer.write_all(&count(self.data_sets.len())?.to_le_bytes())?;
        for set in &self.data_sets {
            writer.write_all(&count(set.material)?.to_le_bytes())?;
            writer.write_all(&count(set.buffers.len())?.to_le_bytes())?;
            for buffer in &set.buffers {
                buffer.write_to(writer)?;
            }
        }

        writer.write_all(&count(self.materials.len())?.to_le_bytes())?;
        for material in &self.materials {
            writer.write_all(&count(material.id)?.to_le_bytes())?;
            let diffuse = material.diffuse;
            for channel in [diffuse.r, diffuse.g, diffuse.b, diffuse.a] {
                writer.write_all(&channel.to_le_bytes())?;
            }
            writer.write_all(&count(material.textures.len())?.to_le_bytes())?;
            for texture in &material.textures {
                writer.write_all(&texture.width.to_le_bytes())?;
                writer.write_all(&texture.height.to_le_bytes())?;
                writer.write_all(&texture.scale.to_le_bytes())?;
            }
        }
        Ok(())
    }
}
