// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Per (leaf, LOD) content generation: simplify, deduplicate materials and
//! merge geometry into attribute buffers.

mod buffer;

use std::collections::{
    BTreeMap,
    HashMap,
};

use glam::DMat4;

pub use self::buffer::{
    AttributeKind,
    BatchedSet,
    Buffer,
    BufferDataSet,
    ElementType,
};
use crate::{
    config::TilerOptions,
    error::{
        Result,
        TilerError,
        TopologyError,
    },
    geometry::{
        AxisPlane,
        BoundingBox,
        Facing,
        PlaneType,
    },
    halfedge::{
        HalfEdgeMesh,
        ReductionParams,
    },
    lod::LevelOfDetail,
    scene::{
        Material,
        Mesh,
        Primitive,
    },
    tiler::{
        TileInfo,
        TileNode,
        TileTree,
    },
};

/// One (node, LOD) pairing ready to be written
#[derive(Clone, Debug)]
pub struct ContentInfo {
    pub name:         String,
    pub code:         String,
    pub lod:          LevelOfDetail,
    /// Names of the contributing instances
    pub instances:    Vec<String>,
    pub bounding_box: BoundingBox,
    pub batched:      BatchedSet,
}

impl ContentInfo {
    pub fn uri(&self) -> String {
        format!("{}.bin", self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.batched.is_empty()
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.bounding_box = BoundingBox::new();
        self.batched = BatchedSet::default();
    }

    pub fn release_textures(&mut self) {
        self.batched.materials.iter_mut().for_each(Material::release_textures);
    }
}

/// A content together with the instances that had to be left out of it
#[derive(Debug)]
pub struct Batched {
    pub content: ContentInfo,
    pub skipped: Vec<(String, TopologyError)>,
}

/// Deduplicated material list of one content
#[derive(Default)]
struct MaterialTable {
    materials: Vec<Material>,
    /// (instance, source material) to table slot
    resolved:  HashMap<(usize, usize), usize>,
}

impl MaterialTable {
    fn resolve(
        &mut self,
        instance: usize,
        source: usize,
        material: &Material,
        texture_scale: f32,
    ) -> usize {
        if let Some(&slot) = self.resolved.get(&(instance, source)) {
            return slot;
        }

        let slot = self
            .materials
            .iter()
            .position(|known| known.is_equal_material(material))
            .unwrap_or_else(|| {
                let mut copy = material.clone();
                copy.id = self.materials.len();
                for texture in &mut copy.textures {
                    texture.scale = texture_scale;
                }
                self.materials.push(copy);
                self.materials.len() - 1
            });
        self.resolved.insert((instance, source), slot);
        slot
    }
}

/// Half-spaces that keep an instance inside its cell, only for the sides it
/// crosses
fn cell_planes(
    cell: &BoundingBox,
    bounds: &BoundingBox,
) -> Vec<AxisPlane> {
    let (lo, hi) = (cell.min(), cell.max());
    let mut planes = Vec::new();
    if bounds.min().x < lo.x {
        planes.push(AxisPlane::new(PlaneType::Yz, lo.x, Facing::Positive));
    }
    if bounds.max().x > hi.x {
        planes.push(AxisPlane::new(PlaneType::Yz, hi.x, Facing::Negative));
    }
    if bounds.min().y < lo.y {
        planes.push(AxisPlane::new(PlaneType::Xz, lo.y, Facing::Positive));
    }
    if bounds.max().y > hi.y {
        planes.push(AxisPlane::new(PlaneType::Xz, hi.y, Facing::Negative));
    }
    planes
}

pub struct Batcher<'a> {
    options: &'a TilerOptions,
}

impl<'a> Batcher<'a> {
    pub const fn new(options: &'a TilerOptions) -> Self {
        Self {
            options,
        }
    }

    /// Builds the content of `node` at `lod`. An instance whose meshes fail
    /// to simplify is left out; the unit fails only when every instance did.
    #[tracing::instrument(level = "debug", skip_all, fields(node = %tree.nodes[node].code, lod = lod.level))]
    pub fn batch(
        &self,
        tree: &TileTree,
        node: usize,
        lod: &LevelOfDetail,
    ) -> Result<Batched> {
        let tile = &tree.nodes[node];
        let name = format!("{}_L{}", tile.code, lod.level);
        let params = ReductionParams::for_lod(lod, &self.options.simplify);

        let mut materials = MaterialTable::default();
        let mut groups: BTreeMap<usize, Vec<Primitive>> = BTreeMap::new();
        let mut bounding_box = BoundingBox::new();
        let mut instances = Vec::with_capacity(tile.instances.len());
        let mut skipped = Vec::new();
        let fallback = Material::new(0, "default");

        for &instance in &tile.instances {
            let info = &tree.infos[instance];

            let mut meshes: Vec<(&Mesh, DMat4)> = Vec::new();
            info.scene
                .root
                .for_each_mesh(&info.to_root, &mut |mesh, transform| meshes.push((mesh, *transform)));

            let simplified: std::result::Result<Vec<Vec<Primitive>>, TopologyError> = meshes
                .into_iter()
                .map(|(mesh, transform)| self.simplify(mesh, &transform, tile, info, lod, &params))
                .collect();
            let primitives = match simplified {
                Ok(primitives) => primitives,
                Err(err) => {
                    tracing::debug!(instance = %info.name, %err, "instance left out");
                    skipped.push((info.name.clone(), err));
                    continue;
                },
            };
            instances.push(info.name.clone());

            for mut primitive in primitives.into_iter().flatten() {
                bounding_box.grow_to_include(&primitive.bounding_box());
                let material = info.scene.materials.get(primitive.material).unwrap_or(&fallback);
                primitive.material = materials.resolve(instance, primitive.material, material, lod.texture_scale);
                groups.entry(primitive.material).or_default().push(primitive);
            }
        }

        if instances.is_empty() && !skipped.is_empty() {
            let (_, source) = skipped.swap_remove(0);
            return Err(TilerError::Content {
                name,
                source,
            });
        }

        let data_sets: Vec<_> = groups
            .into_iter()
            .map(|(material, primitives)| BufferDataSet::merge(material, &primitives))
            .collect();
        tracing::debug!(
            materials = materials.materials.len(),
            data_sets = data_sets.len(),
            instances = instances.len(),
            skipped = skipped.len(),
            "content batched"
        );

        Ok(Batched {
            content: ContentInfo {
                name,
                code: tile.code.clone(),
                lod: *lod,
                instances,
                bounding_box,
                batched: BatchedSet {
                    materials: materials.materials,
                    data_sets,
                },
            },
            skipped,
        })
    }

    /// build, move to the root frame, clip, reduce, drop sandclocks, export
    fn simplify(
        &self,
        mesh: &Mesh,
        transform: &DMat4,
        tile: &TileNode,
        info: &TileInfo,
        lod: &LevelOfDetail,
        params: &ReductionParams,
    ) -> std::result::Result<Vec<Primitive>, TopologyError> {
        let mut halfedge = HalfEdgeMesh::build(&mesh.primitives)?;
        halfedge.transform_points(transform);

        if self.options.clip_to_cell {
            for plane in cell_planes(&tile.cell, &info.root_box) {
                halfedge.cut_by_plane(&plane, self.options.cut_tolerance)?;
            }
        }
        if lod.level > 0 {
            halfedge.do_triangles_reduction(params);
        }
        halfedge.check_sand_clock_faces();

        let primitives = halfedge.to_primitives();
        halfedge.delete_objects();
        Ok(primitives)
    }
}
