// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::{
    f64::consts::FRAC_PI_2,
    path::{
        Path,
        PathBuf,
    },
};

use glam::{
    DMat4,
    DVec2,
    DVec3,
};
use gltf::{
    buffer,
    image::{
        self,
        Format,
    },
    mesh::Mode,
    Document,
};
use rgb::RGBA;

use crate::{
    error::ConvertError,
    scene::{
        GeoAnchor,
        Material,
        Mesh,
        Node,
        PixelFormat,
        PlacedScene,
        Primitive,
        Scene,
        Texture,
    },
};

/// Loads a glTF/GLB model and places it at a fixed anchor
#[derive(Clone, Debug)]
pub struct GltfConverter {
    path:   PathBuf,
    anchor: GeoAnchor,
}

#[inline]
fn to_dvec3(v: [f32; 3]) -> DVec3 {
    DVec3::from_array(v.map(f64::from))
}

const fn pixel_format(format: Format) -> Option<PixelFormat> {
    match format {
        Format::R8 => Some(PixelFormat::Gray8),
        Format::R8G8 => Some(PixelFormat::GrayAlpha8),
        Format::R8G8B8 => Some(PixelFormat::Rgb8),
        Format::R8G8B8A8 => Some(PixelFormat::Rgba8),
        _ => None,
    }
}

impl GltfConverter {
    pub const fn new(
        path: PathBuf,
        anchor: GeoAnchor,
    ) -> Self {
        Self {
            path,
            anchor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn convert(&self) -> Result<PlacedScene, ConvertError> {
        let (document, buffers, images) = gltf::import(&self.path)?;
        let name = self
            .path
            .file_stem()
            .map_or_else(|| "model".into(), |stem| stem.to_string_lossy().into_owned());

        let mut scene = scene_from_document(&name, &document, &buffers, &images);
        scene.source = Some(self.path.clone());
        Ok(PlacedScene::new(scene, self.anchor))
    }
}

/// Builds the canonical scene of the default (or first) glTF scene.
/// The model is rotated from y-up to z-up under the root node.
pub fn scene_from_document(
    name: &str,
    document: &Document,
    buffers: &[buffer::Data],
    images: &[image::Data],
) -> Scene {
    let mut scene = Scene::new(name);
    scene.root.transform = DMat4::from_rotation_x(FRAC_PI_2);

    // Slot 0 stays the default material for primitives without one
    for material in document.materials() {
        let pbr = material.pbr_metallic_roughness();
        let [r, g, b, a] = pbr.base_color_factor();
        let mut converted = Material::new(
            scene.materials.len(),
            material.name().unwrap_or("material"),
        );
        converted.diffuse = RGBA::new(r, g, b, a);

        if let Some(info) = pbr.base_color_texture() {
            let source = info.texture().source();
            match images
                .get(source.index())
                .and_then(|data| Some((data, pixel_format(data.format)?)))
            {
                Some((data, format)) => converted.textures.push(Texture::from_pixels(
                    source.name().unwrap_or("texture"),
                    data.width,
                    data.height,
                    format,
                    data.pixels.clone(),
                )),
                None => tracing::warn!(image = source.index(), "unsupported texture skipped"),
            }
        }
        scene.materials.push(converted);
    }

    let roots = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .map(|gltf_scene| gltf_scene.nodes().collect::<Vec<_>>())
        .unwrap_or_default();
    for node in roots {
        scene.root.children.push(convert_node(&node, buffers));
    }
    scene
}

fn convert_node(
    node: &gltf::Node,
    buffers: &[buffer::Data],
) -> Node {
    let mut converted = Node::new(node.name().unwrap_or_default());
    converted.transform = DMat4::from_cols_array_2d(&node.transform().matrix().map(|col| col.map(f64::from)));

    if let Some(mesh) = node.mesh() {
        let primitives = mesh
            .primitives()
            .filter_map(|prim| convert_primitive(&prim, buffers))
            .collect();
        converted.meshes.push(Mesh {
            primitives,
        });
    }
    for child in node.children() {
        converted.children.push(convert_node(&child, buffers));
    }
    converted
}

fn convert_primitive(
    prim: &gltf::Primitive,
    buffers: &[buffer::Data],
) -> Option<Primitive> {
    if prim.mode() != Mode::Triangles {
        tracing::debug!(mode = ?prim.mode(), "non-triangle primitive skipped");
        return None;
    }

    let reader = prim.reader(|buf| buffers.get(buf.index()).map(|d| &*d.0));
    let Some(positions) = reader.read_positions() else {
        tracing::debug!("no positions attached to triangle mesh");
        return None;
    };
    let positions: Vec<DVec3> = positions.map(to_dvec3).collect();
    let normals = reader
        .read_normals()
        .map(|normals| normals.map(to_dvec3).collect());
    let uvs = reader.read_tex_coords(0).map(|uvs| {
        uvs.into_f32()
            .map(|[u, v]| DVec2::new(f64::from(u), f64::from(v)))
            .collect()
    });
    let indices = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..u32::try_from(positions.len()).ok()?).collect(),
    };

    Some(Primitive {
        positions,
        normals,
        uvs,
        indices,
        material: prim.material().index().map_or(0, |index| index + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One triangle in the y-up XY plane, buffer embedded as a data URI
    const TRIANGLE: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "tri", "mesh": 0, "translation": [0.0, 0.0, 2.0] }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }] }],
        "materials": [{ "name": "red", "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.0, 0.0, 1.0] } }],
        "accessors": [{
            "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
            "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
        }],
        "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
        "buffers": [{
            "byteLength": 36,
            "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA"
        }]
    }"#;

    #[test]
    fn triangle_is_rotated_to_z_up() {
        let (document, buffers, images) = gltf::import_slice(TRIANGLE.as_bytes()).expect("valid glTF");
        let scene = scene_from_document("tri", &document, &buffers, &images);

        assert_eq!(scene.primitive_count(), 1);
        assert_eq!(scene.materials.len(), 2);
        assert_eq!(scene.materials[1].name, "red");
        assert_eq!(scene.materials[1].diffuse, RGBA::new(1.0, 0.0, 0.0, 1.0));

        let primitive = &scene.root.children[0].meshes[0].primitives[0];
        assert_eq!(primitive.material, 1);
        assert_eq!(primitive.indices, vec![0, 1, 2]);

        // glTF +y becomes +z, glTF +z (the node offset) becomes -y
        let bounds = scene.bounding_box();
        assert!((bounds.max().z - 1.0).abs() < 1e-9);
        assert!((bounds.min().y + 2.0).abs() < 1e-9);
        assert!((bounds.max().x - 1.0).abs() < 1e-9);
    }
}
