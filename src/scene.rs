// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Canonical scene graph handed over by the converters.

use std::path::PathBuf;

use glam::{
    DMat4,
    DVec2,
    DVec3,
};
use rgb::RGBA;

use crate::geometry::{
    globe,
    BoundingBox,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    GrayAlpha8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub const fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::GrayAlpha8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Texture {
    pub name:   String,
    pub path:   Option<PathBuf>,
    pub width:  u32,
    pub height: u32,
    pub format: Option<PixelFormat>,
    /// Decoded pixels while resident
    pub pixels: Option<Vec<u8>>,
    /// Downsample factor requested by the LOD this copy belongs to
    pub scale:  f32,
}

impl Default for Texture {
    fn default() -> Self {
        Self {
            name:   String::new(),
            path:   None,
            width:  0,
            height: 0,
            format: None,
            pixels: None,
            scale:  1.0,
        }
    }
}

impl Texture {
    pub fn from_pixels(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            path: None,
            width,
            height,
            format: Some(format),
            pixels: Some(pixels),
            scale: 1.0,
        }
    }

    #[inline]
    pub const fn is_resident(&self) -> bool {
        self.pixels.is_some()
    }

    /// Drops the pixel buffer, keeping the description
    pub fn release(&mut self) {
        self.pixels = None;
    }

    /// Bit-exact comparison: dimensions, format and pixel bytes must match.
    /// Two non-resident textures are equal only when they name the same file.
    pub fn is_equal_texture(
        &self,
        other: &Self,
    ) -> bool {
        if self.width != other.width || self.height != other.height || self.format != other.format {
            return false;
        }
        match (&self.pixels, &other.pixels) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.path.is_some() && self.path == other.path,
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub id:       usize,
    pub name:     String,
    pub diffuse:  RGBA<f32>,
    pub textures: Vec<Texture>,
}

impl Material {
    pub fn new(
        id: usize,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            diffuse: RGBA::new(1.0, 1.0, 1.0, 1.0),
            textures: Vec::new(),
        }
    }

    /// Same color and pairwise equal textures
    pub fn is_equal_material(
        &self,
        other: &Self,
    ) -> bool {
        self.diffuse == other.diffuse
            && self.textures.len() == other.textures.len()
            && self
                .textures
                .iter()
                .zip(&other.textures)
                .all(|(a, b)| a.is_equal_texture(b))
    }

    pub fn release_textures(&mut self) {
        self.textures.iter_mut().for_each(Texture::release);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Primitive {
    pub positions: Vec<DVec3>,
    pub normals:   Option<Vec<DVec3>>,
    pub uvs:       Option<Vec<DVec2>>,
    pub indices:   Vec<u32>,
    pub material:  usize,
}

impl Primitive {
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.positions.iter().copied())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name:      String,
    pub transform: DMat4,
    pub children:  Vec<Node>,
    pub meshes:    Vec<Mesh>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:      name.into(),
            transform: DMat4::IDENTITY,
            children:  Vec::new(),
            meshes:    Vec::new(),
        }
    }

    /// Visits every mesh with its accumulated node transform
    pub fn for_each_mesh<'a>(
        &'a self,
        parent: &DMat4,
        visit: &mut impl FnMut(&'a Mesh, &DMat4),
    ) {
        let transform = *parent * self.transform;
        for mesh in &self.meshes {
            visit(mesh, &transform);
        }
        for child in &self.children {
            child.for_each_mesh(&transform, visit);
        }
    }

    pub fn for_each_primitive<'a>(
        &'a self,
        parent: &DMat4,
        visit: &mut impl FnMut(&'a Primitive, &DMat4),
    ) {
        self.for_each_mesh(parent, &mut |mesh, transform| {
            for primitive in &mesh.primitives {
                visit(primitive, transform);
            }
        });
    }
}

#[derive(Clone, Debug)]
pub struct Scene {
    pub name:      String,
    pub root:      Node,
    pub materials: Vec<Material>,
    pub source:    Option<PathBuf>,
}

impl Scene {
    /// A scene with an empty root and one default material, ready to be filled
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: Node::new(name.clone()),
            materials: vec![Material::new(0, "default")],
            source: None,
            name,
        }
    }

    pub fn primitive_count(&self) -> usize {
        let mut count = 0;
        self.root.for_each_primitive(&DMat4::IDENTITY, &mut |_, _| count += 1);
        count
    }

    /// Bounds of all geometry in the scene frame
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bounds = BoundingBox::new();
        self.root.for_each_primitive(&DMat4::IDENTITY, &mut |primitive, transform| {
            for position in &primitive.positions {
                bounds.grow_to_include_point(transform.transform_point3(*position));
            }
        });
        bounds
    }

    /// Drops geometry and materials, keeping the name
    pub fn clear(&mut self) {
        self.root.children.clear();
        self.root.meshes.clear();
        self.materials.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.primitive_count() == 0 && self.materials.is_empty()
    }
}

/// Where a scene sits on the globe
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoAnchor {
    pub longitude: f64,
    pub latitude:  f64,
    pub altitude:  f64,
    /// Heading about the local up axis, degrees
    pub rotation:  f64,
}

impl GeoAnchor {
    pub const fn new(
        longitude: f64,
        latitude: f64,
        altitude: f64,
    ) -> Self {
        Self {
            longitude,
            latitude,
            altitude,
            rotation: 0.0,
        }
    }

    #[inline]
    pub const fn position(&self) -> DVec3 {
        DVec3::new(self.longitude, self.latitude, self.altitude)
    }

    /// Scene-local frame to ECEF
    pub fn placement(&self) -> DMat4 {
        globe::placement_at(self.position(), self.rotation)
    }
}

/// One converted scene together with its anchor and placement
#[derive(Clone, Debug)]
pub struct PlacedScene {
    pub scene:     Scene,
    pub anchor:    GeoAnchor,
    pub placement: DMat4,
}

impl PlacedScene {
    pub fn new(
        scene: Scene,
        anchor: GeoAnchor,
    ) -> Self {
        Self {
            placement: anchor.placement(),
            scene,
            anchor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(pixels: Vec<u8>) -> Texture {
        Texture::from_pixels("t", 2, 1, PixelFormat::Rgb8, pixels)
    }

    #[test]
    fn textures_compare_bit_exact() {
        let a = texture(vec![1, 2, 3, 4, 5, 6]);
        let b = texture(vec![1, 2, 3, 4, 5, 6]);
        let c = texture(vec![1, 2, 3, 4, 5, 7]);
        assert!(a.is_equal_texture(&b));
        assert!(!a.is_equal_texture(&c));

        let mut rgba = a.clone();
        rgba.format = Some(PixelFormat::Rgba8);
        assert!(!a.is_equal_texture(&rgba));
    }

    #[test]
    fn released_texture_no_longer_matches_resident_one() {
        let a = texture(vec![0; 6]);
        let mut b = a.clone();
        b.release();
        assert!(!b.is_resident());
        assert!(!a.is_equal_texture(&b));
    }

    #[test]
    fn scene_bounds_follow_node_transforms() {
        let mut scene = Scene::new("box");
        let mut child = Node::new("child");
        child.transform = DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0));
        child.meshes.push(Mesh {
            primitives: vec![Primitive {
                positions: vec![DVec3::ZERO, DVec3::X, DVec3::Y],
                indices: vec![0, 1, 2],
                ..Primitive::default()
            }],
        });
        scene.root.children.push(child);

        let bounds = scene.bounding_box();
        assert_eq!(bounds.min(), DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(bounds.max(), DVec3::new(11.0, 1.0, 0.0));
        assert_eq!(scene.primitive_count(), 1);
    }
}
