// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::DMat4;

use crate::{
    geometry::{
        globe,
        BoundingBox,
    },
    scene::{
        GeoAnchor,
        PlacedScene,
        Scene,
    },
};

/// One placed instance waiting to be batched
#[derive(Clone, Debug)]
pub struct TileInfo {
    pub name:      String,
    pub anchor:    GeoAnchor,
    /// Scene-local to ECEF
    pub placement: DMat4,
    pub local_box: BoundingBox,
    /// Longitude, latitude and altitude extents
    pub world_box: BoundingBox,
    pub root_box:  BoundingBox,
    /// Scene-local to the shared root frame
    pub to_root:   DMat4,
    pub scene:     Scene,
}

impl TileInfo {
    /// `None` when the scene has no geometry
    pub fn new(placed: PlacedScene) -> Option<Self> {
        let local_box = placed.scene.bounding_box();
        if local_box.is_empty() {
            return None;
        }

        Some(Self {
            name: placed.scene.name.clone(),
            anchor: placed.anchor,
            placement: placed.placement,
            world_box: globe::local_to_geographic_box(&local_box, &placed.placement),
            local_box,
            root_box: BoundingBox::new(),
            to_root: DMat4::IDENTITY,
            scene: placed.scene,
        })
    }

    /// Expresses the instance in the frame whose inverse is given
    pub fn attach_to_root(
        &mut self,
        root_inverse: &DMat4,
    ) {
        self.to_root = *root_inverse * self.placement;
        self.root_box = self.local_box.transformed(&self.to_root);
    }

    /// Geometric error proxy of the instance
    #[inline]
    pub fn diagonal(&self) -> f64 {
        self.local_box.longest_distance()
    }
}
