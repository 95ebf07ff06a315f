// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

pub mod globe;
mod plane;

use glam::{
    DMat4,
    DVec3,
};
pub use plane::{
    AxisPlane,
    Facing,
    PlaneSide,
    PlaneType,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    max: DVec3,
    min: DVec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingBox {
    pub const fn new() -> Self {
        Self {
            max: DVec3::splat(f64::MIN),
            min: DVec3::splat(f64::MAX),
        }
    }

    pub fn from_min_max(
        min: DVec3,
        max: DVec3,
    ) -> Self {
        Self {
            max: max.max(min),
            min: min.min(max),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Self {
        let mut bounds = Self::new();
        for point in points {
            bounds.grow_to_include_point(point);
        }
        bounds
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    #[inline]
    pub const fn min(&self) -> DVec3 {
        self.min
    }

    #[inline]
    pub const fn max(&self) -> DVec3 {
        self.max
    }

    #[inline]
    pub fn grow_to_include_point(
        &mut self,
        point: DVec3,
    ) {
        self.max = self.max.max(point);
        self.min = self.min.min(point);
    }

    pub fn grow_to_include(
        &mut self,
        other: &Self,
    ) {
        if other.is_empty() {
            return;
        }
        self.grow_to_include_point(other.min);
        self.grow_to_include_point(other.max);
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        if self.is_empty() {
            DVec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Length of the space diagonal, used as the geometric error proxy
    pub fn longest_distance(&self) -> f64 {
        self.size().length()
    }

    pub fn contains_point(
        &self,
        point: DVec3,
    ) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Overlap with a positive area on the XY plane
    pub fn overlaps_xy(
        &self,
        other: &Self,
    ) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// Restricts the XY extent to `cell`, keeping Z. Disjoint boxes give an
    /// empty box.
    pub fn clamped_xy(
        &self,
        cell: &Self,
    ) -> Self {
        if self.is_empty() || cell.is_empty() {
            return Self::new();
        }
        let min = DVec3::new(self.min.x.max(cell.min.x), self.min.y.max(cell.min.y), self.min.z);
        let max = DVec3::new(self.max.x.min(cell.max.x), self.max.y.min(cell.max.y), self.max.z);
        if min.x > max.x || min.y > max.y {
            Self::new()
        } else {
            Self {
                max,
                min,
            }
        }
    }

    pub fn corners(&self) -> [DVec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Axis-aligned box around the transformed corners
    pub fn transformed(
        &self,
        matrix: &DMat4,
    ) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self::from_points(
            self.corners()
                .into_iter()
                .map(|corner| matrix.transform_point3(corner)),
        )
    }

    /// Splits the XY footprint into quadrants, numbered x-major:
    /// 0 = (-x,-y), 1 = (+x,-y), 2 = (-x,+y), 3 = (+x,+y)
    pub fn quadrants_xy(&self) -> [Self; 4] {
        let center = self.center();
        let (lo, hi) = (self.min, self.max);
        [
            Self::from_min_max(lo, DVec3::new(center.x, center.y, hi.z)),
            Self::from_min_max(DVec3::new(center.x, lo.y, lo.z), DVec3::new(hi.x, center.y, hi.z)),
            Self::from_min_max(DVec3::new(lo.x, center.y, lo.z), DVec3::new(center.x, hi.y, hi.z)),
            Self::from_min_max(DVec3::new(center.x, center.y, lo.z), hi),
        ]
    }
}
