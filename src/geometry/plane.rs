// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::DVec3;

/// Axis-aligned plane orientation, named after the plane it spans
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaneType {
    /// x = offset
    Yz,
    /// y = offset
    Xz,
    /// z = offset
    Xy,
}

impl PlaneType {
    #[inline]
    pub const fn axis(self) -> usize {
        match self {
            Self::Yz => 0,
            Self::Xz => 1,
            Self::Xy => 2,
        }
    }
}

/// Which half-space counts as "front"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Facing {
    Positive,
    Negative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaneSide {
    Front,
    Behind,
    On,
    /// Faces only: vertices on both sides
    Straddling,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisPlane {
    pub kind:   PlaneType,
    pub offset: f64,
    pub facing: Facing,
}

impl AxisPlane {
    pub const fn new(
        kind: PlaneType,
        offset: f64,
        facing: Facing,
    ) -> Self {
        Self {
            kind,
            offset,
            facing,
        }
    }

    /// Positive in front of the plane
    #[inline]
    pub fn signed_distance(
        &self,
        point: DVec3,
    ) -> f64 {
        let d = point[self.kind.axis()] - self.offset;
        match self.facing {
            Facing::Positive => d,
            Facing::Negative => -d,
        }
    }

    pub fn classify(
        &self,
        point: DVec3,
        tolerance: f64,
    ) -> PlaneSide {
        let d = self.signed_distance(point);
        if d.abs() <= tolerance {
            PlaneSide::On
        } else if d > 0.0 {
            PlaneSide::Front
        } else {
            PlaneSide::Behind
        }
    }

    /// Parameter along `a -> b` where the segment meets the plane
    pub fn intersection_param(
        &self,
        a: DVec3,
        b: DVec3,
    ) -> f64 {
        let da = self.signed_distance(a);
        let db = self.signed_distance(b);
        let denom = da - db;
        if denom.abs() <= f64::EPSILON {
            0.5
        } else {
            (da / denom).clamp(0.0, 1.0)
        }
    }

    /// Moves the point's plane coordinate exactly onto the plane
    #[inline]
    pub fn snap(
        &self,
        mut point: DVec3,
    ) -> DVec3 {
        point[self.kind.axis()] = self.offset;
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_respects_facing_and_tolerance() {
        let plane = AxisPlane::new(PlaneType::Yz, 1.0, Facing::Negative);
        assert_eq!(plane.classify(DVec3::new(0.0, 5.0, 5.0), 0.01), PlaneSide::Front);
        assert_eq!(plane.classify(DVec3::new(2.0, 0.0, 0.0), 0.01), PlaneSide::Behind);
        assert_eq!(plane.classify(DVec3::new(1.005, 0.0, 0.0), 0.01), PlaneSide::On);
    }

    #[test]
    fn intersection_lands_on_plane() {
        let plane = AxisPlane::new(PlaneType::Xy, 2.0, Facing::Positive);
        let a = DVec3::new(0.0, 0.0, 0.0);
        let b = DVec3::new(0.0, 0.0, 8.0);
        let t = plane.intersection_param(a, b);
        assert!((t - 0.25).abs() < 1e-12);
        assert_eq!(plane.snap(a.lerp(b, t)).z, 2.0);
    }
}
