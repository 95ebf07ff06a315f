// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

mod collapse;
mod cut;
mod primitive;

use glam::DMat4;
use tracing::instrument;

pub use self::{
    collapse::{
        ReductionParams,
        ReductionReport,
    },
    cut::CutReport,
    primitive::{
        Face,
        FaceKey,
        HalfEdge,
        HalfEdgeKey,
        HalfEdgePrimitive,
        HeVertex,
        VertexKey,
    },
};
use crate::{
    error::TopologyError,
    geometry::{
        AxisPlane,
        BoundingBox,
        PlaneSide,
    },
    scene::Primitive,
};

/// Half-edge view of a mesh, one topology per primitive
#[derive(Clone, Debug, Default)]
pub struct HalfEdgeMesh {
    primitives:   Vec<HalfEdgePrimitive>,
    bounding_box: Option<BoundingBox>,
}

impl HalfEdgeMesh {
    pub fn build<'a>(primitives: impl IntoIterator<Item = &'a Primitive>) -> Result<Self, TopologyError> {
        let primitives = primitives
            .into_iter()
            .map(HalfEdgePrimitive::build)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            primitives,
            bounding_box: None,
        })
    }

    #[inline]
    pub fn primitives(&self) -> &[HalfEdgePrimitive] {
        &self.primitives
    }

    pub fn face_count(&self) -> usize {
        self.primitives.iter().map(HalfEdgePrimitive::face_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.face_count() == 0
    }

    #[instrument(level = "trace", skip_all, fields(primitives = self.primitives.len()))]
    pub fn do_triangles_reduction(
        &mut self,
        params: &ReductionParams,
    ) -> ReductionReport {
        let report = self
            .primitives
            .iter_mut()
            .map(|primitive| primitive.do_triangles_reduction(params))
            .fold(ReductionReport::default(), |mut total, report| {
                total.merge(&report);
                total
            });
        tracing::trace!(
            before = report.faces_before,
            after = report.faces_after,
            collapses = report.collapses,
            sandclocks = report.sandclocks,
            "reduced"
        );
        report
    }

    pub fn check_sand_clock_faces(&mut self) -> usize {
        self.primitives
            .iter_mut()
            .map(HalfEdgePrimitive::check_sand_clock_faces)
            .sum()
    }

    pub fn transform_points(
        &mut self,
        matrix: &DMat4,
    ) {
        for primitive in &mut self.primitives {
            primitive.transform_points(matrix);
        }
        self.bounding_box = None;
    }

    /// Cuts every primitive. Either all primitives are replaced by their
    /// clipped versions or, on the first failure, none is.
    pub fn cut_by_plane(
        &mut self,
        plane: &AxisPlane,
        tolerance: f64,
    ) -> Result<CutReport, TopologyError> {
        let mut report = CutReport::default();
        let clipped = self
            .primitives
            .iter()
            .map(|primitive| {
                let (clipped, part) = primitive.clipped(plane, tolerance)?;
                report.faces_before += part.faces_before;
                report.faces_after += part.faces_after;
                report.split_edges += part.split_edges;
                report.discarded += part.discarded;
                Ok(clipped)
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;

        self.primitives = clipped;
        self.bounding_box = None;
        Ok(report)
    }

    pub fn classify_faces_id_by_plane(
        &mut self,
        plane: &AxisPlane,
        tolerance: f64,
    ) {
        for primitive in &mut self.primitives {
            primitive.classify_faces_id_by_plane(plane, tolerance);
        }
    }

    /// Faces tagged with `side` by the last classification, per primitive
    pub fn extract_side(
        &self,
        side: PlaneSide,
    ) -> Vec<Primitive> {
        self.primitives
            .iter()
            .map(|primitive| primitive.extract_side(side))
            .filter(|primitive| primitive.triangle_count() > 0)
            .collect()
    }

    /// Grows `bounds` (or a fresh box) by every live vertex
    pub fn calculate_bounding_box(
        &self,
        bounds: Option<BoundingBox>,
    ) -> BoundingBox {
        let mut bounds = bounds.unwrap_or_default();
        for primitive in &self.primitives {
            primitive.calculate_bounding_box(&mut bounds);
        }
        bounds
    }

    pub fn bounding_box(&mut self) -> BoundingBox {
        if let Some(bounds) = self.bounding_box {
            return bounds;
        }
        let bounds = self.calculate_bounding_box(None);
        self.bounding_box = Some(bounds);
        bounds
    }

    pub fn delete_objects(&mut self) {
        for primitive in &mut self.primitives {
            primitive.delete_objects();
        }
        self.primitives.clear();
        self.bounding_box = None;
    }

    /// Non-empty primitives, compacted
    pub fn to_primitives(&self) -> Vec<Primitive> {
        self.primitives
            .iter()
            .filter(|primitive| primitive.face_count() > 0)
            .map(HalfEdgePrimitive::to_primitive)
            .collect()
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        self.primitives.iter().try_for_each(HalfEdgePrimitive::validate)
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use super::{
        primitive::tests::{
            cube,
            grid,
        },
        *,
    };
    use crate::geometry::{
        Facing,
        PlaneType,
    };

    #[test]
    fn cut_applies_to_every_primitive() {
        let mut far = cube();
        for position in &mut far.positions {
            position.x += 10.0;
        }
        let mut mesh = HalfEdgeMesh::build(&[grid(4), far]).expect("valid primitives");
        let plane = AxisPlane::new(PlaneType::Yz, 2.0, Facing::Positive);
        let report = mesh.cut_by_plane(&plane, 1e-9).expect("cut succeeds");

        assert_eq!(report.faces_before, 32 + 12);
        assert_eq!(report.discarded, 16);
        assert_eq!(report.split_edges, 0);
        assert_eq!(mesh.primitives()[0].face_count(), 16);
        assert_eq!(mesh.primitives()[1].face_count(), 12);
        assert_eq!(mesh.primitives()[1].locked_vertex_count(), 0);
        assert_eq!(mesh.bounding_box().min().x, 2.0);
        mesh.validate().expect("manifold");

        mesh.classify_faces_id_by_plane(&plane, 1e-9);
        assert_eq!(mesh.extract_side(PlaneSide::Front).len(), 2);
        assert!(mesh.extract_side(PlaneSide::Behind).is_empty());
    }

    #[test]
    fn bounding_box_is_cached_until_moved() {
        let mut mesh = HalfEdgeMesh::build(&[cube()]).expect("cube");
        assert_eq!(mesh.bounding_box().max(), DVec3::ONE);

        mesh.transform_points(&DMat4::from_scale(DVec3::splat(2.0)));
        assert_eq!(mesh.bounding_box().max(), DVec3::splat(2.0));

        let grown = mesh.calculate_bounding_box(Some(BoundingBox::from_points([DVec3::splat(-1.0)])));
        assert_eq!(grown.min(), DVec3::splat(-1.0));
        assert_eq!(grown.max(), DVec3::splat(2.0));
    }

    #[test]
    fn reduction_sums_over_primitives() {
        let mut mesh = HalfEdgeMesh::build(&[grid(4), grid(4)]).expect("grids");
        let report = mesh.do_triangles_reduction(&ReductionParams {
            max_edge_length:      3.0,
            max_normal_deviation: 0.1,
            angle_weight:         1.0,
            target_ratio:         0.0,
            max_passes:           8,
        });
        assert_eq!(report.faces_before, 64);
        assert_eq!(report.faces_after, mesh.face_count());
        assert!(report.faces_after < 64);
        mesh.validate().expect("manifold");
        assert_eq!(mesh.to_primitives().len(), 2);

        mesh.delete_objects();
        assert!(mesh.is_empty());
        assert!(mesh.to_primitives().is_empty());
    }
}
