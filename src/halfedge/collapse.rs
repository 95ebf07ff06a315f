// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Edge-collapse decimation.
//!
//! A collapse moves the origin of a half-edge onto its destination, so the
//! surviving positions are always a subset of the input ones. Every rule is
//! checked by [`HalfEdgePrimitive::plan_collapse`] before anything is touched;
//! [`HalfEdgePrimitive::apply_collapse`] then relinks in one go.

use std::collections::HashSet;

use glam::DVec3;

use super::primitive::{
    FaceKey,
    HalfEdgeKey,
    HalfEdgePrimitive,
    VertexKey,
    AREA_EPSILON,
};
use crate::{
    config::SimplifyOptions,
    error::TopologyError,
    lod::LevelOfDetail,
};

/// Two faces folded onto each other have normals this close to opposite
const FOLD_COSINE: f64 = -0.999;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReductionParams {
    /// Collapse budget: no collapse may cost more than this
    pub max_edge_length:      f64,
    /// Radians
    pub max_normal_deviation: f64,
    pub angle_weight:         f64,
    pub target_ratio:         f64,
    pub max_passes:           usize,
}

impl ReductionParams {
    pub fn for_lod(
        lod: &LevelOfDetail,
        options: &SimplifyOptions,
    ) -> Self {
        Self {
            max_edge_length:      lod.geometric_error,
            max_normal_deviation: options.max_normal_deviation_deg.to_radians(),
            angle_weight:         options.angle_weight,
            target_ratio:         options.target_ratio,
            max_passes:           options.max_passes,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReductionReport {
    pub faces_before: usize,
    pub faces_after:  usize,
    pub collapses:    usize,
    pub rejected:     usize,
    pub sandclocks:   usize,
    pub passes:       usize,
}

impl ReductionReport {
    pub fn merge(
        &mut self,
        other: &Self,
    ) {
        self.faces_before += other.faces_before;
        self.faces_after += other.faces_after;
        self.collapses += other.collapses;
        self.rejected += other.rejected;
        self.sandclocks += other.sandclocks;
        self.passes = self.passes.max(other.passes);
    }
}

/// Everything a collapse needs, gathered without mutating the mesh
#[derive(Debug)]
pub(crate) struct CollapsePlan {
    pub cost:  f64,
    from:      VertexKey,
    to:        VertexKey,
    /// Apexes of the removed faces
    apex:      VertexKey,
    apex_twin: Option<VertexKey>,
    faces:     [Option<FaceKey>; 2],
    removed:   Vec<HalfEdgeKey>,
    retarget:  Vec<HalfEdgeKey>,
    /// Outer twins of the removed faces, joined pairwise
    pairs:     [(Option<HalfEdgeKey>, Option<HalfEdgeKey>); 2],
}

fn angle_between(
    a: DVec3,
    b: DVec3,
) -> f64 {
    match (a.try_normalize(), b.try_normalize()) {
        (Some(a), Some(b)) => a.dot(b).clamp(-1.0, 1.0).acos(),
        _ => 0.0,
    }
}

impl HalfEdgePrimitive {
    /// Iterative edge-collapse decimation. The face count never increases
    /// from one collapse to the next.
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn do_triangles_reduction(
        &mut self,
        params: &ReductionParams,
    ) -> ReductionReport {
        let mut report = ReductionReport {
            faces_before: self.face_count(),
            ..ReductionReport::default()
        };
        let target = (report.faces_before as f64 * params.target_ratio).ceil() as usize;

        if params.max_edge_length > 0.0 {
            for _ in 0..params.max_passes {
                if self.face_count() <= target {
                    break;
                }
                report.passes += 1;

                let mut candidates: Vec<(f64, HalfEdgeKey)> = self
                    .half_edges
                    .keys()
                    .filter_map(|edge| {
                        self.plan_collapse(edge, params)
                            .ok()
                            .map(|plan| (plan.cost, edge))
                    })
                    .collect();
                candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

                let mut dirty: HashSet<VertexKey> = HashSet::new();
                let mut collapsed = 0;
                for (_, edge) in candidates {
                    if self.face_count() <= target {
                        break;
                    }
                    let Some(he) = self.half_edges.get(edge) else {
                        continue;
                    };
                    if dirty.contains(&he.origin) || dirty.contains(&self.dest(edge)) {
                        continue;
                    }

                    match self.plan_collapse(edge, params) {
                        Ok(plan) => {
                            let merged = plan.to;
                            dirty.insert(plan.from);
                            self.apply_collapse(plan);
                            collapsed += 1;
                            report.sandclocks += self.remove_sand_clocks_around(merged);

                            let fan = self.outgoing_half_edges(merged);
                            dirty.insert(merged);
                            dirty.extend(self.neighbors(&fan));
                        },
                        Err(err) => {
                            tracing::trace!(?edge, %err, "collapse skipped");
                            report.rejected += 1;
                        },
                    }
                }

                report.collapses += collapsed;
                if collapsed == 0 {
                    break;
                }
            }
        }

        report.faces_after = self.face_count();
        report
    }

    pub(crate) fn plan_collapse(
        &self,
        edge: HalfEdgeKey,
        params: &ReductionParams,
    ) -> Result<CollapsePlan, TopologyError> {
        let he = *self
            .half_edges
            .get(edge)
            .ok_or(TopologyError::Dangling("collapse"))?;
        let from = he.origin;
        let to = self.dest(edge);

        if self.vertices[from].locked || self.vertices[to].locked {
            return Err(TopologyError::Collapse("locked endpoint"));
        }

        let p_from = self.vertices[from].position;
        let p_to = self.vertices[to].position;
        let length = p_from.distance(p_to);
        if length > params.max_edge_length {
            return Err(TopologyError::Collapse("edge over budget"));
        }

        let h1 = he.next;
        let h2 = self.half_edges[h1].next;
        let apex = self.half_edges[h2].origin;
        let (x1, x2) = (self.half_edges[h1].twin, self.half_edges[h2].twin);

        let mut removed = vec![edge, h1, h2];
        let mut pairs = [(x1, x2), (None, None)];
        let mut faces = [Some(he.face), None];
        let mut apex_twin = None;
        if let Some(twin) = he.twin {
            let t1 = self.half_edges[twin].next;
            let t2 = self.half_edges[t1].next;
            let other = self.half_edges[t2].origin;
            if other == apex {
                return Err(TopologyError::Collapse("folded edge"));
            }
            removed.extend([twin, t1, t2]);
            // t1 leaves `from`, t2 enters `to`
            pairs[1] = (self.half_edges[t1].twin, self.half_edges[t2].twin);
            faces[1] = Some(self.half_edges[twin].face);
            apex_twin = Some(other);
        }

        let fan_from = self.outgoing_half_edges(from);
        let fan_to = self.outgoing_half_edges(to);
        let boundary_from = self.boundary_edge_count(&fan_from);
        let boundary_to = self.boundary_edge_count(&fan_to);

        if boundary_from > 0 && he.twin.is_some() {
            return Err(TopologyError::Collapse("boundary vertex on interior edge"));
        }
        if he.twin.is_none() && x1.is_none() && x2.is_none() {
            return Err(TopologyError::Collapse("isolated triangle"));
        }
        let shared = if he.twin.is_none() { 2 } else { 0 };
        if (boundary_from + boundary_to).saturating_sub(shared) > 2 {
            return Err(TopologyError::Collapse("non-manifold vertex"));
        }

        let expected: HashSet<VertexKey> = std::iter::once(apex).chain(apex_twin).collect();
        let common: HashSet<VertexKey> = self
            .neighbors(&fan_from)
            .intersection(&self.neighbors(&fan_to))
            .copied()
            .collect();
        if common != expected {
            return Err(TopologyError::Collapse("link condition"));
        }

        let faces_of_to: Vec<[VertexKey; 2]> = fan_to
            .iter()
            .map(|&e| [self.dest(e), self.half_edges[self.prev(e)].origin])
            .collect();

        let mut deviation: f64 = 0.0;
        for &out in &fan_from {
            let face = self.half_edges[out].face;
            if faces.contains(&Some(face)) {
                continue;
            }
            let x = self.dest(out);
            let y = self.half_edges[self.prev(out)].origin;
            let (px, py) = (self.vertices[x].position, self.vertices[y].position);

            let before = (px - p_from).cross(py - p_from);
            let after = (px - p_to).cross(py - p_to);
            if after.length() <= AREA_EPSILON {
                return Err(TopologyError::Collapse("degenerate face"));
            }
            if faces_of_to
                .iter()
                .any(|&[a, b]| (a == x && b == y) || (a == y && b == x))
            {
                return Err(TopologyError::Collapse("duplicate face"));
            }
            deviation = deviation.max(angle_between(before, after));
        }

        if he.twin.is_none() {
            // Sliding along the border: the incoming border edge must stay straight
            let entering = fan_from
                .iter()
                .map(|&e| self.prev(e))
                .find(|&e| self.half_edges[e].twin.is_none());
            if let Some(entering) = entering {
                let before = self.vertices[self.half_edges[entering].origin].position;
                deviation = deviation.max(angle_between(p_from - before, p_to - p_from));
            }
        }

        if deviation > params.max_normal_deviation {
            return Err(TopologyError::Collapse("normal deviation"));
        }

        let cost = length * params.angle_weight.mul_add(deviation, 1.0);
        if cost > params.max_edge_length {
            return Err(TopologyError::Collapse("cost over budget"));
        }

        let retarget = fan_from
            .into_iter()
            .filter(|e| !removed.contains(e))
            .collect();

        Ok(CollapsePlan {
            cost,
            from,
            to,
            apex,
            apex_twin,
            faces,
            removed,
            retarget,
            pairs,
        })
    }

    pub(crate) fn apply_collapse(
        &mut self,
        plan: CollapsePlan,
    ) {
        for &edge in &plan.retarget {
            self.half_edges[edge].origin = plan.to;
        }

        for (left, right) in plan.pairs {
            if let Some(left) = left {
                self.half_edges[left].twin = right;
            }
            if let Some(right) = right {
                self.half_edges[right].twin = left;
            }
        }

        for edge in &plan.removed {
            self.half_edges.remove(*edge);
        }
        for face in plan.faces.into_iter().flatten() {
            self.faces.remove(face);
        }
        self.vertices.remove(plan.from);

        let [(x1, x2), (y1, y2)] = plan.pairs;
        let after = |mesh: &Self, edge: Option<HalfEdgeKey>| {
            edge.and_then(|e| mesh.half_edges.get(e)).map(|he| he.next)
        };

        let mut candidates = vec![x2, y2, after(self, x1), after(self, y1)];
        candidates.extend(plan.retarget.iter().copied().map(Some));
        self.repair_outgoing(plan.to, &candidates);

        let apex_candidates = [x1, after(self, x2)];
        self.repair_outgoing(plan.apex, &apex_candidates);
        if let Some(apex) = plan.apex_twin {
            let candidates = [y2, after(self, y1)];
            self.repair_outgoing(apex, &candidates);
        }
    }

    fn is_sand_clock(
        &self,
        face: FaceKey,
    ) -> bool {
        let cross = self.face_cross(face);
        if cross.length() <= AREA_EPSILON {
            return true;
        }
        let normal = cross.normalize();
        self.face_half_edges(face).into_iter().any(|edge| {
            self.half_edges[edge].twin.is_some_and(|twin| {
                let neighbor = self.face_cross(self.half_edges[twin].face);
                neighbor
                    .try_normalize()
                    .is_some_and(|n| n.dot(normal) < FOLD_COSINE)
            })
        })
    }

    fn remove_faces(
        &mut self,
        faces: Vec<FaceKey>,
    ) -> usize {
        let mut removed = 0;
        for face in faces {
            // Removing one half of a folded pair clears the other
            if self.faces.contains_key(face) && self.is_sand_clock(face) {
                self.remove_face(face);
                removed += 1;
            }
        }
        removed
    }

    /// Scans the faces around `vertex` for degenerate or folded triangles
    fn remove_sand_clocks_around(
        &mut self,
        vertex: VertexKey,
    ) -> usize {
        let suspects: Vec<FaceKey> = self
            .outgoing_half_edges(vertex)
            .into_iter()
            .map(|edge| self.half_edges[edge].face)
            .filter(|&face| self.is_sand_clock(face))
            .collect();
        self.remove_faces(suspects)
    }

    /// Removes every degenerate or folded face of the primitive
    pub fn check_sand_clock_faces(&mut self) -> usize {
        let suspects: Vec<FaceKey> = self
            .faces
            .keys()
            .filter(|&face| self.is_sand_clock(face))
            .collect();
        self.remove_faces(suspects)
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec3;
    use rand::Rng;

    use super::*;
    use crate::{
        geometry::BoundingBox,
        halfedge::primitive::tests::{
            cube,
            grid,
        },
        scene::Primitive,
    };

    fn params(budget: f64) -> ReductionParams {
        ReductionParams {
            max_edge_length:      budget,
            max_normal_deviation: 10f64.to_radians(),
            angle_weight:         2.0,
            target_ratio:         0.0,
            max_passes:           64,
        }
    }

    fn bounds(mesh: &HalfEdgePrimitive) -> BoundingBox {
        let mut bounds = BoundingBox::new();
        mesh.calculate_bounding_box(&mut bounds);
        bounds
    }

    #[test]
    fn flat_grid_collapses_and_keeps_its_outline() {
        let mut mesh = HalfEdgePrimitive::build(&grid(8)).expect("grid");
        let before = bounds(&mesh);

        let report = mesh.do_triangles_reduction(&params(4.0));
        assert!(report.collapses > 0);
        assert!(report.faces_after < report.faces_before);
        assert_eq!(report.faces_after, mesh.face_count());
        mesh.validate().expect("manifold after decimation");

        let after = bounds(&mesh);
        assert_eq!(after, before);
    }

    #[test]
    fn zero_budget_is_a_no_op() {
        let mut mesh = HalfEdgePrimitive::build(&grid(4)).expect("grid");
        let report = mesh.do_triangles_reduction(&params(0.0));
        assert_eq!(report.collapses, 0);
        assert_eq!(report.faces_after, 32);
    }

    #[test]
    fn cube_corners_survive() {
        // Every collapse would bend a face by 90 degrees
        let mut mesh = HalfEdgePrimitive::build(&cube()).expect("cube");
        let report = mesh.do_triangles_reduction(&params(10.0));
        assert_eq!(report.collapses, 0);
        assert_eq!(mesh.face_count(), 12);
        mesh.validate().expect("cube untouched");
    }

    #[test]
    fn locked_vertices_are_never_merged() {
        let mut mesh = HalfEdgePrimitive::build(&grid(6)).expect("grid");
        let keys: Vec<_> = mesh.vertices.keys().collect();
        for key in &keys {
            mesh.vertices[*key].locked = true;
        }
        let report = mesh.do_triangles_reduction(&params(4.0));
        assert_eq!(report.collapses, 0);
        assert!(keys.iter().all(|k| mesh.vertex(*k).is_some()));
    }

    #[test]
    fn target_ratio_stops_early() {
        let mut mesh = HalfEdgePrimitive::build(&grid(8)).expect("grid");
        let report = mesh.do_triangles_reduction(&ReductionParams {
            target_ratio: 0.75,
            ..params(4.0)
        });
        assert!((95..=96).contains(&report.faces_after), "{report:?}");
    }

    #[test]
    fn face_count_never_grows_between_passes() {
        let mut mesh = HalfEdgePrimitive::build(&grid(10)).expect("grid");
        let mut last = mesh.face_count();
        for _ in 0..6 {
            let report = mesh.do_triangles_reduction(&ReductionParams {
                max_passes: 1,
                ..params(3.0)
            });
            assert!(report.faces_after <= last);
            last = report.faces_after;
            mesh.validate().expect("manifold after every pass");
        }
    }

    #[test]
    fn noisy_terrain_stays_manifold_and_inside_its_bounds() {
        let mut rng = rand::thread_rng();
        let mut primitive: Primitive = grid(12);
        for position in &mut primitive.positions {
            position.z = rng.gen_range(-0.02..0.02);
        }

        let mut mesh = HalfEdgePrimitive::build(&primitive).expect("grid");
        let before = bounds(&mesh);
        mesh.do_triangles_reduction(&ReductionParams {
            max_normal_deviation: 30f64.to_radians(),
            ..params(6.0)
        });
        mesh.validate().expect("manifold after noisy decimation");

        let after = bounds(&mesh);
        assert!(after.min().cmpge(before.min()).all());
        assert!(after.max().cmple(before.max()).all());
    }

    fn two_triangles(apex: DVec3) -> HalfEdgePrimitive {
        let primitive = Primitive {
            positions: vec![DVec3::ZERO, DVec3::X, DVec3::Y, apex],
            indices: vec![0, 1, 2, 2, 1, 3],
            ..Primitive::default()
        };
        HalfEdgePrimitive::build(&primitive).expect("two triangles")
    }

    #[test]
    fn sandclock_scan_ignores_healthy_faces() {
        let mut mesh = two_triangles(DVec3::new(1.0, 1.0, 0.0));
        assert_eq!(mesh.check_sand_clock_faces(), 0);
        assert_eq!(mesh.face_count(), 2);
    }

    #[test]
    fn sandclock_scan_removes_zero_area_faces() {
        let mut mesh = two_triangles(DVec3::new(0.5, 0.5, 0.0));
        assert_eq!(mesh.check_sand_clock_faces(), 1);
        assert_eq!(mesh.face_count(), 1);
        mesh.validate().expect("consistent after removal");
    }

    #[test]
    fn sandclock_scan_removes_one_face_of_a_fold() {
        let mut mesh = two_triangles(DVec3::new(-0.5, -0.5, 0.0));
        assert_eq!(mesh.check_sand_clock_faces(), 1);
        assert_eq!(mesh.face_count(), 1);
        // The corner only the removed face used is gone, the shared edge is locked
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.locked_vertex_count(), 2);
        mesh.validate().expect("consistent after removal");
    }
}
