// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::collections::HashMap;

use slotmap::SecondaryMap;

use super::primitive::{
    HalfEdgePrimitive,
    VertexData,
    VertexKey,
    AREA_EPSILON,
};
use crate::{
    error::TopologyError,
    geometry::{
        AxisPlane,
        PlaneSide,
    },
    scene::Primitive,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CutReport {
    pub faces_before: usize,
    pub faces_after:  usize,
    pub split_edges:  usize,
    pub discarded:    usize,
}

#[derive(Clone, Copy)]
enum Corner {
    Kept(VertexKey),
    Split(VertexKey, VertexKey),
}

/// Output of a cut before it is assembled into a mesh
#[derive(Default)]
struct CutBuilder {
    vertices: Vec<VertexData>,
    indices:  Vec<u32>,
    kept:     HashMap<VertexKey, u32>,
    split:    HashMap<(VertexKey, VertexKey), u32>,
}

impl CutBuilder {
    fn push(
        &mut self,
        vertex: VertexData,
    ) -> u32 {
        self.vertices.push(vertex);
        u32::try_from(self.vertices.len() - 1).unwrap_or(u32::MAX)
    }
}

impl HalfEdgePrimitive {
    fn classify_vertices(
        &self,
        plane: &AxisPlane,
        tolerance: f64,
    ) -> SecondaryMap<VertexKey, PlaneSide> {
        self.vertices
            .iter()
            .map(|(key, vertex)| (key, plane.classify(vertex.position, tolerance)))
            .collect()
    }

    /// Tags each face with its side of the plane; geometry is untouched
    pub fn classify_faces_id_by_plane(
        &mut self,
        plane: &AxisPlane,
        tolerance: f64,
    ) {
        let sides = self.classify_vertices(plane, tolerance);
        let tags: Vec<_> = self
            .faces
            .keys()
            .map(|face| {
                let corners = self.face_vertices(face).map(|v| sides[v]);
                let front = corners.contains(&PlaneSide::Front);
                let behind = corners.contains(&PlaneSide::Behind);
                let side = match (front, behind) {
                    (true, true) => PlaneSide::Straddling,
                    (true, false) => PlaneSide::Front,
                    (false, true) => PlaneSide::Behind,
                    (false, false) => PlaneSide::On,
                };
                (face, side)
            })
            .collect();

        for (face, side) in tags {
            self.faces[face].side = Some(side);
        }
    }

    /// Copies the faces tagged by the last classification
    pub fn extract_side(
        &self,
        side: PlaneSide,
    ) -> Primitive {
        self.extract_faces(|face| face.side == Some(side))
    }

    /// Clipped copy of this primitive; `self` is not modified
    pub fn clipped(
        &self,
        plane: &AxisPlane,
        tolerance: f64,
    ) -> Result<(Self, CutReport), TopologyError> {
        let sides = self.classify_vertices(plane, tolerance);
        let mut out = CutBuilder::default();
        let mut report = CutReport {
            faces_before: self.face_count(),
            ..CutReport::default()
        };

        for face in self.faces.keys() {
            let corners = self.face_vertices(face);
            let side = corners.map(|v| sides[v]);

            if !side.contains(&PlaneSide::Behind) {
                let tri = corners.map(|v| self.kept_index(&mut out, v, sides[v]));
                out.indices.extend_from_slice(&tri);
                continue;
            }
            if !side.contains(&PlaneSide::Front) {
                report.discarded += 1;
                continue;
            }

            let mut polygon: Vec<Corner> = Vec::with_capacity(4);
            for i in 0..3 {
                let (cur, next) = (corners[i], corners[(i + 1) % 3]);
                let (s_cur, s_next) = (side[i], side[(i + 1) % 3]);
                if s_cur != PlaneSide::Behind {
                    polygon.push(Corner::Kept(cur));
                }
                let crosses = matches!(
                    (s_cur, s_next),
                    (PlaneSide::Front, PlaneSide::Behind) | (PlaneSide::Behind, PlaneSide::Front)
                );
                if crosses {
                    polygon.push(Corner::Split(cur, next));
                }
            }

            let polygon: Vec<u32> = polygon
                .into_iter()
                .map(|corner| match corner {
                    Corner::Kept(v) => self.kept_index(&mut out, v, sides[v]),
                    Corner::Split(a, b) => self.split_index(&mut out, plane, a, b),
                })
                .collect();

            for i in 1..polygon.len().saturating_sub(1) {
                let tri = [polygon[0], polygon[i], polygon[i + 1]];
                let [a, b, c] = tri.map(|i| out.vertices[i as usize].position);
                if (b - a).cross(c - a).length() > AREA_EPSILON {
                    out.indices.extend_from_slice(&tri);
                }
            }
        }

        report.split_edges = out.split.len();
        let (has_normals, has_uvs) = self.attribute_flags();
        let clipped = Self::assemble(out.vertices, &out.indices, self.material, has_normals, has_uvs)?;
        report.faces_after = clipped.face_count();
        Ok((clipped, report))
    }

    /// Removes everything behind the plane. Crossing edges get a shared
    /// intersection vertex; vertices on the cut are locked. On error the
    /// primitive is left as it was.
    pub fn cut_by_plane(
        &mut self,
        plane: &AxisPlane,
        tolerance: f64,
    ) -> Result<CutReport, TopologyError> {
        let (clipped, report) = self.clipped(plane, tolerance)?;
        *self = clipped;
        Ok(report)
    }

    fn kept_index(
        &self,
        out: &mut CutBuilder,
        vertex: VertexKey,
        side: PlaneSide,
    ) -> u32 {
        if let Some(&index) = out.kept.get(&vertex) {
            return index;
        }
        let mut data = self.vertex_data(vertex);
        data.locked |= side == PlaneSide::On;
        let index = out.push(data);
        out.kept.insert(vertex, index);
        index
    }

    fn split_index(
        &self,
        out: &mut CutBuilder,
        plane: &AxisPlane,
        a: VertexKey,
        b: VertexKey,
    ) -> u32 {
        // Both faces sharing the edge must produce the very same vertex
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        if let Some(&index) = out.split.get(&(a, b)) {
            return index;
        }

        let (va, vb) = (self.vertex_data(a), self.vertex_data(b));
        let t = plane.intersection_param(va.position, vb.position);
        let data = VertexData {
            position: plane.snap(va.position.lerp(vb.position, t)),
            normal:   va
                .normal
                .zip(vb.normal)
                .map(|(na, nb)| na.lerp(nb, t).normalize_or_zero()),
            uv:       va.uv.zip(vb.uv).map(|(ua, ub)| ua.lerp(ub, t)),
            locked:   true,
        };
        let index = out.push(data);
        out.split.insert((a, b), index);
        index
    }
}
