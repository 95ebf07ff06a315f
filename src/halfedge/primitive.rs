// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::collections::{
    HashMap,
    HashSet,
};

use glam::{
    DMat3,
    DMat4,
    DVec2,
    DVec3,
};
use slotmap::SlotMap;

use crate::{
    error::TopologyError,
    geometry::{
        BoundingBox,
        PlaneSide,
    },
    scene::Primitive,
};

slotmap::new_key_type! {
    pub struct VertexKey;
    pub struct HalfEdgeKey;
    pub struct FaceKey;
}

#[derive(Clone, Debug)]
pub struct HeVertex {
    pub position: DVec3,
    pub normal:   Option<DVec3>,
    pub uv:       Option<DVec2>,
    pub outgoing: Option<HalfEdgeKey>,
    /// Never moved or merged away by a collapse
    pub locked:   bool,
}

#[derive(Clone, Copy, Debug)]
pub struct HalfEdge {
    pub origin: VertexKey,
    pub twin:   Option<HalfEdgeKey>,
    pub next:   HalfEdgeKey,
    pub face:   FaceKey,
}

#[derive(Clone, Copy, Debug)]
pub struct Face {
    pub half_edge: HalfEdgeKey,
    pub side:      Option<PlaneSide>,
}

/// Per-vertex data used to (re)assemble a primitive
#[derive(Clone, Copy, Debug)]
pub(crate) struct VertexData {
    pub position: DVec3,
    pub normal:   Option<DVec3>,
    pub uv:       Option<DVec2>,
    pub locked:   bool,
}

/// Half-edge topology of a single triangle primitive
#[derive(Clone, Debug, Default)]
pub struct HalfEdgePrimitive {
    pub(crate) vertices:   SlotMap<VertexKey, HeVertex>,
    pub(crate) half_edges: SlotMap<HalfEdgeKey, HalfEdge>,
    pub(crate) faces:      SlotMap<FaceKey, Face>,
    pub(crate) material:   usize,
    has_normals:           bool,
    has_uvs:               bool,
}

/// Faces with less than this doubled area count as degenerate
pub(crate) const AREA_EPSILON: f64 = 1e-12;

impl HalfEdgePrimitive {
    pub fn build(primitive: &Primitive) -> Result<Self, TopologyError> {
        let count = primitive.positions.len();
        let normals = primitive.normals.as_ref().filter(|n| n.len() == count);
        let uvs = primitive.uvs.as_ref().filter(|uv| uv.len() == count);

        let vertices = primitive
            .positions
            .iter()
            .enumerate()
            .map(|(i, &position)| VertexData {
                position,
                normal: normals.map(|n| n[i]),
                uv: uvs.map(|uv| uv[i]),
                locked: false,
            })
            .collect();

        Self::assemble(
            vertices,
            &primitive.indices,
            primitive.material,
            normals.is_some(),
            uvs.is_some(),
        )
    }

    pub(crate) fn assemble(
        data: Vec<VertexData>,
        indices: &[u32],
        material: usize,
        has_normals: bool,
        has_uvs: bool,
    ) -> Result<Self, TopologyError> {
        if indices.len() % 3 != 0 {
            return Err(TopologyError::NonTriangleFace(indices.len()));
        }

        let mut mesh = Self {
            material,
            has_normals,
            has_uvs,
            ..Self::default()
        };

        let vertex_count = data.len();
        let keys: Vec<VertexKey> = data
            .into_iter()
            .map(|vertex| {
                mesh.vertices.insert(HeVertex {
                    position: vertex.position,
                    normal:   vertex.normal,
                    uv:       vertex.uv,
                    outgoing: None,
                    locked:   vertex.locked,
                })
            })
            .collect();

        let mut directed: HashMap<(u32, u32), HalfEdgeKey> = HashMap::with_capacity(indices.len());
        let mut out_degree = vec![0usize; vertex_count];

        let mut collapsed = 0usize;
        for tri in indices.chunks_exact(3) {
            let tri = [tri[0], tri[1], tri[2]];
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(TopologyError::IndexOutOfRange {
                    index,
                    vertices: vertex_count,
                });
            }
            // Repeated index, no area and no usable edges
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[2] == tri[0] {
                collapsed += 1;
                continue;
            }
            for i in 0..3 {
                let edge = (tri[i], tri[(i + 1) % 3]);
                if directed.contains_key(&edge) {
                    return Err(TopologyError::DuplicateEdge(edge.0, edge.1));
                }
            }

            let face = mesh.faces.insert(Face {
                half_edge: HalfEdgeKey::default(),
                side:      None,
            });
            let edges = tri.map(|i| {
                mesh.half_edges.insert(HalfEdge {
                    origin: keys[i as usize],
                    twin: None,
                    next: HalfEdgeKey::default(),
                    face,
                })
            });
            for i in 0..3 {
                mesh.half_edges[edges[i]].next = edges[(i + 1) % 3];
                directed.insert((tri[i], tri[(i + 1) % 3]), edges[i]);
                out_degree[tri[i] as usize] += 1;
                mesh.vertices[keys[tri[i] as usize]].outgoing.get_or_insert(edges[i]);
            }
            mesh.faces[face].half_edge = edges[0];
        }

        if collapsed > 0 {
            tracing::debug!(collapsed, "skipped triangles with a repeated index");
        }

        for (&(a, b), &edge) in &directed {
            if let Some(&twin) = directed.get(&(b, a)) {
                mesh.half_edges[edge].twin = Some(twin);
            }
        }

        for (i, &key) in keys.iter().enumerate() {
            if out_degree[i] == 0 {
                mesh.vertices.remove(key);
            } else if mesh.outgoing_half_edges(key).len() != out_degree[i] {
                // Several fans meet here; a fan walk would miss some of them
                mesh.vertices[key].locked = true;
            }
        }

        Ok(mesh)
    }

    #[inline]
    pub const fn material(&self) -> usize {
        self.material
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn half_edge_count(&self) -> usize {
        self.half_edges.len()
    }

    pub fn vertex(
        &self,
        key: VertexKey,
    ) -> Option<&HeVertex> {
        self.vertices.get(key)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexKey, &HeVertex)> {
        self.vertices.iter()
    }

    pub fn faces(&self) -> impl Iterator<Item = (FaceKey, &Face)> {
        self.faces.iter()
    }

    pub fn locked_vertex_count(&self) -> usize {
        self.vertices.values().filter(|v| v.locked).count()
    }

    #[inline]
    pub(crate) fn dest(
        &self,
        edge: HalfEdgeKey,
    ) -> VertexKey {
        self.half_edges[self.half_edges[edge].next].origin
    }

    #[inline]
    pub(crate) fn prev(
        &self,
        edge: HalfEdgeKey,
    ) -> HalfEdgeKey {
        self.half_edges[self.half_edges[edge].next].next
    }

    pub(crate) fn face_half_edges(
        &self,
        face: FaceKey,
    ) -> [HalfEdgeKey; 3] {
        let first = self.faces[face].half_edge;
        let second = self.half_edges[first].next;
        [first, second, self.half_edges[second].next]
    }

    pub fn face_vertices(
        &self,
        face: FaceKey,
    ) -> [VertexKey; 3] {
        self.face_half_edges(face).map(|edge| self.half_edges[edge].origin)
    }

    /// Unnormalized normal; its length is twice the face area
    pub(crate) fn face_cross(
        &self,
        face: FaceKey,
    ) -> DVec3 {
        let [a, b, c] = self.face_vertices(face).map(|v| self.vertices[v].position);
        (b - a).cross(c - a)
    }

    /// Outgoing half-edges of a vertex, walking its face fan in both
    /// directions so boundary vertices are covered too
    pub(crate) fn outgoing_half_edges(
        &self,
        vertex: VertexKey,
    ) -> Vec<HalfEdgeKey> {
        let Some(start) = self.vertices.get(vertex).and_then(|v| v.outgoing) else {
            return Vec::new();
        };
        let limit = self.half_edges.len();
        let mut fan = vec![start];

        let mut edge = start;
        loop {
            match self.half_edges[self.prev(edge)].twin {
                Some(twin) if twin == start => return fan,
                Some(twin) if fan.len() <= limit => {
                    fan.push(twin);
                    edge = twin;
                },
                _ => break,
            }
        }

        let mut edge = start;
        while let Some(twin) = self.half_edges[edge].twin {
            let next = self.half_edges[twin].next;
            if next == start || fan.len() > limit {
                break;
            }
            fan.push(next);
            edge = next;
        }
        fan
    }

    /// Vertices sharing an edge with `vertex`
    pub(crate) fn neighbors(
        &self,
        fan: &[HalfEdgeKey],
    ) -> HashSet<VertexKey> {
        fan.iter()
            .flat_map(|&edge| [self.dest(edge), self.half_edges[self.prev(edge)].origin])
            .collect()
    }

    /// Number of boundary edges touching the fan's vertex
    pub(crate) fn boundary_edge_count(
        &self,
        fan: &[HalfEdgeKey],
    ) -> usize {
        fan.iter()
            .map(|&edge| {
                usize::from(self.half_edges[edge].twin.is_none())
                    + usize::from(self.half_edges[self.prev(edge)].twin.is_none())
            })
            .sum()
    }

    pub fn is_boundary_vertex(
        &self,
        vertex: VertexKey,
    ) -> bool {
        self.boundary_edge_count(&self.outgoing_half_edges(vertex)) > 0
    }

    /// Points `vertex` at a live outgoing half-edge, trying `candidates`
    /// first. A vertex with no faces left is removed.
    pub(crate) fn repair_outgoing(
        &mut self,
        vertex: VertexKey,
        candidates: &[Option<HalfEdgeKey>],
    ) {
        let is_outgoing = |mesh: &Self, edge: HalfEdgeKey| {
            mesh.half_edges.get(edge).is_some_and(|he| he.origin == vertex)
        };

        let Some(current) = self.vertices.get(vertex).map(|v| v.outgoing) else {
            return;
        };
        if current.is_some_and(|edge| is_outgoing(self, edge)) {
            return;
        }

        let found = candidates
            .iter()
            .flatten()
            .copied()
            .find(|&edge| is_outgoing(self, edge))
            .or_else(|| {
                self.half_edges
                    .iter()
                    .find(|(_, he)| he.origin == vertex)
                    .map(|(key, _)| key)
            });

        match found {
            Some(edge) => self.vertices[vertex].outgoing = Some(edge),
            None => {
                self.vertices.remove(vertex);
            },
        }
    }

    /// Deletes one face, turning its edges into boundary edges.
    /// Returns the face's vertices (those still alive are locked).
    pub(crate) fn remove_face(
        &mut self,
        face: FaceKey,
    ) -> [VertexKey; 3] {
        let edges = self.face_half_edges(face);
        let twins = edges.map(|edge| self.half_edges[edge].twin);
        let corners = edges.map(|edge| self.half_edges[edge].origin);
        let after_twins = twins.map(|twin| twin.map(|t| self.half_edges[t].next));

        for twin in twins.into_iter().flatten() {
            self.half_edges[twin].twin = None;
        }
        for edge in edges {
            self.half_edges.remove(edge);
        }
        self.faces.remove(face);

        for i in 0..3 {
            // edges[i] leaves corners[i]; the twin of the edge entering it leaves it too
            let entering = (i + 2) % 3;
            self.repair_outgoing(corners[i], &[twins[entering], after_twins[i]]);
            if let Some(vertex) = self.vertices.get_mut(corners[i]) {
                vertex.locked = true;
            }
        }
        corners
    }

    pub fn transform_points(
        &mut self,
        matrix: &DMat4,
    ) {
        let normal_matrix = DMat3::from_mat4(*matrix).inverse().transpose();
        for vertex in self.vertices.values_mut() {
            vertex.position = matrix.transform_point3(vertex.position);
            if let Some(normal) = vertex.normal.as_mut() {
                *normal = (normal_matrix * *normal).normalize_or_zero();
            }
        }
    }

    pub fn calculate_bounding_box(
        &self,
        bounds: &mut BoundingBox,
    ) {
        for vertex in self.vertices.values() {
            bounds.grow_to_include_point(vertex.position);
        }
    }

    pub fn delete_objects(&mut self) {
        self.vertices = SlotMap::with_key();
        self.half_edges = SlotMap::with_key();
        self.faces = SlotMap::with_key();
    }

    /// Compacts live faces into an indexed primitive
    pub fn to_primitive(&self) -> Primitive {
        self.extract_faces(|_| true)
    }

    pub(crate) fn extract_faces(
        &self,
        mut keep: impl FnMut(&Face) -> bool,
    ) -> Primitive {
        let mut remap: HashMap<VertexKey, u32> = HashMap::new();
        let mut primitive = Primitive {
            material: self.material,
            normals: self.has_normals.then(Vec::new),
            uvs: self.has_uvs.then(Vec::new),
            ..Primitive::default()
        };

        for (key, face) in &self.faces {
            if !keep(face) {
                continue;
            }
            for vertex in self.face_vertices(key) {
                let index = *remap.entry(vertex).or_insert_with(|| {
                    let data = &self.vertices[vertex];
                    primitive.positions.push(data.position);
                    if let Some(normals) = primitive.normals.as_mut() {
                        normals.push(data.normal.unwrap_or(DVec3::Z));
                    }
                    if let Some(uvs) = primitive.uvs.as_mut() {
                        uvs.push(data.uv.unwrap_or(DVec2::ZERO));
                    }
                    u32::try_from(primitive.positions.len() - 1).unwrap_or(u32::MAX)
                });
                primitive.indices.push(index);
            }
        }
        primitive
    }

    pub(crate) fn vertex_data(
        &self,
        vertex: VertexKey,
    ) -> VertexData {
        let v = &self.vertices[vertex];
        VertexData {
            position: v.position,
            normal:   v.normal,
            uv:       v.uv,
            locked:   v.locked,
        }
    }

    #[inline]
    pub(crate) const fn attribute_flags(&self) -> (bool, bool) {
        (self.has_normals, self.has_uvs)
    }

    /// Checks the manifold invariants: closed 3-cycles, symmetric twins with
    /// swapped endpoints, live references everywhere
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (face_key, face) in &self.faces {
            let mut edge = face.half_edge;
            for _ in 0..3 {
                let he = self
                    .half_edges
                    .get(edge)
                    .ok_or(TopologyError::Dangling("face cycle"))?;
                if he.face != face_key {
                    return Err(TopologyError::Inconsistent("half-edge owned by another face"));
                }
                edge = he.next;
            }
            if edge != face.half_edge {
                return Err(TopologyError::Inconsistent("face cycle is not a triangle"));
            }
        }

        for (key, he) in &self.half_edges {
            if !self.vertices.contains_key(he.origin) {
                return Err(TopologyError::Dangling("half-edge origin"));
            }
            if !self.faces.contains_key(he.face) || !self.half_edges.contains_key(he.next) {
                return Err(TopologyError::Dangling("half-edge face"));
            }
            if let Some(twin) = he.twin {
                let other = self
                    .half_edges
                    .get(twin)
                    .ok_or(TopologyError::Dangling("twin"))?;
                if other.twin != Some(key) {
                    return Err(TopologyError::Inconsistent("twin is not mutual"));
                }
                if other.origin != self.dest(key) || self.dest(twin) != he.origin {
                    return Err(TopologyError::Inconsistent("twin endpoints not swapped"));
                }
            }
        }

        for (key, vertex) in &self.vertices {
            let outgoing = vertex
                .outgoing
                .and_then(|edge| self.half_edges.get(edge))
                .ok_or(TopologyError::Dangling("vertex outgoing"))?;
            if outgoing.origin != key {
                return Err(TopologyError::Inconsistent("outgoing edge leaves another vertex"));
            }
        }

        Ok(())
    }
}
