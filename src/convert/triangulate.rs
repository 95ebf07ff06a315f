// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Planar ring cleanup and cap triangulation for footprints.

use glam::DVec2;
use lyon_path::{
    math::point,
    EndpointId,
    Path,
};
use lyon_tessellation::{
    BuffersBuilder,
    FillOptions,
    FillTessellator,
    FillVertex,
    VertexBuffers,
    VertexSource,
};

use crate::error::ConvertError;

const EPSILON: f64 = 1e-9;

/// Twice the signed area; positive for counter-clockwise rings
pub fn signed_area(ring: &[DVec2]) -> f64 {
    ring.iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a.perp_dot(*b))
        .sum()
}

/// Drops the closing point, repeated points and collinear points, then
/// orients the ring counter-clockwise
pub fn clean_ring(points: &[DVec2]) -> Result<Vec<DVec2>, ConvertError> {
    let mut ring: Vec<DVec2> = Vec::with_capacity(points.len());
    for &point in points {
        if ring.last().map_or(true, |last| last.distance(point) > EPSILON) {
            ring.push(point);
        }
    }
    while ring.len() > 1 && ring[0].distance(ring[ring.len() - 1]) <= EPSILON {
        ring.pop();
    }

    let mut i = 0;
    while ring.len() >= 3 && i < ring.len() {
        let n = ring.len();
        let (prev, cur, next) = (ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]);
        if (cur - prev).perp_dot(next - cur).abs() <= EPSILON {
            ring.remove(i);
            i = i.saturating_sub(1);
        } else {
            i += 1;
        }
    }

    if ring.len() < 3 {
        return Err(ConvertError::DegeneratePolygon(ring.len()));
    }
    if signed_area(&ring) < 0.0 {
        ring.reverse();
    }
    Ok(ring)
}

/// Triangulates a counter-clockwise simple ring. Triangles index into `ring`
/// and are wound counter-clockwise.
#[allow(clippy::cast_possible_truncation)]
pub fn tessellate(ring: &[DVec2]) -> Result<Vec<[u32; 3]>, ConvertError> {
    let Some((first, rest)) = ring.split_first() else {
        return Err(ConvertError::DegeneratePolygon(0));
    };
    let to_point = |p: &DVec2| point(p.x as f32, p.y as f32);

    let mut builder = Path::builder();
    let mut endpoints: Vec<EndpointId> = Vec::with_capacity(ring.len());
    endpoints.push(builder.begin(to_point(first)));
    for vertex in rest {
        endpoints.push(builder.line_to(to_point(vertex)));
    }
    builder.close();
    let path = builder.build();

    // Ring index of every emitted vertex; vertices lyon had to add are `None`
    let mut geometry: VertexBuffers<Option<u32>, u32> = VertexBuffers::new();
    FillTessellator::new()
        .tessellate_path(
            &path,
            &FillOptions::default(),
            &mut BuffersBuilder::new(&mut geometry, |vertex: FillVertex| {
                vertex.sources().find_map(|source| match source {
                    VertexSource::Endpoint {
                        id,
                    } => endpoints
                        .iter()
                        .position(|&known| known == id)
                        .and_then(|index| u32::try_from(index).ok()),
                    VertexSource::Edge {
                        ..
                    } => None,
                })
            }),
        )
        .map_err(|_| ConvertError::Tessellation)?;

    let corner = |index: u32| ring[index as usize];
    geometry
        .indices
        .chunks_exact(3)
        .map(|tri| {
            let mapped = [tri[0], tri[1], tri[2]].map(|i| geometry.vertices.get(i as usize).copied().flatten());
            let [Some(a), Some(b), Some(c)] = mapped else {
                return Err(ConvertError::Tessellation);
            };
            if (corner(b) - corner(a)).perp_dot(corner(c) - corner(a)) < 0.0 {
                Ok([a, c, b])
            } else {
                Ok([a, b, c])
            }
        })
        .collect()
}
