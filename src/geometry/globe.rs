// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! WGS84 helpers. Geographic coordinates are (longitude°, latitude°, height m).

use glam::{
    DMat4,
    DVec3,
    DVec4,
};

use super::BoundingBox;

const SEMI_MAJOR: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const E2: f64 = FLATTENING * (2.0 - FLATTENING);

pub fn geographic_to_cartesian(geographic: DVec3) -> DVec3 {
    let lon = geographic.x.to_radians();
    let lat = geographic.y.to_radians();
    let height = geographic.z;

    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = SEMI_MAJOR / E2.mul_add(-(sin_lat * sin_lat), 1.0).sqrt();
    DVec3::new(
        (n + height) * cos_lat * cos_lon,
        (n + height) * cos_lat * sin_lon,
        n.mul_add(1.0 - E2, height) * sin_lat,
    )
}

pub fn cartesian_to_geographic(cartesian: DVec3) -> DVec3 {
    let p = cartesian.x.hypot(cartesian.y);
    let lon = cartesian.y.atan2(cartesian.x);

    // Converges to sub-millimetre in a handful of rounds away from the poles
    let mut lat = cartesian.z.atan2(p * (1.0 - E2));
    let mut height = 0.0;
    for _ in 0..6 {
        let sin_lat = lat.sin();
        let n = SEMI_MAJOR / E2.mul_add(-(sin_lat * sin_lat), 1.0).sqrt();
        height = if lat.cos().abs() > 1e-12 {
            p / lat.cos() - n
        } else {
            cartesian.z.abs() - n * (1.0 - E2)
        };
        lat = cartesian.z.atan2(p * (1.0 - E2 * n / (n + height)));
    }

    DVec3::new(lon.to_degrees(), lat.to_degrees(), height)
}

/// East-North-Up frame anchored at an ECEF point
pub fn transform_matrix_at_cartesian_point(cartesian: DVec3) -> DMat4 {
    let up = surface_normal(cartesian);
    let east = DVec3::new(-cartesian.y, cartesian.x, 0.0).try_normalize().unwrap_or(DVec3::Y);
    let north = up.cross(east);

    DMat4::from_cols(
        east.extend(0.0),
        north.extend(0.0),
        up.extend(0.0),
        DVec4::new(cartesian.x, cartesian.y, cartesian.z, 1.0),
    )
}

/// Ellipsoid normal at an ECEF point
pub fn surface_normal(cartesian: DVec3) -> DVec3 {
    let scaled = DVec3::new(
        cartesian.x / (SEMI_MAJOR * SEMI_MAJOR),
        cartesian.y / (SEMI_MAJOR * SEMI_MAJOR),
        cartesian.z / (SEMI_MAJOR * SEMI_MAJOR * (1.0 - E2)),
    );
    scaled.try_normalize().unwrap_or(DVec3::Z)
}

/// ENU frame at a geographic anchor, optionally rotated by a heading about up
pub fn placement_at(
    geographic: DVec3,
    heading_deg: f64,
) -> DMat4 {
    let frame = transform_matrix_at_cartesian_point(geographic_to_cartesian(geographic));
    if heading_deg == 0.0 {
        frame
    } else {
        frame * DMat4::from_rotation_z(heading_deg.to_radians())
    }
}

/// Converts a box expressed in an anchor's local frame into lon/lat/height
pub fn local_to_geographic_box(
    local: &BoundingBox,
    placement: &DMat4,
) -> BoundingBox {
    if local.is_empty() {
        return *local;
    }
    BoundingBox::from_points(
        local
            .corners()
            .into_iter()
            .map(|corner| cartesian_to_geographic(placement.transform_point3(corner))),
    )
}
