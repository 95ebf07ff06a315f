// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::path::{
    Path,
    PathBuf,
};

use geojson::{
    Feature,
    GeoJson,
    JsonObject,
    Position,
    Value as Geometry,
};
use glam::{
    DVec2,
    DVec3,
};
use serde_json::Value;

use super::triangulate;
use crate::{
    config::{
        ExtrusionOptions,
        TilerOptions,
    },
    diagnostics::Diagnostics,
    error::ConvertError,
    geometry::{
        globe,
        BoundingBox,
    },
    scene::{
        GeoAnchor,
        Mesh,
        PlacedScene,
        Primitive,
        Scene,
    },
};

/// Outline of one building in geographic coordinates
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Footprint {
    /// Outer ring as `[longitude, latitude]` pairs
    pub coordinates: Vec<[f64; 2]>,
    pub properties:  JsonObject,
    /// Index of the feature in its collection
    pub feature:     usize,
    /// Polygon index inside a multi-polygon feature
    pub part:        Option<usize>,
}

impl Footprint {
    fn number(
        &self,
        column: &str,
    ) -> Option<f64> {
        match self.properties.get(column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn text(
        &self,
        column: &str,
    ) -> Option<String> {
        match self.properties.get(column)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn outer_ring(rings: &[Vec<Position>]) -> Option<Vec<[f64; 2]>> {
    rings
        .first()?
        .iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Some([*x, *y]),
            _ => None,
        })
        .collect()
}

/// Turns footprints into prism scenes anchored at their ring centers
#[derive(Clone, Debug)]
pub struct ExtrusionConverter {
    path:            PathBuf,
    options:         ExtrusionOptions,
    flip_coordinate: bool,
    name_column:     String,
}

impl ExtrusionConverter {
    pub fn new(
        path: impl Into<PathBuf>,
        options: &TilerOptions,
    ) -> Self {
        Self {
            path:            path.into(),
            options:         options.extrusion.clone(),
            flip_coordinate: options.flip_coordinate,
            name_column:     options.name_column.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn convert(
        &self,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<PlacedScene>, ConvertError> {
        let document = std::fs::read_to_string(&self.path)?;
        let footprints = self.parse_footprints(&document, diagnostics)?;
        Ok(self.convert_footprints(&footprints, diagnostics))
    }

    /// One footprint per polygon of a GeoJSON document. Holes are ignored;
    /// features without polygons are recorded and skipped.
    pub fn parse_footprints(
        &self,
        document: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<Footprint>, ConvertError> {
        let features = match document.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(collection) => collection.features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(geometry) => vec![Feature {
                bbox:            None,
                geometry:        Some(geometry),
                id:              None,
                properties:      None,
                foreign_members: None,
            }],
        };

        let mut footprints = Vec::with_capacity(features.len());
        for (index, feature) in features.into_iter().enumerate() {
            let template = Footprint {
                coordinates: Vec::new(),
                properties:  feature.properties.unwrap_or_default(),
                feature:     index,
                part:        None,
            };
            let polygons: Vec<(Option<usize>, &[Vec<Position>])> = match feature.geometry.as_ref().map(|g| &g.value) {
                Some(Geometry::Polygon(rings)) => vec![(None, rings.as_slice())],
                Some(Geometry::MultiPolygon(polygons)) => polygons
                    .iter()
                    .enumerate()
                    .map(|(part, rings)| (Some(part), rings.as_slice()))
                    .collect(),
                Some(_) => {
                    diagnostics.skip_instance(self.name_of(&template), "geometry is not a polygon");
                    continue;
                },
                None => {
                    diagnostics.skip_instance(self.name_of(&template), "feature has no geometry");
                    continue;
                },
            };

            for (part, rings) in polygons {
                let mut footprint = Footprint {
                    part,
                    ..template.clone()
                };
                let Some(coordinates) = outer_ring(rings) else {
                    diagnostics.skip_instance(self.name_of(&footprint), "polygon without a usable outer ring");
                    continue;
                };
                if rings.len() > 1 {
                    tracing::debug!(name = %self.name_of(&footprint), holes = rings.len() - 1, "holes ignored");
                }
                footprint.coordinates = coordinates;
                footprints.push(footprint);
            }
        }
        Ok(footprints)
    }

    /// Extrudes every footprint; broken ones are recorded and skipped
    pub fn convert_footprints(
        &self,
        footprints: &[Footprint],
        diagnostics: &mut Diagnostics,
    ) -> Vec<PlacedScene> {
        footprints
            .iter()
            .filter_map(|footprint| {
                let name = self.name_of(footprint);
                self.extrude(&name, footprint)
                    .map_err(|err| diagnostics.skip_instance(&name, err))
                    .ok()
            })
            .collect()
    }

    /// Attribute value, or the feature index; multi-polygon members get their
    /// part index appended
    fn name_of(
        &self,
        footprint: &Footprint,
    ) -> String {
        let base = footprint
            .text(&self.name_column)
            .unwrap_or_else(|| format!("footprint_{}", footprint.feature));
        match footprint.part {
            Some(part) => format!("{base}_{part}"),
            None => base,
        }
    }

    /// Largest of the explicit height, the floor count height and the minimum
    pub fn height(
        &self,
        footprint: &Footprint,
    ) -> f64 {
        let explicit = footprint.number(&self.options.height_column).unwrap_or(0.0);
        let floors = footprint.number(&self.options.floor_column).unwrap_or(0.0);
        explicit
            .max(floors * self.options.floor_height)
            .max(self.options.min_height)
    }

    pub fn extrude(
        &self,
        name: &str,
        footprint: &Footprint,
    ) -> Result<PlacedScene, ConvertError> {
        let geographic: Vec<DVec2> = footprint
            .coordinates
            .iter()
            .map(|&[x, y]| {
                if self.flip_coordinate {
                    DVec2::new(y, x)
                } else {
                    DVec2::new(x, y)
                }
            })
            .collect();
        if geographic.iter().any(|p| !p.is_finite()) {
            return Err(ConvertError::Unsupported(format!("{name} has non-finite coordinates")));
        }

        let bounds = BoundingBox::from_points(geographic.iter().map(|p| p.extend(0.0)));
        if bounds.is_empty() {
            return Err(ConvertError::DegeneratePolygon(0));
        }
        let center = bounds.center();
        let anchor = GeoAnchor::new(center.x, center.y, 0.0);
        let to_local = anchor.placement().inverse();

        let local: Vec<DVec2> = geographic
            .iter()
            .map(|p| {
                to_local
                    .transform_point3(globe::geographic_to_cartesian(p.extend(0.0)))
                    .truncate()
            })
            .collect();

        let ring = triangulate::clean_ring(&local)?;
        let caps = triangulate::tessellate(&ring)?;
        let height = self.height(footprint);

        let mut scene = Scene::new(name);
        scene.root.meshes.push(Mesh {
            primitives: vec![prism(&ring, &caps, height)],
        });
        tracing::trace!(name, vertices = ring.len(), height, "extruded footprint");
        Ok(PlacedScene::new(scene, anchor))
    }
}

/// Closed prism over a counter-clockwise ring: bottom ring, then top ring
fn prism(
    ring: &[DVec2],
    caps: &[[u32; 3]],
    height: f64,
) -> Primitive {
    let n = u32::try_from(ring.len()).unwrap_or(u32::MAX);
    let positions = ring
        .iter()
        .map(|p| p.extend(0.0))
        .chain(ring.iter().map(|p| p.extend(height)))
        .collect::<Vec<DVec3>>();

    let mut indices = Vec::with_capacity((caps.len() * 2 + ring.len() * 2) * 3);
    for &[a, b, c] in caps {
        indices.extend_from_slice(&[c, b, a]);
    }
    for &[a, b, c] in caps {
        indices.extend_from_slice(&[n + a, n + b, n + c]);
    }
    for i in 0..n {
        let j = (i + 1) % n;
        indices.extend_from_slice(&[i, j, n + j, i, n + j, n + i]);
    }

    Primitive {
        positions,
        indices,
        ..Primitive::default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::halfedge::HalfEdgePrimitive;

    fn converter(options: TilerOptions) -> ExtrusionConverter {
        ExtrusionConverter::new("footprints.geojson", &options)
    }

    fn properties(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => JsonObject::new(),
        }
    }

    fn square(attributes: Value) -> Footprint {
        Footprint {
            coordinates: vec![[127.0, 37.0], [127.0001, 37.0], [127.0001, 37.0001], [127.0, 37.0001], [127.0, 37.0]],
            properties: properties(attributes),
            ..Footprint::default()
        }
    }

    #[test]
    fn square_becomes_closed_prism() {
        let converter = converter(TilerOptions::default());
        let footprint = square(json!({ "HEIGHT": 9.0, "name": "tower" }));
        let placed = converter.extrude("tower", &footprint).expect("extrudes");

        assert_eq!(placed.scene.name, "tower");
        let primitive = &placed.scene.root.meshes[0].primitives[0];
        assert_eq!(primitive.vertex_count(), 8);
        assert_eq!(primitive.triangle_count(), 12);

        let bounds = primitive.bounding_box();
        assert!(bounds.min().z.abs() < 1e-9);
        assert!((bounds.max().z - 9.0).abs() < 1e-9);
        // Roughly 8.9 m by 11.1 m around the anchor
        assert!(bounds.size().x > 8.0 && bounds.size().x < 10.0);
        assert!(bounds.size().y > 10.0 && bounds.size().y < 12.0);
        assert!(bounds.center().truncate().length() < 1e-2);

        let mesh = HalfEdgePrimitive::build(primitive).expect("manifold prism");
        assert!(mesh.half_edges.values().all(|he| he.twin.is_some()));
        assert!((placed.anchor.longitude - 127.000_05).abs() < 1e-9);
    }

    #[test]
    fn height_prefers_the_largest_source() {
        let converter = converter(TilerOptions::default());
        assert_eq!(converter.height(&square(json!({ "HEIGHT": 2.0 }))), 3.0);
        assert_eq!(converter.height(&square(json!({ "GRND_FLR": 4 }))), 12.0);
        assert_eq!(converter.height(&square(json!({ "HEIGHT": "15.5", "GRND_FLR": 2 }))), 15.5);
        assert_eq!(converter.height(&square(json!({}))), 3.0);
    }

    #[test]
    fn flipped_coordinates_land_in_the_same_place() {
        let plain = converter(TilerOptions::default());
        let flipped = converter(TilerOptions {
            flip_coordinate: true,
            ..TilerOptions::default()
        });

        let mut swapped = square(json!({}));
        for point in &mut swapped.coordinates {
            point.swap(0, 1);
        }
        let a = plain.extrude("a", &square(json!({}))).expect("extrudes");
        let b = flipped.extrude("b", &swapped).expect("extrudes");
        assert_eq!(a.anchor, b.anchor);
    }

    #[test]
    fn degenerate_footprints_are_skipped() {
        let converter = converter(TilerOptions::default());
        let line = Footprint {
            coordinates: vec![[127.0, 37.0], [127.001, 37.0], [127.0, 37.0]],
            properties: properties(json!({ "name": "line" })),
            ..Footprint::default()
        };
        let square = Footprint {
            feature: 1,
            ..square(json!({}))
        };

        let mut diagnostics = Diagnostics::default();
        let scenes = converter.convert_footprints(&[line, square], &mut diagnostics);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].scene.name, "footprint_1");
        assert_eq!(diagnostics.skipped_instances.len(), 1);
        assert!(diagnostics.skipped_instances[0].starts_with("line"));
    }

    #[test]
    fn multi_polygons_become_one_building_per_polygon() {
        let document = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "name": "campus", "HEIGHT": 20.0 },
                    "geometry": {
                        "type": "MultiPolygon",
                        "coordinates": [
                            [[[127.0, 37.0], [127.0002, 37.0], [127.0002, 37.0002], [127.0, 37.0002], [127.0, 37.0]]],
                            [[[127.001, 37.0], [127.0012, 37.0], [127.0012, 37.0002], [127.001, 37.0]]]
                        ]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "GRND_FLR": 5 },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [
                            [[127.002, 37.0], [127.0024, 37.0], [127.0024, 37.0004], [127.002, 37.0004], [127.002, 37.0]],
                            [[127.0021, 37.0001], [127.0022, 37.0001], [127.0022, 37.0002], [127.0021, 37.0001]]
                        ]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "name": "lamp" },
                    "geometry": { "type": "Point", "coordinates": [127.003, 37.0] }
                }
            ]
        });

        let converter = converter(TilerOptions::default());
        let mut diagnostics = Diagnostics::default();
        let footprints = converter
            .parse_footprints(&document.to_string(), &mut diagnostics)
            .expect("valid GeoJSON");

        assert_eq!(footprints.len(), 3);
        assert_eq!(footprints[0].part, Some(0));
        assert_eq!(footprints[1].part, Some(1));
        assert_eq!(footprints[1].coordinates.len(), 4);
        assert_eq!(footprints[2].part, None);
        assert_eq!(footprints[2].coordinates.len(), 5);
        assert_eq!(diagnostics.skipped_instances.len(), 1);
        assert!(diagnostics.skipped_instances[0].starts_with("lamp"));

        let scenes = converter.convert_footprints(&footprints, &mut diagnostics);
        let names: Vec<&str> = scenes.iter().map(|placed| placed.scene.name.as_str()).collect();
        assert_eq!(names, vec!["campus_0", "campus_1", "footprint_1"]);
        assert!((converter.height(&footprints[1]) - 20.0).abs() < 1e-12);
        assert!((converter.height(&footprints[2]) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn malformed_documents_fail_the_input() {
        let converter = converter(TilerOptions::default());
        let result = converter.parse_footprints("[1, 2, 3]", &mut Diagnostics::default());
        assert!(matches!(result, Err(ConvertError::GeoJson(_))));
    }
}
