// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Source formats turned into placed scenes.

mod extrude;
mod gltf;
mod triangulate;

use std::path::Path;

pub use self::{
    extrude::{
        ExtrusionConverter,
        Footprint,
    },
    gltf::{
        scene_from_document,
        GltfConverter,
    },
};
use crate::{
    config::{
        InputSource,
        TilerOptions,
    },
    diagnostics::Diagnostics,
    error::{
        ConvertError,
        Result,
        TilerError,
    },
    scene::{
        GeoAnchor,
        PlacedScene,
    },
};

/// Coordinate systems footprints may be expressed in
const GEOGRAPHIC_SRS: [&str; 3] = ["4326", "EPSG:4326", "WGS84"];

#[derive(Clone, Debug)]
pub enum Converter {
    Extrusion(ExtrusionConverter),
    Gltf(GltfConverter),
}

impl Converter {
    pub fn new(
        source: &InputSource,
        options: &TilerOptions,
    ) -> std::result::Result<Self, ConvertError> {
        match source {
            InputSource::Footprints { path } => {
                let srs = options.srs.as_deref().unwrap_or_default();
                if !GEOGRAPHIC_SRS.iter().any(|known| known.eq_ignore_ascii_case(srs)) {
                    return Err(ConvertError::UnsupportedSrs(srs.into()));
                }
                Ok(Self::Extrusion(ExtrusionConverter::new(path.clone(), options)))
            },
            InputSource::Gltf {
                path,
                longitude,
                latitude,
                altitude,
                rotation,
            } => {
                let anchor = GeoAnchor {
                    longitude: *longitude,
                    latitude:  *latitude,
                    altitude:  *altitude,
                    rotation:  *rotation,
                };
                Ok(Self::Gltf(GltfConverter::new(path.clone(), anchor)))
            },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Extrusion(converter) => converter.path(),
            Self::Gltf(converter) => converter.path(),
        }
    }

    pub fn convert(
        &self,
        diagnostics: &mut Diagnostics,
    ) -> std::result::Result<Vec<PlacedScene>, ConvertError> {
        match self {
            Self::Extrusion(converter) => converter.convert(diagnostics),
            Self::Gltf(converter) => Ok(vec![converter.convert()?]),
        }
    }
}

/// Converts every configured input. A source that fails as a whole is
/// recorded and skipped.
#[tracing::instrument(skip_all, fields(inputs = options.inputs.len()))]
pub fn convert_inputs(
    options: &TilerOptions,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<PlacedScene>> {
    let mut scenes = Vec::new();
    for source in &options.inputs {
        let converted = Converter::new(source, options).and_then(|converter| {
            tracing::info!(path = %converter.path().display(), "converting");
            converter.convert(diagnostics)
        });
        match converted {
            Ok(converted) => scenes.extend(converted),
            Err(err @ ConvertError::UnsupportedSrs(_)) => {
                return Err(TilerError::Convert {
                    input:  format!("{source:?}"),
                    source: err,
                });
            },
            Err(err) => diagnostics.skip_instance(format!("{source:?}"), err),
        }
    }

    tracing::info!(scenes = scenes.len(), "inputs converted");
    Ok(scenes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projected_footprints_are_rejected() {
        let options = TilerOptions {
            srs: Some("5186".into()),
            inputs: vec![InputSource::Footprints {
                path: "buildings.json".into(),
            }],
            ..TilerOptions::default()
        };
        let mut diagnostics = Diagnostics::default();
        let err = convert_inputs(&options, &mut diagnostics).expect_err("unsupported srs");
        assert!(matches!(err, TilerError::Convert { source: ConvertError::UnsupportedSrs(_), .. }));
    }

    #[test]
    fn missing_files_are_recorded() {
        let options = TilerOptions {
            srs: Some("EPSG:4326".into()),
            inputs: vec![
                InputSource::Footprints {
                    path: "does/not/exist.json".into(),
                },
                InputSource::Gltf {
                    path:      "does/not/exist.glb".into(),
                    longitude: 127.0,
                    latitude:  37.0,
                    altitude:  0.0,
                    rotation:  0.0,
                },
            ],
            ..TilerOptions::default()
        };
        let mut diagnostics = Diagnostics::default();
        let scenes = convert_inputs(&options, &mut diagnostics).expect("not fatal");
        assert!(scenes.is_empty());
        assert_eq!(diagnostics.skipped_instances.len(), 2);
    }
}
