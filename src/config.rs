// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! TOML-backed run configuration. One immutable value is built up front and
//! passed by reference to every stage.

use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::{
        Result,
        TilerError,
    },
    lod::LevelOfDetail,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TilerOptions {
    /// EPSG code of the input coordinates
    pub srs:                    Option<String>,
    pub output:                 Option<PathBuf>,
    /// `tracing` filter directive for the binary
    pub log_level:              String,
    /// Swap x/y of incoming footprint coordinates
    pub flip_coordinate:        bool,
    /// Attribute used to name extruded buildings
    pub name_column:            String,
    /// Instance diagonals beyond this are reported
    pub geometric_error_limit:  f64,
    pub lod_levels:             Vec<i8>,
    /// Per-level overrides of the table's texture scale
    pub texture_scales:         BTreeMap<String, f32>,
    pub max_instances_per_node: usize,
    pub max_node_error:         f64,
    pub max_depth:              u8,
    /// Assign instances to every overlapping cell and clip them to it
    pub clip_to_cell:           bool,
    pub cut_tolerance:          f64,
    /// Worker threads for batching, 0 lets rayon decide
    pub threads:                usize,
    pub simplify:               SimplifyOptions,
    pub extrusion:              ExtrusionOptions,
    pub inputs:                 Vec<InputSource>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyOptions {
    pub max_normal_deviation_deg: f64,
    pub angle_weight:             f64,
    /// Stop once this fraction of the faces remains
    pub target_ratio:             f64,
    pub max_passes:               usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrusionOptions {
    pub height_column: String,
    pub floor_column:  String,
    pub floor_height:  f64,
    pub min_height:    f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// GeoJSON polygons and multi-polygons in geographic coordinates
    Footprints { path: PathBuf },
    /// glTF/GLB model placed at a fixed anchor
    Gltf {
        path:      PathBuf,
        longitude: f64,
        latitude:  f64,
        #[serde(default)]
        altitude:  f64,
        #[serde(default)]
        rotation:  f64,
    },
}

impl Default for TilerOptions {
    fn default() -> Self {
        Self {
            srs:                    None,
            output:                 None,
            log_level:              "info".into(),
            flip_coordinate:        false,
            name_column:            "name".into(),
            geometric_error_limit:  1000.0,
            lod_levels:             vec![0, 1, 2, 3],
            texture_scales:         BTreeMap::new(),
            max_instances_per_node: 16,
            max_node_error:         500.0,
            max_depth:              12,
            clip_to_cell:           false,
            cut_tolerance:          1e-6,
            threads:                0,
            simplify:               SimplifyOptions::default(),
            extrusion:              ExtrusionOptions::default(),
            inputs:                 Vec::new(),
        }
    }
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            max_normal_deviation_deg: 10.0,
            angle_weight:             2.0,
            target_ratio:             0.0,
            max_passes:               32,
        }
    }
}

impl Default for ExtrusionOptions {
    fn default() -> Self {
        Self {
            height_column: "HEIGHT".into(),
            floor_column:  "GRND_FLR".into(),
            floor_height:  3.0,
            min_height:    3.0,
        }
    }
}

impl TilerOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TilerError::io(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Rejects configurations the run cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.srs.as_deref().map_or(true, str::is_empty) {
            return Err(TilerError::MissingConfig("srs"));
        }
        if self.output.is_none() {
            return Err(TilerError::MissingConfig("output"));
        }
        if self.lod_levels.is_empty() {
            return Err(TilerError::invalid_config("lod_levels must not be empty"));
        }
        if let Some(level) = self
            .lod_levels
            .iter()
            .find(|&&level| LevelOfDetail::by_level(level).is_none())
        {
            return Err(TilerError::invalid_config(format!("unknown LOD level {level}")));
        }
        if self.max_instances_per_node == 0 {
            return Err(TilerError::invalid_config("max_instances_per_node must be positive"));
        }
        if !(0.0..=1.0).contains(&self.simplify.target_ratio) {
            return Err(TilerError::invalid_config("simplify.target_ratio must lie in [0, 1]"));
        }
        if self.cut_tolerance < 0.0 {
            return Err(TilerError::invalid_config("cut_tolerance must not be negative"));
        }
        for key in self.texture_scales.keys() {
            if key.parse::<i8>().is_err() {
                return Err(TilerError::invalid_config(format!(
                    "texture_scales key {key:?} is not a LOD level"
                )));
            }
        }
        Ok(())
    }

    /// Configured levels, finest first, with texture scale overrides applied
    pub fn levels(&self) -> Vec<LevelOfDetail> {
        let mut levels: Vec<_> = self
            .lod_levels
            .iter()
            .map(|&level| LevelOfDetail::by_level(level))
            .filter(|lod| !lod.is_none())
            .map(|mut lod| {
                if let Some(&scale) = self.texture_scales.get(&lod.level.to_string()) {
                    lod.texture_scale = scale;
                }
                lod
            })
            .collect();
        levels.sort_by_key(|lod| lod.level);
        levels.dedup_by_key(|lod| lod.level);
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_srs_and_output() {
        let options = TilerOptions::default();
        assert!(matches!(options.validate(), Err(TilerError::MissingConfig("srs"))));

        let options = TilerOptions {
            srs: Some("4326".into()),
            ..TilerOptions::default()
        };
        assert!(matches!(options.validate(), Err(TilerError::MissingConfig("output"))));
    }

    #[test]
    fn parses_toml_with_partial_sections() {
        let options = TilerOptions::from_toml(
            r#"
            srs = "4326"
            output = "out"
            lod_levels = [2, 0, 2]
            flip_coordinate = true

            [texture_scales]
            2 = 0.5

            [simplify]
            target_ratio = 0.25

            [[inputs]]
            type = "gltf"
            path = "model.glb"
            longitude = 127.0
            latitude = 37.5
            "#,
        )
        .expect("valid config");

        options.validate().expect("config should validate");
        assert!(options.flip_coordinate);
        assert_eq!(options.simplify.target_ratio, 0.25);
        assert_eq!(options.simplify.max_normal_deviation_deg, 10.0);
        assert_eq!(options.extrusion.floor_height, 3.0);

        let levels = options.levels();
        assert_eq!(levels.iter().map(|l| l.level).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(levels[1].texture_scale, 0.5);
        assert!(matches!(options.inputs[0], InputSource::Gltf { altitude, .. } if altitude == 0.0));
    }

    #[test]
    fn rejects_unknown_levels() {
        let options = TilerOptions {
            srs: Some("4326".into()),
            output: Some("out".into()),
            lod_levels: vec![0, 7],
            ..TilerOptions::default()
        };
        assert!(matches!(options.validate(), Err(TilerError::InvalidConfig(_))));
    }
}
