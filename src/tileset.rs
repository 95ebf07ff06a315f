// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! `tileset.json` descriptor built from a finished tile tree.

use glam::DMat4;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::Result,
    geometry::BoundingBox,
    tiler::{
        RefineType,
        TileTree,
    },
};

const VERSION: &str = "1.1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    pub asset:           Asset,
    pub geometric_error: f64,
    pub root:            Tile,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub version:   String,
    pub generator: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    pub refine:          RefineType,
    /// Column-major
    pub transform:       [f64; 16],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content:         Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents:        Option<Vec<Content>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children:        Vec<Tile>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    /// Center followed by the x, y and z half axes
    #[serde(rename = "box")]
    pub oriented_box: [f64; 12],
}

impl From<&BoundingBox> for BoundingVolume {
    fn from(bounds: &BoundingBox) -> Self {
        let center = bounds.center();
        let half = bounds.size() * 0.5;
        #[rustfmt::skip]
        let oriented_box = if bounds.is_empty() {
            [0.0; 12]
        } else {
            [
                center.x, center.y, center.z,
                half.x, 0.0, 0.0,
                0.0, half.y, 0.0,
                0.0, 0.0, half.z,
            ]
        };
        Self {
            oriented_box,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub uri: String,
}

fn assemble_tile(
    tree: &TileTree,
    index: usize,
) -> Tile {
    let node = &tree.nodes[index];
    let mut uris: Vec<Content> = node
        .contents
        .iter()
        .map(|content| Content {
            uri: content.uri(),
        })
        .collect();

    let (content, contents) = match uris.len() {
        0 => (None, None),
        1 => (uris.pop(), None),
        _ => (None, Some(uris)),
    };

    Tile {
        bounding_volume: BoundingVolume::from(&node.bounding_volume),
        geometric_error: node.geometric_error,
        refine: node.refine,
        transform: tree.relative_transform(index).to_cols_array(),
        content,
        contents,
        children: node
            .children
            .iter()
            .map(|&child| assemble_tile(tree, child))
            .collect(),
    }
}

/// Depth-first walk of the tree; the tree is not modified
pub fn assemble(tree: &TileTree) -> Tileset {
    let root = assemble_tile(tree, TileTree::ROOT);
    Tileset {
        asset: Asset {
            version:   VERSION.into(),
            generator: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")).into(),
        },
        geometric_error: root.geometric_error,
        root,
    }
}

impl Tileset {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Absolute transform of the root tile
    pub fn root_transform(&self) -> DMat4 {
        DMat4::from_cols_array(&self.root.transform)
    }
}
