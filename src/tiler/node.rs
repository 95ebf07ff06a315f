// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::DMat4;
use serde::{
    Deserialize,
    Serialize,
};

use super::info::TileInfo;
use crate::{
    batch::ContentInfo,
    error::{
        Result,
        TilerError,
    },
    geometry::BoundingBox,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefineType {
    Add,
    #[default]
    Replace,
}

#[derive(Clone, Debug)]
pub struct TileNode {
    /// "R" for the root, one quadrant digit per level below it
    pub code:            String,
    pub depth:           u8,
    pub parent:          Option<usize>,
    pub children:        Vec<usize>,
    /// Root frame
    pub bounding_volume: BoundingBox,
    /// Region this node covers in the root frame
    pub cell:            BoundingBox,
    pub geometric_error: f64,
    pub refine:          RefineType,
    /// Indices into [`TileTree::infos`], the whole subtree's instances
    pub instances:       Vec<usize>,
    /// Root frame to ECEF
    pub transform:       DMat4,
    pub contents:        Vec<ContentInfo>,
}

impl TileNode {
    pub(crate) fn new(
        code: String,
        parent: Option<usize>,
        depth: u8,
        cell: BoundingBox,
        instances: Vec<usize>,
        infos: &[TileInfo],
        clip_to_cell: bool,
    ) -> Self {
        let mut bounding_volume = BoundingBox::new();
        let mut geometric_error = 0f64;
        for info in instances.iter().map(|&i| &infos[i]) {
            if clip_to_cell {
                bounding_volume.grow_to_include(&info.root_box.clamped_xy(&cell));
            } else {
                bounding_volume.grow_to_include(&info.root_box);
            }
            geometric_error = geometric_error.max(info.diagonal());
        }

        Self {
            code,
            depth,
            parent,
            children: Vec::new(),
            bounding_volume,
            cell,
            geometric_error,
            refine: RefineType::Replace,
            instances,
            transform: DMat4::IDENTITY,
            contents: Vec::new(),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Flat arena of tile nodes, root first
#[derive(Clone, Debug)]
pub struct TileTree {
    pub nodes:          Vec<TileNode>,
    pub infos:          Vec<TileInfo>,
    /// Root frame to ECEF, shared by every node
    pub root_transform: DMat4,
}

impl TileTree {
    pub const ROOT: usize = 0;

    pub fn root(&self) -> &TileNode {
        &self.nodes[Self::ROOT]
    }

    pub fn node(
        &self,
        index: usize,
    ) -> Option<&TileNode> {
        self.nodes.get(index)
    }

    pub fn parent(
        &self,
        index: usize,
    ) -> Option<&TileNode> {
        self.nodes.get(index)?.parent.and_then(|parent| self.nodes.get(parent))
    }

    pub fn find(
        &self,
        code: &str,
    ) -> Option<&TileNode> {
        self.nodes.iter().find(|node| node.code == code)
    }

    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_leaf())
            .map(|(index, _)| index)
    }

    pub fn depth(&self) -> u8 {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or_default()
    }

    /// Frees the source scenes once every content has been batched
    pub fn release_scenes(&mut self) {
        self.infos.iter_mut().for_each(|info| info.scene.clear());
    }

    pub fn content_count(&self) -> usize {
        self.nodes.iter().map(|node| node.contents.len()).sum()
    }

    /// Absolute at the root, relative to the parent elsewhere
    pub fn relative_transform(
        &self,
        index: usize,
    ) -> DMat4 {
        let node = &self.nodes[index];
        match self.parent(index) {
            Some(parent) if parent.transform == node.transform => DMat4::IDENTITY,
            Some(parent) => parent.transform.inverse() * node.transform,
            None => node.transform,
        }
    }

    /// Parent links, codes and monotonic geometric error
    pub fn validate(&self) -> Result<()> {
        let broken = |node: &TileNode, reason| {
            Err(TilerError::InvalidTree {
                code: node.code.clone(),
                reason,
            })
        };

        for (index, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                let Some(child_node) = self.nodes.get(child) else {
                    return broken(node, "child index out of range");
                };
                if child_node.parent != Some(index) {
                    return broken(child_node, "parent link does not point back");
                }
                if child_node.geometric_error > node.geometric_error {
                    return broken(child_node, "child error exceeds parent error");
                }
                if child_node.code.len() != node.code.len() + 1 || !child_node.code.starts_with(&node.code) {
                    return broken(child_node, "code does not extend the parent's");
                }
            }
            if node.parent.is_none() && index != Self::ROOT {
                return broken(node, "detached node");
            }
        }
        Ok(())
    }
}
