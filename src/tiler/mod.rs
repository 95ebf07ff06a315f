// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

mod info;
mod node;

use glam::DVec3;
use indicatif::{
    ParallelProgressIterator,
    ProgressBar,
};
use rayon::iter::{
    IntoParallelRefIterator,
    ParallelIterator,
};
use tracing::{
    debug,
    info,
    instrument,
};

pub use self::{
    info::TileInfo,
    node::{
        RefineType,
        TileNode,
        TileTree,
    },
};
use crate::{
    batch::{
        Batched,
        Batcher,
    },
    config::TilerOptions,
    diagnostics::Diagnostics,
    error::{
        Result,
        TilerError,
    },
    geometry::{
        globe,
        BoundingBox,
    },
    lod::LevelOfDetail,
    scene::PlacedScene,
    tileset::{
        self,
        Tileset,
    },
};

/// Everything a run produces
#[derive(Debug)]
pub struct TilingOutput {
    pub tree:        TileTree,
    pub tileset:     Tileset,
    pub diagnostics: Diagnostics,
}

pub struct Tiler {
    options: TilerOptions,
    levels:  Vec<LevelOfDetail>,
}

impl Tiler {
    pub fn new(options: TilerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            levels: options.levels(),
            options,
        })
    }

    #[inline]
    pub const fn options(&self) -> &TilerOptions {
        &self.options
    }

    #[inline]
    pub fn levels(&self) -> &[LevelOfDetail] {
        &self.levels
    }

    #[instrument(skip_all, fields(scenes = scenes.len()))]
    pub fn run(
        &self,
        scenes: Vec<PlacedScene>,
    ) -> Result<TilingOutput> {
        let begin_time = std::time::Instant::now();
        let mut diagnostics = Diagnostics::default();

        let mut tree = self.build_tree(scenes, &mut diagnostics)?;
        self.batch(&mut tree, &mut diagnostics)?;
        tree.release_scenes();
        let tileset = tileset::assemble(&tree);

        info!(
            nodes = tree.nodes.len(),
            contents = tree.content_count(),
            skipped = diagnostics.skipped_units.len(),
            elapsed_ms = begin_time.elapsed().as_millis(),
            "tiling finished"
        );
        Ok(TilingOutput {
            tree,
            tileset,
            diagnostics,
        })
    }

    /// Turns placed scenes into tile infos, dropping empty ones
    pub fn ingest(
        &self,
        scenes: Vec<PlacedScene>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<TileInfo> {
        scenes
            .into_iter()
            .filter_map(|placed| {
                let name = placed.scene.name.clone();
                let Some(info) = TileInfo::new(placed) else {
                    diagnostics.skip_instance(&name, "scene has no geometry");
                    return None;
                };
                let diagonal = info.diagonal();
                if diagonal > self.options.geometric_error_limit {
                    diagnostics.oversized(&name, diagonal, self.options.geometric_error_limit);
                }
                Some(info)
            })
            .collect()
    }

    /// Computes the shared root frame and splits the instances into a
    /// quadtree
    #[instrument(skip_all)]
    pub fn build_tree(
        &self,
        scenes: Vec<PlacedScene>,
        diagnostics: &mut Diagnostics,
    ) -> Result<TileTree> {
        let mut infos = self.ingest(scenes, diagnostics);
        if infos.is_empty() {
            return Err(TilerError::EmptyInput);
        }

        let mut world = BoundingBox::new();
        for info in &infos {
            world.grow_to_include(&info.world_box);
        }
        let center = world.center();
        let root_transform = globe::placement_at(DVec3::new(center.x, center.y, center.z), 0.0);
        let root_inverse = root_transform.inverse();

        let mut cell = BoundingBox::new();
        for info in &mut infos {
            info.attach_to_root(&root_inverse);
            cell.grow_to_include(&info.root_box);
        }

        let mut root = TileNode::new(
            "R".into(),
            None,
            0,
            cell,
            (0..infos.len()).collect(),
            &infos,
            self.options.clip_to_cell,
        );
        root.transform = root_transform;

        let mut tree = TileTree {
            nodes: vec![root],
            infos,
            root_transform,
        };
        self.split(&mut tree);
        tree.validate()?;

        info!(
            instances = tree.infos.len(),
            nodes = tree.nodes.len(),
            leaves = tree.leaves().count(),
            depth = tree.depth(),
            "tile tree built"
        );
        Ok(tree)
    }

    fn should_split(
        &self,
        node: &TileNode,
    ) -> bool {
        let count = node.instances.len();
        count > 1
            && node.depth < self.options.max_depth
            && (count > self.options.max_instances_per_node || node.geometric_error > self.options.max_node_error)
    }

    /// Quadrant an instance belongs to by its center, x-major
    fn quadrant_of(
        cell: &BoundingBox,
        bounds: &BoundingBox,
    ) -> usize {
        let (center, split) = (bounds.center(), cell.center());
        usize::from(center.x >= split.x) + 2 * usize::from(center.y >= split.y)
    }

    /// Top-down split with an explicit stack
    fn split(
        &self,
        tree: &mut TileTree,
    ) {
        let clip = self.options.clip_to_cell;
        let mut search_nodes = vec![TileTree::ROOT];

        while let Some(idx) = search_nodes.pop() {
            let node = &tree.nodes[idx];
            if !self.should_split(node) {
                continue;
            }

            let quadrants = node.cell.quadrants_xy();
            let mut members: [Vec<usize>; 4] = Default::default();
            for &instance in &node.instances {
                let bounds = &tree.infos[instance].root_box;
                let overlapping: Vec<usize> = if clip {
                    (0..4).filter(|&q| bounds.overlaps_xy(&quadrants[q])).collect()
                } else {
                    Vec::new()
                };
                if overlapping.is_empty() {
                    members[Self::quadrant_of(&node.cell, bounds)].push(instance);
                } else {
                    for q in overlapping {
                        members[q].push(instance);
                    }
                }
            }

            let (code, depth, transform) = (node.code.clone(), node.depth, node.transform);
            for (digit, (cell, instances)) in quadrants.into_iter().zip(members).enumerate() {
                if instances.is_empty() {
                    continue;
                }
                let mut child = TileNode::new(
                    format!("{code}{digit}"),
                    Some(idx),
                    depth + 1,
                    cell,
                    instances,
                    &tree.infos,
                    clip,
                );
                child.transform = transform;

                let child_idx = tree.nodes.len();
                tree.nodes.push(child);
                tree.nodes[idx].children.push(child_idx);
                search_nodes.push(child_idx);
            }

            debug!(
                code = %code,
                children = tree.nodes[idx].children.len(),
                error = tree.nodes[idx].geometric_error,
                "node split"
            );
        }
    }

    /// One unit per (leaf, LOD) on a bounded pool; failing units are skipped
    #[instrument(skip_all)]
    fn batch(
        &self,
        tree: &mut TileTree,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let units: Vec<(usize, LevelOfDetail)> = tree
            .leaves()
            .flat_map(|leaf| self.levels.iter().map(move |lod| (leaf, *lod)))
            .collect();
        info!(units = units.len(), threads = self.options.threads, "batching contents");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .thread_name(|i| format!("batch-{i}"))
            .build()?;
        let batcher = Batcher::new(&self.options);
        let bar = ProgressBar::new(u64::try_from(units.len()).unwrap_or(u64::MAX));

        let shared: &TileTree = tree;
        let results: Vec<_> = pool.install(|| {
            units
                .par_iter()
                .progress_with(bar)
                .map(|&(leaf, lod)| (leaf, lod, batcher.batch(shared, leaf, &lod)))
                .collect()
        });

        for (leaf, lod, result) in results {
            match result {
                Ok(Batched {
                    content,
                    skipped,
                }) => {
                    for (instance, err) in skipped {
                        diagnostics.skip_instance(format!("{instance} in {}", content.name), err);
                    }
                    if content.is_empty() {
                        debug!(content = %content.name, "empty content dropped");
                    } else {
                        tree.nodes[leaf].contents.push(content);
                    }
                },
                Err(err) if err.is_recoverable() => {
                    diagnostics.skip_unit(format!("{}_L{}", tree.nodes[leaf].code, lod.level), err);
                },
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use super::*;
    use crate::scene::{
        GeoAnchor,
        Mesh,
        Primitive,
        Scene,
    };

    fn options() -> TilerOptions {
        TilerOptions {
            srs: Some("4326".into()),
            output: Some("out".into()),
            lod_levels: vec![0, 1],
            ..TilerOptions::default()
        }
    }

    /// A `size` metre box standing on the ground at the given position
    fn building(
        name: &str,
        longitude: f64,
        latitude: f64,
        size: f64,
    ) -> PlacedScene {
        let mut scene = Scene::new(name);
        let positions = (0..8)
            .map(|i| {
                DVec3::new(
                    f64::from(i & 1) * size,
                    f64::from((i >> 1) & 1) * size,
                    f64::from((i >> 2) & 1) * size,
                )
            })
            .collect();
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6,
            0, 1, 4, 1, 5, 4, 2, 6, 3, 3, 6, 7,
            0, 4, 2, 2, 4, 6, 1, 3, 5, 3, 7, 5,
        ];
        scene.root.meshes.push(Mesh {
            primitives: vec![Primitive {
                positions,
                indices,
                ..Primitive::default()
            }],
        });
        PlacedScene::new(scene, GeoAnchor::new(longitude, latitude, 0.0))
    }

    fn grid_of_buildings(n: u32) -> Vec<PlacedScene> {
        (0..n * n)
            .map(|i| {
                building(
                    &format!("b{i}"),
                    127.0 + f64::from(i % n) * 0.001,
                    37.0 + f64::from(i / n) * 0.001,
                    10.0,
                )
            })
            .collect()
    }

    #[test]
    fn single_instance_makes_a_single_node() {
        let tiler = Tiler::new(options()).expect("valid options");
        let output = tiler
            .run(vec![building("solo", 127.0, 37.0, 10.0)])
            .expect("tiling succeeds");

        let tree = &output.tree;
        assert_eq!(tree.nodes.len(), 1);
        let root = tree.root();
        assert_eq!(root.code, "R");
        assert_eq!(root.refine, RefineType::Replace);
        assert!((root.geometric_error - 300f64.sqrt()).abs() < 1e-6);
        assert_eq!(root.contents.len(), 2);
        assert_eq!(root.contents[0].name, "R_L0");
        assert_eq!(root.contents[1].name, "R_L1");
        assert_eq!(root.contents[0].batched.triangle_count(), 12);
        assert!(output.diagnostics.is_clean());

        // The root frame is centered on the instance
        assert!(root.bounding_volume.center().truncate().length() < 0.1);
    }

    #[test]
    fn crowded_nodes_split_into_quadrants() {
        let tiler = Tiler::new(TilerOptions {
            max_instances_per_node: 4,
            ..options()
        })
        .expect("valid options");
        let tree = tiler
            .build_tree(grid_of_buildings(4), &mut Diagnostics::default())
            .expect("tree");

        assert!(tree.nodes.len() > 1);
        tree.validate().expect("consistent tree");
        for leaf in tree.leaves() {
            let node = &tree.nodes[leaf];
            assert!(node.instances.len() <= 4, "{} holds {}", node.code, node.instances.len());
            assert!(node.code.starts_with('R'));
        }
        let root = tree.root();
        assert_eq!(root.children.len(), 4);
        let assigned: usize = root.children.iter().map(|&c| tree.nodes[c].instances.len()).sum();
        assert_eq!(assigned, 16);
        assert!(tree.find("R0").is_some());
        assert_eq!(tree.relative_transform(root.children[0]), glam::DMat4::IDENTITY);
    }

    #[test]
    fn geometric_error_never_grows_downwards() {
        let mut scenes = grid_of_buildings(3);
        scenes.push(building("tower", 127.0005, 37.0005, 120.0));
        let tiler = Tiler::new(TilerOptions {
            max_instances_per_node: 2,
            max_node_error: 50.0,
            ..options()
        })
        .expect("valid options");
        let tree = tiler
            .build_tree(scenes, &mut Diagnostics::default())
            .expect("tree");

        for node in &tree.nodes {
            if let Some(parent) = node.parent {
                assert!(node.geometric_error <= tree.nodes[parent].geometric_error);
            }
        }
        assert!((tree.root().geometric_error - 120.0 * 3f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn clipped_cells_keep_content_inside() {
        let tiler = Tiler::new(TilerOptions {
            max_instances_per_node: 1,
            max_depth: 1,
            clip_to_cell: true,
            lod_levels: vec![0],
            ..options()
        })
        .expect("valid options");
        // Two wide slabs straddling the root cell center
        let scenes = vec![
            building("west", 127.0, 37.0, 40.0),
            building("east", 127.0003, 37.0, 40.0),
        ];
        let output = tiler.run(scenes).expect("tiling succeeds");
        let tree = &output.tree;
        assert!(output.diagnostics.skipped_units.is_empty());

        for leaf in tree.leaves() {
            let node = &tree.nodes[leaf];
            for content in &node.contents {
                let bounds = content.bounding_box;
                assert!(bounds.min().x >= node.cell.min().x - 1e-6, "{}", content.name);
                assert!(bounds.max().x <= node.cell.max().x + 1e-6, "{}", content.name);
                assert!(bounds.min().y >= node.cell.min().y - 1e-6, "{}", content.name);
                assert!(bounds.max().y <= node.cell.max().y + 1e-6, "{}", content.name);
            }
        }
    }

    /// A building whose mesh points past its vertex list
    fn broken_building(
        name: &str,
        longitude: f64,
        latitude: f64,
    ) -> PlacedScene {
        let mut placed = building(name, longitude, latitude, 10.0);
        placed.scene.root.meshes[0].primitives[0]
            .indices
            .extend_from_slice(&[0, 1, 99]);
        placed
    }

    #[test]
    fn nodes_carry_the_largest_instance_error() {
        let tiler = Tiler::new(options()).expect("valid options");
        let output = tiler
            .run(vec![
                building("small", 127.0, 37.0, 5.0),
                building("large", 127.0002, 37.0001, 20.0),
                building("medium", 127.0001, 37.0002, 10.0),
            ])
            .expect("tiling succeeds");

        let tree = &output.tree;
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.root().instances.len(), 3);
        assert!((tree.root().geometric_error - 20.0 * 3f64.sqrt()).abs() < 1e-6);
        assert_eq!(tree.root().contents[0].instances.len(), 3);
    }

    #[test]
    fn broken_instance_is_skipped_and_neighbours_kept() {
        let tiler = Tiler::new(TilerOptions {
            lod_levels: vec![0],
            ..options()
        })
        .expect("valid options");
        let output = tiler
            .run(vec![building("good", 127.0, 37.0, 10.0), broken_building("bad", 127.0001, 37.0)])
            .expect("tiling succeeds");

        let root = output.tree.root();
        assert_eq!(root.contents.len(), 1);
        assert_eq!(root.contents[0].instances, vec!["good".to_owned()]);
        assert_eq!(output.diagnostics.skipped_instances.len(), 1);
        assert!(output.diagnostics.skipped_instances[0].starts_with("bad in R_L0"));
        assert!(output.diagnostics.skipped_units.is_empty());
    }

    #[test]
    fn failing_unit_leaves_sibling_leaves_intact() {
        let tiler = Tiler::new(TilerOptions {
            max_instances_per_node: 1,
            lod_levels: vec![0],
            ..options()
        })
        .expect("valid options");
        let output = tiler
            .run(vec![building("good", 127.0, 37.0, 10.0), broken_building("bad", 127.01, 37.01)])
            .expect("tiling succeeds");

        let tree = &output.tree;
        assert!(tree.nodes.len() > 1);
        assert_eq!(output.diagnostics.skipped_units.len(), 1);
        assert!(output.diagnostics.skipped_instances.is_empty());
        let leaves: Vec<_> = tree.leaves().map(|leaf| &tree.nodes[leaf]).collect();
        let good = leaves
            .iter()
            .find(|node| node.instances.len() == 1 && tree.infos[node.instances[0]].name == "good")
            .expect("leaf holding the good instance");
        assert_eq!(good.contents.len(), 1);
        assert_eq!(good.contents[0].instances, vec!["good".to_owned()]);
        let bad = leaves
            .iter()
            .find(|node| node.instances.len() == 1 && tree.infos[node.instances[0]].name == "bad")
            .expect("leaf holding the bad instance");
        assert!(bad.contents.is_empty());
        assert!(output.diagnostics.skipped_units[0].starts_with(&format!("{}_L0", bad.code)));
    }

    #[test]
    fn oversized_and_empty_instances_are_reported() {
        let tiler = Tiler::new(TilerOptions {
            geometric_error_limit: 100.0,
            ..options()
        })
        .expect("valid options");
        let empty = PlacedScene::new(Scene::new("empty"), GeoAnchor::new(127.0, 37.0, 0.0));
        let mut diagnostics = Diagnostics::default();
        let tree = tiler
            .build_tree(vec![empty, building("huge", 127.0, 37.0, 200.0)], &mut diagnostics)
            .expect("tree");
        assert_eq!(tree.infos.len(), 1);
        assert_eq!(diagnostics.skipped_instances.len(), 1);
        assert_eq!(diagnostics.oversized.len(), 1);

        let empty = PlacedScene::new(Scene::new("empty"), GeoAnchor::new(127.0, 37.0, 0.0));
        assert!(matches!(
            tiler.build_tree(vec![empty], &mut Diagnostics::default()),
            Err(TilerError::EmptyInput)
        ));
    }
}
