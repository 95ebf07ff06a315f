// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Writes a finished run to disk: one `.bin` per content, its textures as
//! PNG, `tileset.json` and, when something was skipped, `diagnostics.json`.

use std::{
    fs::File,
    io::{
        BufWriter,
        Write,
    },
    ops::{
        Deref,
        DerefMut,
    },
    path::{
        Path,
        PathBuf,
    },
};

use tracing::{
    debug,
    info,
    instrument,
};

use crate::{
    batch::ContentInfo,
    error::{
        Result,
        TilerError,
    },
    scene::{
        PixelFormat,
        Texture,
    },
    tiler::TilingOutput,
};

/// Keeps a content's textures decoded for as long as it lives. Dropping it
/// releases them, also when a write failed half way.
struct ResidentTextures<'a>(&'a mut ContentInfo);

impl Deref for ResidentTextures<'_> {
    type Target = ContentInfo;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl DerefMut for ResidentTextures<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}

impl Drop for ResidentTextures<'_> {
    fn drop(&mut self) {
        self.0.release_textures();
    }
}

const fn color_type(format: PixelFormat) -> png::ColorType {
    match format {
        PixelFormat::Gray8 => png::ColorType::Grayscale,
        PixelFormat::GrayAlpha8 => png::ColorType::GrayscaleAlpha,
        PixelFormat::Rgb8 => png::ColorType::Rgb,
        PixelFormat::Rgba8 => png::ColorType::Rgba,
    }
}

fn write_png(
    path: &Path,
    texture: &Texture,
    format: PixelFormat,
    pixels: &[u8],
) -> Result<()> {
    let png_error = |source| TilerError::Png {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(|source| TilerError::io(path, source))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), texture.width, texture.height);
    encoder.set_color(color_type(format));
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header().map_err(png_error)?;
    writer.write_image_data(pixels).map_err(png_error)?;
    writer.finish().map_err(png_error)
}

pub struct Exporter {
    output: PathBuf,
}

impl Exporter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    #[inline]
    pub fn output(&self) -> &Path {
        &self.output
    }

    #[instrument(skip_all, fields(output = %self.output.display()))]
    pub fn write(
        &self,
        run: &mut TilingOutput,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.output).map_err(|source| TilerError::io(&self.output, source))?;

        let mut files = 0usize;
        let failure = 'write: {
            for node in &mut run.tree.nodes {
                for content in &mut node.contents {
                    match self.write_content(ResidentTextures(&mut *content)) {
                        Ok(written) => {
                            files += written;
                            content.clear();
                        },
                        Err(err) => break 'write Some(err),
                    }
                }
            }
            None
        };
        if let Some(err) = failure {
            run.tree
                .nodes
                .iter_mut()
                .flat_map(|node| &mut node.contents)
                .for_each(ContentInfo::release_textures);
            return Err(err);
        }

        let tileset = self.output.join("tileset.json");
        std::fs::write(&tileset, run.tileset.to_json()?).map_err(|source| TilerError::io(&tileset, source))?;

        if !run.diagnostics.is_clean() {
            let path = self.output.join("diagnostics.json");
            let json = serde_json::to_string_pretty(&run.diagnostics)?;
            std::fs::write(&path, json).map_err(|source| TilerError::io(&path, source))?;
        }

        info!(files, "export finished");
        Ok(())
    }

    /// Returns how many files were written
    fn write_content(
        &self,
        content: ResidentTextures<'_>,
    ) -> Result<usize> {
        let path = self.output.join(content.uri());
        let file = File::create(&path).map_err(|source| TilerError::io(&path, source))?;
        let mut writer = BufWriter::new(file);
        content
            .batched
            .write_to(&mut writer)
            .and_then(|()| writer.flush())
            .map_err(|source| TilerError::io(&path, source))?;
        debug!(path = %path.display(), triangles = content.batched.triangle_count(), "content written");

        let mut files = 1;
        for material in &content.batched.materials {
            for (i, texture) in material.textures.iter().enumerate() {
                let (Some(format), Some(pixels)) = (texture.format, texture.pixels.as_deref()) else {
                    continue;
                };
                let path = self.output.join(format!("{}_{}_{i}.png", content.name, material.id));
                write_png(&path, texture, format, pixels)?;
                files += 1;
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use super::*;
    use crate::{
        config::TilerOptions,
        scene::{
            GeoAnchor,
            Material,
            Mesh,
            PlacedScene,
            Primitive,
            Scene,
        },
        tiler::Tiler,
    };

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lodtiler-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn run(pixels: Vec<u8>) -> TilingOutput {
        let mut scene = Scene::new("slab");
        let mut material = Material::new(1, "concrete");
        material
            .textures
            .push(Texture::from_pixels("concrete.png", 2, 2, PixelFormat::Rgb8, pixels));
        scene.materials.push(material);
        scene.root.meshes.push(Mesh {
            primitives: vec![Primitive {
                positions: vec![DVec3::ZERO, DVec3::new(4.0, 0.0, 0.0), DVec3::new(4.0, 4.0, 1.0), DVec3::new(0.0, 4.0, 1.0)],
                indices: vec![0, 1, 2, 0, 2, 3],
                material: 1,
                ..Primitive::default()
            }],
        });

        Tiler::new(TilerOptions {
            srs: Some("4326".into()),
            output: Some("out".into()),
            lod_levels: vec![0],
            threads: 1,
            ..TilerOptions::default()
        })
        .expect("valid options")
        .run(vec![PlacedScene::new(scene, GeoAnchor::new(127.0, 37.0, 0.0))])
        .expect("run")
    }

    fn all_released(run: &TilingOutput) -> bool {
        run.tree
            .nodes
            .iter()
            .flat_map(|node| &node.contents)
            .flat_map(|content| &content.batched.materials)
            .flat_map(|material| &material.textures)
            .all(|texture| !texture.is_resident())
    }

    #[test]
    fn writes_contents_textures_and_tileset() {
        let dir = scratch("export");
        let mut output = run(vec![200; 12]);
        Exporter::new(&dir).write(&mut output).expect("export");

        assert!(dir.join("tileset.json").is_file());
        assert!(dir.join("R_L0.bin").is_file());
        assert!(dir.join("R_L0_0_0.png").is_file());
        assert!(!dir.join("diagnostics.json").exists());
        assert!(all_released(&output));

        let bytes = std::fs::read(dir.join("R_L0.bin")).expect("content file");
        assert_eq!(bytes[0..4], 1u32.to_le_bytes());

        let json = std::fs::read_to_string(dir.join("tileset.json")).expect("tileset");
        assert!(json.contains("R_L0.bin"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn written_contents_and_scenes_are_emptied() {
        let dir = scratch("lifecycle");
        let mut output = run(vec![200; 12]);
        assert!(output.tree.infos.iter().all(|info| info.scene.is_empty()));
        assert_eq!(output.tree.infos[0].scene.name, "slab");

        Exporter::new(&dir).write(&mut output).expect("export");
        let contents: Vec<_> = output.tree.nodes.iter().flat_map(|node| &node.contents).collect();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].name, "R_L0");
        assert!(contents[0].is_empty());
        assert!(contents[0].instances.is_empty());
        assert!(contents[0].bounding_box.is_empty());
        assert!(dir.join("R_L0.bin").is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn textures_are_released_when_encoding_fails() {
        let dir = scratch("broken-texture");
        let mut output = run(vec![200; 5]);
        let err = Exporter::new(&dir).write(&mut output).expect_err("short pixel buffer");

        assert!(matches!(err, TilerError::Png { .. }));
        assert!(all_released(&output));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
