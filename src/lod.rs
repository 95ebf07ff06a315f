// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use rgb::RGB;

/// One simplification tier. Coarser levels tolerate more error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelOfDetail {
    pub level:           i8,
    pub geometric_error: f64,
    pub texture_scale:   f32,
    pub debug_color:     RGB<f32>,
}

impl LevelOfDetail {
    pub const NONE: Self = Self::row(-1, 0.0, 1.0, [1.0, 1.0, 1.0]);

    const TABLE: [Self; 7] = [
        Self::row(0, 0.0, 1.0, [1.0, 0.0, 0.0]),
        Self::row(1, 2.0, 0.5, [1.0, 1.0, 0.0]),
        Self::row(2, 4.0, 0.25, [0.25, 1.0, 0.5]),
        Self::row(3, 8.0, 0.125, [0.0, 1.0, 1.0]),
        Self::row(4, 16.0, 0.0625, [0.25, 0.25, 0.0]),
        Self::row(5, 32.0, 0.031_25, [0.0, 0.25, 0.25]),
        Self::row(6, 64.0, 0.016_25, [0.25, 0.25, 0.25]),
    ];

    const fn row(
        level: i8,
        geometric_error: f64,
        texture_scale: f32,
        [r, g, b]: [f32; 3],
    ) -> Self {
        Self {
            level,
            geometric_error,
            texture_scale,
            debug_color: RGB { r, g, b },
        }
    }

    /// Every real level, finest first
    pub const fn all() -> &'static [Self] {
        &Self::TABLE
    }

    /// Unknown levels map to [`LevelOfDetail::NONE`]
    pub fn by_level(level: i8) -> Self {
        Self::TABLE
            .iter()
            .find(|lod| lod.level == level)
            .copied()
            .unwrap_or(Self::NONE)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.level < 0
    }
}
