// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Turns footprint and glTF inputs into a level-of-detail 3D Tiles tileset.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

pub mod batch;
pub mod config;
pub mod convert;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod geometry;
pub mod halfedge;
pub mod lod;
pub mod scene;
pub mod tiler;
pub mod tileset;

pub use self::{
    config::TilerOptions,
    convert::convert_inputs,
    diagnostics::Diagnostics,
    error::{
        Result,
        TilerError,
    },
    export::Exporter,
    tiler::{
        Tiler,
        TilingOutput,
    },
    tileset::Tileset,
};
