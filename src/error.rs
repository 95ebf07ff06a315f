// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Error types for the tiler.
//!
//! Three layers, from most to least recoverable:
//! - [`TopologyError`]: a half-edge build, collapse or cut was rejected. The
//!   mesh is left untouched and the caller moves on.
//! - [`ConvertError`]: a single feature/instance could not become a scene.
//!   It is skipped and recorded in the run diagnostics.
//! - [`TilerError`]: everything else. Only `Content` is isolated by the tiler;
//!   the remaining variants abort the run.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for fatal-capable tiler operations
pub type Result<T> = std::result::Result<T, TilerError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("index buffer length {0} is not a multiple of three")]
    NonTriangleFace(usize),

    #[error("vertex index {index} out of range ({vertices} vertices)")]
    IndexOutOfRange { index: u32, vertices: usize },

    #[error("directed edge {0} -> {1} appears in more than one face")]
    DuplicateEdge(u32, u32),

    #[error("collapse rejected: {0}")]
    Collapse(&'static str),

    #[error("stale element referenced during {0}")]
    Dangling(&'static str),

    #[error("inconsistent linkage: {0}")]
    Inconsistent(&'static str),
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("polygon needs at least three distinct points, got {0}")]
    DegeneratePolygon(usize),

    #[error("polygon could not be triangulated")]
    Tessellation,

    #[error("unsupported spatial reference: {0}")]
    UnsupportedSrs(String),

    #[error("unsupported geometry: {0}")]
    Unsupported(String),

    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TilerError {
    /// Mandatory configuration is missing
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Configuration is present but unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// No instance survived conversion
    #[error("nothing to tile")]
    EmptyInput,

    #[error("tile tree invariant broken at {code}: {reason}")]
    InvalidTree {
        code:   String,
        reason: &'static str,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("png encoding error on {path}: {source}")]
    Png {
        path:   PathBuf,
        source: png::EncodingError,
    },

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("conversion failed for {input}: {source}")]
    Convert {
        input:  String,
        source: ConvertError,
    },

    /// A single (node, LOD) unit failed; isolated by the tiler
    #[error("content {name} failed: {source}")]
    Content {
        name:   String,
        source: TopologyError,
    },
}

impl TilerError {
    pub fn io(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the run can continue past this error
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Content { .. })
    }
}
