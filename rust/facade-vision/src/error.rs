// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the facade pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rectification,
    Annotation,
    Detection,
    Metrics,
    Layout,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Rectification => "rectification",
            Stage::Annotation => "annotation",
            Stage::Detection => "detection",
            Stage::Metrics => "metrics",
            Stage::Layout => "layout",
        };
        f.write_str(name)
    }
}

/// Coarse error taxonomy used by callers to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or insufficient input; never worth retrying.
    Input,
    /// Degenerate geometry; aborts the current request only.
    Geometry,
    /// Artifact read/write failure.
    Io,
}

/// Errors that can occur while processing a facade.
#[derive(Debug, Error)]
pub enum Error {
    /// Fewer than three distinct correspondence points.
    #[error("insufficient correspondence points: need at least 3 distinct points, got {got}")]
    InsufficientPoints { got: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed transform record, annotation or detection document.
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Collinear points, singular systems, points at infinity.
    #[error("degenerate geometry in {stage} stage: {reason}")]
    DegenerateGeometry { stage: Stage, reason: String },

    #[error("{stage} stage produced no clusters")]
    EmptyClusters { stage: Stage },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Artifact could not be published; no partial file is left behind.
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot encode image {path}: {source}")]
    ImageEncode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("DXF serialization failed: {0}")]
    Dxf(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn degenerate(stage: Stage, reason: impl Into<String>) -> Self {
        Error::DegenerateGeometry {
            stage,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InsufficientPoints { .. }
            | Error::InvalidInput(_)
            | Error::ImageDecode { .. }
            | Error::Config(_)
            | Error::Parse { .. } => ErrorKind::Input,
            Error::DegenerateGeometry { .. } | Error::EmptyClusters { .. } => ErrorKind::Geometry,
            Error::Read { .. }
            | Error::Write { .. }
            | Error::ImageEncode { .. }
            | Error::Dxf(_)
            | Error::Json(_) => ErrorKind::Io,
        }
    }

    /// Stage recorded on geometry errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::DegenerateGeometry { stage, .. } | Error::EmptyClusters { stage } => Some(*stage),
            _ => None,
        }
    }
}
