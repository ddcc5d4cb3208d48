// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the feature extraction pipeline. Every variant that
/// concerns a file names it, so the user can fix the data and retry.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A frame, background or mask image that must exist is absent.
    #[error("missing file {path:?}")]
    MissingFile { path: PathBuf },

    #[error("could not decode image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image {path:?} is {actual:?} (WxH) but the background is {expected:?}")]
    FrameSizeMismatch {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// A cache record is short or malformed. `frame_index` is the 1-based
    /// record (line) number and `field_index` the 0-based field within it.
    #[error("cache file {path:?}: bad record for frame {frame_index}, field {field_index}: {reason}")]
    Parse {
        path: PathBuf,
        frame_index: u32,
        field_index: usize,
        reason: String,
    },

    /// A collaborator supplied an invalid rectangle, threshold or run
    /// parameter.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalysisError::Io { path: path.into(), source }
    }
}
